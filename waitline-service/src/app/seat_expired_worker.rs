use std::time::Duration;

use tracing::{error, info};
use waitline_service::{
    config::Config, establish_connection, establish_redis, jobs::JobQueue, run_migrations,
    services::SeatExpiryService, store::PartyStore, SEAT_EXPIRED_QUEUE,
};

pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::load();
    run_migrations().await?;

    let conn = &mut establish_connection().await?;
    let redis = establish_redis(&config).await?;

    let store = PartyStore::new(&config);
    let mut service = SeatExpiryService::new(store, JobQueue::new(redis.clone()));
    let mut jobs = JobQueue::new(redis);

    // Clear seats that expired while the worker was down.
    info!(queue = SEAT_EXPIRED_QUEUE, "worker starting");
    if let Err(err) = service.run(conn).await {
        error!(error = %err, "catch-up seat expiry run failed");
    }

    loop {
        match jobs.pop_due(SEAT_EXPIRED_QUEUE).await {
            Ok(Some(job)) => {
                info!(job = %job.name, id = %job.id, "processing job");
                if let Err(err) = service.run(conn).await {
                    error!(error = %err, "seat expiry run failed");
                }
            }
            Ok(None) => tokio::time::sleep(Duration::from_secs(1)).await,
            Err(err) => {
                error!(error = %err, "failed to poll job queue");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
