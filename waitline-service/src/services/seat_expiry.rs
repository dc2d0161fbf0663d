use chrono::Duration;
use diesel_async::AsyncPgConnection;
use serde_json::json;
use tracing::info;

use super::ServiceError;
use crate::{jobs::JobQueue, store::PartyStore, DEQUEUE_QUEUE};

/// Removes parties whose service interval elapsed. No broadcast: seated
/// clients' event streams already ended when they checked in.
pub struct SeatExpiryService {
    store: PartyStore,
    jobs: JobQueue,
}

impl SeatExpiryService {
    pub fn new(store: PartyStore, jobs: JobQueue) -> Self {
        Self { store, jobs }
    }

    pub async fn run(&mut self, conn: &mut AsyncPgConnection) -> Result<(), ServiceError> {
        let party_ids = self.store.remove_expired_seats(conn).await?;
        if party_ids.is_empty() {
            return Ok(());
        }

        info!(count = party_ids.len(), "cleared expired seats");
        self.jobs
            .enqueue(DEQUEUE_QUEUE, "dequeue-parties", json!({}), Duration::zero())
            .await?;

        Ok(())
    }
}
