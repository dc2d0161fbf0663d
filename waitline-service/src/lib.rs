use diesel_async::{
    async_connection_wrapper::AsyncConnectionWrapper, AsyncConnection, AsyncPgConnection,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenvy::dotenv;

pub mod clock;
pub mod config;
pub mod events;
pub mod jobs;
pub mod models;
pub mod schema;
pub mod services;
pub mod store;

pub const DEQUEUED_CHANNEL: &str = "dequeued-channel";
pub const CHECKING_IN_EXPIRED_CHANNEL: &str = "checking-in-expired-channel";
pub const QUEUE_POSITIONS_CHANNEL: &str = "queue-positions-channel";
pub const QUEUE_POSITIONS_CACHE_KEY: &str = "queued-party-positions";

pub const DEQUEUE_QUEUE: &str = "dequeue";
pub const CHECKIN_EXPIRED_QUEUE: &str = "checkin-expired";
pub const SEAT_EXPIRED_QUEUE: &str = "seat-expired";

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

pub async fn establish_connection() -> Result<AsyncPgConnection, diesel::ConnectionError> {
    dotenv().ok();

    let database_url = config::database_url();
    AsyncPgConnection::establish(&database_url).await
}

pub async fn establish_redis(config: &config::Config) -> Result<redis::aio::ConnectionManager, redis::RedisError> {
    let client = redis::Client::open(config.redis_url())?;
    client.get_connection_manager().await
}

pub async fn run_migrations() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let conn = establish_connection().await?;
    let mut wrapper: AsyncConnectionWrapper<AsyncPgConnection> = AsyncConnectionWrapper::from(conn);
    tokio::task::spawn_blocking(
        move || -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            wrapper.run_pending_migrations(MIGRATIONS)?;
            Ok(())
        },
    )
    .await??;
    Ok(())
}
