use chrono::Duration;
use diesel_async::AsyncPgConnection;
use serde_json::json;
use tracing::info;

use super::ServiceError;
use crate::{
    events::{CheckinExpiredMessage, EventPublisher},
    jobs::JobQueue,
    store::PartyStore,
    DEQUEUE_QUEUE,
};

/// Purges parties that let their check-in window lapse and re-triggers
/// dequeue for the capacity they released.
pub struct CheckinExpiryService {
    store: PartyStore,
    publisher: EventPublisher,
    jobs: JobQueue,
}

impl CheckinExpiryService {
    pub fn new(store: PartyStore, publisher: EventPublisher, jobs: JobQueue) -> Self {
        Self {
            store,
            publisher,
            jobs,
        }
    }

    pub async fn run(&mut self, conn: &mut AsyncPgConnection) -> Result<(), ServiceError> {
        let party_ids = self.store.delete_checkin_expired(conn).await?;
        if party_ids.is_empty() {
            return Ok(());
        }

        info!(count = party_ids.len(), "purged overdue check-ins");
        self.publisher
            .checkin_expired(&CheckinExpiredMessage { party_ids })
            .await?;
        self.jobs
            .enqueue(DEQUEUE_QUEUE, "dequeue-parties", json!({}), Duration::zero())
            .await?;

        Ok(())
    }
}
