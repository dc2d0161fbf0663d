use diesel_async::AsyncPgConnection;
use serde_json::json;
use tracing::info;

use super::ServiceError;
use crate::{
    clock,
    events::{DequeuedMessage, EventPublisher, QueuePositionsMessage},
    jobs::JobQueue,
    store::PartyStore,
    CHECKIN_EXPIRED_QUEUE,
};

/// Admits the longest affordable prefix of the queue, schedules the check-in
/// deadline, and refreshes the queue-positions snapshot.
pub struct DequeueService {
    store: PartyStore,
    publisher: EventPublisher,
    jobs: JobQueue,
}

impl DequeueService {
    pub fn new(store: PartyStore, publisher: EventPublisher, jobs: JobQueue) -> Self {
        Self {
            store,
            publisher,
            jobs,
        }
    }

    pub async fn run(&mut self, conn: &mut AsyncPgConnection) -> Result<(), ServiceError> {
        let available = self.store.available_seats(conn).await?;

        if available > 0 {
            let party_ids = self.store.parties_to_dequeue(conn, available).await?;
            if !party_ids.is_empty() {
                if let Some(expiration) = self.store.set_checking_in(conn, &party_ids).await? {
                    info!(count = party_ids.len(), "admitted parties into check-in window");
                    self.jobs
                        .enqueue(
                            CHECKIN_EXPIRED_QUEUE,
                            "expire-check-ins",
                            json!({}),
                            clock::delay_until(expiration),
                        )
                        .await?;
                    self.publisher
                        .dequeued(&DequeuedMessage {
                            party_ids,
                            checking_in_expiration: expiration,
                        })
                        .await?;
                }
            }
        }

        let positions = self.store.current_queue_positions(conn).await?;
        self.publisher
            .queue_positions(&QueuePositionsMessage {
                queued_parties: positions.into_iter().map(Into::into).collect(),
            })
            .await?;

        Ok(())
    }
}
