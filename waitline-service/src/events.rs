use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    store::QueuePosition, CHECKING_IN_EXPIRED_CHANNEL, DEQUEUED_CHANNEL, QUEUE_POSITIONS_CACHE_KEY,
    QUEUE_POSITIONS_CHANNEL,
};

#[derive(Error, Debug)]
pub enum EventError {
    #[error("pub/sub unavailable")]
    Redis(#[from] redis::RedisError),
    #[error("message could not be encoded")]
    Encode(#[from] serde_json::Error),
}

/// Broadcast after a dequeue run flipped parties to `checking-in`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DequeuedMessage {
    #[serde(rename = "partyIDs")]
    pub party_ids: Vec<String>,
    #[serde(rename = "checkingInExpiration")]
    pub checking_in_expiration: DateTime<Utc>,
}

/// Broadcast after overdue checking-in parties were purged.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckinExpiredMessage {
    #[serde(rename = "partyIDs")]
    pub party_ids: Vec<String>,
}

/// Broadcast (and cached) snapshot of the queued parties.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueuePositionsMessage {
    #[serde(rename = "queuedParties")]
    pub queued_parties: Vec<QueuedParty>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueuedParty {
    #[serde(rename = "partyID")]
    pub party_id: String,
    pub row: i64,
}

impl From<QueuePosition> for QueuedParty {
    fn from(position: QueuePosition) -> Self {
        Self {
            party_id: position.party_id,
            row: position.row,
        }
    }
}

/// Fire-and-forget fan-out over the Redis channels, one method per event.
pub struct EventPublisher {
    conn: ConnectionManager,
}

impl EventPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn dequeued(&mut self, message: &DequeuedMessage) -> Result<(), EventError> {
        let payload = serde_json::to_string(message)?;
        let _: () = self.conn.publish(DEQUEUED_CHANNEL, payload).await?;
        Ok(())
    }

    pub async fn checkin_expired(
        &mut self,
        message: &CheckinExpiredMessage,
    ) -> Result<(), EventError> {
        let payload = serde_json::to_string(message)?;
        let _: () = self.conn.publish(CHECKING_IN_EXPIRED_CHANNEL, payload).await?;
        Ok(())
    }

    /// Caches the snapshot for late subscribers, then broadcasts it.
    pub async fn queue_positions(
        &mut self,
        message: &QueuePositionsMessage,
    ) -> Result<(), EventError> {
        let payload = serde_json::to_string(message)?;
        let _: () = self.conn.set(QUEUE_POSITIONS_CACHE_KEY, &payload).await?;
        let _: () = self.conn.publish(QUEUE_POSITIONS_CHANNEL, payload).await?;
        Ok(())
    }
}
