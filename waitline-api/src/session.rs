use axum::{extract::Request, middleware::Next, response::Response};
use chrono::{DateTime, Utc};
use tower_sessions::Session;
use tracing::warn;

use crate::error::ApiError;

pub const PARTY_ID_KEY: &str = "partyID";
pub const PARTY_SIZE_KEY: &str = "partySize";
pub const STATUS_KEY: &str = "status";
pub const INITIAL_QUEUE_POSITION_KEY: &str = "initialQueuePosition";
pub const SEAT_EXPIRES_AT_KEY: &str = "seatExpiresAt";

pub const STATUS_SEATED: &str = "seated";

/// Typed view over the cookie session's party keys.
pub struct PartySession {
    session: Session,
}

impl PartySession {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub async fn party_id(&self) -> Result<Option<String>, ApiError> {
        self.session
            .get(PARTY_ID_KEY)
            .await
            .map_err(|_| ApiError::Internal)
    }

    pub async fn party_size(&self) -> Result<Option<i32>, ApiError> {
        self.session
            .get(PARTY_SIZE_KEY)
            .await
            .map_err(|_| ApiError::Internal)
    }

    /// Seeds the session right after the party joined the queue.
    pub async fn seed(
        &self,
        party_id: &str,
        size: i32,
        initial_position: i64,
    ) -> Result<(), ApiError> {
        self.session
            .insert(PARTY_ID_KEY, party_id)
            .await
            .map_err(|_| ApiError::Internal)?;
        self.session
            .insert(PARTY_SIZE_KEY, size)
            .await
            .map_err(|_| ApiError::Internal)?;
        self.session
            .insert(INITIAL_QUEUE_POSITION_KEY, initial_position)
            .await
            .map_err(|_| ApiError::Internal)?;
        Ok(())
    }

    pub async fn mark_seated(&self, seat_expires_at: DateTime<Utc>) -> Result<(), ApiError> {
        self.session
            .insert(STATUS_KEY, STATUS_SEATED)
            .await
            .map_err(|_| ApiError::Internal)?;
        self.session
            .insert(SEAT_EXPIRES_AT_KEY, seat_expires_at)
            .await
            .map_err(|_| ApiError::Internal)?;
        Ok(())
    }

    pub async fn clear(&self) {
        self.session.clear().await;
    }
}

/// Pre-step run before every handler: a session whose seated party has been
/// served is stale and must not gate a new join.
pub async fn expire_served_sessions(session: Session, request: Request, next: Next) -> Response {
    let status: Option<String> = match session.get(STATUS_KEY).await {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "session status unreadable");
            None
        }
    };
    let seat_expires_at: Option<DateTime<Utc>> =
        session.get(SEAT_EXPIRES_AT_KEY).await.unwrap_or(None);

    if is_served(status.as_deref(), seat_expires_at, Utc::now()) {
        session.clear().await;
    }

    next.run(request).await
}

fn is_served(
    status: Option<&str>,
    seat_expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    status == Some(STATUS_SEATED) && seat_expires_at.map(|t| t <= now).unwrap_or(false)
}
