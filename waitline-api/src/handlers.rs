use axum::{extract::State, http::StatusCode, response::Json};
use chrono::Duration;
use diesel_async::AsyncPgConnection;
use redis::aio::ConnectionManager;
use serde_json::json;
use tower_sessions::Session;
use tracing::error;
use utoipa::OpenApi;
use waitline_service::{
    clock,
    config::Config,
    establish_connection,
    jobs::JobQueue,
    store::{PartyStore, StoreError},
    DEQUEUE_QUEUE, SEAT_EXPIRED_QUEUE,
};

use crate::error::ApiError;
use crate::models::*;
use crate::session::PartySession;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: PartyStore,
    pub redis: ConnectionManager,
    pub redis_client: redis::Client,
}

pub async fn connect_db() -> Result<AsyncPgConnection, ApiError> {
    establish_connection().await.map_err(|err| {
        error!(error = %err, "database unavailable");
        ApiError::Internal
    })
}

#[utoipa::path(
    post,
    path = "/party",
    request_body = CreatePartyRequest,
    responses(
        (status = 201, description = "Party joined the queue", body = CreatePartyResponse),
        (status = 400, description = "Invalid name or size", body = ApiErrorResponse),
    ),
    tag = "party"
)]
pub async fn create_party(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<CreatePartyRequest>,
) -> Result<(StatusCode, Json<CreatePartyResponse>), ApiError> {
    let name = validate_name(&payload.name, state.config.max_party_name_length)?;
    let size = validate_size(payload.size, state.config.max_seats)?;

    let conn = &mut connect_db().await?;
    let created = state.store.create(conn, &name, size).await?;

    let party_session = PartySession::new(session);
    party_session
        .seed(&created.party_id, size, created.position_in_queue)
        .await?;

    enqueue_dequeue(&state).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatePartyResponse {
            party_id: created.party_id,
            position_in_queue: created.position_in_queue,
        }),
    ))
}

#[utoipa::path(
    patch,
    path = "/party/check-in",
    responses(
        (status = 200, description = "Party seated", body = MessageResponse),
        (status = 401, description = "No party session", body = ApiErrorResponse),
        (status = 400, description = "Check-in window closed", body = ApiErrorResponse),
    ),
    tag = "party"
)]
pub async fn check_in(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<MessageResponse>, ApiError> {
    let party_session = PartySession::new(session);
    let Some(party_id) = party_session.party_id().await? else {
        return Err(ApiError::NoSession);
    };
    let Some(size) = party_session.party_size().await? else {
        return Err(ApiError::NoSession);
    };

    let conn = &mut connect_db().await?;
    match state.store.set_seated(conn, &party_id, size).await {
        Ok(seat_expiration) => {
            let mut jobs = JobQueue::new(state.redis.clone());
            jobs.enqueue(
                SEAT_EXPIRED_QUEUE,
                "expire-seats",
                json!({}),
                clock::delay_until(seat_expiration),
            )
            .await
            .map_err(|err| {
                error!(error = %err, "failed to schedule seat expiry");
                ApiError::Internal
            })?;

            party_session.mark_seated(seat_expiration).await?;

            Ok(Json(MessageResponse {
                message: "Checked in, enjoy your meal".to_string(),
            }))
        }
        Err(StoreError::PartyNotFound) => {
            party_session.clear().await;
            Err(ApiError::PartyNotFound)
        }
        Err(err) => Err(err.into()),
    }
}

#[utoipa::path(
    delete,
    path = "/party",
    responses(
        (status = 204, description = "Party left the queue"),
        (status = 401, description = "No party session", body = ApiErrorResponse),
        (status = 400, description = "Party could not be deleted", body = ApiErrorResponse),
    ),
    tag = "party"
)]
pub async fn delete_party(
    State(state): State<AppState>,
    session: Session,
) -> Result<StatusCode, ApiError> {
    let party_session = PartySession::new(session);
    let Some(party_id) = party_session.party_id().await? else {
        return Err(ApiError::NoSession);
    };

    let conn = &mut connect_db().await?;
    match state.store.delete_by_party_id(conn, &party_id).await {
        Ok(()) => {
            party_session.clear().await;
            enqueue_dequeue(&state).await?;
            Ok(StatusCode::NO_CONTENT)
        }
        Err(StoreError::PartyNotFound) => {
            party_session.clear().await;
            Err(ApiError::PartyNotFound)
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

async fn enqueue_dequeue(state: &AppState) -> Result<(), ApiError> {
    let mut jobs = JobQueue::new(state.redis.clone());
    jobs.enqueue(DEQUEUE_QUEUE, "dequeue-parties", json!({}), Duration::zero())
        .await
        .map_err(|err| {
            error!(error = %err, "failed to enqueue dequeue job");
            ApiError::Internal
        })
}

fn validate_name(raw: &str, max_length: usize) -> Result<String, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Name is required".to_string()));
    }
    if name.chars().count() > max_length {
        return Err(ApiError::Validation(format!(
            "Name must be at most {max_length} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(ApiError::Validation(
            "Name contains unsupported characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn validate_size(size: i32, max_seats: i32) -> Result<i32, ApiError> {
    if !(1..=max_seats).contains(&size) {
        return Err(ApiError::Validation(format!(
            "Party size must be between 1 and {max_seats}"
        )));
    }
    Ok(size)
}

#[derive(OpenApi)]
#[openapi(
    paths(create_party, check_in, delete_party),
    components(schemas(
        CreatePartyRequest,
        CreatePartyResponse,
        MessageResponse,
        ApiErrorResponse
    )),
    tags(
        (name = "party", description = "Waitlist party lifecycle")
    ),
    info(
        title = "Waitline API",
        description = "Virtual waitlist coordinator",
        version = "1.0.0"
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(validate_name("  Ada  ", 30).unwrap(), "Ada");
        assert!(validate_name("", 30).is_err());
        assert!(validate_name("   ", 30).is_err());
        assert!(validate_name(&"x".repeat(31), 30).is_err());
        assert_eq!(validate_name(&"x".repeat(30), 30).unwrap().len(), 30);
    }

    #[test]
    fn control_characters_are_rejected() {
        assert!(validate_name("Ada\nLovelace", 30).is_err());
        assert!(validate_name("Ada\u{0007}", 30).is_err());
    }

    #[test]
    fn sizes_outside_capacity_are_rejected() {
        assert!(validate_size(0, 10).is_err());
        assert!(validate_size(11, 10).is_err());
        assert_eq!(validate_size(1, 10).unwrap(), 1);
        assert_eq!(validate_size(10, 10).unwrap(), 10);
    }
}
