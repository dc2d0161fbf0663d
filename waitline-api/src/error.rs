use axum::{http::StatusCode, response::Json};
use serde_json::json;
use waitline_service::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("No party session")]
    NoSession,
    #[error("Party not found")]
    PartyNotFound,
    #[error("Party not found")]
    NotFound,
    #[error("Party could not be created")]
    CouldNotCreate,
    #[error("Party could not be deleted")]
    CouldNotDelete,
    #[error("Party could not check in")]
    CouldNotCheckIn,
    #[error("Internal server error")]
    Internal,
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PartyNotFound => ApiError::PartyNotFound,
            StoreError::PartyCouldNotBeCreated(_) => ApiError::CouldNotCreate,
            StoreError::PartyCouldNotBeDeleted(_) => ApiError::CouldNotDelete,
            StoreError::PartyCouldNotCheckIn(_) | StoreError::PartyCouldNotSetSeated(_) => {
                ApiError::CouldNotCheckIn
            }
            StoreError::PartyUnreadable(_)
            | StoreError::AvailableSeatsUnreadable(_)
            | StoreError::QueueUnreadable(_) => ApiError::Internal,
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::Validation(_)
            | ApiError::PartyNotFound
            | ApiError::CouldNotCreate
            | ApiError::CouldNotDelete
            | ApiError::CouldNotCheckIn => StatusCode::BAD_REQUEST,
            ApiError::NoSession => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
