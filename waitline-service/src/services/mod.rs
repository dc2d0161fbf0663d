use thiserror::Error;

use crate::{events::EventError, jobs::JobError, store::StoreError};

pub mod checkin_expiry;
pub mod dequeue;
pub mod seat_expiry;

pub use checkin_expiry::CheckinExpiryService;
pub use dequeue::DequeueService;
pub use seat_expiry::SeatExpiryService;

/// Store kinds pass through unchanged; the worker owns logging.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Events(#[from] EventError),
    #[error(transparent)]
    Jobs(#[from] JobError),
}
