//! Registration manager errors.

use campus_id::EventId;
use thiserror::Error;

use crate::db::StoreError;

/// Every way a registration manager operation can fail.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("event {0} not found")]
    NotFound(EventId),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("event {0} is full")]
    Full(EventId),

    #[error("already registered for event {0}")]
    AlreadyRegistered(EventId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The conditional write kept losing to concurrent registrations while
    /// the event still had room. Safe to retry.
    #[error("event {0} changed concurrently; retry")]
    Conflict(EventId),

    #[error("store unavailable: {0}")]
    Unavailable(#[from] StoreError),
}

impl RegistrationError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistrationError::NotFound(_) => "event_not_found",
            RegistrationError::Forbidden(_) => "forbidden",
            RegistrationError::Full(_) => "event_full",
            RegistrationError::AlreadyRegistered(_) => "already_registered",
            RegistrationError::InvalidArgument(_) => "invalid_argument",
            RegistrationError::Conflict(_) => "conflict",
            RegistrationError::Unavailable(_) => "store_unavailable",
        }
    }
}
