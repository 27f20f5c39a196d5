use thiserror::Error;

use crate::model::{BookingStatus, Id};

use super::LockKey;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("{table} {id} not found")]
    NotFound { table: &'static str, id: Id },
    #[error("{table} {id} already exists")]
    AlreadyExists { table: &'static str, id: Id },
    #[error("foreign key violation: {0}")]
    ForeignKey(String),
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("booking {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Id,
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("timed out waiting for lock {0}")]
    LockTimeout(LockKey),
    #[error("WAL error: {0}")]
    Wal(String),
}
