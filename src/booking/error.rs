use thiserror::Error;
use ulid::Ulid;

use crate::model::Id;
use crate::store::{LockKey, StoreError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BookingError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid time range on {date} ({start} - {end})")]
    InvalidInterval {
        date: String,
        start: String,
        end: String,
    },
    #[error("invalid pricing: {0}")]
    InvalidPricing(String),
    #[error("unknown service {0}")]
    UnknownService(Id),
    #[error("studio {0} has no owner")]
    StudioHasNoOwner(Id),
    #[error("instrument {0} not found")]
    InstrumentNotFound(Id),
    #[error("instrument {instrument_id} does not belong to studio {studio_id}")]
    InstrumentWrongStudio { instrument_id: Id, studio_id: Id },
    #[error("instrument {0} is not available for booking")]
    InstrumentInactive(Id),
    #[error("instrument {instrument_id} has only {available} available, {requested} requested")]
    InsufficientInventory {
        instrument_id: Id,
        requested: u32,
        available: u32,
    },
    #[error("booking could not be saved: {0}")]
    BookingInsertFailed(String),
    #[error("instrument add-on could not be saved: {0}")]
    AddonInsertFailed(String),
    #[error("payment could not be saved: {0}")]
    PaymentInsertFailed(String),
    #[error("owner notification could not be saved: {0}")]
    NotificationInsertFailed(String),
    #[error("no bookings were created")]
    NoBookingsCreated,
    #[error("the selected time is already booked: {0}")]
    ScheduleConflict(String),
    #[error("timed out waiting for {0}")]
    LockTimeout(LockKey),
    #[error("booking could not be committed: {0}")]
    CommitFailed(String),
}

impl BookingError {
    /// Stable machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::InvalidRequest(_) => "InvalidRequest",
            BookingError::InvalidInterval { .. } => "InvalidInterval",
            BookingError::InvalidPricing(_) => "InvalidPricing",
            BookingError::UnknownService(_) => "UnknownService",
            BookingError::StudioHasNoOwner(_) => "StudioHasNoOwner",
            BookingError::InstrumentNotFound(_) => "InstrumentNotFound",
            BookingError::InstrumentWrongStudio { .. } => "InstrumentWrongStudio",
            BookingError::InstrumentInactive(_) => "InstrumentInactive",
            BookingError::InsufficientInventory { .. } => "InsufficientInventory",
            BookingError::BookingInsertFailed(_) => "BookingInsertFailed",
            BookingError::AddonInsertFailed(_) => "AddonInsertFailed",
            BookingError::PaymentInsertFailed(_) => "PaymentInsertFailed",
            BookingError::NotificationInsertFailed(_) => "NotificationInsertFailed",
            BookingError::NoBookingsCreated => "NoBookingsCreated",
            BookingError::ScheduleConflict(_) => "ScheduleConflict",
            BookingError::LockTimeout(_) => "LockTimeout",
            BookingError::CommitFailed(_) => "CommitFailed",
        }
    }

    /// Map a store failure at commit time. Constraint violations found by the
    /// re-check are conflicts; anything else is a commit failure.
    pub(crate) fn from_commit(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(msg) => BookingError::ScheduleConflict(msg),
            StoreError::LockTimeout(key) => BookingError::LockTimeout(key),
            other => BookingError::CommitFailed(other.to_string()),
        }
    }
}

const GENERIC_MESSAGE: &str = "An error occurred while processing your booking";

/// Caller-facing failure: the error, the studio to send the user back to, and a
/// reference that ties the response to the server log line.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingFailure {
    pub error: BookingError,
    pub studio_id: Id,
    pub reference: Ulid,
}

impl BookingFailure {
    pub fn new(error: BookingError, studio_id: Id) -> Self {
        Self {
            error,
            studio_id,
            reference: Ulid::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }

    pub fn message(&self) -> String {
        format!("{GENERIC_MESSAGE}: {}", self.error)
    }
}

impl std::fmt::Display for BookingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (ref {})", self.message(), self.reference)
    }
}

impl std::error::Error for BookingFailure {}
