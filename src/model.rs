use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Unix milliseconds of a wall-clock instant read as UTC.
pub type Ms = i64;

/// Row identifier. Studios and instruments are keyed by the caller; every other
/// table draws from its own sequence.
pub type Id = i64;

pub const MS_PER_HOUR: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Duration in fractional hours.
    pub fn hours(&self) -> f64 {
        self.duration_ms() as f64 / MS_PER_HOUR as f64
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Statuses ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Active bookings hold studio time and instrument inventory.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        match (self, next) {
            (BookingStatus::Cancelled, _) => false,
            (BookingStatus::Confirmed, BookingStatus::Pending) => false,
            (a, b) => a != b,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" | "canceled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleStatus {
    /// Reserved, pending confirmation.
    Reserved,
    Confirmed,
    /// Time handed back; no longer counts against the uniqueness constraint.
    Released,
}

impl ScheduleStatus {
    pub fn for_booking(status: BookingStatus) -> Self {
        match status {
            BookingStatus::Pending => ScheduleStatus::Reserved,
            BookingStatus::Confirmed => ScheduleStatus::Confirmed,
            BookingStatus::Cancelled => ScheduleStatus::Released,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleStatus::Reserved => "reserved_pending_confirmation",
            ScheduleStatus::Confirmed => "confirmed",
            ScheduleStatus::Released => "released",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

// ── Rows ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Studio {
    pub id: Id,
    pub owner_id: Option<Id>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: Id,
    pub studio_id: Id,
    pub name: String,
    pub total_quantity: u32,
    pub price_per_hour: f64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Id,
    pub studio_id: Id,
    pub owner_id: Id,
    pub date: NaiveDate,
    pub span: Span,
    pub status: ScheduleStatus,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Id,
    pub client_id: Id,
    pub studio_id: Id,
    pub schedule_id: Id,
    pub service_id: Id,
    pub service_name: String,
    pub instructor_id: Option<Id>,
    pub total_price: f64,
    pub status: BookingStatus,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingAddon {
    pub id: Id,
    pub booking_id: Id,
    pub instrument_id: Id,
    pub quantity: u32,
    pub line_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Id,
    pub payment_group: String,
    pub booking_id: Id,
    pub owner_id: Id,
    pub initial_amount: f64,
    pub total_amount: f64,
    pub status: PaymentStatus,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Id,
    pub owner_id: Id,
    pub client_id: Id,
    pub booking_id: Id,
    pub message: String,
    pub read: bool,
    pub created_at: Ms,
}

/// One instrument reservation on a given day, derived from an add-on row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub addon_id: Id,
    pub booking_id: Id,
    pub span: Span,
    pub quantity: u32,
}

/// Add-on reservations for one instrument on one date, sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct DayReservations {
    pub reservations: Vec<Reservation>,
}

impl DayReservations {
    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    /// The iterator borrows only `self`; the query span may be a temporary.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> + use<'_> {
        let start = query.start;
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > start)
    }
}

/// The event types. A WAL record is the full, ordered write-set of one committed
/// transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    StudioCreated(Studio),
    InstrumentCreated(Instrument),
    InstrumentActivation { id: Id, active: bool },
    ScheduleInserted(Schedule),
    BookingInserted(Booking),
    AddonInserted(BookingAddon),
    PaymentInserted(Payment),
    NotificationInserted(Notification),
    BookingStatusChanged { id: Id, status: BookingStatus },
}

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}
