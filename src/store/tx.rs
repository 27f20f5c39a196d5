use std::collections::HashMap;

use chrono::NaiveDate;
use tokio::sync::OwnedMutexGuard;

use crate::limits::*;
use crate::model::*;

use super::{Store, StoreError};

/// Fields of a booking row; the id, status and timestamp are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub client_id: Id,
    pub studio_id: Id,
    pub schedule_id: Id,
    pub service_id: Id,
    pub service_name: String,
    pub instructor_id: Option<Id>,
    pub total_price: f64,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub payment_group: String,
    pub booking_id: Id,
    pub owner_id: Id,
    pub initial_amount: f64,
    pub total_amount: f64,
}

/// One atomic unit of work against the [`Store`].
///
/// Inserts are staged locally and checked against the committed tables plus
/// everything staged so far. `commit` publishes the write-set as one WAL record;
/// `rollback`, or dropping the transaction, discards it. Advisory locks taken
/// at `begin` are held until the transaction ends either way.
pub struct Transaction<'a> {
    store: &'a Store,
    staged: Vec<Event>,
    schedules: HashMap<Id, Schedule>,
    bookings: HashMap<Id, Booking>,
    reservations: HashMap<(Id, NaiveDate), DayReservations>,
    _guards: Vec<OwnedMutexGuard<()>>,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub(super) fn new(store: &'a Store, guards: Vec<OwnedMutexGuard<()>>) -> Self {
        Self {
            store,
            staged: Vec::new(),
            schedules: HashMap::new(),
            bookings: HashMap::new(),
            reservations: HashMap::new(),
            _guards: guards,
            finished: false,
        }
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    // ── Reads through the transaction's view ─────────────

    pub async fn studio(&self, id: Id) -> Option<Studio> {
        self.store.studio(id).await
    }

    pub async fn instrument(&self, id: Id) -> Option<Instrument> {
        self.store.instrument(id).await
    }

    /// Active reservations overlapping `span`: committed ones plus those staged
    /// earlier in this transaction.
    pub async fn reservations(&self, instrument_id: Id, date: NaiveDate, span: &Span) -> Vec<Reservation> {
        let mut found: Vec<Reservation> = self
            .store
            .read_tables()
            .await
            .active_reservations(instrument_id, date, span)
            .copied()
            .collect();
        if let Some(day) = self.reservations.get(&(instrument_id, date)) {
            found.extend(day.overlapping(span).copied());
        }
        found
    }

    pub async fn reserved_quantity(&self, instrument_id: Id, date: NaiveDate, span: &Span) -> u32 {
        self.reservations(instrument_id, date, span)
            .await
            .iter()
            .map(|r| r.quantity)
            .sum()
    }

    /// Date, span and activity of a booking's slot, staged or committed.
    async fn booking_slot(&self, booking_id: Id) -> Option<(NaiveDate, Span, bool)> {
        if let Some(booking) = self.bookings.get(&booking_id) {
            let schedule = self.schedules.get(&booking.schedule_id)?;
            return Some((schedule.date, schedule.span, booking.status.is_active()));
        }
        let tables = self.store.read_tables().await;
        let active = tables.bookings.get(&booking_id)?.status.is_active();
        let (date, span) = tables.booking_slot(booking_id)?;
        Some((date, span, active))
    }

    async fn booking_exists(&self, booking_id: Id) -> bool {
        self.bookings.contains_key(&booking_id)
            || self.store.read_tables().await.bookings.contains_key(&booking_id)
    }

    // ── Staged writes ────────────────────────────────────

    pub async fn insert_schedule(
        &mut self,
        studio_id: Id,
        owner_id: Id,
        date: NaiveDate,
        span: Span,
    ) -> Result<Id, StoreError> {
        {
            let tables = self.store.read_tables().await;
            if !tables.studios.contains_key(&studio_id) {
                return Err(StoreError::ForeignKey(format!(
                    "schedule references missing studio {studio_id}"
                )));
            }
            if tables.schedule_slot_taken(studio_id, date, span).is_some() {
                return Err(StoreError::UniqueViolation(format!(
                    "studio {studio_id} already has a schedule on {date} for that time range"
                )));
            }
        }
        let duplicate = self
            .schedules
            .values()
            .any(|s| s.studio_id == studio_id && s.date == date && s.span == span);
        if duplicate {
            return Err(StoreError::UniqueViolation(format!(
                "time range on {date} requested twice for studio {studio_id}"
            )));
        }

        let schedule = Schedule {
            id: self.store.next_schedule_id(),
            studio_id,
            owner_id,
            date,
            span,
            status: ScheduleStatus::Reserved,
            created_at: now_ms(),
        };
        let id = schedule.id;
        self.schedules.insert(id, schedule.clone());
        self.staged.push(Event::ScheduleInserted(schedule));
        Ok(id)
    }

    pub async fn insert_booking(&mut self, new: NewBooking) -> Result<Id, StoreError> {
        let schedule_studio = match self.schedules.get(&new.schedule_id) {
            Some(schedule) => Some(schedule.studio_id),
            None => self
                .store
                .read_tables()
                .await
                .schedules
                .get(&new.schedule_id)
                .map(|s| s.studio_id),
        };
        match schedule_studio {
            None => {
                return Err(StoreError::ForeignKey(format!(
                    "booking references missing schedule {}",
                    new.schedule_id
                )));
            }
            Some(studio_id) if studio_id != new.studio_id => {
                return Err(StoreError::ForeignKey(format!(
                    "schedule {} belongs to studio {studio_id}, not {}",
                    new.schedule_id, new.studio_id
                )));
            }
            Some(_) => {}
        }
        if !new.total_price.is_finite() || new.total_price < 0.0 {
            return Err(StoreError::InvalidValue("booking total must be a non-negative number".into()));
        }

        let booking = Booking {
            id: self.store.next_booking_id(),
            client_id: new.client_id,
            studio_id: new.studio_id,
            schedule_id: new.schedule_id,
            service_id: new.service_id,
            service_name: new.service_name,
            instructor_id: new.instructor_id,
            total_price: new.total_price,
            status: BookingStatus::Pending,
            created_at: now_ms(),
        };
        let id = booking.id;
        self.bookings.insert(id, booking.clone());
        self.staged.push(Event::BookingInserted(booking));
        Ok(id)
    }

    pub async fn insert_addon(
        &mut self,
        booking_id: Id,
        instrument_id: Id,
        quantity: u32,
        line_price: f64,
    ) -> Result<Id, StoreError> {
        let Some((date, span, active)) = self.booking_slot(booking_id).await else {
            return Err(StoreError::ForeignKey(format!(
                "add-on references missing booking {booking_id}"
            )));
        };
        if self.store.instrument(instrument_id).await.is_none() {
            return Err(StoreError::ForeignKey(format!(
                "add-on references missing instrument {instrument_id}"
            )));
        }
        if quantity == 0 || quantity > MAX_INSTRUMENT_QUANTITY {
            return Err(StoreError::InvalidValue(format!("add-on quantity {quantity} out of range")));
        }
        if !line_price.is_finite() || line_price < 0.0 {
            return Err(StoreError::InvalidValue("add-on price must be a non-negative number".into()));
        }

        let addon = BookingAddon {
            id: self.store.next_addon_id(),
            booking_id,
            instrument_id,
            quantity,
            line_price,
        };
        let id = addon.id;
        if active {
            self.reservations
                .entry((instrument_id, date))
                .or_default()
                .insert(Reservation {
                    addon_id: id,
                    booking_id,
                    span,
                    quantity,
                });
        }
        self.staged.push(Event::AddonInserted(addon));
        Ok(id)
    }

    pub async fn insert_payment(&mut self, new: NewPayment) -> Result<Id, StoreError> {
        if !self.booking_exists(new.booking_id).await {
            return Err(StoreError::ForeignKey(format!(
                "payment references missing booking {}",
                new.booking_id
            )));
        }
        let amounts_valid = [new.initial_amount, new.total_amount]
            .iter()
            .all(|a| a.is_finite() && *a >= 0.0);
        if !amounts_valid {
            return Err(StoreError::InvalidValue("payment amounts must be non-negative numbers".into()));
        }

        let payment = Payment {
            id: self.store.next_payment_id(),
            payment_group: new.payment_group,
            booking_id: new.booking_id,
            owner_id: new.owner_id,
            initial_amount: new.initial_amount,
            total_amount: new.total_amount,
            status: PaymentStatus::Pending,
            created_at: now_ms(),
        };
        let id = payment.id;
        self.staged.push(Event::PaymentInserted(payment));
        Ok(id)
    }

    pub async fn insert_notification(
        &mut self,
        owner_id: Id,
        client_id: Id,
        booking_id: Id,
        message: String,
    ) -> Result<Id, StoreError> {
        if !self.booking_exists(booking_id).await {
            return Err(StoreError::ForeignKey(format!(
                "notification references missing booking {booking_id}"
            )));
        }
        if message.is_empty() || message.len() > MAX_MESSAGE_LEN {
            return Err(StoreError::InvalidValue("notification message length out of range".into()));
        }

        let notification = Notification {
            id: self.store.next_notification_id(),
            owner_id,
            client_id,
            booking_id,
            message,
            read: false,
            created_at: now_ms(),
        };
        let id = notification.id;
        self.staged.push(Event::NotificationInserted(notification));
        Ok(id)
    }

    // ── End of transaction ───────────────────────────────

    /// Make every staged row durable and visible at once.
    pub async fn commit(mut self) -> Result<(), StoreError> {
        self.finished = true;
        let events = std::mem::take(&mut self.staged);
        self.store.commit_events(events).await
    }

    pub fn rollback(mut self) {
        self.finished = true;
        tracing::debug!("transaction rolled back, {} staged events discarded", self.staged.len());
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.staged.is_empty() {
            tracing::debug!(
                "transaction dropped before commit, {} staged events discarded",
                self.staged.len()
            );
        }
    }
}
