use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;

use crate::model::*;

use super::StoreError;

/// Committed state. Mutated only by `apply`, which runs after the owning
/// write-set is durable in the WAL.
#[derive(Default)]
pub struct Tables {
    pub studios: BTreeMap<Id, Studio>,
    pub instruments: BTreeMap<Id, Instrument>,
    pub schedules: BTreeMap<Id, Schedule>,
    pub bookings: BTreeMap<Id, Booking>,
    pub addons: BTreeMap<Id, BookingAddon>,
    pub payments: BTreeMap<Id, Payment>,
    pub notifications: BTreeMap<Id, Notification>,
    /// (instrument, date) → add-on reservations sorted by start.
    reservations: HashMap<(Id, NaiveDate), DayReservations>,
    /// Uniqueness index over live schedules: (studio, date, span) → schedule id.
    schedule_slots: HashMap<(Id, NaiveDate, Span), Id>,
}

impl Tables {
    pub fn schedule_slot_taken(&self, studio_id: Id, date: NaiveDate, span: Span) -> Option<Id> {
        self.schedule_slots.get(&(studio_id, date, span)).copied()
    }

    /// Sum of quantities reserved by active bookings overlapping `span` on `date`.
    #[cfg(test)]
    pub fn reserved_quantity(&self, instrument_id: Id, date: NaiveDate, span: &Span) -> u32 {
        self.active_reservations(instrument_id, date, span)
            .map(|r| r.quantity)
            .sum()
    }

    /// Reservations held by active bookings that overlap `span`.
    pub fn active_reservations<'a>(
        &'a self,
        instrument_id: Id,
        date: NaiveDate,
        span: &Span,
    ) -> impl Iterator<Item = &'a Reservation> + 'a {
        let span = *span;
        self.reservations
            .get(&(instrument_id, date))
            .into_iter()
            .flat_map(move |day| day.overlapping(&span))
            .filter(|r| {
                self.bookings
                    .get(&r.booking_id)
                    .is_some_and(|b| b.status.is_active())
            })
    }

    /// Constraint checks run by the WAL writer just before a write-set is made
    /// durable. Row-level foreign keys were checked when each row was staged;
    /// this re-checks what concurrent commits could have invalidated, including
    /// records accepted earlier in the same group commit (`batch`). On success
    /// the record's effects are added to `batch`; on failure `batch` is untouched.
    pub fn check_commit(&self, events: &[Event], batch: &mut CommitBatch) -> Result<(), StoreError> {
        let mut staged = batch.clone();
        for event in events {
            match event {
                Event::StudioCreated(studio) => {
                    if self.studios.contains_key(&studio.id) || !staged.studios.insert(studio.id) {
                        return Err(StoreError::AlreadyExists { table: "studios", id: studio.id });
                    }
                }
                Event::InstrumentCreated(instrument) => {
                    if self.instruments.contains_key(&instrument.id)
                        || !staged.instruments.insert(instrument.id)
                    {
                        return Err(StoreError::AlreadyExists {
                            table: "instruments",
                            id: instrument.id,
                        });
                    }
                    if !self.studios.contains_key(&instrument.studio_id)
                        && !staged.studios.contains(&instrument.studio_id)
                    {
                        return Err(StoreError::ForeignKey(format!(
                            "instrument {} references missing studio {}",
                            instrument.id, instrument.studio_id
                        )));
                    }
                }
                Event::InstrumentActivation { id, .. } => {
                    if !self.instruments.contains_key(id) && !staged.instruments.contains(id) {
                        return Err(StoreError::NotFound { table: "instruments", id: *id });
                    }
                }
                Event::ScheduleInserted(schedule) => {
                    let key = (schedule.studio_id, schedule.date, schedule.span);
                    let committed = self.schedule_slots.contains_key(&key)
                        && !staged.released_slots.contains(&key);
                    if committed || !staged.claimed_slots.insert(key) {
                        return Err(StoreError::UniqueViolation(format!(
                            "studio {} already has a schedule on {} for that time range",
                            schedule.studio_id, schedule.date
                        )));
                    }
                }
                Event::BookingInserted(booking) => {
                    staged.statuses.insert(booking.id, booking.status);
                }
                Event::BookingStatusChanged { id, status } => {
                    let current = match staged.statuses.get(id) {
                        Some(current) => *current,
                        None => {
                            self.bookings
                                .get(id)
                                .ok_or(StoreError::NotFound { table: "bookings", id: *id })?
                                .status
                        }
                    };
                    if !current.can_transition_to(*status) {
                        return Err(StoreError::InvalidTransition {
                            id: *id,
                            from: current,
                            to: *status,
                        });
                    }
                    staged.statuses.insert(*id, *status);
                    if ScheduleStatus::for_booking(*status) == ScheduleStatus::Released {
                        if let Some(key) = self.booking_slot_key(*id) {
                            staged.claimed_slots.remove(&key);
                            staged.released_slots.insert(key);
                        }
                    }
                }
                Event::AddonInserted(_) | Event::PaymentInserted(_) | Event::NotificationInserted(_) => {}
            }
        }
        *batch = staged;
        Ok(())
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::StudioCreated(studio) => {
                self.studios.insert(studio.id, studio.clone());
            }
            Event::InstrumentCreated(instrument) => {
                self.instruments.insert(instrument.id, instrument.clone());
            }
            Event::InstrumentActivation { id, active } => {
                if let Some(instrument) = self.instruments.get_mut(id) {
                    instrument.active = *active;
                }
            }
            Event::ScheduleInserted(schedule) => {
                if schedule.status != ScheduleStatus::Released {
                    self.schedule_slots
                        .insert((schedule.studio_id, schedule.date, schedule.span), schedule.id);
                }
                self.schedules.insert(schedule.id, schedule.clone());
            }
            Event::BookingInserted(booking) => {
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::AddonInserted(addon) => {
                if let Some((date, span)) = self.booking_slot(addon.booking_id) {
                    self.reservations
                        .entry((addon.instrument_id, date))
                        .or_default()
                        .insert(Reservation {
                            addon_id: addon.id,
                            booking_id: addon.booking_id,
                            span,
                            quantity: addon.quantity,
                        });
                }
                self.addons.insert(addon.id, addon.clone());
            }
            Event::PaymentInserted(payment) => {
                self.payments.insert(payment.id, payment.clone());
            }
            Event::NotificationInserted(notification) => {
                self.notifications.insert(notification.id, notification.clone());
            }
            Event::BookingStatusChanged { id, status } => self.apply_booking_status(*id, *status),
        }
    }

    fn apply_booking_status(&mut self, id: Id, status: BookingStatus) {
        let Some(booking) = self.bookings.get_mut(&id) else {
            return;
        };
        booking.status = status;
        let schedule_id = booking.schedule_id;

        if let Some(schedule) = self.schedules.get_mut(&schedule_id) {
            schedule.status = ScheduleStatus::for_booking(status);
            if schedule.status == ScheduleStatus::Released {
                self.schedule_slots
                    .remove(&(schedule.studio_id, schedule.date, schedule.span));
            }
        }
        if status == BookingStatus::Cancelled {
            for payment in self.payments.values_mut().filter(|p| p.booking_id == id) {
                payment.status = PaymentStatus::Cancelled;
            }
        }
    }

    /// Date and span of the schedule a booking occupies.
    pub fn booking_slot(&self, booking_id: Id) -> Option<(NaiveDate, Span)> {
        let booking = self.bookings.get(&booking_id)?;
        let schedule = self.schedules.get(&booking.schedule_id)?;
        Some((schedule.date, schedule.span))
    }

    fn booking_slot_key(&self, booking_id: Id) -> Option<(Id, NaiveDate, Span)> {
        let booking = self.bookings.get(&booking_id)?;
        let schedule = self.schedules.get(&booking.schedule_id)?;
        Some((schedule.studio_id, schedule.date, schedule.span))
    }

    /// Events that recreate the current state, parents before children.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::new();
        events.extend(self.studios.values().cloned().map(Event::StudioCreated));
        events.extend(self.instruments.values().cloned().map(Event::InstrumentCreated));
        events.extend(self.schedules.values().cloned().map(Event::ScheduleInserted));
        events.extend(self.bookings.values().cloned().map(Event::BookingInserted));
        events.extend(self.addons.values().cloned().map(Event::AddonInserted));
        events.extend(self.payments.values().cloned().map(Event::PaymentInserted));
        events.extend(self.notifications.values().cloned().map(Event::NotificationInserted));
        events
    }

    pub fn max_ids(&self) -> MaxIds {
        fn last<T>(map: &BTreeMap<Id, T>) -> Id {
            map.keys().next_back().copied().unwrap_or(0)
        }
        MaxIds {
            schedule: last(&self.schedules),
            booking: last(&self.bookings),
            addon: last(&self.addons),
            payment: last(&self.payments),
            notification: last(&self.notifications),
        }
    }
}

/// Effects of the records already accepted into one group commit, as far as
/// `check_commit` needs to see them.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    studios: HashSet<Id>,
    instruments: HashSet<Id>,
    claimed_slots: HashSet<(Id, NaiveDate, Span)>,
    released_slots: HashSet<(Id, NaiveDate, Span)>,
    statuses: HashMap<Id, BookingStatus>,
}

pub struct MaxIds {
    pub schedule: Id,
    pub booking: Id,
    pub addon: Id,
    pub payment: Id,
    pub notification: Id,
}
