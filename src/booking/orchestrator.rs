use std::sync::Arc;
use std::time::Instant;

use crate::model::Id;
use crate::observability::{BOOKINGS_CREATED_TOTAL, BOOKING_DURATION_SECONDS, BOOKING_REQUESTS_TOTAL};
use crate::store::{NewBooking, Store, StoreError, Transaction};

use super::error::{BookingError, BookingFailure};
use super::interval;
use super::inventory::{check_availability, InventoryQuery};
use super::notification::{self, BookedService};
use super::payment::{record_payments, BookingCharge, PaymentGroupId};
use super::pricing::{price_slot, AddonLine};
use super::request::{merge_selections, BookingRequest};

/// What the caller gets back after a committed request.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingConfirmation {
    pub first_booking_id: Id,
    pub booking_count: usize,
    pub booking_ids: Vec<Id>,
    pub payment_group: String,
    pub total_amount: f64,
    pub initial_amount: f64,
}

/// Books every slot of a request in one transaction, or none of them.
pub struct BookingService {
    store: Arc<Store>,
}

impl BookingService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Run a request to a terminal state. On failure nothing it staged
    /// survives and the error carries a reference that also appears in the log.
    pub async fn submit(&self, request: BookingRequest) -> Result<BookingConfirmation, BookingFailure> {
        let started = Instant::now();
        let studio_id = request.studio_id;
        let client_id = request.client_id;
        let slots: Vec<String> = request
            .slots
            .iter()
            .map(|s| format!("{} {}-{} service {}", s.date, s.start, s.end, s.service_id))
            .collect();

        let result = self.run(request).await;
        metrics::histogram!(BOOKING_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        match result {
            Ok(confirmation) => {
                metrics::counter!(BOOKING_REQUESTS_TOTAL, "outcome" => "committed", "kind" => "none")
                    .increment(1);
                metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(confirmation.booking_count as u64);
                tracing::info!(
                    studio_id,
                    client_id,
                    slot_count = slots.len(),
                    first_booking_id = confirmation.first_booking_id,
                    payment_group = %confirmation.payment_group,
                    "booking request committed"
                );
                Ok(confirmation)
            }
            Err(error) => {
                let failure = BookingFailure::new(error, studio_id);
                metrics::counter!(
                    BOOKING_REQUESTS_TOTAL,
                    "outcome" => "rolled_back",
                    "kind" => failure.kind()
                )
                .increment(1);
                tracing::warn!(
                    studio_id,
                    client_id,
                    slot_count = slots.len(),
                    ?slots,
                    kind = failure.kind(),
                    reference = %failure.reference,
                    "booking request rolled back: {}",
                    failure.error
                );
                Err(failure)
            }
        }
    }

    async fn run(&self, request: BookingRequest) -> Result<BookingConfirmation, BookingError> {
        request.validate()?;

        let mut tx = self.store.begin(request.lock_keys()).await.map_err(|e| match e {
            StoreError::LockTimeout(key) => BookingError::LockTimeout(key),
            other => BookingError::CommitFailed(other.to_string()),
        })?;

        let studio_id = request.studio_id;
        let client_id = request.client_id;
        let mut owner_id: Option<Id> = None;
        let mut booking_ids = Vec::with_capacity(request.slots.len());
        let mut charges = Vec::with_capacity(request.slots.len());
        let mut booked = Vec::with_capacity(request.slots.len());

        for slot in &request.slots {
            let interval = interval::validate(&slot.date, &slot.start, &slot.end)?;
            let service = request
                .services
                .get(&slot.service_id)
                .ok_or(BookingError::UnknownService(slot.service_id))?;
            let owner = match owner_id {
                Some(id) => id,
                None => {
                    let id = resolve_owner(&tx, studio_id).await?;
                    owner_id = Some(id);
                    id
                }
            };

            // Check and price everything before writing the slot's rows.
            let selections = merge_selections(&slot.instruments);
            let mut addon_lines = Vec::with_capacity(selections.len());
            for selection in &selections {
                let availability = check_availability(
                    &tx,
                    &InventoryQuery {
                        instrument_id: selection.instrument_id,
                        studio_id,
                        date: interval.date,
                        span: interval.span,
                        quantity: selection.quantity,
                    },
                )
                .await?;
                addon_lines.push(AddonLine {
                    rate_per_hour: availability.instrument.price_per_hour,
                    quantity: selection.quantity,
                });
            }
            let price = price_slot(service.price_per_hour, interval.hours, &addon_lines)?;

            let schedule_id = tx
                .insert_schedule(studio_id, owner, interval.date, interval.span)
                .await
                .map_err(|e| match e {
                    StoreError::UniqueViolation(msg) => BookingError::ScheduleConflict(msg),
                    other => BookingError::BookingInsertFailed(other.to_string()),
                })?;
            let booking_id = tx
                .insert_booking(NewBooking {
                    client_id,
                    studio_id,
                    schedule_id,
                    service_id: slot.service_id,
                    service_name: service.name.clone(),
                    instructor_id: service.instructor_id,
                    total_price: price.total,
                })
                .await
                .map_err(|e| BookingError::BookingInsertFailed(e.to_string()))?;
            for (selection, line_price) in selections.iter().zip(&price.addon_lines) {
                tx.insert_addon(booking_id, selection.instrument_id, selection.quantity, *line_price)
                    .await
                    .map_err(|e| BookingError::AddonInsertFailed(e.to_string()))?;
            }

            booking_ids.push(booking_id);
            charges.push(BookingCharge {
                booking_id,
                initial_amount: price.initial,
                total_amount: price.total,
            });
            booked.push(BookedService {
                service_name: service.name.clone(),
                date: interval.date,
                span: interval.span,
            });
        }

        let (Some(owner), Some(&first_booking_id)) = (owner_id, booking_ids.first()) else {
            return Err(BookingError::NoBookingsCreated);
        };

        let group = PaymentGroupId::generate();
        record_payments(&mut tx, &group, owner, &charges).await?;

        let message = notification::compose_message(client_id, &booked);
        notification::enqueue(&mut tx, owner, client_id, first_booking_id, message).await?;

        tx.commit().await.map_err(BookingError::from_commit)?;

        Ok(BookingConfirmation {
            first_booking_id,
            booking_count: booking_ids.len(),
            booking_ids,
            payment_group: group.to_string(),
            total_amount: charges.iter().map(|c| c.total_amount).sum(),
            initial_amount: charges.iter().map(|c| c.initial_amount).sum(),
        })
    }
}

async fn resolve_owner(tx: &Transaction<'_>, studio_id: Id) -> Result<Id, BookingError> {
    tx.studio(studio_id)
        .await
        .and_then(|studio| studio.owner_id)
        .ok_or(BookingError::StudioHasNoOwner(studio_id))
}
