use chrono::NaiveDate;

use crate::model::*;
use crate::store::{Store, Transaction};

use super::error::BookingError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InventoryQuery {
    pub instrument_id: Id,
    pub studio_id: Id,
    pub date: NaiveDate,
    pub span: Span,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Availability {
    pub instrument: Instrument,
    /// Sum of quantities held by active bookings overlapping the window.
    pub reserved: u32,
    pub available: u32,
}

/// Resolve the instrument and check that `quantity` units are free for the
/// window, counting add-ons committed by others and staged earlier in `tx`.
pub async fn check_availability(
    tx: &Transaction<'_>,
    query: &InventoryQuery,
) -> Result<Availability, BookingError> {
    let instrument = tx
        .instrument(query.instrument_id)
        .await
        .ok_or(BookingError::InstrumentNotFound(query.instrument_id))?;
    if instrument.studio_id != query.studio_id {
        return Err(BookingError::InstrumentWrongStudio {
            instrument_id: instrument.id,
            studio_id: query.studio_id,
        });
    }
    if !instrument.active {
        return Err(BookingError::InstrumentInactive(instrument.id));
    }

    let reserved = tx
        .reserved_quantity(instrument.id, query.date, &query.span)
        .await;
    let available = instrument.total_quantity.saturating_sub(reserved);
    if available < query.quantity {
        return Err(BookingError::InsufficientInventory {
            instrument_id: instrument.id,
            requested: query.quantity,
            available,
        });
    }

    Ok(Availability {
        instrument,
        reserved,
        available,
    })
}

/// A stretch of the day with constant reserved quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSpan {
    pub span: Span,
    pub reserved: u32,
    pub available: u32,
}

/// Weighted sweep line over reservations: the reserved quantity at every point
/// of the day, as maximal constant runs. Stretches with nothing reserved are
/// omitted.
pub fn usage_profile(reservations: &[Reservation], total_quantity: u32) -> Vec<UsageSpan> {
    // +quantity at start, -quantity at end
    let mut events: Vec<(Ms, i64)> = Vec::with_capacity(reservations.len() * 2);
    for r in reservations {
        events.push((r.span.start, i64::from(r.quantity)));
        events.push((r.span.end, -i64::from(r.quantity)));
    }
    // Ends sort before starts at the same instant: touching spans never stack.
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result: Vec<UsageSpan> = Vec::new();
    let mut level: i64 = 0;
    let mut prev: Option<Ms> = None;

    for (time, delta) in events {
        if let Some(start) = prev
            && time > start
            && level > 0
        {
            let reserved = u32::try_from(level).unwrap_or(u32::MAX);
            match result.last_mut() {
                Some(last) if last.span.end == start && last.reserved == reserved => {
                    last.span.end = time;
                }
                _ => result.push(UsageSpan {
                    span: Span::new(start, time),
                    reserved,
                    available: total_quantity.saturating_sub(reserved),
                }),
            }
        }
        level += delta;
        prev = Some(time);
    }

    result
}

/// Reserved quantity profile of one instrument for one day.
pub async fn reserved_timeline(
    store: &Store,
    instrument_id: Id,
    date: NaiveDate,
) -> Result<Vec<UsageSpan>, BookingError> {
    let instrument = store
        .instrument(instrument_id)
        .await
        .ok_or(BookingError::InstrumentNotFound(instrument_id))?;
    let reservations = store.instrument_reservations(instrument_id, date).await;
    Ok(usage_profile(&reservations, instrument.total_quantity))
}
