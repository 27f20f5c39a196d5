use std::fmt;

use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::Id;
use crate::store::{NewPayment, Transaction};

use super::error::BookingError;

/// Shared by every payment row produced from one booking request:
/// `PG-<UTC yyyymmddHHMMSS>-<ULID>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaymentGroupId(String);

impl PaymentGroupId {
    pub fn generate() -> Self {
        Self::at(Utc::now())
    }

    fn at(now: DateTime<Utc>) -> Self {
        Self(format!("PG-{}-{}", now.format("%Y%m%d%H%M%S"), Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Amounts owed for one booking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookingCharge {
    pub booking_id: Id,
    pub initial_amount: f64,
    pub total_amount: f64,
}

/// Stage one pending payment row. Not idempotent: calling twice stages two rows.
pub async fn record_payment(
    tx: &mut Transaction<'_>,
    group: &PaymentGroupId,
    owner_id: Id,
    charge: BookingCharge,
) -> Result<Id, BookingError> {
    tx.insert_payment(NewPayment {
        payment_group: group.as_str().to_string(),
        booking_id: charge.booking_id,
        owner_id,
        initial_amount: charge.initial_amount,
        total_amount: charge.total_amount,
    })
    .await
    .map_err(|e| BookingError::PaymentInsertFailed(e.to_string()))
}

/// Stage one payment per booking under a single group.
pub async fn record_payments(
    tx: &mut Transaction<'_>,
    group: &PaymentGroupId,
    owner_id: Id,
    charges: &[BookingCharge],
) -> Result<Vec<Id>, BookingError> {
    let mut ids = Vec::with_capacity(charges.len());
    for charge in charges {
        ids.push(record_payment(tx, group, owner_id, *charge).await?);
    }
    Ok(ids)
}
