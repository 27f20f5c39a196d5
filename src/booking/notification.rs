use chrono::{DateTime, NaiveDate};

use crate::limits::MAX_MESSAGE_LEN;
use crate::model::{Id, Ms, Span};
use crate::store::Transaction;

use super::error::BookingError;

/// A booked service as it appears in the owner's notification.
#[derive(Debug, Clone, PartialEq)]
pub struct BookedService {
    pub service_name: String,
    pub date: NaiveDate,
    pub span: Span,
}

fn clock(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_default()
}

/// One message covering every service booked by the request.
pub fn compose_message(client_id: Id, booked: &[BookedService]) -> String {
    let services: Vec<String> = booked
        .iter()
        .map(|b| {
            format!(
                "{} on {} {}-{}",
                b.service_name,
                b.date,
                clock(b.span.start),
                clock(b.span.end)
            )
        })
        .collect();
    let mut message = format!(
        "New booking request from client {client_id}: {}",
        services.join("; ")
    );
    if message.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - 3;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
        message.push_str("...");
    }
    message
}

/// Stage one unread notification for the owner.
pub async fn enqueue(
    tx: &mut Transaction<'_>,
    owner_id: Id,
    client_id: Id,
    booking_id: Id,
    message: String,
) -> Result<Id, BookingError> {
    tx.insert_notification(owner_id, client_id, booking_id, message)
        .await
        .map_err(|e| BookingError::NotificationInsertFailed(e.to_string()))
}
