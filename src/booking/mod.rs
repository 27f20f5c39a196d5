//! Multi-slot booking: request validation, interval parsing, pricing,
//! inventory checks and the transaction that ties them together.

mod error;
pub mod interval;
pub mod inventory;
pub mod notification;
mod orchestrator;
pub mod payment;
pub mod pricing;
mod request;
#[cfg(test)]
mod tests;

pub use error::{BookingError, BookingFailure};
pub use orchestrator::{BookingConfirmation, BookingService};
pub use request::{
    merge_selections, BookingPayload, BookingRequest, InstrumentSelection, ServiceDescriptor,
    SlotRequest,
};
