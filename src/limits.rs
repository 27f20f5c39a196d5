//! Hard caps on request shape and stored values.

pub const MAX_SLOTS_PER_REQUEST: usize = 32;
pub const MAX_SELECTIONS_PER_SLOT: usize = 16;
pub const MAX_SERVICES_PER_REQUEST: usize = 64;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_MESSAGE_LEN: usize = 4096;
pub const MAX_INSTRUMENT_QUANTITY: u32 = 10_000;
/// Upper bound on a booking request payload accepted over the wire.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;
