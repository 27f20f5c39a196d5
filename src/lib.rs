//! Studio booking server: an embedded store with a write-ahead log, an
//! atomic multi-slot booking service, and a PostgreSQL wire front end.

pub mod auth;
pub mod booking;
pub mod compactor;
pub mod config;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sql;
pub mod store;
pub mod wal;
pub mod wire;
