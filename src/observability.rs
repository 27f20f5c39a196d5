use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "studiobook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "studiobook_query_duration_seconds";

/// Counter: booking requests by outcome. Labels: outcome, kind.
pub const BOOKING_REQUESTS_TOTAL: &str = "studiobook_booking_requests_total";

/// Histogram: booking request latency in seconds, validation through commit.
pub const BOOKING_DURATION_SECONDS: &str = "studiobook_booking_duration_seconds";

/// Counter: booking rows made durable.
pub const BOOKINGS_CREATED_TOTAL: &str = "studiobook_bookings_created_total";

/// Histogram: time spent acquiring advisory locks at transaction begin.
pub const LOCK_WAIT_SECONDS: &str = "studiobook_lock_wait_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "studiobook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "studiobook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "studiobook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "studiobook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "studiobook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertStudio { .. } => "insert_studio",
        Command::InsertInstrument { .. } => "insert_instrument",
        Command::SetInstrumentActive { .. } => "set_instrument_active",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::SubmitBooking { .. } => "submit_booking",
        Command::Select { .. } => "select",
        Command::SelectInstrumentAvailability { .. } => "select_instrument_availability",
    }
}
