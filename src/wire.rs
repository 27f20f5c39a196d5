use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::sasl::scram::ScramAuth;
use pgwire::api::auth::sasl::SASLAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::StudiobookAuthSource;
use crate::booking::inventory::reserved_timeline;
use crate::booking::{BookingConfirmation, BookingError, BookingFailure, BookingPayload, BookingService};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, Filter, SqlError, Table};
use crate::store::{Store, StoreError};

pub struct StudiobookHandler {
    service: Arc<BookingService>,
    query_parser: Arc<StudiobookQueryParser>,
}

impl StudiobookHandler {
    pub fn new(service: Arc<BookingService>) -> Self {
        Self {
            service,
            query_parser: Arc::new(StudiobookQueryParser),
        }
    }

    fn store(&self) -> &Store {
        self.service.store()
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, sql_text: &str, params: &[Option<String>]) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql_text, params).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertStudio { id, owner_id, name } => {
                self.store()
                    .create_studio(id, owner_id, name)
                    .await
                    .map_err(store_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertInstrument {
                id,
                studio_id,
                name,
                quantity,
                price_per_hour,
                active,
            } => {
                self.store()
                    .create_instrument(Instrument {
                        id,
                        studio_id,
                        name,
                        total_quantity: quantity,
                        price_per_hour,
                        active,
                    })
                    .await
                    .map_err(store_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SetInstrumentActive {
                instrument_id,
                active,
            } => {
                self.store()
                    .set_instrument_active(instrument_id, active)
                    .await
                    .map_err(store_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SetBookingStatus { booking_id, status } => {
                self.store()
                    .set_booking_status(booking_id, status)
                    .await
                    .map_err(store_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SubmitBooking { client_id, payload } => {
                let request = match BookingPayload::from_json(&payload) {
                    Ok(payload) => payload.into_request(client_id),
                    // No studio to send the caller back to.
                    Err(e) => return Err(rejected(e, 0)),
                };
                let confirmation = self
                    .service
                    .submit(request)
                    .await
                    .map_err(|f| booking_err(&f))?;
                Ok(rows_response(confirmation_schema(), vec![confirmation_row(&confirmation)]))
            }
            Command::Select { table, filter } => {
                let rows = self.select_rows(table, filter.as_ref()).await;
                Ok(rows_response(table_schema(table), rows))
            }
            Command::SelectInstrumentAvailability {
                instrument_id,
                date,
            } => {
                let timeline = reserved_timeline(self.store(), instrument_id, date)
                    .await
                    .map_err(|e| rejected(e, 0))?;
                let rows = timeline
                    .into_iter()
                    .map(|u| {
                        vec![
                            Cell::Int(Some(instrument_id)),
                            Cell::Text(date.to_string()),
                            Cell::Text(clock(u.span.start)),
                            Cell::Text(clock(u.span.end)),
                            Cell::Int(Some(i64::from(u.reserved))),
                            Cell::Int(Some(i64::from(u.available))),
                        ]
                    })
                    .collect();
                Ok(rows_response(availability_schema(), rows))
            }
        }
    }

    async fn select_rows(&self, table: Table, filter: Option<&Filter>) -> Vec<Vec<Cell>> {
        let store = self.store();
        let keep = |fields: &[(&str, Option<Id>)], group: Option<&str>| match filter {
            None => true,
            Some(Filter::PaymentGroup(wanted)) => group == Some(wanted.as_str()),
            Some(Filter::Id { column, value }) => fields
                .iter()
                .any(|(name, v)| name == column && *v == Some(*value)),
        };

        match table {
            Table::Studios => store
                .studios()
                .await
                .into_iter()
                .filter(|s| keep(&[("id", Some(s.id)), ("owner_id", s.owner_id)], None))
                .map(|s| vec![Cell::Int(Some(s.id)), Cell::Int(s.owner_id), Cell::Text(s.name)])
                .collect(),
            Table::Instruments => store
                .instruments()
                .await
                .into_iter()
                .filter(|i| keep(&[("id", Some(i.id)), ("studio_id", Some(i.studio_id))], None))
                .map(|i| {
                    vec![
                        Cell::Int(Some(i.id)),
                        Cell::Int(Some(i.studio_id)),
                        Cell::Text(i.name),
                        Cell::Int(Some(i64::from(i.total_quantity))),
                        Cell::Float(i.price_per_hour),
                        Cell::Bool(i.active),
                    ]
                })
                .collect(),
            Table::Schedules => store
                .schedules()
                .await
                .into_iter()
                .filter(|s| {
                    keep(
                        &[
                            ("id", Some(s.id)),
                            ("studio_id", Some(s.studio_id)),
                            ("owner_id", Some(s.owner_id)),
                        ],
                        None,
                    )
                })
                .map(|s| {
                    vec![
                        Cell::Int(Some(s.id)),
                        Cell::Int(Some(s.studio_id)),
                        Cell::Int(Some(s.owner_id)),
                        Cell::Text(s.date.to_string()),
                        Cell::Text(clock(s.span.start)),
                        Cell::Text(clock(s.span.end)),
                        Cell::Text(s.status.as_str().to_string()),
                        Cell::Int(Some(s.created_at)),
                    ]
                })
                .collect(),
            Table::Bookings => store
                .bookings()
                .await
                .into_iter()
                .filter(|b| {
                    keep(
                        &[
                            ("id", Some(b.id)),
                            ("client_id", Some(b.client_id)),
                            ("studio_id", Some(b.studio_id)),
                        ],
                        None,
                    )
                })
                .map(|b| {
                    vec![
                        Cell::Int(Some(b.id)),
                        Cell::Int(Some(b.client_id)),
                        Cell::Int(Some(b.studio_id)),
                        Cell::Int(Some(b.schedule_id)),
                        Cell::Int(Some(b.service_id)),
                        Cell::Text(b.service_name),
                        Cell::Int(b.instructor_id),
                        Cell::Float(b.total_price),
                        Cell::Text(b.status.as_str().to_string()),
                        Cell::Int(Some(b.created_at)),
                    ]
                })
                .collect(),
            Table::BookingAddons => store
                .addons()
                .await
                .into_iter()
                .filter(|a| {
                    keep(
                        &[
                            ("id", Some(a.id)),
                            ("booking_id", Some(a.booking_id)),
                            ("instrument_id", Some(a.instrument_id)),
                        ],
                        None,
                    )
                })
                .map(|a| {
                    vec![
                        Cell::Int(Some(a.id)),
                        Cell::Int(Some(a.booking_id)),
                        Cell::Int(Some(a.instrument_id)),
                        Cell::Int(Some(i64::from(a.quantity))),
                        Cell::Float(a.line_price),
                    ]
                })
                .collect(),
            Table::Payments => store
                .payments()
                .await
                .into_iter()
                .filter(|p| {
                    keep(
                        &[
                            ("id", Some(p.id)),
                            ("booking_id", Some(p.booking_id)),
                            ("owner_id", Some(p.owner_id)),
                        ],
                        Some(p.payment_group.as_str()),
                    )
                })
                .map(|p| {
                    vec![
                        Cell::Int(Some(p.id)),
                        Cell::Text(p.payment_group),
                        Cell::Int(Some(p.booking_id)),
                        Cell::Int(Some(p.owner_id)),
                        Cell::Float(p.initial_amount),
                        Cell::Float(p.total_amount),
                        Cell::Text(p.status.as_str().to_string()),
                        Cell::Int(Some(p.created_at)),
                    ]
                })
                .collect(),
            Table::Notifications => store
                .notifications()
                .await
                .into_iter()
                .filter(|n| {
                    keep(
                        &[
                            ("id", Some(n.id)),
                            ("owner_id", Some(n.owner_id)),
                            ("client_id", Some(n.client_id)),
                            ("booking_id", Some(n.booking_id)),
                        ],
                        None,
                    )
                })
                .map(|n| {
                    vec![
                        Cell::Int(Some(n.id)),
                        Cell::Int(Some(n.owner_id)),
                        Cell::Int(Some(n.client_id)),
                        Cell::Int(Some(n.booking_id)),
                        Cell::Text(n.message),
                        Cell::Bool(n.read),
                        Cell::Int(Some(n.created_at)),
                    ]
                })
                .collect(),
        }
    }
}

// ── Result encoding ─────────────────────────────────────────────

enum Cell {
    Int(Option<i64>),
    Float(f64),
    Text(String),
    Bool(bool),
}

fn clock(ms: Ms) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Money in text results reads the way it was entered: `100`, not `100.0`.
fn float_text(v: f64) -> String {
    format!("{v}")
}

fn rows_response(schema: Vec<FieldInfo>, rows: Vec<Vec<Cell>>) -> Response {
    let schema = Arc::new(schema);
    let encoded: Vec<PgWireResult<_>> = rows
        .into_iter()
        .map(|row| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            for (cell, field) in row.into_iter().zip(schema.iter()) {
                match cell {
                    Cell::Int(v) => encoder.encode_field(&v)?,
                    Cell::Float(v) if field.format() == FieldFormat::Text => {
                        encoder.encode_field(&float_text(v))?
                    }
                    Cell::Float(v) => encoder.encode_field(&v)?,
                    Cell::Text(v) => encoder.encode_field(&v)?,
                    Cell::Bool(v) => encoder.encode_field(&v)?,
                }
            }
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(encoded)))
}

fn confirmation_row(c: &BookingConfirmation) -> Vec<Cell> {
    vec![
        Cell::Int(Some(c.first_booking_id)),
        Cell::Int(i64::try_from(c.booking_count).ok()),
        Cell::Text(c.payment_group.clone()),
        Cell::Float(c.total_amount),
        Cell::Float(c.initial_amount),
    ]
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn fields(columns: &[(&str, Type)]) -> Vec<FieldInfo> {
    columns.iter().map(|(name, ty)| field(name, ty.clone())).collect()
}

fn confirmation_schema() -> Vec<FieldInfo> {
    fields(&[
        ("first_booking_id", Type::INT8),
        ("booking_count", Type::INT8),
        ("payment_group", Type::VARCHAR),
        ("total_amount", Type::FLOAT8),
        ("initial_amount", Type::FLOAT8),
    ])
}

fn availability_schema() -> Vec<FieldInfo> {
    fields(&[
        ("instrument_id", Type::INT8),
        ("date", Type::VARCHAR),
        ("start_time", Type::VARCHAR),
        ("end_time", Type::VARCHAR),
        ("reserved", Type::INT8),
        ("available", Type::INT8),
    ])
}

fn table_schema(table: Table) -> Vec<FieldInfo> {
    match table {
        Table::Studios => fields(&[
            ("id", Type::INT8),
            ("owner_id", Type::INT8),
            ("name", Type::VARCHAR),
        ]),
        Table::Instruments => fields(&[
            ("id", Type::INT8),
            ("studio_id", Type::INT8),
            ("name", Type::VARCHAR),
            ("quantity", Type::INT8),
            ("price_per_hour", Type::FLOAT8),
            ("active", Type::BOOL),
        ]),
        Table::Schedules => fields(&[
            ("id", Type::INT8),
            ("studio_id", Type::INT8),
            ("owner_id", Type::INT8),
            ("date", Type::VARCHAR),
            ("start_time", Type::VARCHAR),
            ("end_time", Type::VARCHAR),
            ("status", Type::VARCHAR),
            ("created_at", Type::INT8),
        ]),
        Table::Bookings => fields(&[
            ("id", Type::INT8),
            ("client_id", Type::INT8),
            ("studio_id", Type::INT8),
            ("schedule_id", Type::INT8),
            ("service_id", Type::INT8),
            ("service_name", Type::VARCHAR),
            ("instructor_id", Type::INT8),
            ("total_price", Type::FLOAT8),
            ("status", Type::VARCHAR),
            ("created_at", Type::INT8),
        ]),
        Table::BookingAddons => fields(&[
            ("id", Type::INT8),
            ("booking_id", Type::INT8),
            ("instrument_id", Type::INT8),
            ("quantity", Type::INT8),
            ("line_price", Type::FLOAT8),
        ]),
        Table::Payments => fields(&[
            ("id", Type::INT8),
            ("payment_group", Type::VARCHAR),
            ("booking_id", Type::INT8),
            ("owner_id", Type::INT8),
            ("initial_amount", Type::FLOAT8),
            ("total_amount", Type::FLOAT8),
            ("status", Type::VARCHAR),
            ("created_at", Type::INT8),
        ]),
        Table::Notifications => fields(&[
            ("id", Type::INT8),
            ("owner_id", Type::INT8),
            ("client_id", Type::INT8),
            ("booking_id", Type::INT8),
            ("message", Type::VARCHAR),
            ("read", Type::BOOL),
            ("created_at", Type::INT8),
        ]),
    }
}

/// Result columns of a statement, known before its parameters are bound.
fn result_schema(sql_text: &str) -> Vec<FieldInfo> {
    match sql::target_table(sql_text).as_deref() {
        Some("booking_requests") => confirmation_schema(),
        Some("instrument_availability") => availability_schema(),
        Some(name) if sql_text.trim_start().to_uppercase().starts_with("SELECT") => {
            Table::from_name(name).map(table_schema).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

#[async_trait]
impl SimpleQueryHandler for StudiobookHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query, &[]).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StudiobookQueryParser;

#[async_trait]
impl QueryParser for StudiobookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for StudiobookHandler {
    type Statement = String;
    type QueryParser = StudiobookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let params: Vec<Option<String>> = portal
            .parameters
            .iter()
            .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
            .collect();
        self.run(&portal.statement.statement, &params).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

// ── Factory ──────────────────────────────────────────────────────

/// Handlers for one connection. The SASL handler keeps per-connection
/// handshake state, so a factory must not be shared between sockets.
pub struct StudiobookFactory {
    handler: Arc<StudiobookHandler>,
    auth_handler: Arc<SASLAuthStartupHandler<DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl StudiobookFactory {
    pub fn new(service: Arc<BookingService>, auth: Arc<StudiobookAuthSource>) -> Self {
        let mut scram = ScramAuth::new(auth);
        scram.set_iterations(StudiobookAuthSource::ITERATIONS);
        let param_provider = Arc::new(DefaultServerParameterProvider::default());
        Self {
            handler: Arc::new(StudiobookHandler::new(service)),
            auth_handler: Arc::new(SASLAuthStartupHandler::new(param_provider).with_scram(scram)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StudiobookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    service: Arc<BookingService>,
    auth: Arc<StudiobookAuthSource>,
    tls: Option<TlsAcceptor>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = StudiobookFactory::new(service, auth);
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn store_err(e: StoreError) -> PgWireError {
    let code = match &e {
        StoreError::NotFound { .. } => "P0002",
        StoreError::AlreadyExists { .. } | StoreError::UniqueViolation(_) => "23505",
        StoreError::ForeignKey(_) => "23503",
        StoreError::InvalidTransition { .. } => "55000",
        StoreError::InvalidValue(_) => "22023",
        StoreError::LockTimeout(_) => "55P03",
        StoreError::Wal(_) => "58030",
    };
    user_error(code, e.to_string())
}

fn booking_sqlstate(error: &BookingError) -> &'static str {
    match error {
        BookingError::InvalidRequest(_)
        | BookingError::InvalidInterval { .. }
        | BookingError::InvalidPricing(_)
        | BookingError::UnknownService(_) => "22023",
        BookingError::StudioHasNoOwner(_)
        | BookingError::InstrumentNotFound(_)
        | BookingError::InstrumentWrongStudio { .. }
        | BookingError::InstrumentInactive(_) => "23503",
        BookingError::InsufficientInventory { .. } | BookingError::ScheduleConflict(_) => "23P01",
        BookingError::LockTimeout(_) => "55P03",
        BookingError::BookingInsertFailed(_)
        | BookingError::AddonInsertFailed(_)
        | BookingError::PaymentInsertFailed(_)
        | BookingError::NotificationInsertFailed(_)
        | BookingError::NoBookingsCreated
        | BookingError::CommitFailed(_) => "P0001",
    }
}

/// The caller-facing message, followed by the kind, studio and log reference.
fn booking_err(failure: &BookingFailure) -> PgWireError {
    user_error(
        booking_sqlstate(&failure.error),
        format!(
            "{} [kind={} studio_id={} ref={}]",
            failure.message(),
            failure.kind(),
            failure.studio_id,
            failure.reference
        ),
    )
}

/// Fail a request the booking service never saw, logging its reference.
fn rejected(error: BookingError, studio_id: Id) -> PgWireError {
    let failure = BookingFailure::new(error, studio_id);
    tracing::warn!(
        kind = failure.kind(),
        reference = %failure.reference,
        "request rejected: {}",
        failure.error
    );
    booking_err(&failure)
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_amounts_render_without_fraction() {
        assert_eq!(float_text(100.0), "100");
        assert_eq!(float_text(25.0), "25");
        assert_eq!(float_text(62.5), "62.5");
        assert_eq!(float_text(0.1 + 0.2), "0.30000000000000004");
    }

    #[tokio::test]
    async fn float_cells_encode_as_plain_text() {
        let response = rows_response(
            vec![field("total_amount", Type::FLOAT8)],
            vec![vec![Cell::Float(100.0)]],
        );
        let Response::Query(mut query) = response else {
            panic!("expected rows");
        };
        let rows: Vec<_> = futures::StreamExt::collect(query.data_rows()).await;
        let row = rows.into_iter().next().unwrap().unwrap();
        assert_eq!(row.field_count, 1);
        // [i32 length]["100"]
        assert_eq!(&row.data[..], &[0, 0, 0, 3, b'1', b'0', b'0']);
    }

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM bookings"), 0);
        assert_eq!(
            count_params("INSERT INTO booking_requests (client_id, payload) VALUES ($1, $2)"),
            2
        );
        assert_eq!(count_params("SELECT $3, $1"), 3);
    }

    #[test]
    fn describe_schemas_follow_target_table() {
        let names = |schema: Vec<FieldInfo>| -> Vec<String> {
            schema.iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(
            names(result_schema(
                "INSERT INTO booking_requests (client_id, payload) VALUES ($1, $2)"
            ))[0],
            "first_booking_id"
        );
        assert_eq!(names(result_schema("SELECT * FROM payments")).len(), 8);
        assert!(result_schema("INSERT INTO studios VALUES (1, 2, 'x')").is_empty());
    }

    #[test]
    fn booking_errors_carry_kind_and_reference() {
        let failure = BookingFailure::new(BookingError::UnknownService(4), 9);
        let PgWireError::UserError(info) = booking_err(&failure) else {
            panic!("expected user error");
        };
        let rendered = format!("{info:?}");
        assert!(rendered.contains("An error occurred while processing your booking"));
        assert!(rendered.contains("kind=UnknownService"));
        assert!(rendered.contains("studio_id=9"));
        assert!(rendered.contains(&failure.reference.to_string()));
        assert!(rendered.contains("22023"));
    }
}
