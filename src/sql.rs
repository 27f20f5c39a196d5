use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

use crate::model::*;

/// Tables readable with `SELECT *`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Studios,
    Instruments,
    Schedules,
    Bookings,
    BookingAddons,
    Payments,
    Notifications,
}

impl Table {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "studios" => Table::Studios,
            "instruments" => Table::Instruments,
            "schedules" => Table::Schedules,
            "bookings" => Table::Bookings,
            "booking_addons" => Table::BookingAddons,
            "payments" | "payment" => Table::Payments,
            "notifications" => Table::Notifications,
            _ => return None,
        })
    }

    /// Columns a `WHERE col = value` filter may name.
    pub fn filter_columns(self) -> &'static [&'static str] {
        match self {
            Table::Studios => &["id", "owner_id"],
            Table::Instruments => &["id", "studio_id"],
            Table::Schedules => &["id", "studio_id", "owner_id"],
            Table::Bookings => &["id", "client_id", "studio_id"],
            Table::BookingAddons => &["id", "booking_id", "instrument_id"],
            Table::Payments => &["id", "booking_id", "owner_id", "payment_group"],
            Table::Notifications => &["id", "owner_id", "client_id", "booking_id"],
        }
    }
}

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Id { column: &'static str, value: Id },
    PaymentGroup(String),
}

impl Filter {
    pub fn column(&self) -> &'static str {
        match self {
            Filter::Id { column, .. } => column,
            Filter::PaymentGroup(_) => "payment_group",
        }
    }
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertStudio {
        id: Id,
        owner_id: Option<Id>,
        name: String,
    },
    InsertInstrument {
        id: Id,
        studio_id: Id,
        name: String,
        quantity: u32,
        price_per_hour: f64,
        active: bool,
    },
    SetInstrumentActive {
        instrument_id: Id,
        active: bool,
    },
    SetBookingStatus {
        booking_id: Id,
        status: BookingStatus,
    },
    SubmitBooking {
        client_id: Id,
        payload: String,
    },
    Select {
        table: Table,
        filter: Option<Filter>,
    },
    SelectInstrumentAvailability {
        instrument_id: Id,
        date: NaiveDate,
    },
}

/// Parse one statement. `params` are the bound values for `$1`, `$2`, ...; they
/// are resolved as values and never spliced into the statement text.
pub fn parse_sql(sql: &str, params: &[Option<String>]) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }

    let args = Args { params };
    match stmt {
        Statement::Insert(insert) => parse_insert(insert, &args),
        Statement::Query(query) => parse_select(query, &args),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Name of the table a statement writes or reads, without resolving values.
/// Used to describe result columns before parameters are bound.
pub fn target_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Insert(insert) => insert_table_name(insert).ok(),
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => select
                .from
                .first()
                .and_then(|t| table_factor_name(&t.relation).ok()),
            _ => None,
        },
        _ => None,
    }
}

fn parse_insert(insert: &ast::Insert, args: &Args<'_>) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "studios" => {
            let row = Row::new(insert, &["id", "owner_id", "name"])?;
            Ok(Command::InsertStudio {
                id: args.i64(row.required("id")?)?,
                owner_id: args.opt_i64(row.optional("owner_id"))?,
                name: args.text(row.required("name")?)?,
            })
        }
        "instruments" => {
            let row = Row::new(
                insert,
                &["id", "studio_id", "name", "quantity", "price_per_hour", "active"],
            )?;
            let quantity = args.i64(row.required("quantity")?)?;
            Ok(Command::InsertInstrument {
                id: args.i64(row.required("id")?)?,
                studio_id: args.i64(row.required("studio_id")?)?,
                name: args.text(row.required("name")?)?,
                quantity: u32::try_from(quantity)
                    .map_err(|_| SqlError::Parse(format!("quantity {quantity} out of range")))?,
                price_per_hour: args.f64(row.required("price_per_hour")?)?,
                active: match row.optional("active") {
                    Some(expr) => args.bool(expr)?,
                    None => true,
                },
            })
        }
        "instrument_status" => {
            let row = Row::new(insert, &["instrument_id", "active"])?;
            Ok(Command::SetInstrumentActive {
                instrument_id: args.i64(row.required("instrument_id")?)?,
                active: args.bool(row.required("active")?)?,
            })
        }
        "booking_status" => {
            let row = Row::new(insert, &["booking_id", "status"])?;
            let status = args.text(row.required("status")?)?;
            Ok(Command::SetBookingStatus {
                booking_id: args.i64(row.required("booking_id")?)?,
                status: status.parse().map_err(SqlError::Parse)?,
            })
        }
        "booking_requests" => {
            let row = Row::new(insert, &["client_id", "payload"])?;
            Ok(Command::SubmitBooking {
                client_id: args.i64(row.required("client_id")?)?,
                payload: args.text(row.required("payload")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query, args: &Args<'_>) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }

    if table == "instrument_availability" {
        let (mut instrument_id, mut date) = (None, None);
        for (column, expr) in filters {
            match column.as_str() {
                "instrument_id" => instrument_id = Some(args.i64(expr)?),
                "date" => {
                    let text = args.text(expr)?;
                    date = Some(
                        NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                            .map_err(|e| SqlError::Parse(format!("bad date {text}: {e}")))?,
                    );
                }
                other => return Err(SqlError::UnknownColumn(other.to_string())),
            }
        }
        return Ok(Command::SelectInstrumentAvailability {
            instrument_id: instrument_id.ok_or(SqlError::MissingFilter("instrument_id"))?,
            date: date.ok_or(SqlError::MissingFilter("date"))?,
        });
    }

    let table = Table::from_name(&table).ok_or(SqlError::UnknownTable(table))?;
    let filter = match filters.as_slice() {
        [] => None,
        [(column, expr)] => Some(parse_filter(table, column, expr, args)?),
        _ => return Err(SqlError::Unsupported("more than one filter".into())),
    };
    Ok(Command::Select { table, filter })
}

fn parse_filter(table: Table, column: &str, expr: &Expr, args: &Args<'_>) -> Result<Filter, SqlError> {
    let Some(&column) = table.filter_columns().iter().find(|c| **c == column) else {
        return Err(SqlError::UnknownColumn(column.to_string()));
    };
    if column == "payment_group" {
        return Ok(Filter::PaymentGroup(args.text(expr)?));
    }
    Ok(Filter::Id {
        column,
        value: args.i64(expr)?,
    })
}

/// Flatten `a = x AND b = y` into (column, value expr) pairs.
fn collect_eq_filters<'e>(expr: &'e Expr, out: &mut Vec<(String, &'e Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((column, right));
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// The first VALUES row of an INSERT, addressable by column name. Without an
/// explicit column list, values map onto `default_columns` in order.
struct Row<'i> {
    columns: Vec<String>,
    values: &'i [Expr],
}

impl<'i> Row<'i> {
    fn new(insert: &'i ast::Insert, default_columns: &[&str]) -> Result<Self, SqlError> {
        let values = first_values_row(insert)?;
        let columns: Vec<String> = if insert.columns.is_empty() {
            default_columns.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if values.len() > columns.len() {
            return Err(SqlError::WrongArity(columns.len(), values.len()));
        }
        if let Some(unknown) = columns.iter().find(|c| !default_columns.contains(&c.as_str())) {
            return Err(SqlError::UnknownColumn(unknown.clone()));
        }
        Ok(Self { columns, values })
    }

    fn optional(&self, column: &str) -> Option<&'i Expr> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    fn required(&self, column: &'static str) -> Result<&'i Expr, SqlError> {
        self.optional(column).ok_or(SqlError::MissingColumn(column))
    }
}

fn first_values_row(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

/// A literal after placeholder resolution.
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Null,
    Bool(bool),
    Number(String),
    Text(String),
}

struct Args<'p> {
    params: &'p [Option<String>],
}

impl Args<'_> {
    fn scalar(&self, expr: &Expr) -> Result<Scalar, SqlError> {
        match expr {
            Expr::Value(ValueWithSpan { value, .. }) => match value {
                Value::Null => Ok(Scalar::Null),
                Value::Boolean(b) => Ok(Scalar::Bool(*b)),
                Value::Number(n, _) => Ok(Scalar::Number(n.to_string())),
                Value::SingleQuotedString(s) => Ok(Scalar::Text(s.clone())),
                Value::Placeholder(p) => self.placeholder(p),
                other => Err(SqlError::Parse(format!("unsupported literal {other}"))),
            },
            Expr::UnaryOp {
                op: ast::UnaryOperator::Minus,
                expr,
            } => match self.scalar(expr)? {
                Scalar::Number(n) => Ok(Scalar::Number(format!("-{n}"))),
                other => Err(SqlError::Parse(format!("cannot negate {other:?}"))),
            },
            Expr::Nested(inner) => self.scalar(inner),
            _ => Err(SqlError::Parse(format!("expected value, got {expr}"))),
        }
    }

    fn placeholder(&self, name: &str) -> Result<Scalar, SqlError> {
        let index: usize = name
            .strip_prefix('$')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| SqlError::Parse(format!("unsupported placeholder {name}")))?;
        match index.checked_sub(1).and_then(|i| self.params.get(i)) {
            Some(Some(text)) => Ok(Scalar::Text(text.clone())),
            Some(None) => Ok(Scalar::Null),
            None => Err(SqlError::UnboundParameter(index)),
        }
    }

    fn i64(&self, expr: &Expr) -> Result<i64, SqlError> {
        match self.scalar(expr)? {
            Scalar::Number(s) | Scalar::Text(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
            other => Err(SqlError::Parse(format!("expected integer, got {other:?}"))),
        }
    }

    fn opt_i64(&self, expr: Option<&Expr>) -> Result<Option<i64>, SqlError> {
        match expr {
            None => Ok(None),
            Some(expr) if self.scalar(expr)? == Scalar::Null => Ok(None),
            Some(expr) => self.i64(expr).map(Some),
        }
    }

    fn f64(&self, expr: &Expr) -> Result<f64, SqlError> {
        match self.scalar(expr)? {
            Scalar::Number(s) | Scalar::Text(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number {s}: {e}"))),
            other => Err(SqlError::Parse(format!("expected number, got {other:?}"))),
        }
    }

    fn bool(&self, expr: &Expr) -> Result<bool, SqlError> {
        match self.scalar(expr)? {
            Scalar::Bool(b) => Ok(b),
            Scalar::Text(s) | Scalar::Number(s) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Scalar::Null => Err(SqlError::Parse("expected bool, got NULL".into())),
        }
    }

    fn text(&self, expr: &Expr) -> Result<String, SqlError> {
        match self.scalar(expr)? {
            Scalar::Text(s) => Ok(s),
            other => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("expected at most {0} values, got {1}")]
    WrongArity(usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("no value bound for parameter ${0}")]
    UnboundParameter(usize),
}
