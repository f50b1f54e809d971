//! Record-oriented export: query results re-emitted as a JSON array of
//! objects on standard output.

use std::io::{self, Write};

use duckdb::types::{TimeUnit, Value as DbValue};
use duckdb::Connection;
use jiff::civil::{Date, Time};
use jiff::{Timestamp, ToSpan};
use log::warn;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Number, Value};

use super::error::ExportError;
use super::payload::{self, MinimalErrorPayload};
use super::{Connect, Connector, Context, Outcome};

/// A materialized query result: rows of JSON scalars aligned with the column
/// names.  Discarded after serialization.
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Zip each row with the column names, preserving column order.
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// Run `query` and materialize the full result set together with its column
/// names.
pub fn run_query(conn: &Connection, query: &str) -> Result<ResultSet, ExportError> {
    let mut stmt = conn.prepare(query)?;
    let mut columns: Vec<String> = Vec::new();
    let mut records: Vec<Vec<Value>> = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        if columns.is_empty() {
            columns = row.as_ref().column_names();
        }
        let mut record = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            record.push(to_json_value(row.get_ref(i)?.to_owned()));
        }
        records.push(record);
    }
    drop(rows);
    if columns.is_empty() {
        columns = stmt.column_names();
    }
    Ok(ResultSet {
        columns,
        rows: records,
    })
}

/// Serialize a result set as a compact JSON array of records.
pub fn to_json(rs: &ResultSet) -> Result<String, ExportError> {
    Ok(serde_json::to_string(&rs.to_records())?)
}

/// Map one DuckDB value onto a JSON scalar.  Dates and timestamps become ISO
/// strings; anything without a natural JSON shape becomes its debug string.
fn to_json_value(value: DbValue) -> Value {
    match value {
        DbValue::Null => Value::Null,
        DbValue::Boolean(b) => Value::Bool(b),
        DbValue::TinyInt(n) => Value::from(n),
        DbValue::SmallInt(n) => Value::from(n),
        DbValue::Int(n) => Value::from(n),
        DbValue::BigInt(n) => Value::from(n),
        DbValue::HugeInt(n) => match i64::try_from(n) {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(n.to_string()),
        },
        DbValue::UTinyInt(n) => Value::from(n),
        DbValue::USmallInt(n) => Value::from(n),
        DbValue::UInt(n) => Value::from(n),
        DbValue::UBigInt(n) => Value::from(n),
        DbValue::Float(x) => float_value(x as f64),
        DbValue::Double(x) => float_value(x),
        DbValue::Decimal(d) => match d.to_f64().and_then(Number::from_f64) {
            Some(n) => Value::Number(n),
            None => Value::String(d.to_string()),
        },
        DbValue::Text(s) => Value::String(s),
        DbValue::Blob(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
        DbValue::Date32(days) => date_value(days),
        DbValue::Timestamp(unit, v) => timestamp_value(unit, v),
        DbValue::Time64(unit, v) => time_value(unit, v),
        DbValue::Enum(s) => Value::String(s),
        DbValue::List(xs) | DbValue::Array(xs) => {
            Value::Array(xs.into_iter().map(to_json_value).collect())
        }
        DbValue::Struct(fields) => {
            let mut map = Map::new();
            for (k, v) in fields.iter() {
                map.insert(k.clone(), to_json_value(v.clone()));
            }
            Value::Object(map)
        }
        DbValue::Union(inner) => to_json_value(*inner),
        other => Value::String(format!("{:?}", other)),
    }
}

fn float_value(x: f64) -> Value {
    // JSON has no NaN or infinities
    match Number::from_f64(x) {
        Some(n) => Value::Number(n),
        None => Value::String(x.to_string()),
    }
}

fn date_value(days: i32) -> Value {
    // DuckDB dates are days since the Unix epoch; jiff counts from year 0
    match Date::ZERO.checked_add((719_528 + days).days()) {
        Ok(date) => Value::String(date.to_string()),
        Err(_) => Value::String(format!("{} days since epoch", days)),
    }
}

fn timestamp_value(unit: TimeUnit, v: i64) -> Value {
    let micros = unit.to_micros(v);
    match Timestamp::from_microsecond(micros) {
        Ok(ts) => Value::String(ts.strftime("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Err(_) => Value::String(format!("{} us since epoch", micros)),
    }
}

fn time_value(unit: TimeUnit, v: i64) -> Value {
    let micros = unit.to_micros(v);
    let (hour, rem) = (micros / 3_600_000_000, micros % 3_600_000_000);
    let (minute, rem) = (rem / 60_000_000, rem % 60_000_000);
    let (second, us) = (rem / 1_000_000, rem % 1_000_000);
    match Time::new(hour as i8, minute as i8, second as i8, (us * 1_000) as i32) {
        Ok(t) => Value::String(t.strftime("%H:%M:%S%.f").to_string()),
        Err(_) => Value::String(format!("{} us since midnight", micros)),
    }
}

/// JSON variant of the tiered export pipeline.
pub struct JsonExporter {
    db: Connector,
}

impl JsonExporter {
    pub fn new(token: Option<String>, database: &str) -> Result<JsonExporter, ExportError> {
        Ok(JsonExporter {
            db: Connector::new(token, database)?,
        })
    }

    /// Use a non-default connection opener.  Tests rely on this to run the
    /// pipeline against local in-memory databases.
    pub fn with_opener(
        token: Option<String>,
        database: &str,
        opener: Box<dyn Connect>,
    ) -> Result<JsonExporter, ExportError> {
        Ok(JsonExporter {
            db: Connector::with_opener(token, database, opener)?,
        })
    }

    /// Run `query` and print the result set as JSON on stdout.  Never fails:
    /// every error downgrades to a payload, see [Outcome].
    pub fn execute(&mut self, query: &str, context: Option<&Context>) -> Outcome {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.execute_to(query, context, &mut out)
    }

    /// Same as [JsonExporter::execute], writing to `out` instead of stdout.
    pub fn execute_to(
        &mut self,
        query: &str,
        context: Option<&Context>,
        out: &mut dyn Write,
    ) -> Outcome {
        match self.try_execute(query, out) {
            Ok(()) => Outcome::Success,
            Err(e) => self.emit_error(&e, context, out),
        }
    }

    fn try_execute(&mut self, query: &str, out: &mut dyn Write) -> Result<(), ExportError> {
        let conn = self.db.connect()?;
        let rs = run_query(conn, query)?;
        // buffer fully, then write once
        let text = to_json(&rs)?;
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    fn emit_error(
        &mut self,
        error: &ExportError,
        context: Option<&Context>,
        out: &mut dyn Write,
    ) -> Outcome {
        warn!("{}: {}; emitting error payload", error.kind(), error);
        match self.write_error(error, context, out) {
            Ok(()) => Outcome::Level1,
            Err(nested) => match write_minimal_error(error, &nested, out) {
                Ok(()) => Outcome::Level2,
                Err(_) => {
                    // fixed output only; a write failure here is swallowed
                    let _ = out.write_all(b"[]");
                    let _ = out.flush();
                    Outcome::Level3
                }
            },
        }
    }

    fn write_error(
        &self,
        error: &ExportError,
        context: Option<&Context>,
        out: &mut dyn Write,
    ) -> Result<(), ExportError> {
        let payload = payload::error_object(error, &self.db.database, context);
        let text =
            serde_json::to_string(&vec![payload]).map_err(|e| ExportError::Fallback(e.to_string()))?;
        out.write_all(text.as_bytes())
            .map_err(|e| ExportError::Fallback(e.to_string()))?;
        out.flush()
            .map_err(|e| ExportError::Fallback(e.to_string()))?;
        Ok(())
    }
}

fn write_minimal_error(
    original: &ExportError,
    nested: &ExportError,
    out: &mut dyn Write,
) -> Result<(), ExportError> {
    let payload = MinimalErrorPayload::json(original, nested);
    let text =
        serde_json::to_string(&[payload]).map_err(|e| ExportError::Fallback(e.to_string()))?;
    out.write_all(text.as_bytes())
        .map_err(|e| ExportError::Fallback(e.to_string()))?;
    out.flush()
        .map_err(|e| ExportError::Fallback(e.to_string()))?;
    Ok(())
}

/// Convenience entry point for a loader script: query `database` and print
/// the result set as JSON on stdout.  Only a missing credential can error.
pub fn run_json_loader(
    query: &str,
    database: &str,
    context: Option<&Context>,
) -> Result<Outcome, ExportError> {
    let mut exporter = JsonExporter::new(None, database)?;
    Ok(exporter.execute(query, context))
}
