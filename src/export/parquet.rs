//! Columnar export: query results re-emitted as a single parquet file on
//! standard output.
//!
//! The query runs through DuckDB's Arrow interface and the batches are
//! encoded in memory, so nothing ever touches the working directory.

use std::io::{self, Write};
use std::slice;
use std::sync::Arc;

use duckdb::arrow::array::{ArrayRef, StringArray};
use duckdb::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use duckdb::arrow::record_batch::RecordBatch;
use log::warn;
use parquet::arrow::ArrowWriter;

use super::error::ExportError;
use super::payload::{self, MinimalErrorPayload};
use super::{Connect, Connector, Context, Outcome};

/// Parquet variant of the tiered export pipeline.
pub struct ParquetExporter {
    db: Connector,
}

impl ParquetExporter {
    pub fn new(token: Option<String>, database: &str) -> Result<ParquetExporter, ExportError> {
        Ok(ParquetExporter {
            db: Connector::new(token, database)?,
        })
    }

    /// Use a non-default connection opener.  Tests rely on this to run the
    /// pipeline against local in-memory databases.
    pub fn with_opener(
        token: Option<String>,
        database: &str,
        opener: Box<dyn Connect>,
    ) -> Result<ParquetExporter, ExportError> {
        Ok(ParquetExporter {
            db: Connector::with_opener(token, database, opener)?,
        })
    }

    /// Run `query` and print the result set as parquet on stdout.  Never
    /// fails: every error downgrades to a payload, see [Outcome].
    pub fn execute(&mut self, query: &str, context: Option<&Context>) -> Outcome {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.execute_to(query, context, &mut out)
    }

    /// Same as [ParquetExporter::execute], writing to `out` instead of stdout.
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
        let mut stmt = conn.prepare(query)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        let schema = stmt.schema();
        // buffer fully, then write once
        let bytes = encode_parquet(schema, &batches)?;
        out.write_all(&bytes)?;
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
                    // absent output is the fixed last resort for a binary format
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
        let columns = payload::error_columns(error, &self.db.database, context);
        write_one_row(&columns, out)
    }
}

fn write_minimal_error(
    original: &ExportError,
    nested: &ExportError,
    out: &mut dyn Write,
) -> Result<(), ExportError> {
    let payload = MinimalErrorPayload::columnar(original, nested);
    write_one_row(&payload.columns(), out)
}

/// Encode a one-row, all-string parquet file from (column, value) pairs and
/// write it out.
fn write_one_row(columns: &[(String, String)], out: &mut dyn Write) -> Result<(), ExportError> {
    let (schema, batch) = one_row_batch(columns)?;
    let bytes = encode_parquet(schema, slice::from_ref(&batch))
        .map_err(|e| ExportError::Fallback(e.to_string()))?;
    out.write_all(&bytes)
        .map_err(|e| ExportError::Fallback(e.to_string()))?;
    out.flush()
        .map_err(|e| ExportError::Fallback(e.to_string()))?;
    Ok(())
}

fn one_row_batch(columns: &[(String, String)]) -> Result<(SchemaRef, RecordBatch), ExportError> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, _)| Field::new(name.as_str(), DataType::Utf8, false))
        .collect();
    let schema: SchemaRef = Arc::new(Schema::new(fields));
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|(_, value)| Arc::new(StringArray::from(vec![value.as_str()])) as ArrayRef)
        .collect();
    let batch = RecordBatch::try_new(Arc::clone(&schema), arrays)
        .map_err(|e| ExportError::Fallback(e.to_string()))?;
    Ok((schema, batch))
}

/// Encode batches into an in-memory parquet file.
fn encode_parquet(schema: SchemaRef, batches: &[RecordBatch]) -> Result<Vec<u8>, ExportError> {
    let mut buffer = Vec::with_capacity(64 * 1024);
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, None)?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;
    Ok(buffer)
}

/// Convenience entry point for a loader script: query `database` and print
/// the result set as parquet on stdout.  Only a missing credential can error.
pub fn run_parquet_loader(
    query: &str,
    database: &str,
    context: Option<&Context>,
) -> Result<Outcome, ExportError> {
    let mut exporter = ParquetExporter::new(None, database)?;
    Ok(exporter.execute(query, context))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io::{self, Write};
    use std::rc::Rc;

    use bytes::Bytes;
    use duckdb::arrow::array::{Array, Int32Array, StringArray};
    use duckdb::arrow::record_batch::RecordBatch;
    use duckdb::Connection;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use serde_json::json;

    use crate::export::parquet::*;
    use crate::export::{context_from, Connect, Outcome};

    struct Local {
        opens: Rc<Cell<usize>>,
    }

    impl Connect for Local {
        fn open(&self, _database: &str, _token: &str) -> duckdb::Result<Connection> {
            self.opens.set(self.opens.get() + 1);
            let conn = Connection::open_in_memory()?;
            conn.execute_batch(
                r"CREATE TABLE violations (cola_id INTEGER, violation_type VARCHAR);
                  INSERT INTO violations VALUES (101, 'MISSING_ABV');
                  INSERT INTO violations VALUES (102, 'BAD_NET_CONTENTS');
                ",
            )?;
            Ok(conn)
        }
    }

    fn exporter(opens: Rc<Cell<usize>>) -> ParquetExporter {
        ParquetExporter::with_opener(
            Some("token".to_string()),
            "ttb_public_data",
            Box::new(Local { opens }),
        )
        .unwrap()
    }

    struct FlakyWriter {
        failures_left: usize,
        written: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdout gone"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn read_back(bytes: Vec<u8>) -> Vec<RecordBatch> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
            .unwrap()
            .build()
            .unwrap();
        reader.map(|b| b.unwrap()).collect()
    }

    fn column_names(batch: &RecordBatch) -> Vec<String> {
        batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    fn string_column(batch: &RecordBatch, name: &str) -> String {
        let idx = batch.schema().index_of(name).unwrap();
        batch
            .column(idx)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap()
            .value(0)
            .to_string()
    }

    #[test]
    fn export_success() {
        let opens = Rc::new(Cell::new(0));
        let mut exporter = exporter(opens.clone());
        let mut out = Vec::new();
        let outcome = exporter.execute_to(
            "SELECT cola_id, violation_type FROM violations ORDER BY cola_id",
            None,
            &mut out,
        );
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(opens.get(), 1);
        assert_eq!(&out[0..4], b"PAR1");

        let batches = read_back(out);
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 2);
        let batch = &batches[0];
        assert_eq!(column_names(batch), vec!["cola_id", "violation_type"]);
        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap()
            .clone();
        assert_eq!(ids.value(0), 101);
        assert_eq!(ids.value(1), 102);
    }

    #[test]
    fn empty_result_set_is_a_valid_file() {
        let mut exporter = exporter(Rc::new(Cell::new(0)));
        let mut out = Vec::new();
        let outcome = exporter.execute_to(
            "SELECT cola_id FROM violations WHERE cola_id < 0",
            None,
            &mut out,
        );
        assert_eq!(outcome, Outcome::Success);

        let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(out)).unwrap();
        let names: Vec<String> = reader
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["cola_id"]);
    }

    #[test]
    fn query_error_becomes_level1_payload() {
        let mut exporter = exporter(Rc::new(Cell::new(0)));
        let mut out = Vec::new();
        let context = context_from(json!({"schema": "cola_images", "loader": "llm_summary"}));
        let outcome = exporter.execute_to("SELECT * FROM missing_table", Some(&context), &mut out);
        assert_eq!(outcome, Outcome::Level1);

        let batches = read_back(out);
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(
            column_names(batch),
            vec![
                "error",
                "error_type",
                "database",
                "context_schema",
                "context_loader"
            ]
        );
        assert!(string_column(batch, "error").contains("missing_table"));
        assert_eq!(string_column(batch, "error_type"), "QueryError");
        assert_eq!(string_column(batch, "database"), "ttb_public_data");
        assert_eq!(string_column(batch, "context_schema"), "cola_images");
    }

    #[test]
    fn fallback_to_minimal_payload() {
        let mut exporter = exporter(Rc::new(Cell::new(0)));
        let mut out = FlakyWriter {
            failures_left: 1,
            written: Vec::new(),
        };
        let outcome = exporter.execute_to("SELECT * FROM missing_table", None, &mut out);
        assert_eq!(outcome, Outcome::Level2);

        let batches = read_back(out.written);
        let batch = &batches[0];
        assert_eq!(
            column_names(batch),
            vec!["status", "original_error", "nested_error"]
        );
        assert_eq!(string_column(batch, "status"), "Error occurred");
        assert!(string_column(batch, "original_error").chars().count() <= 100);
    }

    #[test]
    fn fallback_to_absent_output() {
        let mut exporter = exporter(Rc::new(Cell::new(0)));
        let mut out = FlakyWriter {
            failures_left: usize::MAX,
            written: Vec::new(),
        };
        let outcome = exporter.execute_to("SELECT * FROM missing_table", None, &mut out);
        assert_eq!(outcome, Outcome::Level3);
        assert!(out.written.is_empty());
    }
}
