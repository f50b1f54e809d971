//! Tiered export pipeline for the Observable Framework data loaders.
//!
//! Each loader binary runs one SQL query against MotherDuck and prints the
//! result set on stdout, as JSON or as a parquet file.  A loader must never
//! crash the surrounding report build, so any failure downgrades to an error
//! payload in the same output format, through three levels, each one simpler
//! and less likely to fail than the last.

pub mod error;
pub mod json;
pub mod parquet;
pub mod payload;

use std::env;

use duckdb::Connection;
use log::{debug, warn};

use crate::export::error::ExportError;

/// MotherDuck database the loaders read from unless told otherwise.
pub const DEFAULT_DATABASE: &str = "ttb_public_data";

/// Caller-supplied diagnostic key/value pairs carried into error payloads.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Build a [Context] from a `json!` object literal.  Anything that is not an
/// object becomes an empty context.
pub fn context_from(value: serde_json::Value) -> Context {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Context::new(),
    }
}

/// How far down the fallback chain one `execute` call had to go.  The level
/// only ever increases within a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Outcome {
    Success,
    // structured error payload
    Level1,
    // minimal error payload, truncated messages
    Level2,
    // fixed empty representation
    Level3,
}

/// Opens database sessions.  The default implementation connects to
/// MotherDuck; tests substitute local in-memory databases.
pub trait Connect {
    fn open(&self, database: &str, token: &str) -> duckdb::Result<Connection>;
}

/// The production opener.
pub struct MotherDuck;

impl Connect for MotherDuck {
    fn open(&self, database: &str, token: &str) -> duckdb::Result<Connection> {
        Connection::open(format!("md:{}?motherduck_token={}", database, token))
    }
}

/// One lazily-opened connection, owned by exactly one exporter.
pub struct Connector {
    pub database: String,
    token: String,
    opener: Box<dyn Connect>,
    conn: Option<Connection>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("database", &self.database)
            .field("connected", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Fails if no token is given and `MOTHERDUCK_TOKEN` is not set.  Does
    /// not open a connection.
    pub fn new(token: Option<String>, database: &str) -> Result<Connector, ExportError> {
        Connector::with_opener(token, database, Box::new(MotherDuck))
    }

    pub fn with_opener(
        token: Option<String>,
        database: &str,
        opener: Box<dyn Connect>,
    ) -> Result<Connector, ExportError> {
        let token = resolve_token(token)?;
        Ok(Connector {
            database: database.to_string(),
            token,
            opener,
            conn: None,
        })
    }

    /// Open the connection on first use; a no-op afterwards.
    pub fn connect(&mut self) -> Result<&Connection, ExportError> {
        if self.conn.is_none() {
            debug!("connecting to database '{}'", self.database);
            let conn = self
                .opener
                .open(&self.database, &self.token)
                .map_err(|e| ExportError::Connection {
                    database: self.database.clone(),
                    source: e,
                })?;
            self.conn = Some(conn);
        }
        Ok(self.conn.as_ref().expect("just connected"))
    }

    /// Close the connection if one is open.  Safe to call repeatedly; also
    /// runs on drop.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                warn!("closing connection to '{}' failed: {}", self.database, e);
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.close();
    }
}

fn resolve_token(explicit: Option<String>) -> Result<String, ExportError> {
    let token = explicit
        .or_else(|| env::var("MOTHERDUCK_TOKEN").ok())
        .filter(|t| !t.is_empty());
    match token {
        Some(token) => Ok(token),
        None => Err(ExportError::Configuration(
            "MOTHERDUCK_TOKEN must be provided or set in the environment".to_string(),
        )),
    }
}
