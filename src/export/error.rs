use thiserror::Error;

/// Failure categories for the export pipeline.
///
/// Only [ExportError::Configuration] is allowed to reach a loader's `main`;
/// everything else is absorbed by the fallback chain and ends up as a payload
/// on stdout.
#[derive(Error, Debug)]
pub enum ExportError {
    /// No credential available at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to connect to '{database}': {source}")]
    Connection {
        database: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("query failed: {0}")]
    Query(#[from] duckdb::Error),

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failure while constructing or emitting an error payload itself.
    #[error("fallback failed: {0}")]
    Fallback(String),
}

impl ExportError {
    /// The category name written into the `error_type` payload field.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::Configuration(_) => "ConfigurationError",
            ExportError::Connection { .. } => "ConnectionError",
            ExportError::Query(_) => "QueryError",
            ExportError::Serialization(_) => "SerializationError",
            ExportError::Fallback(_) => "FallbackError",
        }
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Serialization(err.to_string())
    }
}

impl From<parquet::errors::ParquetError> for ExportError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        ExportError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use duckdb::Connection;

    use crate::export::error::ExportError;

    #[test]
    fn kinds() {
        assert_eq!(
            ExportError::Configuration("no token".to_string()).kind(),
            "ConfigurationError"
        );
        assert_eq!(
            ExportError::Serialization("bad value".to_string()).kind(),
            "SerializationError"
        );
        assert_eq!(
            ExportError::Fallback("stdout gone".to_string()).kind(),
            "FallbackError"
        );

        let conn = Connection::open_in_memory().unwrap();
        let db_err = conn.prepare("NOT A QUERY").unwrap_err();
        assert_eq!(ExportError::Query(db_err).kind(), "QueryError");
    }

    #[test]
    fn connection_error_names_the_database() {
        let conn = Connection::open_in_memory().unwrap();
        let source = conn.prepare("NOT A QUERY").unwrap_err();
        let err = ExportError::Connection {
            database: "ttb_public_data".to_string(),
            source,
        };
        assert_eq!(err.kind(), "ConnectionError");
        assert!(err.to_string().contains("ttb_public_data"));
    }
}
