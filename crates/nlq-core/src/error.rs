use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Stable error identifiers, visible to clients and recorded in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigError,
    InvalidRequest,
    UnknownDb,
    SchemaUnavailable,
    LlmUnavailable,
    LlmParseError,
    RateLimited,
    ParseError,
    NotReadonly,
    BlockedFunction,
    DisallowedIdentifier,
    MultipleStatements,
    EmptyStatement,
    UnsafeSql,
    Timeout,
    PoolExhausted,
    PoolClosing,
    DbError,
    InternalError,
}

impl ErrorKind {
    /// Stable snake_case identifier as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigError => "config_error",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::UnknownDb => "unknown_db",
            ErrorKind::SchemaUnavailable => "schema_unavailable",
            ErrorKind::LlmUnavailable => "llm_unavailable",
            ErrorKind::LlmParseError => "llm_parse_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::NotReadonly => "not_readonly",
            ErrorKind::BlockedFunction => "blocked_function",
            ErrorKind::DisallowedIdentifier => "disallowed_identifier",
            ErrorKind::MultipleStatements => "multiple_statements",
            ErrorKind::EmptyStatement => "empty_statement",
            ErrorKind::UnsafeSql => "unsafe_sql",
            ErrorKind::Timeout => "timeout",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::PoolClosing => "pool_closing",
            ErrorKind::DbError => "db_error",
            ErrorKind::InternalError => "internal_error",
        }
    }

    /// Whether a caller may reasonably retry the request later.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::SchemaUnavailable
                | ErrorKind::LlmUnavailable
                | ErrorKind::LlmParseError
                | ErrorKind::RateLimited
                | ErrorKind::Timeout
                | ErrorKind::PoolExhausted
                | ErrorKind::DbError
        )
    }

    /// Whether a validator refusal of this kind is worth a remediation cycle
    /// (re-prompting the model with the failure as feedback). Policy
    /// refusals (blocked function, allowlist) surface immediately: the model
    /// produced exactly what it was asked not to, and feedback will not make
    /// the function less blocked.
    pub fn remediable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ParseError
                | ErrorKind::NotReadonly
                | ErrorKind::MultipleStatements
                | ErrorKind::EmptyStatement
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown database: {0}")]
    UnknownDb(String),

    #[error("Schema unavailable for '{database}': {message}")]
    SchemaUnavailable { database: String, message: String },

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("Could not decode LLM reply: {0}")]
    LlmParse(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("SQL validation failed: {message}")]
    SqlRejected { kind: ErrorKind, message: String },

    #[error("SQL refused after remediation: {0}")]
    UnsafeSql(String),

    #[error("Deadline exceeded during {0}")]
    Timeout(String),

    #[error("No connection available for '{0}' within the deadline")]
    PoolExhausted(String),

    #[error("Server is shutting down")]
    PoolClosing,

    #[error("Database error: {0}")]
    Db(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Map to the stable wire-level kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::ConfigError,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::UnknownDb(_) => ErrorKind::UnknownDb,
            Error::SchemaUnavailable { .. } => ErrorKind::SchemaUnavailable,
            Error::LlmUnavailable(_) => ErrorKind::LlmUnavailable,
            Error::LlmParse(_) => ErrorKind::LlmParseError,
            Error::RateLimited(_) => ErrorKind::RateLimited,
            Error::SqlRejected { kind, .. } => *kind,
            Error::UnsafeSql(_) => ErrorKind::UnsafeSql,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::PoolExhausted(_) => ErrorKind::PoolExhausted,
            Error::PoolClosing => ErrorKind::PoolClosing,
            Error::Db(_) => ErrorKind::DbError,
            Error::Serialization(_) | Error::Io(_) | Error::Other(_) => ErrorKind::InternalError,
        }
    }

    /// Helper for creating configuration errors
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Helper for creating database errors with a sanitized message
    pub fn db(msg: impl Into<String>) -> Self {
        Error::Db(msg.into())
    }

    /// Helper for validator refusals
    pub fn rejected(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Error::SqlRejected {
            kind,
            message: msg.into(),
        }
    }

    /// Convert into the wire-level record, attaching the request id.
    pub fn to_record(&self, request_id: &str) -> ErrorRecord {
        let kind = self.kind();
        ErrorRecord {
            kind,
            message: self.to_string(),
            detail: None,
            retryable: kind.retryable(),
            request_id: request_id.to_string(),
        }
    }
}

/// Wire-level error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub retryable: bool,
    pub request_id: String,
}

impl ErrorRecord {
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}
