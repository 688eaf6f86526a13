//! Request/response data model for the query pipeline
//!
//! Everything here is value-typed: requests and results are passed by value
//! through the pipeline and serialized at the transport boundary unchanged.

use crate::error::ErrorRecord;
use serde::{Deserialize, Serialize};

/// What the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnMode {
    /// Generate and validate SQL but do not run it
    SqlOnly,
    /// Generate, validate, and execute
    #[default]
    Execute,
}

/// A natural-language query request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Target database; may be omitted when exactly one is registered
    #[serde(default, alias = "database_name", alias = "db")]
    pub database: Option<String>,

    pub question: String,

    #[serde(default)]
    pub return_mode: ReturnMode,

    /// Free-form hints forwarded to the prompt assembler
    #[serde(default)]
    pub client_hints: Option<String>,
}

/// SQL as produced by the model, untrusted until validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub text: String,
    pub dialect: String,
    pub token_count: Option<u32>,
    pub model_id: String,
    pub generation_ms: u64,
}

/// Canonical type tags for result cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Int,
    Float,
    Bool,
    Text,
    Bytes,
    Timestamp,
    Date,
    Json,
    Null,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub type_tag: TypeTag,
}

/// A tabular result, already capped at the effective row limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    pub execution_ms: u64,
    pub truncated: bool,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_ms: 0,
            truncated: false,
        }
    }
}

/// Advisory assessment of how well a result answers the question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confidence {
    /// 0-100; None when judging was skipped or failed
    pub score: Option<u8>,
    pub rationale: String,
    #[serde(default)]
    pub concerns: Vec<String>,
}

impl Confidence {
    /// Placeholder used when the judge pass fails or is disabled.
    pub fn unjudged() -> Self {
        Self {
            score: None,
            rationale: "unjudged".to_string(),
            concerns: Vec::new(),
        }
    }
}

/// Per-stage latency breakdown, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub schema_ms: u64,
    pub generate_ms: u64,
    pub validate_ms: u64,
    pub execute_ms: u64,
    pub judge_ms: u64,
    pub retries: u32,
}

/// Complete response for a query request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    pub stats: Stats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl QueryResponse {
    pub fn failure(error: ErrorRecord, stats: Stats) -> Self {
        Self {
            success: false,
            sql: None,
            data: None,
            confidence: None,
            stats,
            error: Some(error),
        }
    }
}

/// Truncate SQL for log lines; never log full statements.
pub fn sql_preview(sql: &str) -> &str {
    let cut = sql
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(sql.len());
    &sql[..cut]
}
