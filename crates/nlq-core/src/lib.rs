//! Core traits and types for the nlq query gateway
//!
//! This crate provides the foundational pieces shared by every other crate:
//! configuration loading, the error taxonomy, the request/response data
//! model, and the per-request context.

pub mod config;
pub mod context;
pub mod dialect;
pub mod error;
pub mod types;

// Re-exports
pub use config::GatewayConfig;
pub use context::RequestContext;
pub use dialect::Dialect;
pub use error::{Error, ErrorKind, ErrorRecord, Result};
pub use types::{
    ColumnMeta, Confidence, GeneratedSql, QueryRequest, QueryResponse, QueryResult, ReturnMode,
    Stats, TypeTag,
};
