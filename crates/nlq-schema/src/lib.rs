//! Schema introspection and caching
//!
//! Introspectors pull a canonical, driver-independent [`SchemaSnapshot`] out
//! of the target database's catalog. The [`SchemaCache`] serves snapshots
//! under a TTL with single-flight refresh: concurrent demand for the same
//! refresh triggers the underlying introspection at most once.

pub mod cache;
pub mod introspect;
pub mod model;

pub use cache::SchemaCache;
pub use introspect::Introspect;
pub use model::{ColumnInfo, SchemaInfo, SchemaSnapshot, TableInfo, TableKind};
