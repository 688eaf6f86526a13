//! Catalog extraction per dialect
//!
//! Each introspector reads the dialect's catalog into the canonical snapshot
//! tree. Row counts come from catalog statistics, never `COUNT(*)`, and are
//! best-effort: a missing estimate omits the field without failing the
//! snapshot.

pub mod mysql;
pub mod postgres;

use crate::model::SchemaSnapshot;
use async_trait::async_trait;
use nlq_core::error::Result;

/// Seam between the cache and the live catalog readers.
///
/// The production implementation dispatches on the registry's dialect and
/// borrows a connection from the pool manager; tests substitute counters.
#[async_trait]
pub trait Introspect: Send + Sync {
    async fn introspect(&self, db_name: &str) -> Result<SchemaSnapshot>;
}
