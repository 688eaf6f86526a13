//! Live catalog introspection through the pool manager

use crate::pool::{DbPool, PoolManager};
use async_trait::async_trait;
use nlq_core::error::Result;
use nlq_schema::introspect::{Introspect, mysql, postgres};
use nlq_schema::model::SchemaSnapshot;
use std::sync::Arc;

/// Dispatches introspection to the registered database's dialect, borrowing
/// its pool from the manager.
pub struct LiveIntrospector {
    pools: Arc<PoolManager>,
}

impl LiveIntrospector {
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self { pools }
    }
}

#[async_trait]
impl Introspect for LiveIntrospector {
    async fn introspect(&self, db_name: &str) -> Result<SchemaSnapshot> {
        match self.pools.pool(db_name).await? {
            DbPool::Postgres(pool) => postgres::introspect(&pool, db_name).await,
            DbPool::MySql(pool) => mysql::introspect(&pool, db_name).await,
        }
    }
}
