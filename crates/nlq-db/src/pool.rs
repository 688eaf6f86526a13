//! Per-database connection pool lifecycle
//!
//! Pools are created lazily on first acquire and owned exclusively by the
//! manager. Once shutdown begins, every new acquire fails with
//! `pool_closing`; `close_all` drains gracefully within a deadline and
//! abandons whatever is still held when the deadline passes.

use crate::registry::{DatabaseDescriptor, DatabaseRegistry};
use nlq_core::RequestContext;
use nlq_core::error::{Error, Result};
use nlq_telemetry::Metrics;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{MySql, MySqlPool, PgPool, Postgres};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// A live pool for one database, dialect-tagged.
#[derive(Clone)]
pub enum DbPool {
    Postgres(PgPool),
    MySql(MySqlPool),
}

impl DbPool {
    fn is_closed(&self) -> bool {
        match self {
            DbPool::Postgres(p) => p.is_closed(),
            DbPool::MySql(p) => p.is_closed(),
        }
    }

    fn size(&self) -> u32 {
        match self {
            DbPool::Postgres(p) => p.size(),
            DbPool::MySql(p) => p.size(),
        }
    }

    fn num_idle(&self) -> usize {
        match self {
            DbPool::Postgres(p) => p.num_idle(),
            DbPool::MySql(p) => p.num_idle(),
        }
    }

    async fn close(&self) {
        match self {
            DbPool::Postgres(p) => p.close().await,
            DbPool::MySql(p) => p.close().await,
        }
    }
}

/// A checked-out connection.
///
/// Dropping it returns the connection to its pool; `release` consumes the
/// value, so a double release cannot be expressed.
#[derive(Debug)]
pub enum Connection {
    Postgres(PoolConnection<Postgres>),
    MySql(PoolConnection<MySql>),
}

impl Connection {
    pub fn release(self) {
        // Drop returns the connection to the pool (or terminates it when the
        // pool has started closing).
    }
}

/// Health view of one pool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStatus {
    pub name: String,
    pub open: u32,
    pub in_use: u32,
}

/// Per-pool shutdown outcome.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolShutdownOutcome {
    pub name: String,
    pub graceful: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ShutdownReport {
    pub graceful: bool,
    pub pools: Vec<PoolShutdownOutcome>,
}

/// Owns every connection pool in the process.
pub struct PoolManager {
    registry: Arc<DatabaseRegistry>,
    metrics: Arc<Metrics>,
    pools: RwLock<HashMap<String, DbPool>>,
    closing: AtomicBool,
}

impl PoolManager {
    pub fn new(registry: Arc<DatabaseRegistry>, metrics: Arc<Metrics>) -> Self {
        Self {
            registry,
            metrics,
            pools: RwLock::new(HashMap::new()),
            closing: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Check out a connection, blocking until one is free or the request
    /// deadline expires.
    pub async fn acquire(&self, db_name: &str, ctx: &RequestContext) -> Result<Connection> {
        if self.is_closing() {
            self.metrics.pool_acquire(db_name, "pool_closing");
            return Err(Error::PoolClosing);
        }

        let pool = match self.pool(db_name).await {
            Ok(pool) => pool,
            Err(e) => {
                self.metrics.pool_acquire(db_name, e.kind().as_str());
                return Err(e);
            }
        };

        let deadline = ctx.remaining();
        let result = tokio::select! {
            _ = ctx.cancellation().cancelled() => {
                Err(Error::Timeout("pool acquire cancelled".to_string()))
            }
            acquired = tokio::time::timeout(deadline, async {
                match &pool {
                    DbPool::Postgres(p) => p.acquire().await.map(Connection::Postgres),
                    DbPool::MySql(p) => p.acquire().await.map(Connection::MySql),
                }
            }) => match acquired {
                Ok(Ok(conn)) => Ok(conn),
                Ok(Err(e)) => Err(map_acquire_error(db_name, e)),
                Err(_) => Err(Error::PoolExhausted(db_name.to_string())),
            },
        };

        match &result {
            Ok(_) => self.metrics.pool_acquire(db_name, "success"),
            Err(e) => self.metrics.pool_acquire(db_name, e.kind().as_str()),
        }
        result
    }

    /// The raw pool handle for a database, creating it lazily.
    pub async fn pool(&self, db_name: &str) -> Result<DbPool> {
        if self.is_closing() {
            return Err(Error::PoolClosing);
        }

        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(db_name) {
                if pool.is_closed() {
                    return Err(Error::PoolClosing);
                }
                return Ok(pool.clone());
            }
        }

        let descriptor = self.registry.get(db_name)?;

        let mut pools = self.pools.write().await;
        // Double-check: another task may have created it while we waited
        if let Some(pool) = pools.get(db_name) {
            return Ok(pool.clone());
        }

        let pool = build_pool(&descriptor)?;
        tracing::info!(
            db_name = %db_name,
            uri = %descriptor.safe_uri(),
            max = descriptor.pool_max,
            "connection pool created"
        );
        pools.insert(db_name.to_string(), pool.clone());
        Ok(pool)
    }

    /// Health view over every live pool.
    pub async fn status(&self) -> Vec<PoolStatus> {
        let pools = self.pools.read().await;
        let mut out: Vec<PoolStatus> = pools
            .iter()
            .map(|(name, pool)| {
                let open = pool.size();
                PoolStatus {
                    name: name.clone(),
                    open,
                    in_use: open.saturating_sub(pool.num_idle() as u32),
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Drain and close a single pool (used before unregistering a database).
    pub async fn close_pool(&self, db_name: &str, deadline: Duration) -> Result<bool> {
        let pool = {
            let mut pools = self.pools.write().await;
            pools.remove(db_name)
        };

        match pool {
            Some(pool) => Ok(close_with_deadline(db_name, &pool, deadline).await),
            None => Ok(true),
        }
    }

    /// Shut every pool down.
    ///
    /// New acquires fail immediately with `pool_closing`; each pool gets an
    /// equal slice of the deadline for a graceful drain, after which it is
    /// abandoned and reported as non-graceful. Always returns within the
    /// deadline plus scheduling noise.
    pub async fn close_all(&self, deadline: Duration) -> ShutdownReport {
        self.closing.store(true, Ordering::Release);

        let pools: Vec<(String, DbPool)> = {
            let mut guard = self.pools.write().await;
            guard.drain().collect()
        };

        if pools.is_empty() {
            return ShutdownReport {
                graceful: true,
                pools: Vec::new(),
            };
        }

        let overall = Instant::now() + deadline;
        let per_pool = deadline / pools.len() as u32;
        let mut outcomes = Vec::with_capacity(pools.len());

        for (name, pool) in pools {
            let remaining = overall.saturating_duration_since(Instant::now());
            let budget = per_pool.min(remaining);
            let graceful = close_with_deadline(&name, &pool, budget).await;
            outcomes.push(PoolShutdownOutcome { name, graceful });
        }

        ShutdownReport {
            graceful: outcomes.iter().all(|o| o.graceful),
            pools: outcomes,
        }
    }
}

/// Close one pool, waiting up to the budget for in-flight checkouts.
///
/// `Pool::close` marks the pool closed first, so pending and future acquires
/// fail immediately; the await is only the drain. On timeout the pool is
/// abandoned: held connections are terminated by the driver when their tasks
/// drop them, and the process exits without waiting.
async fn close_with_deadline(name: &str, pool: &DbPool, budget: Duration) -> bool {
    match tokio::time::timeout(budget, pool.close()).await {
        Ok(()) => {
            tracing::info!(db_name = %name, "connection pool closed gracefully");
            true
        }
        Err(_) => {
            tracing::warn!(
                db_name = %name,
                budget_ms = budget.as_millis() as u64,
                "graceful close timed out, abandoning pool"
            );
            false
        }
    }
}

fn build_pool(descriptor: &DatabaseDescriptor) -> Result<DbPool> {
    match descriptor.dialect {
        nlq_core::Dialect::Postgres => {
            let pool = PgPoolOptions::new()
                .min_connections(descriptor.pool_min)
                .max_connections(descriptor.pool_max)
                .acquire_timeout(descriptor.statement_timeout)
                .connect_lazy(&descriptor.uri)
                .map_err(|e| {
                    Error::config(format!(
                        "database '{}': invalid connection URI: {e}",
                        descriptor.name
                    ))
                })?;
            Ok(DbPool::Postgres(pool))
        }
        nlq_core::Dialect::MySql => {
            let pool = MySqlPoolOptions::new()
                .min_connections(descriptor.pool_min)
                .max_connections(descriptor.pool_max)
                .acquire_timeout(descriptor.statement_timeout)
                .connect_lazy(&descriptor.uri)
                .map_err(|e| {
                    Error::config(format!(
                        "database '{}': invalid connection URI: {e}",
                        descriptor.name
                    ))
                })?;
            Ok(DbPool::MySql(pool))
        }
    }
}

fn map_acquire_error(db_name: &str, e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::PoolClosed => Error::PoolClosing,
        sqlx::Error::PoolTimedOut => Error::PoolExhausted(db_name.to_string()),
        other => Error::db(format!("failed to connect to '{db_name}': {other}")),
    }
}
