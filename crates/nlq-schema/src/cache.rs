//! TTL schema cache with single-flight refresh
//!
//! Invariants:
//! - Per database, at most one introspection is in flight at any time.
//! - Readers never observe a half-built snapshot: the snapshot slot holds an
//!   `Arc` that is replaced atomically under its lock.
//! - A stale entry serves the old snapshot while a refresh runs; readers only
//!   block when no snapshot exists at all.

use crate::introspect::Introspect;
use crate::model::SchemaSnapshot;
use nlq_core::error::{Error, Result};
use nlq_telemetry::Metrics;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

struct Cached {
    snapshot: Arc<SchemaSnapshot>,
    fetched_at: Instant,
}

struct CacheEntry {
    snapshot: RwLock<Option<Cached>>,
    /// Held for the duration of one introspection (single-flight)
    refresh: Mutex<()>,
    /// True while a stale-path refresh task is scheduled or running
    refreshing: AtomicBool,
    /// Set by invalidate(); forces the next get() to schedule a refresh
    force_stale: AtomicBool,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            snapshot: RwLock::new(None),
            refresh: Mutex::new(()),
            refreshing: AtomicBool::new(false),
            force_stale: AtomicBool::new(false),
        }
    }
}

/// Process-wide schema cache, one entry per database.
pub struct SchemaCache {
    introspector: Arc<dyn Introspect>,
    metrics: Arc<Metrics>,
    ttl: Duration,
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    background: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl SchemaCache {
    pub fn new(introspector: Arc<dyn Introspect>, ttl: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            introspector,
            metrics,
            ttl,
            entries: RwLock::new(HashMap::new()),
            background: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Fetch the snapshot for a database.
    ///
    /// Fresh entries return immediately. Stale entries return the old
    /// snapshot and schedule exactly one refresh. Empty entries block until
    /// the first introspection completes.
    pub async fn get(self: &Arc<Self>, db_name: &str) -> Result<Arc<SchemaSnapshot>> {
        let entry = self.entry(db_name).await;

        {
            let guard = entry.snapshot.read().await;
            if let Some(cached) = guard.as_ref() {
                let stale = cached.fetched_at.elapsed() >= self.ttl
                    || entry.force_stale.load(Ordering::Acquire);
                let snapshot = cached.snapshot.clone();
                drop(guard);

                if stale {
                    self.schedule_refresh(db_name, &entry);
                }
                return Ok(snapshot);
            }
        }

        // No snapshot yet: serialize the initial load. Whoever gets the
        // refresh lock first introspects; everyone else finds the snapshot
        // filled when the lock is released.
        let _flight = entry.refresh.lock().await;
        {
            let guard = entry.snapshot.read().await;
            if let Some(cached) = guard.as_ref() {
                return Ok(cached.snapshot.clone());
            }
        }

        let snapshot = self.load(db_name, &entry).await?;
        Ok(snapshot)
    }

    /// Force the next `get` to trigger a refresh. The stale snapshot keeps
    /// serving until the new one lands.
    pub async fn invalidate(&self, db_name: &str) {
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(db_name) {
            entry.force_stale.store(true, Ordering::Release);
            tracing::debug!(db_name = %db_name, "schema cache entry invalidated");
        }
    }

    /// Refresh a database's snapshot now, blocking until done.
    pub async fn refresh(self: &Arc<Self>, db_name: &str) -> Result<Arc<SchemaSnapshot>> {
        let entry = self.entry(db_name).await;
        let _flight = entry.refresh.lock().await;
        self.load(db_name, &entry).await
    }

    /// Start the periodic revalidation task. A second call is a no-op.
    pub async fn start_background_refresh(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.background.lock().await;
        if slot.is_some() {
            return;
        }

        let cache = Arc::clone(self);
        let token = self.shutdown.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let names: Vec<String> = {
                    let entries = cache.entries.read().await;
                    entries.keys().cloned().collect()
                };

                for name in names {
                    if token.is_cancelled() {
                        break;
                    }
                    let entry = cache.entry(&name).await;
                    let stale = {
                        let guard = entry.snapshot.read().await;
                        match guard.as_ref() {
                            Some(cached) => cached.fetched_at.elapsed() >= cache.ttl,
                            None => false,
                        }
                    };
                    if !stale {
                        continue;
                    }

                    tokio::select! {
                        _ = token.cancelled() => break,
                        result = cache.refresh(&name) => {
                            if let Err(e) = result {
                                tracing::warn!(db_name = %name, error = %e, "background schema refresh failed");
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Stop the revalidation task, aborting it if it does not wind down
    /// within the deadline.
    pub async fn stop_background_refresh(&self, deadline: Duration) {
        self.shutdown.cancel();

        let handle = self.background.lock().await.take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(deadline, &mut handle).await.is_err() {
                handle.abort();
                tracing::warn!("background refresh did not stop within deadline, aborted");
            }
        }
    }

    async fn entry(&self, db_name: &str) -> Arc<CacheEntry> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(db_name) {
                return entry.clone();
            }
        }

        let mut entries = self.entries.write().await;
        entries
            .entry(db_name.to_string())
            .or_insert_with(|| Arc::new(CacheEntry::new()))
            .clone()
    }

    /// Run one introspection and atomically publish the result.
    /// Caller must hold the entry's refresh lock.
    async fn load(&self, db_name: &str, entry: &CacheEntry) -> Result<Arc<SchemaSnapshot>> {
        let started = Instant::now();
        let snapshot = self
            .introspector
            .introspect(db_name)
            .await
            .map_err(|e| Error::SchemaUnavailable {
                database: db_name.to_string(),
                message: e.to_string(),
            })?;
        let snapshot = Arc::new(snapshot);

        {
            let mut guard = entry.snapshot.write().await;
            *guard = Some(Cached {
                snapshot: snapshot.clone(),
                fetched_at: Instant::now(),
            });
        }
        entry.force_stale.store(false, Ordering::Release);

        self.metrics.schema_refresh(db_name);
        tracing::info!(
            db_name = %db_name,
            tables = snapshot.table_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "schema snapshot refreshed"
        );

        Ok(snapshot)
    }

    /// Schedule an async refresh for a stale entry, at most one at a time.
    fn schedule_refresh(self: &Arc<Self>, db_name: &str, entry: &Arc<CacheEntry>) {
        if entry
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // A refresh is already in flight; serve stale
            return;
        }

        let cache = Arc::clone(self);
        let entry = Arc::clone(entry);
        let name = db_name.to_string();
        tokio::spawn(async move {
            let result = {
                let _flight = entry.refresh.lock().await;
                cache.load(&name, &entry).await
            };
            entry.refreshing.store(false, Ordering::Release);
            if let Err(e) = result {
                tracing::warn!(db_name = %name, error = %e, "stale-entry schema refresh failed");
            }
        });
    }
}
