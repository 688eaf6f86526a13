//! Process wiring and lifecycle
//!
//! Builds the singleton set (registry, pools, cache, LLM client,
//! orchestrator, metrics) from configuration, runs the HTTP server, and
//! tears everything down in reverse order under the shutdown deadline.

use crate::rest::{AppState, create_router};
use axum::{Router, routing::get};
use nlq_core::GatewayConfig;
use nlq_core::error::{Error, Result};
use nlq_db::executor::SqlExecutor;
use nlq_db::introspector::LiveIntrospector;
use nlq_db::pool::{PoolManager, ShutdownReport};
use nlq_db::registry::DatabaseRegistry;
use nlq_llm::client::LlmClient;
use nlq_llm::openai::OpenAiProvider;
use nlq_orchestrator::{HistoryLog, Orchestrator};
use nlq_schema::cache::SchemaCache;
use nlq_telemetry::Metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The assembled gateway: every process-wide singleton, initialized once at
/// startup and torn down in reverse order.
pub struct Gateway {
    pub config: GatewayConfig,
    pub registry: Arc<DatabaseRegistry>,
    pub pools: Arc<PoolManager>,
    pub cache: Arc<SchemaCache>,
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Arc<Metrics>,
}

impl Gateway {
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(Metrics::new());
        let registry = Arc::new(DatabaseRegistry::from_config(&config.databases)?);
        let pools = Arc::new(PoolManager::new(registry.clone(), metrics.clone()));

        let introspector = Arc::new(LiveIntrospector::new(pools.clone()));
        let cache = Arc::new(SchemaCache::new(
            introspector,
            config.cache.schema_ttl(),
            metrics.clone(),
        ));

        let provider = Arc::new(OpenAiProvider::new(&config.llm)?);
        let llm = Arc::new(LlmClient::new(
            provider,
            &config.resilience,
            &config.llm,
            metrics.clone(),
        ));

        let executor = Arc::new(SqlExecutor::new(pools.clone()));
        let history = Arc::new(HistoryLog::new(&config.history.path));

        let orchestrator = Arc::new(Orchestrator::new(
            &config,
            registry.clone(),
            cache.clone(),
            llm,
            executor,
            metrics.clone(),
            Some(history),
        ));

        Ok(Self {
            config,
            registry,
            pools,
            cache,
            orchestrator,
            metrics,
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            orchestrator: self.orchestrator.clone(),
            pools: self.pools.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Tear down: stop the cache's background task, then drain every pool,
    /// all within the configured deadline.
    pub async fn shutdown(&self) -> ShutdownReport {
        let deadline = self.config.shutdown.deadline();
        let overall = Instant::now() + deadline;

        self.cache
            .stop_background_refresh(Duration::from_millis(500).min(deadline))
            .await;

        let remaining = overall.saturating_duration_since(Instant::now());
        let report = self.pools.close_all(remaining).await;

        if report.graceful {
            tracing::info!("shutdown complete, all pools drained gracefully");
        } else {
            for pool in report.pools.iter().filter(|p| !p.graceful) {
                tracing::warn!(db_name = %pool.name, "pool was terminated forcibly at shutdown");
            }
        }
        report
    }
}

/// Run the gateway until SIGINT/SIGTERM, then shut down within the deadline.
pub async fn serve(gateway: Gateway) -> Result<()> {
    if gateway.config.cache.refresh_background {
        gateway
            .cache
            .start_background_refresh(gateway.config.cache.refresh_interval())
            .await;
    }

    let stop = CancellationToken::new();
    let metrics_task = spawn_metrics_listener(&gateway, stop.clone()).await?;

    let addr = format!(
        "{}:{}",
        gateway.config.server.host, gateway.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::config(format!("failed to bind {addr}: {e}")))?;

    tracing::info!(
        addr = %addr,
        databases = gateway.registry.len(),
        "gateway listening"
    );

    let app = create_router(gateway.app_state());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Other(e.into()))?;

    tracing::info!("shutdown signal received");
    stop.cancel();
    if let Some(task) = metrics_task {
        task.abort();
    }
    gateway.shutdown().await;
    Ok(())
}

/// Optional dedicated metrics listener; 0 disables it and metrics stay
/// available on the main router.
async fn spawn_metrics_listener(
    gateway: &Gateway,
    stop: CancellationToken,
) -> Result<Option<tokio::task::JoinHandle<()>>> {
    let port = gateway.config.observability.metrics_port;
    if port == 0 {
        return Ok(None);
    }

    let metrics = gateway.metrics.clone();
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = metrics.clone();
            async move { metrics.render_prometheus() }
        }),
    );

    let addr = format!("{}:{}", gateway.config.server.host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::config(format!("failed to bind metrics port {addr}: {e}")))?;

    tracing::info!(addr = %addr, "metrics listener started");

    Ok(Some(tokio::spawn(async move {
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await });
        if let Err(e) = serve.await {
            tracing::warn!(error = %e, "metrics listener failed");
        }
    })))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
