// End-to-end pipeline scenarios with mocked provider, executor, and
// introspector. The mocks count calls so the remediation and single-flight
// bounds are observable.

use async_trait::async_trait;
use nlq_core::config::GatewayConfig;
use nlq_core::error::{Error, ErrorKind, Result};
use nlq_core::types::{ColumnMeta, QueryRequest, QueryResult, ReturnMode, TypeTag};
use nlq_core::{Dialect, RequestContext};
use nlq_db::executor::Execute;
use nlq_db::registry::{DatabaseDescriptor, DatabaseRegistry};
use nlq_llm::client::LlmClient;
use nlq_llm::provider::{CompletionProvider, CompletionRequest, CompletionResponse, ProviderError};
use nlq_orchestrator::Orchestrator;
use nlq_schema::cache::SchemaCache;
use nlq_schema::introspect::Introspect;
use nlq_schema::model::{ColumnInfo, SchemaInfo, SchemaSnapshot, TableInfo, TableKind};
use nlq_telemetry::Metrics;
use nlq_validator::ValidatedSql;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    fallback: String,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(replies: Vec<&str>, fallback: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            fallback: fallback.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    fn repeating(reply: &str) -> Arc<Self> {
        Self::new(Vec::new(), reply)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn model_id(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        _request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(CompletionResponse {
            text,
            model_id: "mock-model".to_string(),
            token_count: None,
        })
    }
}

struct StaticIntrospector {
    calls: AtomicUsize,
}

#[async_trait]
impl Introspect for StaticIntrospector {
    async fn introspect(&self, db_name: &str) -> Result<SchemaSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SchemaSnapshot {
            database: db_name.to_string(),
            dialect: Dialect::Postgres,
            enum_types: Vec::new(),
            schemas: vec![SchemaInfo {
                name: "public".to_string(),
                tables: vec![TableInfo {
                    name: "users".to_string(),
                    kind: TableKind::Table,
                    columns: vec![ColumnInfo {
                        name: "id".to_string(),
                        data_type: "bigint".to_string(),
                        nullable: false,
                        primary_key: true,
                        unique: false,
                        default: None,
                        comment: None,
                    }],
                    foreign_keys: Vec::new(),
                    row_count: Some(42),
                    comment: None,
                }],
            }],
        })
    }
}

struct MockExecutor {
    calls: AtomicUsize,
    rows: Vec<Vec<serde_json::Value>>,
    delay: Duration,
}

impl MockExecutor {
    fn returning_count(count: i64) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            rows: vec![vec![serde_json::json!(count)]],
            delay: Duration::ZERO,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            rows: vec![vec![serde_json::json!(1)]],
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Execute for MockExecutor {
    async fn execute(
        &self,
        _sql: &ValidatedSql,
        _db_name: &str,
        _row_cap: u64,
        ctx: &RequestContext,
    ) -> Result<QueryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::select! {
                _ = ctx.cancellation().cancelled() => {
                    return Err(Error::Timeout("execution cancelled".to_string()));
                }
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        Ok(QueryResult {
            columns: vec![ColumnMeta {
                name: "count".to_string(),
                type_tag: TypeTag::Int,
            }],
            rows: self.rows.clone(),
            row_count: self.rows.len(),
            execution_ms: self.delay.as_millis() as u64,
            truncated: false,
        })
    }
}

struct Harness {
    orchestrator: Orchestrator,
    provider: Arc<ScriptedProvider>,
    executor: Arc<MockExecutor>,
}

fn harness(provider: Arc<ScriptedProvider>, executor: Arc<MockExecutor>) -> Harness {
    let mut config = GatewayConfig::test_defaults();
    config.judge.enabled = false;

    build_harness(config, provider, executor)
}

fn build_harness(
    config: GatewayConfig,
    provider: Arc<ScriptedProvider>,
    executor: Arc<MockExecutor>,
) -> Harness {
    let metrics = Arc::new(Metrics::new());

    let registry = Arc::new(DatabaseRegistry::new());
    registry
        .register(DatabaseDescriptor {
            name: "blog".to_string(),
            dialect: Dialect::Postgres,
            uri: "postgres://u:p@localhost/blog".to_string(),
            pool_min: 1,
            pool_max: 4,
            statement_timeout: Duration::from_secs(30),
            row_cap: None,
        })
        .unwrap();

    let cache = Arc::new(SchemaCache::new(
        Arc::new(StaticIntrospector {
            calls: AtomicUsize::new(0),
        }),
        Duration::from_secs(3600),
        metrics.clone(),
    ));

    let llm = Arc::new(LlmClient::new(
        provider.clone(),
        &config.resilience,
        &config.llm,
        metrics.clone(),
    ));

    let orchestrator = Orchestrator::new(
        &config,
        registry,
        cache,
        llm,
        executor.clone(),
        metrics,
        None,
    );

    Harness {
        orchestrator,
        provider,
        executor,
    }
}

fn question(text: &str) -> QueryRequest {
    QueryRequest {
        database: Some("blog".to_string()),
        question: text.to_string(),
        return_mode: ReturnMode::Execute,
        client_hints: None,
    }
}

#[tokio::test]
async fn count_question_returns_count_row() {
    // E1: a count question produces a capped COUNT query and one row
    let provider =
        ScriptedProvider::repeating("```sql\nSELECT COUNT(*) FROM users\n```");
    let h = harness(provider, MockExecutor::returning_count(42));

    let response = h
        .orchestrator
        .query(question("How many users are there?"))
        .await;

    assert!(response.success, "{:?}", response.error);
    let sql = response.sql.unwrap();
    assert!(sql.starts_with("SELECT COUNT(*) FROM users"));
    assert!(sql.contains("LIMIT 10000"));

    let data = response.data.unwrap();
    assert_eq!(data.row_count, 1);
    assert_eq!(data.rows, vec![vec![serde_json::json!(42)]]);
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn mutating_sql_exhausts_remediation_and_fails_unsafe() {
    // E2: the model keeps emitting DELETE; after one remediation cycle the
    // request fails with unsafe_sql and nothing executes
    let provider = ScriptedProvider::repeating("DELETE FROM posts");
    let h = harness(provider, MockExecutor::returning_count(0));

    let response = h.orchestrator.query(question("Delete all posts")).await;

    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.kind, ErrorKind::UnsafeSql);
    // Remediation budget 1: exactly budget + 1 generation calls
    assert_eq!(h.provider.calls(), 2);
    assert_eq!(h.executor.calls(), 0);
    assert_eq!(response.stats.retries, 1);
    // The refusal carries the offending SQL
    let detail = error.detail.unwrap();
    assert!(detail["sql"].as_str().unwrap().contains("DELETE"));
}

#[tokio::test]
async fn unknown_database_fails_before_any_llm_call() {
    // E3
    let provider = ScriptedProvider::repeating("SELECT 1");
    let h = harness(provider, MockExecutor::returning_count(0));

    let response = h
        .orchestrator
        .query(QueryRequest {
            database: Some("unknown".to_string()),
            question: "anything".to_string(),
            return_mode: ReturnMode::Execute,
            client_hints: None,
        })
        .await;

    assert!(!response.success);
    assert_eq!(response.error.unwrap().kind, ErrorKind::UnknownDb);
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn blocked_function_surfaces_without_remediation() {
    // E4: pg_sleep is a policy refusal, not a remediation candidate
    let provider = ScriptedProvider::repeating("SELECT pg_sleep(100)");
    let h = harness(provider, MockExecutor::returning_count(0));

    let response = h.orchestrator.query(question("sleep please")).await;

    assert!(!response.success);
    assert_eq!(response.error.unwrap().kind, ErrorKind::BlockedFunction);
    assert_eq!(h.provider.calls(), 1);
    assert_eq!(h.executor.calls(), 0);
}

#[tokio::test]
async fn remediation_fixes_a_bad_first_attempt() {
    let provider = ScriptedProvider::new(
        vec!["DELETE FROM users", "SELECT COUNT(*) FROM users"],
        "SELECT COUNT(*) FROM users",
    );
    let h = harness(provider, MockExecutor::returning_count(42));

    let response = h.orchestrator.query(question("How many users?")).await;

    assert!(response.success);
    assert_eq!(h.provider.calls(), 2);
    assert_eq!(response.stats.retries, 1);
}

#[tokio::test]
async fn sql_only_mode_skips_execution() {
    let provider = ScriptedProvider::repeating("SELECT COUNT(*) FROM users");
    let h = harness(provider, MockExecutor::returning_count(42));

    let response = h
        .orchestrator
        .query(QueryRequest {
            database: Some("blog".to_string()),
            question: "How many users?".to_string(),
            return_mode: ReturnMode::SqlOnly,
            client_hints: None,
        })
        .await;

    assert!(response.success);
    assert!(response.sql.is_some());
    assert!(response.data.is_none());
    assert_eq!(h.executor.calls(), 0);
}

#[tokio::test]
async fn judge_failure_degrades_to_unjudged() {
    // First reply is the SQL; every later reply is garbage, so the judge
    // pass (including its one parse retry) fails and degrades
    let provider = ScriptedProvider::new(
        vec!["SELECT COUNT(*) FROM users"],
        "this is not json at all",
    );
    let mut config = GatewayConfig::test_defaults();
    config.judge.enabled = true;
    let h = build_harness(config, provider, MockExecutor::returning_count(42));

    let response = h.orchestrator.query(question("How many users?")).await;

    assert!(response.success);
    let confidence = response.confidence.unwrap();
    assert_eq!(confidence.score, None);
    assert_eq!(confidence.rationale, "unjudged");
    // 1 generation + 2 judge attempts (parse retry once)
    assert_eq!(h.provider.calls(), 3);
}

#[tokio::test]
async fn judge_scores_results_when_replies_parse() {
    let provider = ScriptedProvider::new(
        vec![
            "SELECT COUNT(*) FROM users",
            "{\"confidence\": 92, \"explanation\": \"count matches intent\"}",
        ],
        "{\"confidence\": 92, \"explanation\": \"count matches intent\"}",
    );
    let mut config = GatewayConfig::test_defaults();
    config.judge.enabled = true;
    let h = build_harness(config, provider, MockExecutor::returning_count(42));

    let response = h.orchestrator.query(question("How many users?")).await;

    assert!(response.success);
    let confidence = response.confidence.unwrap();
    assert_eq!(confidence.score, Some(92));
    assert_eq!(confidence.rationale, "count matches intent");
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let provider = ScriptedProvider::repeating("SELECT 1");
    let h = harness(provider, MockExecutor::returning_count(0));

    let response = h.orchestrator.query(question("   ")).await;
    assert!(!response.success);
    assert_eq!(response.error.unwrap().kind, ErrorKind::InvalidRequest);
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn oversized_question_is_rejected() {
    let provider = ScriptedProvider::repeating("SELECT 1");
    let h = harness(provider, MockExecutor::returning_count(0));

    let response = h.orchestrator.query(question(&"x".repeat(20_000))).await;
    assert!(!response.success);
    assert_eq!(response.error.unwrap().kind, ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn question_length_is_counted_in_characters_not_bytes() {
    let provider = ScriptedProvider::repeating("SELECT COUNT(*) FROM users");
    let h = harness(provider, MockExecutor::returning_count(42));

    // 10,000 three-byte characters: 30,000 bytes but exactly at the bound
    let at_bound = "数".repeat(10_000);
    let response = h.orchestrator.query(question(&at_bound)).await;
    assert!(response.success, "{:?}", response.error);

    // One character over the bound is rejected regardless of byte width
    let over_bound = "数".repeat(10_001);
    let response = h.orchestrator.query(question(&over_bound)).await;
    assert!(!response.success);
    assert_eq!(response.error.unwrap().kind, ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn cancellation_aborts_a_running_execute() {
    // Property: cancelling mid-execute releases within a bounded time
    let provider = ScriptedProvider::repeating("SELECT COUNT(*) FROM users");
    let h = harness(provider, MockExecutor::slow(Duration::from_secs(30)));

    let ctx = RequestContext::new(Duration::from_secs(60));
    let cancel = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let started = std::time::Instant::now();
    let response = h
        .orchestrator
        .query_with_ctx(question("How many users?"), &ctx)
        .await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!response.success);
    assert_eq!(response.error.unwrap().kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn manual_sql_path_validates_and_executes() {
    let provider = ScriptedProvider::repeating("unused");
    let h = harness(provider, MockExecutor::returning_count(7));

    let response = h
        .orchestrator
        .execute_sql(Some("blog"), "SELECT COUNT(*) FROM users")
        .await;
    assert!(response.success);
    assert_eq!(h.provider.calls(), 0);
    assert_eq!(h.executor.calls(), 1);

    let refused = h
        .orchestrator
        .execute_sql(Some("blog"), "DROP TABLE users")
        .await;
    assert!(!refused.success);
    assert_eq!(refused.error.unwrap().kind, ErrorKind::NotReadonly);
}
