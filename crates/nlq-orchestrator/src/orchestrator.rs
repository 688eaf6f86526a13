//! The request state machine
//!
//! S0 init -> S1 schema -> S2 generate -> S3 validate -> S4 execute ->
//! S5 judge -> S6 done. A validator refusal of the remediable kinds sends
//! the pipeline back to S2 once per remediation budget, with the failure
//! prepended to the prompt. Judging is advisory and never fails a request.

use crate::history::{HistoryLog, HistoryRecord};
use nlq_core::config::{GatewayConfig, JudgeConfig, LimitsConfig, SecurityConfig};
use nlq_core::error::{Error, ErrorKind, Result};
use nlq_core::types::{
    Confidence, QueryRequest, QueryResponse, QueryResult, ReturnMode, Stats, sql_preview,
};
use nlq_core::RequestContext;
use nlq_db::executor::Execute;
use nlq_db::registry::DatabaseRegistry;
use nlq_llm::client::LlmClient;
use nlq_llm::prompt::{PromptAssembler, RemediationHint};
use nlq_schema::cache::SchemaCache;
use nlq_telemetry::{Metrics, StageTimer};
use nlq_validator::{SafetyPolicy, ValidatedSql, validate};
use std::sync::Arc;
use std::time::Duration;

const SCHEMA_BUDGET: Duration = Duration::from_secs(10);
const GENERATE_BUDGET: Duration = Duration::from_secs(15);
const EXECUTE_BUDGET: Duration = Duration::from_secs(30);

struct RunOutput {
    sql: String,
    data: Option<QueryResult>,
    confidence: Option<Confidence>,
}

/// Owns a request's transient state and composes every downstream component.
pub struct Orchestrator {
    registry: Arc<DatabaseRegistry>,
    cache: Arc<SchemaCache>,
    llm: Arc<LlmClient>,
    executor: Arc<dyn Execute>,
    assembler: PromptAssembler,
    security: SecurityConfig,
    judge: JudgeConfig,
    limits: LimitsConfig,
    metrics: Arc<Metrics>,
    history: Option<Arc<HistoryLog>>,
}

impl Orchestrator {
    pub fn new(
        config: &GatewayConfig,
        registry: Arc<DatabaseRegistry>,
        cache: Arc<SchemaCache>,
        llm: Arc<LlmClient>,
        executor: Arc<dyn Execute>,
        metrics: Arc<Metrics>,
        history: Option<Arc<HistoryLog>>,
    ) -> Self {
        Self {
            registry,
            cache,
            llm,
            executor,
            assembler: PromptAssembler::new(config.limits.prompt_token_budget),
            security: config.security.clone(),
            judge: config.judge.clone(),
            limits: config.limits.clone(),
            metrics,
            history,
        }
    }

    /// Run a natural-language request end to end.
    pub async fn query(&self, request: QueryRequest) -> QueryResponse {
        let ctx = RequestContext::new(self.limits.request_timeout());
        self.query_with_ctx(request, &ctx).await
    }

    /// Same as [`query`](Self::query) but under a caller-provided context,
    /// so transports can propagate their own deadlines and cancellation.
    pub async fn query_with_ctx(&self, request: QueryRequest, ctx: &RequestContext) -> QueryResponse {
        let mut stats = Stats::default();
        let mut last_sql: Option<String> = None;

        tracing::info!(
            request_id = %ctx.request_id(),
            db_name = request.database.as_deref().unwrap_or("<auto>"),
            question_len = request.question.len(),
            "query started"
        );

        let db_label = self
            .registry
            .resolve(request.database.as_deref())
            .unwrap_or_else(|_| request.database.clone().unwrap_or_else(|| "unknown".to_string()));

        match self.run(&request, ctx, &mut stats, &mut last_sql).await {
            Ok(output) => {
                self.metrics.request("success");
                self.record_history(ctx, &db_label, "nl", &last_sql, Some(&output), None)
                    .await;
                QueryResponse {
                    success: true,
                    sql: Some(output.sql),
                    data: output.data,
                    confidence: output.confidence,
                    stats,
                    error: None,
                }
            }
            Err(e) => {
                let kind = e.kind();
                self.metrics.request(kind.as_str());
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    db_name = %db_label,
                    kind = %kind,
                    error = %e,
                    "query failed"
                );

                let mut record = e.to_record(ctx.request_id());
                // Safety refusals always carry the offending SQL so the
                // caller understands the refusal; DB stack traces never do.
                if is_safety_refusal(kind) {
                    if let Some(sql) = &last_sql {
                        record = record.with_detail(serde_json::json!({ "sql": sql }));
                    }
                }

                self.record_history(ctx, &db_label, "nl", &last_sql, None, Some(kind))
                    .await;
                QueryResponse::failure(record, stats)
            }
        }
    }

    /// Validate and execute caller-provided SQL (the manual path). No LLM
    /// involvement; refusals surface directly.
    pub async fn execute_sql(&self, database: Option<&str>, sql: &str) -> QueryResponse {
        let ctx = RequestContext::new(self.limits.request_timeout());
        let mut stats = Stats::default();

        let result: Result<(ValidatedSql, QueryResult)> = async {
            let db_name = self.registry.resolve(database)?;
            let descriptor = self.registry.get(&db_name)?;
            let policy = SafetyPolicy::from_config(&self.security, descriptor.row_cap);

            let timer = StageTimer::start();
            let validated = validate(sql, descriptor.dialect, &policy)?;
            stats.validate_ms = timer.finish(&self.metrics, "validate");

            let timer = StageTimer::start();
            let exec_ctx = ctx.with_stage_budget(EXECUTE_BUDGET);
            let result = self
                .executor
                .execute(&validated, &db_name, policy.max_rows, &exec_ctx)
                .await?;
            stats.execute_ms = timer.finish(&self.metrics, "execute");

            Ok((validated, result))
        }
        .await;

        let db_label = self
            .registry
            .resolve(database)
            .unwrap_or_else(|_| database.unwrap_or("unknown").to_string());

        match result {
            Ok((validated, data)) => {
                self.metrics.request("success");
                let sql_text = Some(validated.text().to_string());
                let output = RunOutput {
                    sql: validated.text().to_string(),
                    data: Some(data),
                    confidence: None,
                };
                self.record_history(&ctx, &db_label, "manual", &sql_text, Some(&output), None)
                    .await;
                QueryResponse {
                    success: true,
                    sql: Some(output.sql),
                    data: output.data,
                    confidence: None,
                    stats,
                    error: None,
                }
            }
            Err(e) => {
                let kind = e.kind();
                self.metrics.request(kind.as_str());
                if is_safety_refusal(kind) {
                    self.metrics.sql_refusal(kind.as_str());
                }
                let record = e.to_record(ctx.request_id());
                self.record_history(
                    &ctx,
                    &db_label,
                    "manual",
                    &Some(sql.to_string()),
                    None,
                    Some(kind),
                )
                .await;
                QueryResponse::failure(record, stats)
            }
        }
    }

    /// Drop the cached snapshot for a database and schedule a refresh.
    pub async fn refresh_schema(&self, db_name: &str) -> Result<()> {
        self.registry.get(db_name)?;
        self.cache.refresh(db_name).await.map(|_| ())
    }

    async fn run(
        &self,
        request: &QueryRequest,
        ctx: &RequestContext,
        stats: &mut Stats,
        last_sql: &mut Option<String>,
    ) -> Result<RunOutput> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(Error::InvalidRequest("question must not be empty".to_string()));
        }
        if question.chars().count() > self.limits.max_question_len {
            return Err(Error::InvalidRequest(format!(
                "question exceeds {} characters",
                self.limits.max_question_len
            )));
        }

        let db_name = self.registry.resolve(request.database.as_deref())?;
        let descriptor = self.registry.get(&db_name)?;
        let dialect = descriptor.dialect;

        // S1: schema
        let timer = StageTimer::start();
        let schema_ctx = ctx.with_stage_budget(SCHEMA_BUDGET);
        let snapshot = tokio::time::timeout(schema_ctx.remaining(), self.cache.get(&db_name))
            .await
            .map_err(|_| Error::Timeout("schema fetch".to_string()))??;
        stats.schema_ms = timer.finish(&self.metrics, "schema");

        let policy = SafetyPolicy::from_config(&self.security, descriptor.row_cap);

        // S2 + S3: generate and validate, with the remediation cycle
        let mut remediation: Option<RemediationHint> = None;
        let mut attempts_left = self.limits.remediation_budget + 1;
        let validated = loop {
            let prompt = self.assembler.generation(
                question,
                &snapshot,
                dialect,
                request.client_hints.as_deref(),
                remediation.as_ref(),
            );

            let timer = StageTimer::start();
            let gen_ctx = ctx.with_stage_budget(GENERATE_BUDGET);
            let generated = self.llm.generate_sql(&prompt, dialect, &gen_ctx).await?;
            stats.generate_ms += timer.finish(&self.metrics, "generate");
            *last_sql = Some(generated.text.clone());

            tracing::debug!(
                request_id = %ctx.request_id(),
                sql = %sql_preview(&generated.text),
                "SQL generated"
            );

            let timer = StageTimer::start();
            let outcome = validate(&generated.text, dialect, &policy);
            stats.validate_ms += timer.finish(&self.metrics, "validate");

            match outcome {
                Ok(validated) => break validated,
                Err(e) => {
                    let kind = e.kind();
                    self.metrics.sql_refusal(kind.as_str());

                    if kind.remediable() && attempts_left > 1 {
                        attempts_left -= 1;
                        stats.retries += 1;
                        tracing::warn!(
                            request_id = %ctx.request_id(),
                            kind = %kind,
                            error = %e,
                            "generated SQL refused, remediating"
                        );
                        remediation = Some(RemediationHint {
                            previous_sql: generated.text,
                            error: e.to_string(),
                        });
                        continue;
                    }

                    if kind.remediable() {
                        // Budget exhausted
                        return Err(Error::UnsafeSql(format!(
                            "SQL still refused after remediation: {e}"
                        )));
                    }
                    return Err(e);
                }
            }
        };
        *last_sql = Some(validated.text().to_string());

        // S4: execute, or stop at the SQL for sql_only requests
        if request.return_mode == ReturnMode::SqlOnly {
            return Ok(RunOutput {
                sql: validated.text().to_string(),
                data: None,
                confidence: None,
            });
        }

        let timer = StageTimer::start();
        let exec_ctx = ctx.with_stage_budget(EXECUTE_BUDGET);
        let result = self
            .executor
            .execute(&validated, &db_name, policy.max_rows, &exec_ctx)
            .await?;
        stats.execute_ms = timer.finish(&self.metrics, "execute");

        tracing::info!(
            request_id = %ctx.request_id(),
            db_name = %db_name,
            rows = result.row_count,
            truncated = result.truncated,
            "SQL executed"
        );

        // S5: judge, best effort
        let confidence = if self.judge.enabled && !result.rows.is_empty() {
            let timer = StageTimer::start();
            let judge_ctx = ctx.with_stage_budget(Duration::from_secs(self.judge.timeout_s));
            let prompt = self.assembler.judge(
                question,
                validated.text(),
                &result.columns,
                &result.rows,
                result.row_count,
                self.judge.sample_rows,
            );
            let confidence = match self.llm.judge_result(&prompt, &judge_ctx).await {
                Ok(confidence) => confidence,
                Err(e) => {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        error = %e,
                        "result judging failed, continuing unjudged"
                    );
                    Confidence::unjudged()
                }
            };
            stats.judge_ms = timer.finish(&self.metrics, "judge");
            Some(confidence)
        } else {
            None
        };

        Ok(RunOutput {
            sql: validated.text().to_string(),
            data: Some(result),
            confidence,
        })
    }

    async fn record_history(
        &self,
        ctx: &RequestContext,
        db_name: &str,
        source: &str,
        sql: &Option<String>,
        output: Option<&RunOutput>,
        error_kind: Option<ErrorKind>,
    ) {
        let Some(history) = &self.history else { return };

        let mut record = HistoryRecord::now(ctx.request_id(), db_name, source);
        record.sql = sql.clone();
        record.success = error_kind.is_none();
        record.error_kind = error_kind.map(|k| k.as_str().to_string());
        if let Some(output) = output {
            if let Some(data) = &output.data {
                record.row_count = Some(data.row_count);
                record.execution_ms = Some(data.execution_ms);
            }
        }

        if let Err(e) = history.append(&record).await {
            tracing::warn!(error = %e, "failed to append history record");
        }
    }
}

fn is_safety_refusal(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ParseError
            | ErrorKind::NotReadonly
            | ErrorKind::BlockedFunction
            | ErrorKind::DisallowedIdentifier
            | ErrorKind::MultipleStatements
            | ErrorKind::EmptyStatement
            | ErrorKind::UnsafeSql
    )
}
