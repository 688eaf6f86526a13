//! Resilient client over the completion provider
//!
//! Call order per request: circuit breaker gate, token bucket, per-call
//! timeout, retry with exponential backoff and jitter for transient
//! failures. Reply parsing lives here so callers receive typed values; an
//! undecodable reply is retried exactly once before surfacing
//! `llm_parse_error`.

use crate::breaker::CircuitBreaker;
use crate::limiter::TokenBucket;
use crate::prompt::GenerationPrompt;
use crate::provider::{CompletionProvider, CompletionRequest, CompletionResponse, ProviderError};
use nlq_core::RequestContext;
use nlq_core::config::{LlmConfig, ResilienceConfig};
use nlq_core::error::{Error, Result};
use nlq_core::Dialect;
use nlq_core::types::{Confidence, GeneratedSql};
use nlq_telemetry::Metrics;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct LlmClient {
    provider: Arc<dyn CompletionProvider>,
    limiter: TokenBucket,
    breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
    max_retries: u32,
    base_delay: Duration,
    backoff: f64,
    call_timeout: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl LlmClient {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        resilience: &ResilienceConfig,
        llm: &LlmConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            provider,
            limiter: TokenBucket::new(resilience.rate_limit_rps, resilience.rate_limit_burst),
            breaker: CircuitBreaker::new(
                resilience.breaker_threshold,
                resilience.breaker_cooldown(),
            ),
            metrics,
            max_retries: resilience.max_retries,
            base_delay: resilience.base_delay(),
            backoff: resilience.backoff,
            call_timeout: llm.timeout(),
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Obtain SQL for a question prompt.
    pub async fn generate_sql(
        &self,
        prompt: &GenerationPrompt,
        dialect: Dialect,
        ctx: &RequestContext,
    ) -> Result<GeneratedSql> {
        let started = Instant::now();

        // An unparseable reply gets one fresh completion before giving up
        let mut parse_attempts = 0;
        loop {
            let response = self.call("generate_sql", prompt, ctx).await?;
            match extract_sql(&response.text) {
                Ok(text) => {
                    return Ok(GeneratedSql {
                        text,
                        dialect: dialect.tag().to_string(),
                        token_count: response.token_count,
                        model_id: response.model_id,
                        generation_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(e) if parse_attempts == 0 => {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        error = %e,
                        "SQL reply could not be decoded, retrying once"
                    );
                    parse_attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Score how well a result answers the question.
    pub async fn judge_result(
        &self,
        prompt: &GenerationPrompt,
        ctx: &RequestContext,
    ) -> Result<Confidence> {
        let mut parse_attempts = 0;
        loop {
            let response = self.call("judge_result", prompt, ctx).await?;
            match parse_confidence(&response.text) {
                Ok(confidence) => return Ok(confidence),
                Err(e) if parse_attempts == 0 => {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        error = %e,
                        "judge reply could not be decoded, retrying once"
                    );
                    parse_attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One provider call under the full resilience stack.
    async fn call(
        &self,
        op: &str,
        prompt: &GenerationPrompt,
        ctx: &RequestContext,
    ) -> Result<CompletionResponse> {
        if !self.breaker.allow_request() {
            self.metrics.llm_call(op, "circuit_open");
            return Err(Error::LlmUnavailable(
                "completion service circuit breaker is open".to_string(),
            ));
        }

        let request = CompletionRequest {
            system: prompt.system.clone(),
            user: prompt.user.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut attempt: u32 = 0;
        loop {
            if ctx.remaining().is_zero() {
                return Err(Error::Timeout("llm call".to_string()));
            }

            if !self.limiter.try_acquire() {
                if attempt < self.max_retries {
                    self.metrics.llm_call(op, "rate_limited");
                    self.backoff_sleep(attempt, ctx).await?;
                    attempt += 1;
                    continue;
                }
                self.metrics.llm_call(op, "rate_limited");
                return Err(Error::RateLimited(
                    "local token bucket exhausted".to_string(),
                ));
            }

            let budget = self.call_timeout.min(ctx.remaining());
            let outcome = tokio::select! {
                _ = ctx.cancellation().cancelled() => {
                    return Err(Error::Timeout("llm call cancelled".to_string()));
                }
                outcome = tokio::time::timeout(budget, self.provider.complete(request.clone())) => outcome,
            };

            let error = match outcome {
                Ok(Ok(response)) => {
                    self.breaker.record_success();
                    self.metrics.llm_call(op, "success");
                    return Ok(response);
                }
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout("per-call timeout elapsed".to_string()),
            };

            if error.is_transient() && attempt < self.max_retries {
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    op = %op,
                    attempt = attempt + 1,
                    error = %error,
                    "transient provider failure, backing off"
                );
                self.metrics.llm_call(op, "retry");
                self.backoff_sleep(attempt, ctx).await?;
                attempt += 1;
                continue;
            }

            self.breaker.record_failure();
            self.metrics.llm_call(op, "failure");
            return match error {
                ProviderError::Timeout(m) => Err(Error::Timeout(format!("llm call: {m}"))),
                other => Err(Error::LlmUnavailable(other.message().to_string())),
            };
        }
    }

    /// Exponential backoff with jitter, bounded by the request deadline.
    async fn backoff_sleep(&self, attempt: u32, ctx: &RequestContext) -> Result<()> {
        let exp = self.backoff.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let delay = self.base_delay.mul_f64(exp * jitter);

        let remaining = ctx.remaining();
        if remaining.is_zero() {
            return Err(Error::Timeout("llm retry budget".to_string()));
        }

        tokio::select! {
            _ = ctx.cancellation().cancelled() => {
                Err(Error::Timeout("llm call cancelled".to_string()))
            }
            _ = tokio::time::sleep(delay.min(remaining)) => Ok(()),
        }
    }
}

/// Pull the SQL text out of the provider's reply, tolerating fenced and
/// unfenced forms.
fn extract_sql(reply: &str) -> Result<String> {
    let trimmed = reply.trim();

    let inner = if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after
            .strip_prefix("sql")
            .or_else(|| after.strip_prefix("SQL"))
            .unwrap_or(after);
        match after.find("```") {
            Some(end) => &after[..end],
            None => after,
        }
    } else {
        trimmed
    };

    let sql = inner.trim();
    if sql.is_empty() {
        return Err(Error::LlmParse("reply contained no SQL".to_string()));
    }
    Ok(sql.to_string())
}

#[derive(Deserialize)]
struct JudgeReply {
    confidence: i64,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    concerns: Option<Vec<String>>,
    #[serde(default)]
    suggestion: Option<String>,
}

/// Decode the judge's JSON reply, tolerating code fences and surrounding
/// prose.
fn parse_confidence(reply: &str) -> Result<Confidence> {
    let start = reply
        .find('{')
        .ok_or_else(|| Error::LlmParse("judge reply contained no JSON object".to_string()))?;
    let end = reply
        .rfind('}')
        .ok_or_else(|| Error::LlmParse("judge reply contained no JSON object".to_string()))?;
    if end < start {
        return Err(Error::LlmParse("judge reply contained no JSON object".to_string()));
    }

    let parsed: JudgeReply = serde_json::from_str(&reply[start..=end])
        .map_err(|e| Error::LlmParse(format!("judge reply was not valid JSON: {e}")))?;

    let mut concerns = parsed.concerns.unwrap_or_default();
    if let Some(suggestion) = parsed.suggestion {
        if !suggestion.is_empty() {
            concerns.push(suggestion);
        }
    }

    Ok(Confidence {
        score: Some(parsed.confidence.clamp(0, 100) as u8),
        rationale: parsed.explanation.unwrap_or_default(),
        concerns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nlq_core::ErrorKind;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        replies: Mutex<VecDeque<std::result::Result<String, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<std::result::Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        fn model_id(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProviderError::Permanent("script exhausted".to_string())));
            next.map(|text| CompletionResponse {
                text,
                model_id: "scripted".to_string(),
                token_count: Some(7),
            })
        }
    }

    fn client_with(provider: Arc<ScriptedProvider>, max_retries: u32) -> LlmClient {
        let resilience = ResilienceConfig {
            max_retries,
            base_delay_ms: 1,
            backoff: 2.0,
            breaker_threshold: 3,
            breaker_cooldown_s: 60,
            rate_limit_rps: 10_000.0,
            rate_limit_burst: 10_000.0,
        };
        LlmClient::new(
            provider,
            &resilience,
            &LlmConfig::default(),
            Arc::new(Metrics::new()),
        )
    }

    fn prompt() -> GenerationPrompt {
        GenerationPrompt {
            system: "s".to_string(),
            user: "u".to_string(),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn generate_sql_strips_fences() {
        let provider = ScriptedProvider::new(vec![Ok(
            "```sql\nSELECT COUNT(*) FROM users\n```".to_string()
        )]);
        let client = client_with(provider.clone(), 0);

        let sql = client
            .generate_sql(&prompt(), Dialect::Postgres, &ctx())
            .await
            .unwrap();
        assert_eq!(sql.text, "SELECT COUNT(*) FROM users");
        assert_eq!(sql.dialect, "postgres");
        assert_eq!(sql.model_id, "scripted");
        assert_eq!(sql.token_count, Some(7));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Transient("503".to_string())),
            Err(ProviderError::Transient("503".to_string())),
            Ok("SELECT 1".to_string()),
        ]);
        let client = client_with(provider.clone(), 3);

        let sql = client
            .generate_sql(&prompt(), Dialect::Postgres, &ctx())
            .await
            .unwrap();
        assert_eq!(sql.text, "SELECT 1");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_errors_do_not_retry() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Permanent("401".to_string())),
            Ok("SELECT 1".to_string()),
        ]);
        let client = client_with(provider.clone(), 3);

        let err = client
            .generate_sql(&prompt(), Dialect::Postgres, &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LlmUnavailable);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_unavailable() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Transient("down".to_string())),
            Err(ProviderError::Transient("down".to_string())),
        ]);
        let client = client_with(provider.clone(), 1);

        let err = client
            .generate_sql(&prompt(), Dialect::Postgres, &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LlmUnavailable);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn breaker_opens_after_consecutive_failures() {
        let provider = ScriptedProvider::new(
            (0..3)
                .map(|_| Err(ProviderError::Permanent("500x".to_string())))
                .collect(),
        );
        let client = client_with(provider.clone(), 0);

        for _ in 0..3 {
            let _ = client.generate_sql(&prompt(), Dialect::Postgres, &ctx()).await;
        }
        assert_eq!(provider.calls(), 3);

        // Circuit is open now: no further provider calls
        let err = client
            .generate_sql(&prompt(), Dialect::Postgres, &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LlmUnavailable);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn unparseable_sql_reply_retries_once() {
        let provider = ScriptedProvider::new(vec![
            Ok("```sql\n\n```".to_string()),
            Ok("SELECT 2".to_string()),
        ]);
        let client = client_with(provider.clone(), 0);

        let sql = client
            .generate_sql(&prompt(), Dialect::Postgres, &ctx())
            .await
            .unwrap();
        assert_eq!(sql.text, "SELECT 2");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn unparseable_sql_reply_fails_after_second_attempt() {
        let provider =
            ScriptedProvider::new(vec![Ok("".to_string()), Ok("   ".to_string())]);
        let client = client_with(provider.clone(), 0);

        let err = client
            .generate_sql(&prompt(), Dialect::Postgres, &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LlmParseError);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn judge_reply_parses_fenced_json() {
        let provider = ScriptedProvider::new(vec![Ok(
            "```json\n{\"confidence\": 85, \"explanation\": \"looks right\", \"concerns\": [\"sample only\"]}\n```"
                .to_string(),
        )]);
        let client = client_with(provider.clone(), 0);

        let confidence = client.judge_result(&prompt(), &ctx()).await.unwrap();
        assert_eq!(confidence.score, Some(85));
        assert_eq!(confidence.rationale, "looks right");
        assert_eq!(confidence.concerns, vec!["sample only".to_string()]);
    }

    #[tokio::test]
    async fn judge_confidence_is_clamped() {
        let provider = ScriptedProvider::new(vec![Ok(
            "{\"confidence\": 400, \"explanation\": \"x\"}".to_string(),
        )]);
        let client = client_with(provider.clone(), 0);

        let confidence = client.judge_result(&prompt(), &ctx()).await.unwrap();
        assert_eq!(confidence.score, Some(100));
    }

    #[tokio::test]
    async fn rate_limit_fails_fast_without_retries() {
        let provider = ScriptedProvider::new(vec![Ok("SELECT 1".to_string())]);
        let resilience = ResilienceConfig {
            max_retries: 0,
            rate_limit_rps: 0.000001,
            rate_limit_burst: 1.0,
            ..ResilienceConfig::default()
        };
        let client = LlmClient::new(
            provider.clone(),
            &resilience,
            &LlmConfig::default(),
            Arc::new(Metrics::new()),
        );

        // First call takes the only token
        client
            .generate_sql(&prompt(), Dialect::Postgres, &ctx())
            .await
            .unwrap();

        let err = client
            .generate_sql(&prompt(), Dialect::Postgres, &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn extract_sql_variants() {
        assert_eq!(extract_sql("SELECT 1").unwrap(), "SELECT 1");
        assert_eq!(extract_sql("```sql\nSELECT 1\n```").unwrap(), "SELECT 1");
        assert_eq!(extract_sql("```\nSELECT 1\n```").unwrap(), "SELECT 1");
        assert_eq!(
            extract_sql("Here you go:\n```sql\nSELECT 1;\n```\nEnjoy!").unwrap(),
            "SELECT 1;"
        );
        assert!(extract_sql("").is_err());
    }
}
