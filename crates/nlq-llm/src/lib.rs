//! LLM access for the nlq query gateway
//!
//! The external completion service is wrapped in three resilience layers:
//! a token-bucket rate limiter (fail fast), retry with exponential backoff
//! and jitter for transient provider errors, and a circuit breaker that
//! fails immediately while the provider is known to be down. Prompt assembly
//! and reply parsing live here too, so the orchestrator only ever sees typed
//! values.

pub mod breaker;
pub mod client;
pub mod limiter;
pub mod openai;
pub mod prompt;
pub mod provider;
mod types;

pub use breaker::{BreakerState, CircuitBreaker};
pub use client::LlmClient;
pub use limiter::TokenBucket;
pub use openai::OpenAiProvider;
pub use prompt::{GenerationPrompt, PromptAssembler};
pub use provider::{CompletionProvider, CompletionRequest, CompletionResponse, ProviderError};
