//! Request orchestration for the nlq query gateway
//!
//! Composes schema cache, prompt assembly, the LLM client, the safety
//! validator, the executor, and the result judge into one request state
//! machine with a bounded remediation cycle and per-stage sub-budgets.

pub mod history;
pub mod orchestrator;

pub use history::{HistoryLog, HistoryRecord};
pub use orchestrator::Orchestrator;
