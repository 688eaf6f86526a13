//! Per-request context: id, deadline, cancellation
//!
//! Every request carries one of these through the pipeline. Components derive
//! their stage budgets from it and observe the cancellation token at every
//! I/O boundary.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Context propagated through a single request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    deadline: Instant,
    token: CancellationToken,
}

impl RequestContext {
    /// Create a context with a fresh request id and the given overall timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            deadline: Instant::now() + timeout,
            token: CancellationToken::new(),
        }
    }

    /// Create a child context sharing the id and cancellation but with a
    /// tighter deadline (stage sub-budget).
    pub fn with_stage_budget(&self, budget: Duration) -> Self {
        Self {
            request_id: self.request_id.clone(),
            deadline: self.deadline.min(Instant::now() + budget),
            token: self.token.clone(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the request; propagates to every component holding the token.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_budget_never_extends_deadline() {
        let ctx = RequestContext::new(Duration::from_millis(50));
        let stage = ctx.with_stage_budget(Duration::from_secs(3600));
        assert!(stage.deadline() <= ctx.deadline());
        assert_eq!(stage.request_id(), ctx.request_id());
    }

    #[test]
    fn stage_budget_tightens_deadline() {
        let ctx = RequestContext::new(Duration::from_secs(60));
        let stage = ctx.with_stage_budget(Duration::from_millis(10));
        assert!(stage.remaining() <= Duration::from_millis(10));
        assert!(ctx.remaining() > Duration::from_secs(59));
    }

    #[test]
    fn cancellation_is_shared_with_children() {
        let ctx = RequestContext::new(Duration::from_secs(60));
        let stage = ctx.with_stage_budget(Duration::from_secs(10));
        ctx.cancel();
        assert!(stage.is_cancelled());
    }

    #[test]
    fn expired_context_reports_zero_remaining() {
        let ctx = RequestContext::new(Duration::ZERO);
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }
}
