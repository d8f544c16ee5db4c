//! Visit registration.

use std::sync::Arc;

use crate::{db::CounterRepo, request_context::RequestContext};

/// Request-scoped service combining the shared counter with the caller's
/// request context.
pub struct CounterService {
    repo: Arc<CounterRepo>,
    context: Arc<RequestContext>,
}

impl CounterService {
    pub fn new(repo: Arc<CounterRepo>, context: Arc<RequestContext>) -> Self {
        Self { repo, context }
    }

    /// Record one visit and return the resulting count.
    pub fn register_visit(&self) -> u64 {
        let count = self.repo.increment();
        tracing::info!(
            parent: self.context.span(),
            request_id = %self.context.request_id,
            count,
            "Registered visit"
        );
        count
    }

    pub fn request_id(&self) -> &str {
        &self.context.request_id
    }
}
