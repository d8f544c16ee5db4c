//! Per-request context: a request id and the span every log entry of that
//! request is emitted under.

use tracing::Span;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    span: Span,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        let span = tracing::info_span!("request", request_id = %request_id);
        Self { request_id, span }
    }

    /// Fresh context with a random v4 UUID as its id.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}
