//! The visit counter endpoint, in each wiring style.

use std::sync::Arc;

use axum::Extension;
use futures::future::{BoxFuture, FutureExt as _};
use tally_inject::ScopeHandle;

use crate::{
    db::CounterRepo, request_context::RequestContext, services::CounterService, Result,
};

pub fn visitor_message(count: u64) -> String {
    format!("You are visitor #{count}")
}

/// Constructor injection: the service arrives already resolved.
pub async fn register_visit(service: Arc<CounterService>) -> String {
    visitor_message(service.register_visit())
}

/// Service locator: the handler pulls the service from its request scope.
pub async fn register_visit_located(locator: ScopeHandle) -> Result<String> {
    let service = locator.resolve::<CounterService>()?;
    tracing::debug!(
        request_id = service.request_id(),
        scope = locator.id(),
        "Located counter service"
    );
    Ok(visitor_message(service.register_visit()))
}

/// Manual wiring: a closure capturing the shared counter builds the service
/// by hand for every request.
pub fn manual_register_visit(
    counter: Arc<CounterRepo>,
) -> impl Fn(Option<Extension<RequestContext>>) -> BoxFuture<'static, String>
       + Clone
       + Send
       + Sync
       + 'static {
    move |context: Option<Extension<RequestContext>>| {
        let counter = counter.clone();
        async move {
            let context = context
                .map(|Extension(context)| context)
                .unwrap_or_else(RequestContext::generate);
            let service = CounterService::new(counter, Arc::new(context));
            visitor_message(service.register_visit())
        }
        .boxed()
    }
}
