//! Runs axum handlers inside a request scope.
//!
//! Every call opens a scope nested under the process container, seeds it
//! with the [`RequestContext`] created by the request-id middleware, resolves
//! the handler's declared dependencies, runs it, and releases the scope on
//! every exit path.

use std::future::Future;

use axum::{
    extract::{Request, State},
    response::{IntoResponse, Response},
};
use futures::future::{BoxFuture, FutureExt as _};
use tally_inject::FromScope;

use crate::{request_context::RequestContext, state::AppState, Result};

/// Wrap `handler` into an axum handler that resolves `D` per request.
///
/// `D` is any [`FromScope`] set: typed `Arc<T>` dependencies for constructor
/// injection, or a `ScopeHandle` for location inside the handler.
pub fn scoped<D, F, Fut>(
    handler: F,
) -> impl Fn(State<AppState>, Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static
where
    D: FromScope + Send + 'static,
    F: FnOnce(D) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoResponse + Send,
{
    move |State(state): State<AppState>, request: Request| {
        let handler = handler.clone();
        let context = request.extensions().get::<RequestContext>().cloned();
        async move {
            match run_scoped(&state, context, handler).await {
                Ok(output) => output.into_response(),
                Err(e) => e.into_response(),
            }
        }
        .boxed()
    }
}

async fn run_scoped<D, F, Fut>(
    state: &AppState,
    context: Option<RequestContext>,
    handler: F,
) -> Result<Fut::Output>
where
    D: FromScope,
    F: FnOnce(D) -> Fut,
    Fut: Future,
{
    let scope = state.container.scope();
    if let Some(context) = context {
        scope.provide(context)?;
    }
    Ok(scope.run(handler).await?)
}
