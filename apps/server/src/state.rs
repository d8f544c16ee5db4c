//! Shared application state and the process-scope container.

use std::sync::Arc;

use tally_inject::Container;

use crate::{
    config::Config, db::CounterRepo, request_context::RequestContext, services::CounterService,
    Result,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Process scope: the counter singleton plus request-scoped providers.
    pub container: Container,
    /// Same counter the container hands out, for handlers wired by hand.
    pub counter: Arc<CounterRepo>,
}

impl AppState {
    /// Build the process scope and check that a request scope can produce a
    /// `CounterService`, so a missing registration stops startup.
    pub fn new(config: Config) -> Result<Self> {
        let counter = Arc::new(CounterRepo::new());
        let container = build_container(counter.clone())?;
        container.verify::<Arc<CounterService>>()?;

        tracing::debug!(container = ?container, "Process scope ready");

        Ok(Self::from_parts(config, container, counter))
    }

    pub fn from_parts(config: Config, container: Container, counter: Arc<CounterRepo>) -> Self {
        Self {
            config: Arc::new(config),
            container,
            counter,
        }
    }
}

/// Registrations for the visit counter.
///
/// `RequestContext` is normally seeded by the request-id middleware; the
/// provider only covers scopes opened without it.
pub fn build_container(counter: Arc<CounterRepo>) -> tally_inject::Result<Container> {
    Container::builder()
        .singleton(counter)
        .scoped(|_| Ok(RequestContext::generate()))
        .scoped(|scope| Ok(CounterService::new(scope.resolve()?, scope.resolve()?)))
        .build()
}
