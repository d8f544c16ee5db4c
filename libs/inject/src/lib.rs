//! Scoped dependency resolution
//!
//! Two lifetimes are supported:
//! - **Process scope** ([`Container`]): singletons built once at startup plus the
//!   templates of request-scoped providers
//! - **Request scope** ([`Scope`]): instances built per request, cached for the
//!   duration of that request and released exactly once when it ends
//!
//! Handlers declare what they need through [`FromScope`], either as typed
//! dependencies resolved before the handler runs or as a [`ScopeHandle`]
//! they pull from lazily.
//!
//! ```
//! use std::sync::Arc;
//! use tally_inject::{Container, ScopeHandle};
//!
//! struct Repo;
//! struct Service(Arc<Repo>);
//!
//! let container = Container::builder()
//!     .singleton_value(Repo)
//!     .scoped(|scope: &ScopeHandle| Ok(Service(scope.resolve()?)))
//!     .build()
//!     .unwrap();
//!
//! let shared = container
//!     .scope()
//!     .invoke(|service: Arc<Service>| Arc::ptr_eq(&service.0, &container.get::<Repo>().unwrap()))
//!     .unwrap();
//! assert!(shared);
//! ```

pub mod container;
pub mod error;
pub mod inject;
pub mod scope;

pub use container::{Container, ContainerBuilder, Dispose};
pub use error::{Error, Result};
pub use inject::FromScope;
pub use scope::{Scope, ScopeHandle, ScopeState};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Every guarded value here is left consistent between statements, so a
/// poisoned lock is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
