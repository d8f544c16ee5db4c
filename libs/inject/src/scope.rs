//! Request scope: per-request instances, lazy location and deterministic release.

use std::any::{type_name, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use crate::container::{Cleanup, Container, Instance};
use crate::error::{Error, Result};
use crate::inject::FromScope;
use crate::lock;

/// Lifecycle of a request scope.
///
/// `Created → Resolving → Ready → HandlerRunning → Released`. A failed
/// resolution moves straight to `Released`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Created,
    Resolving,
    Ready,
    HandlerRunning,
    Released,
}

struct ScopeInner {
    id: u64,
    container: Container,
    state: Mutex<ScopeState>,
    instances: Mutex<HashMap<TypeId, Instance>>,
    building: Mutex<HashMap<TypeId, Arc<Mutex<()>>>>,
    disposers: Mutex<Vec<Cleanup>>,
}

thread_local! {
    /// Scoped providers currently being built on this thread, as
    /// `(scope id, type)`. Factories are synchronous, so one resolution chain
    /// never leaves the thread it started on.
    static RESOLVING: RefCell<Vec<(u64, TypeId, &'static str)>> = const { RefCell::new(Vec::new()) };
}

/// Entry on the thread's resolution chain, popped on drop.
struct ChainEntry {
    scope: u64,
    key: TypeId,
}

impl ChainEntry {
    fn enter(scope: u64, key: TypeId, type_name: &'static str) -> Result<Self> {
        RESOLVING.with(|chain| {
            let mut chain = chain.borrow_mut();
            if let Some(start) = chain
                .iter()
                .position(|(id, k, _)| *id == scope && *k == key)
            {
                let mut path: Vec<&'static str> = chain[start..]
                    .iter()
                    .filter(|(id, _, _)| *id == scope)
                    .map(|(_, _, name)| *name)
                    .collect();
                path.push(type_name);
                return Err(Error::CircularDependency { type_name, path });
            }
            chain.push((scope, key, type_name));
            Ok(Self { scope, key })
        })
    }
}

impl Drop for ChainEntry {
    fn drop(&mut self) {
        RESOLVING.with(|chain| {
            let mut chain = chain.borrow_mut();
            if let Some(pos) = chain
                .iter()
                .rposition(|(id, k, _)| *id == self.scope && *k == self.key)
            {
                chain.remove(pos);
            }
        });
    }
}

/// Locator handle into a request scope.
///
/// Clones share the same scope and may resolve from several threads at once;
/// each scoped provider is still built at most once per scope. Once the owning
/// [`Scope`] is released every handle returns [`Error::ScopeReleased`].
#[derive(Clone)]
pub struct ScopeHandle {
    inner: Arc<ScopeInner>,
}

impl ScopeHandle {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn state(&self) -> ScopeState {
        *lock(&self.inner.state)
    }

    pub fn is_released(&self) -> bool {
        self.state() == ScopeState::Released
    }

    pub fn container(&self) -> &Container {
        &self.inner.container
    }

    /// Seed the scope with a request-scoped value.
    ///
    /// Seeded values shadow scoped providers and singletons of the same type.
    pub fn provide<T: Send + Sync + 'static>(&self, value: T) -> Result<()> {
        self.provide_arc(Arc::new(value))
    }

    pub fn provide_arc<T: Send + Sync + 'static>(&self, value: Arc<T>) -> Result<()> {
        if self.is_released() {
            return Err(Error::ScopeReleased {
                type_name: type_name::<T>(),
            });
        }
        lock(&self.inner.instances).insert(TypeId::of::<T>(), value);
        Ok(())
    }

    /// Resolve `T`: the scope's own instances first, then its scoped
    /// providers, then the process scope.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let key = TypeId::of::<T>();
        let type_name = type_name::<T>();

        if self.is_released() {
            return Err(Error::ScopeReleased { type_name });
        }

        let cached = lock(&self.inner.instances).get(&key).cloned();
        if let Some(instance) = cached {
            return downcast::<T>(instance);
        }

        let Some(provider) = self.inner.container.scoped_provider(key) else {
            let found = self.inner.container.get::<T>();
            tracing::trace!(
                source = "tally_inject",
                scope = self.inner.id,
                dependency = type_name,
                found = found.is_ok(),
                "Resolved from process scope"
            );
            return found;
        };

        // Cycle check first: re-entering our own build slot would block forever.
        let _entry = ChainEntry::enter(self.inner.id, key, type_name)?;
        let slot = self.build_slot(key);
        let _building = lock(&slot);

        if self.is_released() {
            return Err(Error::ScopeReleased { type_name });
        }
        let cached = lock(&self.inner.instances).get(&key).cloned();
        if let Some(instance) = cached {
            return downcast::<T>(instance);
        }

        let instance = (provider.factory)(self)?;

        if let Some(dispose) = provider.dispose {
            let owned = instance.clone();
            self.defer(type_name, move || dispose(&owned));
        }
        lock(&self.inner.instances).insert(key, instance.clone());

        tracing::trace!(
            source = "tally_inject",
            scope = self.inner.id,
            dependency = type_name,
            "Constructed request-scoped instance"
        );

        downcast::<T>(instance)
    }

    /// Register a cleanup that runs once when the scope is released.
    ///
    /// Cleanups registered after release run immediately.
    pub fn defer<F>(&self, name: &'static str, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        lock(&self.inner.disposers).push((name, Box::new(cleanup)));
        if self.is_released() {
            self.run_disposers();
        }
    }

    fn build_slot(&self, key: TypeId) -> Arc<Mutex<()>> {
        lock(&self.inner.building)
            .entry(key)
            .or_default()
            .clone()
    }

    fn transition(&self, to: ScopeState) {
        let mut state = lock(&self.inner.state);
        let from = *state;
        if from == ScopeState::Released || from == to {
            return;
        }
        tracing::trace!(
            source = "tally_inject",
            scope = self.inner.id,
            from = ?from,
            to = ?to,
            "Scope state changed"
        );
        *state = to;
    }

    fn release(&self) {
        {
            let mut state = lock(&self.inner.state);
            let from = *state;
            if from == ScopeState::Released {
                return;
            }
            tracing::trace!(
                source = "tally_inject",
                scope = self.inner.id,
                from = ?from,
                "Releasing request scope"
            );
            *state = ScopeState::Released;
        }
        self.run_disposers();
        lock(&self.inner.instances).clear();
    }

    fn run_disposers(&self) {
        let disposers = std::mem::take(&mut *lock(&self.inner.disposers));
        for (name, cleanup) in disposers.into_iter().rev() {
            tracing::trace!(
                source = "tally_inject",
                scope = self.inner.id,
                dependency = name,
                "Disposing"
            );
            cleanup();
        }
    }
}

impl fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

fn downcast<T: Send + Sync + 'static>(instance: Instance) -> Result<Arc<T>> {
    instance.downcast::<T>().map_err(|_| Error::TypeMismatch {
        type_name: type_name::<T>(),
    })
}

/// Owner of a request scope.
///
/// Releasing happens exactly once: explicitly through [`Scope::run`] or
/// [`Scope::invoke`], or on drop (handler panic, cancelled future, early
/// return).
pub struct Scope {
    handle: ScopeHandle,
}

impl Scope {
    pub(crate) fn new(container: Container, id: u64) -> Self {
        tracing::trace!(source = "tally_inject", scope = id, "Request scope created");
        Self {
            handle: ScopeHandle {
                inner: Arc::new(ScopeInner {
                    id,
                    container,
                    state: Mutex::new(ScopeState::Created),
                    instances: Mutex::new(HashMap::new()),
                    building: Mutex::new(HashMap::new()),
                    disposers: Mutex::new(Vec::new()),
                }),
            },
        }
    }

    /// A locator handle for lazy resolution.
    pub fn handle(&self) -> ScopeHandle {
        self.handle.clone()
    }

    /// Resolve every dependency of `D` eagerly.
    ///
    /// On failure the scope is released before the error is returned.
    pub fn resolve_all<D: FromScope>(&self) -> Result<D> {
        self.handle.transition(ScopeState::Resolving);
        match D::from_scope(&self.handle) {
            Ok(deps) => {
                self.handle.transition(ScopeState::Ready);
                Ok(deps)
            }
            Err(e) => {
                tracing::trace!(
                    source = "tally_inject",
                    scope = self.handle.id(),
                    dependency = e.type_name(),
                    "Resolution failed"
                );
                self.handle.release();
                Err(e)
            }
        }
    }

    /// Resolve `D`, run the async handler with it, then release the scope.
    pub async fn run<D, F, Fut>(self, handler: F) -> Result<Fut::Output>
    where
        D: FromScope,
        F: FnOnce(D) -> Fut,
        Fut: Future,
    {
        let deps = self.resolve_all::<D>()?;
        self.handle.transition(ScopeState::HandlerRunning);
        let output = handler(deps).await;
        self.release();
        Ok(output)
    }

    /// Synchronous counterpart of [`Scope::run`].
    pub fn invoke<D, F, R>(self, handler: F) -> Result<R>
    where
        D: FromScope,
        F: FnOnce(D) -> R,
    {
        let deps = self.resolve_all::<D>()?;
        self.handle.transition(ScopeState::HandlerRunning);
        let output = handler(deps);
        self.release();
        Ok(output)
    }

    pub fn release(&self) {
        self.handle.release();
    }
}

impl Deref for Scope {
    type Target = ScopeHandle;

    fn deref(&self) -> &ScopeHandle {
        &self.handle
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scope").field(&self.handle).finish()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dispose;
    use futures::FutureExt as _;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Repo;

    #[derive(Debug)]
    struct Session {
        calls: Arc<AtomicUsize>,
    }

    impl Dispose for Session {
        fn dispose(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug)]
    struct Service {
        _repo: Arc<Repo>,
        _session: Arc<Session>,
    }

    fn container(calls: Arc<AtomicUsize>) -> Container {
        Container::builder()
            .singleton_value(Repo)
            .scoped_disposable(move |_| {
                Ok(Session {
                    calls: calls.clone(),
                })
            })
            .scoped(|scope| {
                Ok(Service {
                    _repo: scope.resolve()?,
                    _session: scope.resolve()?,
                })
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_scoped_instances_cached_per_scope() {
        let container = container(Arc::new(AtomicUsize::new(0)));
        let a = container.scope();
        let b = container.scope();

        let first = a.resolve::<Service>().unwrap();
        let again = a.resolve::<Service>().unwrap();
        let other = b.resolve::<Service>().unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_singletons_fall_through_to_process_scope() {
        let container = container(Arc::new(AtomicUsize::new(0)));
        let a = container.scope().resolve::<Repo>().unwrap();
        let b = container.scope().resolve::<Repo>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_seeded_value_shadows_provider() {
        let container = Container::builder()
            .scoped(|_| Ok(String::from("generated")))
            .build()
            .unwrap();
        let scope = container.scope();
        scope.provide(String::from("seeded")).unwrap();
        assert_eq!(*scope.resolve::<String>().unwrap(), "seeded");
    }

    #[test]
    fn test_missing_dependency_names_type() {
        let container = Container::builder()
            .scoped(|scope| Ok(Service {
                _repo: scope.resolve()?,
                _session: scope.resolve()?,
            }))
            .build()
            .unwrap();
        let err = container.scope().resolve::<Service>().unwrap_err();
        assert_eq!(
            err,
            Error::MissingDependency {
                type_name: type_name::<Repo>()
            }
        );
    }

    #[derive(Debug)]
    struct Left(#[allow(dead_code)] Arc<Right>);
    #[derive(Debug)]
    struct Right(#[allow(dead_code)] Arc<Left>);

    #[test]
    fn test_cycle_detected() {
        let container = Container::builder()
            .scoped(|scope| Ok(Left(scope.resolve()?)))
            .scoped(|scope| Ok(Right(scope.resolve()?)))
            .build()
            .unwrap();
        let scope = container.scope();
        match scope.resolve::<Left>().unwrap_err() {
            Error::CircularDependency { type_name: name, path } => {
                assert_eq!(name, type_name::<Left>());
                assert_eq!(
                    path,
                    vec![type_name::<Left>(), type_name::<Right>(), type_name::<Left>()]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The stack unwinds cleanly, so the next lookup reports the cycle again
        // rather than a stale state.
        assert!(matches!(
            scope.resolve::<Right>().unwrap_err(),
            Error::CircularDependency { .. }
        ));
    }

    #[test]
    fn test_factory_error_propagates() {
        let container = Container::builder()
            .scoped::<Repo, _>(|_| Err(Error::construction::<Repo>("unavailable")))
            .build()
            .unwrap();
        let err = container.scope().resolve::<Repo>().unwrap_err();
        assert!(matches!(err, Error::ConstructionFailed { .. }));
    }

    #[test]
    fn test_state_machine_on_success() {
        let container = container(Arc::new(AtomicUsize::new(0)));
        let scope = container.scope();
        let handle = scope.handle();
        assert_eq!(handle.state(), ScopeState::Created);

        let seen = scope
            .invoke(|(_service, located): (Arc<Service>, ScopeHandle)| located.state())
            .unwrap();

        assert_eq!(seen, ScopeState::HandlerRunning);
        assert_eq!(handle.state(), ScopeState::Released);
    }

    #[test]
    fn test_failed_resolution_releases_scope() {
        let calls = Arc::new(AtomicUsize::new(0));
        let container = container(calls.clone());
        let scope = container.scope();
        let handle = scope.handle();

        // Session is built before the missing u8 is hit.
        let result = scope.invoke(|_: (Arc<Session>, Arc<u8>)| ());

        assert!(matches!(result, Err(Error::MissingDependency { .. })));
        assert_eq!(handle.state(), ScopeState::Released);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_once_on_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let container = container(calls.clone());

        let out = container
            .scope()
            .run(|_service: Arc<Service>| async { 42 })
            .await
            .unwrap();

        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_once_on_handler_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let container = container(calls.clone());

        let out: std::result::Result<(), &str> = container
            .scope()
            .run(|_service: Arc<Service>| async { Err("business failure") })
            .await
            .unwrap();

        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_once_on_panic() {
        let calls = Arc::new(AtomicUsize::new(0));
        let container = container(calls.clone());

        let result = std::panic::AssertUnwindSafe(container.scope().run(
            |_service: Arc<Service>| async {
                panic!("handler blew up");
            },
        ))
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_locator_matches_eager_resolution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let container = container(calls.clone());

        container
            .scope()
            .run(|locator: ScopeHandle| async move {
                let first = locator.resolve::<Service>().unwrap();
                let second = locator.resolve::<Service>().unwrap();
                assert!(Arc::ptr_eq(&first, &second));
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_escaped_locator_fails_after_release() {
        let container = container(Arc::new(AtomicUsize::new(0)));
        let escaped = container.scope().invoke(|locator: ScopeHandle| locator).unwrap();

        assert!(escaped.is_released());
        assert!(matches!(
            escaped.resolve::<Repo>().unwrap_err(),
            Error::ScopeReleased { .. }
        ));
    }

    #[test]
    fn test_defer_after_release_runs_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let container = Container::builder().build().unwrap();
        let scope = container.scope();
        let handle = scope.handle();
        drop(scope);

        let counted = calls.clone();
        handle.defer("late", move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct Slow;

    #[test]
    fn test_concurrent_resolution_builds_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));

        struct Tracked(Arc<AtomicUsize>);

        impl Dispose for Tracked {
            fn dispose(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counted = built.clone();
        let released = disposed.clone();
        let container = Container::builder()
            .scoped(move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(100));
                Ok(Slow)
            })
            .scoped_disposable(move |scope| {
                scope.resolve::<Slow>()?;
                Ok(Tracked(released.clone()))
            })
            .build()
            .unwrap();
        let scope = container.scope();

        let results: Vec<_> = std::thread::scope(|threads| {
            let workers: Vec<_> = (0..2)
                .map(|_| {
                    let handle = scope.handle();
                    threads.spawn(move || {
                        (handle.resolve::<Slow>(), handle.resolve::<Tracked>().map(|_| ()))
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let (first, _) = &results[0];
        let (second, _) = &results[1];
        assert!(Arc::ptr_eq(first.as_ref().unwrap(), second.as_ref().unwrap()));
        assert!(results.iter().all(|(_, tracked)| tracked.is_ok()));
        assert_eq!(built.load(Ordering::SeqCst), 1);

        scope.release();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_verify_reports_missing_registration() {
        let container = Container::builder().singleton_value(Repo).build().unwrap();
        assert!(container.verify::<Arc<Repo>>().is_ok());
        assert!(matches!(
            container.verify::<(Arc<Repo>, Arc<Service>)>(),
            Err(Error::MissingDependency { .. })
        ));
    }
}
