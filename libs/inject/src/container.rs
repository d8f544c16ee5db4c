//! Process scope: singletons and the templates of request-scoped providers.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::inject::FromScope;
use crate::lock;
use crate::scope::{Scope, ScopeHandle};

pub(crate) type Instance = Arc<dyn Any + Send + Sync>;
pub(crate) type Factory = Arc<dyn Fn(&ScopeHandle) -> Result<Instance> + Send + Sync>;
pub(crate) type DisposeFn = fn(&Instance);
pub(crate) type Cleanup = (&'static str, Box<dyn FnOnce() + Send>);

/// A resource that needs explicit cleanup when the scope owning it is released.
pub trait Dispose: Send + Sync + 'static {
    fn dispose(&self);
}

fn dispose_instance<T: Dispose>(instance: &Instance) {
    if let Some(value) = instance.downcast_ref::<T>() {
        value.dispose();
    }
}

pub(crate) struct ScopedProvider {
    pub(crate) type_name: &'static str,
    pub(crate) factory: Factory,
    pub(crate) dispose: Option<DisposeFn>,
}

struct Singleton {
    type_name: &'static str,
    instance: Instance,
}

/// Collects registrations for a [`Container`].
///
/// Singletons are values constructed by the caller before registration; scoped
/// providers are factories run at most once per request scope.
#[derive(Default)]
pub struct ContainerBuilder {
    singletons: HashMap<TypeId, Singleton>,
    scoped: HashMap<TypeId, ScopedProvider>,
    finalizers: Vec<Cleanup>,
    duplicate: Option<&'static str>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process-wide singleton shared by every request scope.
    pub fn singleton<T: Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
        let key = TypeId::of::<T>();
        let type_name = type_name::<T>();
        if self.is_registered(key) {
            self.duplicate.get_or_insert(type_name);
            return self;
        }
        self.singletons.insert(
            key,
            Singleton {
                type_name,
                instance: value,
            },
        );
        self
    }

    pub fn singleton_value<T: Send + Sync + 'static>(self, value: T) -> Self {
        self.singleton(Arc::new(value))
    }

    /// Register a request-scoped provider.
    ///
    /// The factory receives the requesting scope and resolves its own
    /// dependencies through it.
    pub fn scoped<T, F>(self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ScopeHandle) -> Result<T> + Send + Sync + 'static,
    {
        self.insert_scoped::<T, F>(factory, None)
    }

    /// Register a request-scoped provider whose instances are disposed when
    /// the scope is released.
    pub fn scoped_disposable<T, F>(self, factory: F) -> Self
    where
        T: Dispose,
        F: Fn(&ScopeHandle) -> Result<T> + Send + Sync + 'static,
    {
        self.insert_scoped::<T, F>(factory, Some(dispose_instance::<T>))
    }

    /// Run `cleanup` once the process scope is torn down, after every request
    /// scope created from it has been dropped.
    pub fn on_shutdown<F>(mut self, name: &'static str, cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.finalizers.push((name, Box::new(cleanup)));
        self
    }

    pub fn build(self) -> Result<Container> {
        if let Some(type_name) = self.duplicate {
            return Err(Error::DuplicateRegistration { type_name });
        }

        tracing::trace!(
            source = "tally_inject",
            singletons = self.singletons.len(),
            scoped = self.scoped.len(),
            "Process scope built"
        );

        Ok(Container {
            inner: Arc::new(ContainerInner {
                singletons: self.singletons,
                scoped: self.scoped,
                next_scope_id: AtomicU64::new(1),
                finalizers: Mutex::new(self.finalizers),
            }),
        })
    }

    fn is_registered(&self, key: TypeId) -> bool {
        self.singletons.contains_key(&key) || self.scoped.contains_key(&key)
    }

    fn insert_scoped<T, F>(mut self, factory: F, dispose: Option<DisposeFn>) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ScopeHandle) -> Result<T> + Send + Sync + 'static,
    {
        let key = TypeId::of::<T>();
        let type_name = type_name::<T>();
        if self.is_registered(key) {
            self.duplicate.get_or_insert(type_name);
            return self;
        }
        let factory: Factory = Arc::new(move |scope: &ScopeHandle| {
            factory(scope).map(|value| Arc::new(value) as Instance)
        });
        self.scoped.insert(
            key,
            ScopedProvider {
                type_name,
                factory,
                dispose,
            },
        );
        self
    }
}

/// The process scope.
///
/// Cheap to clone. Every [`Scope`] keeps the container alive, so shutdown
/// finalizers only run after the last request scope is gone.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

struct ContainerInner {
    singletons: HashMap<TypeId, Singleton>,
    scoped: HashMap<TypeId, ScopedProvider>,
    next_scope_id: AtomicU64,
    finalizers: Mutex<Vec<Cleanup>>,
}

impl Container {
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    /// Look up a singleton in the process scope.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let type_name = type_name::<T>();
        match self.inner.singletons.get(&TypeId::of::<T>()) {
            Some(singleton) => singleton
                .instance
                .clone()
                .downcast::<T>()
                .map_err(|_| Error::TypeMismatch { type_name }),
            None => Err(Error::MissingDependency { type_name }),
        }
    }

    /// Whether `T` can be resolved, either as a singleton or a scoped provider.
    pub fn contains<T: 'static>(&self) -> bool {
        let key = TypeId::of::<T>();
        self.inner.singletons.contains_key(&key) || self.inner.scoped.contains_key(&key)
    }

    /// Open a new request scope nested under this process scope.
    pub fn scope(&self) -> Scope {
        let id = self.inner.next_scope_id.fetch_add(1, Ordering::Relaxed);
        Scope::new(self.clone(), id)
    }

    /// Resolve `D` in a throwaway scope.
    ///
    /// Lets a binary fail at startup when a registration is missing instead of
    /// on the first request.
    pub fn verify<D: FromScope>(&self) -> Result<()> {
        let scope = self.scope();
        scope.resolve_all::<D>().map(|_| ())
    }

    pub(crate) fn scoped_provider(&self, key: TypeId) -> Option<&ScopedProvider> {
        self.inner.scoped.get(&key)
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut singletons: Vec<_> = self
            .inner
            .singletons
            .values()
            .map(|s| s.type_name)
            .collect();
        let mut scoped: Vec<_> = self.inner.scoped.values().map(|p| p.type_name).collect();
        singletons.sort_unstable();
        scoped.sort_unstable();
        f.debug_struct("Container")
            .field("singletons", &singletons)
            .field("scoped", &scoped)
            .finish()
    }
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        let finalizers = std::mem::take(&mut *lock(&self.finalizers));
        for (name, cleanup) in finalizers.into_iter().rev() {
            tracing::trace!(source = "tally_inject", finalizer = name, "Process scope cleanup");
            cleanup();
        }
    }
}
