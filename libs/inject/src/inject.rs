//! Typed dependency declarations for handlers.

use std::sync::Arc;

use crate::error::Result;
use crate::scope::ScopeHandle;

/// A set of dependencies a handler declares by type.
///
/// Implemented for `Arc<T>` (resolved through the scope), for [`ScopeHandle`]
/// (the locator itself, for lazy resolution inside the handler) and for
/// tuples of up to six of those.
pub trait FromScope: Sized {
    fn from_scope(scope: &ScopeHandle) -> Result<Self>;
}

impl<T: Send + Sync + 'static> FromScope for Arc<T> {
    fn from_scope(scope: &ScopeHandle) -> Result<Self> {
        scope.resolve::<T>()
    }
}

impl FromScope for ScopeHandle {
    fn from_scope(scope: &ScopeHandle) -> Result<Self> {
        Ok(scope.clone())
    }
}

impl FromScope for () {
    fn from_scope(_: &ScopeHandle) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_from_scope_tuple {
    ($($ty:ident),+) => {
        impl<$($ty: FromScope),+> FromScope for ($($ty,)+) {
            fn from_scope(scope: &ScopeHandle) -> Result<Self> {
                Ok(($($ty::from_scope(scope)?,)+))
            }
        }
    };
}

impl_from_scope_tuple!(A);
impl_from_scope_tuple!(A, B);
impl_from_scope_tuple!(A, B, C);
impl_from_scope_tuple!(A, B, C, D);
impl_from_scope_tuple!(A, B, C, D, E);
impl_from_scope_tuple!(A, B, C, D, E, F);
