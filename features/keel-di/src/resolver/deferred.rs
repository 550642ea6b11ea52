use std::{
    fmt::{self, Debug},
    marker::PhantomData,
    sync::{Arc, Mutex, OnceLock},
};

use crate::{
    arguments::Argument,
    engine::{self, Cx},
    errors::InjectError,
    key::Key,
    resolver::Resolver,
    scope::{Scope, WeakScope},
    types::{lock, Injectable, Instance},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    Unresolved,
    Resolving,
    Resolved,
}

/// Stand-in for a dependency whose construction waits until [`DeferredHandle::resolve`]
///
/// The dependency is still declared up front, so it shows up in introspection and can be
/// overridden like any other, but nothing is built until somebody asks for it.
#[derive(Clone)]
pub struct DeferredHandle(Arc<DeferredInner>);

struct DeferredInner {
    key: Key,
    scope: WeakScope,
    cx: Cx,
    value: OnceLock<Option<Instance>>,
    state: Mutex<DeferredState>,
    resolving: futures::lock::Mutex<()>,
}

impl DeferredHandle {
    pub(crate) fn new(scope: &Scope, key: Key, cx: Cx) -> Self {
        Self::build(scope.downgrade(), key, cx)
    }

    /// Handle that is already resolved, used when an explicit argument fills a deferred slot
    pub(crate) fn resolved(key: Key, value: Option<Instance>) -> Self {
        let handle = Self::build(WeakScope::default(), key, Cx::detached());
        let _ = handle.0.value.set(value);
        *lock(&handle.0.state) = DeferredState::Resolved;
        handle
    }

    fn build(scope: WeakScope, key: Key, cx: Cx) -> Self {
        DeferredHandle(Arc::new(DeferredInner {
            key: key.immediate(),
            scope,
            cx,
            value: OnceLock::new(),
            state: Mutex::new(DeferredState::Unresolved),
            resolving: futures::lock::Mutex::new(()),
        }))
    }

    pub fn key(&self) -> &Key {
        &self.0.key
    }

    pub fn state(&self) -> DeferredState {
        *lock(&self.0.state)
    }

    /// Resolves the dependency against the scope the handle was created in
    ///
    /// Idempotent, later calls return the first result. A failed attempt is not remembered, so
    /// the next call tries again. `Ok(None)` means an optional dependency nobody provides.
    pub async fn resolve(&self) -> Result<Option<Instance>, InjectError> {
        if let Some(value) = self.0.value.get() {
            return Ok(value.clone());
        }

        let _resolving = self.0.resolving.lock().await;

        // Double check - another caller might have resolved while we waited for the lock
        if let Some(value) = self.0.value.get() {
            return Ok(value.clone());
        }

        *lock(&self.0.state) = DeferredState::Resolving;
        let result = match self.0.scope.upgrade() {
            Some(scope) => engine::resolve(scope, self.0.key.clone(), self.0.cx.clone()).await,
            None => Err(InjectError::ScopeClosed(format!("owner of {}", self.0.key))),
        };

        match result {
            Ok(value) => {
                let _ = self.0.value.set(value.clone());
                *lock(&self.0.state) = DeferredState::Resolved;
                tracing::debug!(key = %self.0.key, "resolved deferred dependency");
                Ok(value)
            }
            Err(error) => {
                *lock(&self.0.state) = DeferredState::Unresolved;
                Err(error)
            }
        }
    }

    /// The value if already resolved, without resolving it
    pub fn peek(&self) -> Option<Instance> {
        self.0.value.get().cloned().flatten()
    }

    /// The resolved value, or [`InjectError::NotYetResolved`]
    pub fn get(&self) -> Result<Option<Instance>, InjectError> {
        self.0
            .value
            .get()
            .cloned()
            .ok_or_else(|| InjectError::NotYetResolved {
                key: self.0.key.clone(),
            })
    }
}

impl Debug for DeferredHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredHandle")
            .field("key", &self.0.key)
            .field("state", &self.state())
            .finish()
    }
}

/// Typed view of a [`DeferredHandle`]
pub struct Deferred<T: Injectable> {
    handle: DeferredHandle,
    _type: PhantomData<fn() -> T>,
}

impl<T: Injectable> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred {
            handle: self.handle.clone(),
            _type: PhantomData,
        }
    }
}

impl<T: Injectable> Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Deferred").field(&self.handle).finish()
    }
}

impl<T: Injectable> Deferred<T> {
    pub fn handle(&self) -> &DeferredHandle {
        &self.handle
    }

    pub fn state(&self) -> DeferredState {
        self.handle.state()
    }

    pub async fn resolve(&self) -> Result<Arc<T>, InjectError> {
        self.resolve_optional()
            .await?
            .ok_or_else(|| InjectError::unsatisfied(self.handle.key()))
    }

    /// Like [`Deferred::resolve`], for dependencies declared optional
    pub async fn resolve_optional(&self) -> Result<Option<Arc<T>>, InjectError> {
        self.handle
            .resolve()
            .await?
            .map(|instance| instance.get::<T>())
            .transpose()
    }

    pub fn peek(&self) -> Option<Arc<T>> {
        self.handle
            .peek()
            .and_then(|instance| instance.downcast::<T>().ok())
    }

    pub fn get(&self) -> Result<Arc<T>, InjectError> {
        self.handle
            .get()?
            .ok_or_else(|| InjectError::unsatisfied(self.handle.key()))?
            .get::<T>()
    }
}

impl<T: Injectable> Resolver for Deferred<T> {
    fn dependency_key() -> Key {
        Key::of::<T>().deferred()
    }

    fn adapt_key(key: Key) -> Key {
        key.deferred()
    }

    fn extract(name: &str, argument: &Argument) -> Result<Self, InjectError> {
        let handle = match argument {
            Argument::Deferred(handle) => handle.clone(),
            Argument::Instance(instance) => {
                DeferredHandle::resolved(Key::of::<T>(), Some(instance.clone()))
            }
            Argument::Absent => return Err(InjectError::MissingArgument(name.to_string())),
        };

        Ok(Deferred {
            handle,
            _type: PhantomData,
        })
    }
}
