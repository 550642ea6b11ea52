use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{
    engine::{self, Cx},
    errors::InjectError,
    filter::FilteredInstance,
    key::{Key, ReadyRequirement, Target},
    scope::Scope,
    types::{DynError, Injectable, Instance},
    wait_graph::Requester,
};

/// Value that takes part in the instance lifecycle
///
/// Register such values with [`Instance::component`] (or `Provider::component`, or a factory
/// overriding `into_instance`) so the runtime can find their hooks.
pub trait Component: Injectable {
    /// Hook driving the instance from `NotReady` to `Ready`
    fn ready_hook(&self) -> Option<&dyn AsyncReady> {
        None
    }

    /// Hook run when the owning scope is closed
    fn release_hook(&self) -> Option<&dyn Close> {
        None
    }
}

/// Asynchronous second construction phase
pub trait AsyncReady: Send + Sync {
    fn async_ready(&self, cx: ReadyContext) -> BoxFuture<'_, Result<(), DynError>>;
}

/// Releases resources held by an instance
pub trait Close: Send + Sync {
    fn close(&self) -> Result<(), DynError>;
}

/// Handed to [`AsyncReady::async_ready`]
///
/// Lookups made through the context are attributed to the instance becoming ready, so waiting
/// on something that waits on this instance is reported as a cycle.
#[derive(Clone)]
pub struct ReadyContext {
    pub(crate) scope: Scope,
    pub(crate) requester: Requester,
}

impl ReadyContext {
    /// Scope that owns the instance becoming ready
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Key the instance is registered under
    pub fn key(&self) -> &Key {
        &self.requester.key
    }

    fn cx(&self) -> Cx {
        Cx {
            requester: Some(self.requester.clone()),
            inherited_ready: true,
        }
    }

    pub async fn get_instance(&self, key: &Key) -> Result<Instance, InjectError> {
        engine::resolve(self.scope.clone(), key.clone(), self.cx())
            .await?
            .ok_or_else(|| InjectError::unsatisfied(key))
    }

    pub async fn get_optional(&self, key: &Key) -> Result<Option<Instance>, InjectError> {
        engine::resolve(self.scope.clone(), key.clone().optional(), self.cx()).await
    }

    pub async fn get<T: Injectable>(&self) -> Result<Arc<T>, InjectError> {
        self.get_instance(&Key::of::<T>()).await?.get()
    }

    /// [`Scope::filter_instantiate`] on behalf of the instance becoming ready
    pub async fn filter_instantiate(
        &self,
        target: &Target,
        attributes: &[&str],
        ready: ReadyRequirement,
    ) -> Result<Vec<FilteredInstance>, InjectError> {
        self.scope
            .filter_instantiate_inner(target, attributes, None, ready, self.cx())
            .await
    }
}
