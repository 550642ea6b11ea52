use std::{fmt, future::Future, sync::Arc};

use crate::{
    arguments::Arguments,
    events::ProducerKind,
    factories::{Dependencies, DynFactory, FnFactory, InstanceFactory},
    key::Key,
    lifecycle::Component,
    scope::{Scope, WeakScope},
    types::{DynError, Injectable, Instance},
};

/// Where a registration gets its instance from
#[derive(Clone)]
pub enum Producer {
    /// An instance that already exists
    Value(Instance),
    /// Constructed on first use, from resolved dependencies
    Factory(Arc<dyn DynFactory>),
    /// Resolves `key` in another scope
    Xref { scope: WeakScope, key: Key },
}

impl Producer {
    pub fn kind(&self) -> ProducerKind {
        match self {
            Producer::Value(_) => ProducerKind::Value,
            Producer::Factory(_) => ProducerKind::Factory,
            Producer::Xref { .. } => ProducerKind::Xref,
        }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Producer::Value(instance) => f.debug_tuple("Value").field(instance).finish(),
            Producer::Factory(factory) => f
                .debug_tuple("Factory")
                .field(&factory.supplies().type_name)
                .finish(),
            Producer::Xref { key, .. } => f.debug_struct("Xref").field("key", key).finish(),
        }
    }
}

/// Builder for a registration, consumed by [`Scope::add_provider`]
///
/// ```ignore
/// scope.add_provider(
///     Provider::function(Key::of::<Pool>(), Dependencies::new().add::<Arc<Config>>("config"), |args| async move {
///         Pool::connect(&args.get::<Arc<Config>>("config")?).await
///     })
///     .also_provides(Key::named("database")),
/// )?;
/// ```
#[derive(Debug)]
pub struct Provider {
    pub(crate) primary: Key,
    /// Every key, the primary one first
    pub(crate) keys: Vec<Key>,
    pub(crate) producer: Producer,
    pub(crate) allow_multiple: bool,
    pub(crate) no_close: bool,
    pub(crate) quiet: bool,
}

impl Provider {
    pub fn new(key: Key, producer: Producer) -> Self {
        Provider {
            primary: key.plain(),
            keys: vec![key.plain()],
            producer,
            allow_multiple: false,
            no_close: false,
            quiet: false,
        }
    }

    pub fn value<T: Injectable>(key: Key, value: T) -> Self {
        Self::instance(key, Instance::new(value))
    }

    /// A value with lifecycle hooks
    pub fn component<T: Component>(key: Key, value: T) -> Self {
        Self::instance(key, Instance::component(value))
    }

    pub fn instance(key: Key, instance: Instance) -> Self {
        Self::new(key, Producer::Value(instance))
    }

    pub fn factory<F: InstanceFactory>(key: Key, factory: F) -> Self {
        Self::new(key, Producer::Factory(Arc::new(factory)))
    }

    /// A factory made from an async closure receiving the resolved `dependencies`
    pub fn function<T, F, Fut>(key: Key, dependencies: Dependencies, function: F) -> Self
    where
        T: Injectable,
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, DynError>> + Send + 'static,
    {
        Self::factory(key, FnFactory::new(dependencies, function))
    }

    /// Like [`Provider::function`] for values with lifecycle hooks
    pub fn component_function<T, F, Fut>(key: Key, dependencies: Dependencies, function: F) -> Self
    where
        T: Component,
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, DynError>> + Send + 'static,
    {
        Self::factory(key, FnFactory::component(dependencies, function))
    }

    /// Answers `key` by resolving `target` in `scope`
    pub fn xref(key: Key, scope: &Scope, target: Key) -> Self {
        Self::new(
            key,
            Producer::Xref {
                scope: scope.downgrade(),
                key: target,
            },
        )
    }

    /// Registers the same producer (and the same cached instance) under another key
    pub fn also_provides(mut self, key: Key) -> Self {
        let key = key.plain();
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
        self
    }

    /// Construct and cache the instance in each requesting scope instead of the registering one
    pub fn allow_multiple(mut self) -> Self {
        self.allow_multiple = true;
        self
    }

    /// Leave the instance alone when the scope is closed
    pub fn no_close(mut self) -> Self {
        self.no_close = true;
        self
    }

    /// Do not emit events for this registration
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Primary key, returned by `add_provider`
    pub fn key(&self) -> &Key {
        &self.primary
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }
}

/// An immutable entry of a scope's registration table
#[derive(Debug)]
pub(crate) struct Registration {
    /// Unique in the runtime, doubles as the cache slot id
    pub(crate) id: u64,
    pub(crate) primary: Key,
    pub(crate) keys: Vec<Key>,
    pub(crate) producer: Producer,
    pub(crate) allow_multiple: bool,
    pub(crate) no_close: bool,
    pub(crate) quiet: bool,
}

impl Registration {
    pub(crate) fn from_provider(id: u64, provider: Provider) -> Self {
        let Provider {
            primary,
            keys,
            producer,
            allow_multiple,
            no_close,
            quiet,
        } = provider;

        Registration {
            id,
            primary,
            keys,
            producer,
            allow_multiple,
            no_close,
            quiet,
        }
    }
}
