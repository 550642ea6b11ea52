use std::{future::Future, marker::PhantomData};

use futures::{future::BoxFuture, FutureExt};

use crate::{
    arguments::Arguments,
    key::Key,
    lifecycle::Component,
    resolver::Resolver,
    types::{DynError, Injectable, Instance, TypeInfo},
};

/// A declared dependency: the argument name a producer reads and the key it is resolved from
#[derive(Debug, Clone)]
pub struct Dependency {
    pub name: String,
    pub key: Key,
}

/// Ordered list of declared dependencies
#[derive(Debug, Clone, Default)]
pub struct Dependencies(Vec<Dependency>);

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name`, resolved from the default key of the adapter `R`
    ///
    /// `add::<Arc<Db>>("db")`, `add::<Option<Arc<Cache>>>("cache")`, `add::<Deferred<Image>>("image")`
    pub fn add<R: Resolver>(self, name: impl Into<String>) -> Self {
        self.push(name.into(), R::dependency_key())
    }

    /// Declares `name`, resolved from `key` with the flags of the adapter `R` applied
    pub fn add_key<R: Resolver>(self, name: impl Into<String>, key: Key) -> Self {
        self.push(name.into(), R::adapt_key(key))
    }

    fn push(mut self, name: String, key: Key) -> Self {
        self.0.retain(|dependency| dependency.name != name);
        self.0.push(Dependency { name, key });
        self
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&Dependency) -> bool) {
        self.0.retain(keep);
    }

    pub fn get(&self, name: &str) -> Option<&Dependency> {
        self.0.iter().find(|dependency| dependency.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A Factory providing instances of a given type
pub trait InstanceFactory: Send + Sync + 'static {
    type Provides: Injectable;

    /// Returns the typeinfo about the factory's provided type
    fn supplies() -> TypeInfo {
        TypeInfo::of::<Self::Provides>()
    }

    /// Returns the dependencies the factory requires to supply its type
    fn dependencies(&self) -> Dependencies;

    /// Constructs a new instance of the factory's provided type
    ///
    /// `arguments` holds every declared dependency, keyed by its declared name
    fn construct(
        &self,
        arguments: Arguments,
    ) -> impl Future<Output = Result<Self::Provides, DynError>> + Send + '_;

    /// Wraps the constructed value
    ///
    /// Factories of [`Component`]s return `Instance::component(value)` so hooks are found
    fn into_instance(&self, value: Self::Provides) -> Instance {
        Instance::new(value)
    }
}

/// Wrapper Trait for factories, providing instances of Any
pub trait DynFactory: Send + Sync {
    fn supplies(&self) -> TypeInfo;

    /// Returns a list of dependencies for the factory
    fn dependencies(&self) -> Dependencies;

    /// Constructs a new instance of the factory's provided type from resolved arguments
    fn construct(&self, arguments: Arguments) -> BoxFuture<'_, Result<Instance, DynError>>;
}
// Impl DynFactory for any InstanceFactory
impl<T: Injectable, SpecificFactory: InstanceFactory<Provides = T>> DynFactory for SpecificFactory {
    fn supplies(&self) -> TypeInfo {
        <SpecificFactory as InstanceFactory>::supplies()
    }

    fn dependencies(&self) -> Dependencies {
        InstanceFactory::dependencies(self)
    }

    fn construct(&self, arguments: Arguments) -> BoxFuture<'_, Result<Instance, DynError>> {
        async move {
            // Forward the call to the specific implementation
            let value = InstanceFactory::construct(self, arguments).await?;
            Ok(self.into_instance(value))
        }
        .boxed()
    }
}

/// Factory made from a closure, see `Provider::function`
pub struct FnFactory<T, F> {
    dependencies: Dependencies,
    function: F,
    wrap: fn(T) -> Instance,
    _provides: PhantomData<fn() -> T>,
}

impl<T: Injectable, F> FnFactory<T, F> {
    pub fn new(dependencies: Dependencies, function: F) -> Self {
        FnFactory {
            dependencies,
            function,
            wrap: Instance::new::<T>,
            _provides: PhantomData,
        }
    }
}

impl<T: Component, F> FnFactory<T, F> {
    /// Like [`FnFactory::new`], keeping the lifecycle hooks of the produced value
    pub fn component(dependencies: Dependencies, function: F) -> Self {
        FnFactory {
            dependencies,
            function,
            wrap: Instance::component::<T>,
            _provides: PhantomData,
        }
    }
}

impl<T, F, Fut> InstanceFactory for FnFactory<T, F>
where
    T: Injectable,
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, DynError>> + Send + 'static,
{
    type Provides = T;

    fn dependencies(&self) -> Dependencies {
        self.dependencies.clone()
    }

    fn construct(&self, arguments: Arguments) -> impl Future<Output = Result<T, DynError>> + Send + '_ {
        (self.function)(arguments)
    }

    fn into_instance(&self, value: T) -> Instance {
        (self.wrap)(value)
    }
}
