use std::{ops::Deref, sync::Arc};

use keel_di::{Argument, Injectable, InjectError, Key, Resolver};

/// A wrapper type to allow for config injections
///
/// This provides a simple way to retrieve configs from the config registry,
/// and inject them on a factory as a dependency
///
/// # Example
/// ```ignore
/// pub struct MyModuleConfig {
///     enabled: bool,
/// }
///
/// let mut configs = ConfigProvider::new();
/// configs.add_config(MyModuleConfig { enabled: true })?;
/// configs.install(runtime.root())?;
///
/// runtime.root().add_provider(Provider::function(
///     Key::of::<MyModule>(),
///     Dependencies::new().add::<Config<MyModuleConfig>>("config"),
///     |args| async move {
///         let config = args.get::<Config<MyModuleConfig>>("config")?;
///         Ok(MyModule::new(config.enabled))
///     },
/// ))?;
/// ```
pub struct Config<T> {
    inner: Arc<T>,
}
impl<T> Deref for Config<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
impl<T> Clone for Config<T> {
    fn clone(&self) -> Self {
        Config {
            inner: self.inner.clone(),
        }
    }
}
impl<T: Injectable> Config<T> {
    /// Key the config of type `T` is registered under
    pub fn key() -> Key {
        Key::of::<Config<T>>()
    }

    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc(inner: Arc<T>) -> Self {
        Config { inner }
    }

    pub fn inner(&self) -> Arc<T> {
        self.inner.clone()
    }

    pub fn into_inner(self) -> Arc<T> {
        self.inner
    }
}

impl<T: Injectable> Resolver for Config<T> {
    fn dependency_key() -> Key {
        Config::<T>::key()
    }

    fn extract(name: &str, argument: &Argument) -> Result<Self, InjectError> {
        match argument {
            Argument::Instance(instance) => Ok(instance.get::<Config<T>>()?.as_ref().clone()),
            Argument::Deferred(handle) => Ok(handle
                .get()?
                .ok_or_else(|| InjectError::MissingArgument(name.to_string()))?
                .get::<Config<T>>()?
                .as_ref()
                .clone()),
            Argument::Absent => Err(InjectError::MissingArgument(name.to_string())),
        }
    }
}
