use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use keel_di::{Injectable, InjectError, Key, Provider, Scope, TypeInfo};

use crate::{config::Config, errors::ConfigError};

type Installer = Box<dyn Fn(&Scope) -> Result<Key, InjectError> + Send + Sync>;

struct ConfigEntry {
    info: TypeInfo,
    value: Arc<dyn Any + Send + Sync>,
    install: Installer,
}

/// A provider to register all configs.
///
/// Configs can be registered and retrieved based on type. Once complete, [`ConfigProvider::install`]
/// makes every config injectable as [`Config<T>`] in a scope and its descendants.
#[derive(Default)]
pub struct ConfigProvider {
    configs: HashMap<TypeId, ConfigEntry>,
}

impl ConfigProvider {
    /// Initializes an empty Config Provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve a config with specified type.
    pub fn get_config<T: Injectable>(&self) -> Option<Arc<T>> {
        self.configs
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value.clone().downcast().ok())
    }

    /// Like [`ConfigProvider::get_config`], failing with [`ConfigError::Missing`]
    pub fn require_config<T: Injectable>(&self) -> Result<Arc<T>, ConfigError> {
        self.get_config()
            .ok_or_else(|| ConfigError::Missing(TypeInfo::of::<T>()))
    }

    /// Add a config to the registry.
    ///
    /// If the config type is already registered, it will return a
    /// [`ConfigError`] runtime error
    pub fn add_config<T: Injectable>(&mut self, config: T) -> Result<&mut Self, ConfigError> {
        let info = TypeInfo::of::<T>();
        if self.configs.contains_key(&info.type_id) {
            return Err(ConfigError::AlreadyRegistered(info));
        }

        let value = Arc::new(config);
        let shared = value.clone();
        let install: Installer = Box::new(move |scope: &Scope| {
            scope.add_provider(
                Provider::value(Config::<T>::key(), Config::from_arc(shared.clone())).no_close(),
            )
        });

        self.configs.insert(
            info.type_id,
            ConfigEntry {
                info,
                value,
                install,
            },
        );
        Ok(self)
    }

    /// Can optionally add a config to the registry.
    ///
    /// If the config provided is `Some(T)`, it will be the same as calling [`ConfigProvider::add_config`]
    /// If the config provided is `None`, then the function just returns `Ok(self)` for chaining
    pub fn maybe_add_config<T: Injectable>(
        &mut self,
        config: Option<T>,
    ) -> Result<&mut Self, ConfigError> {
        match config {
            Some(c) => self.add_config(c),
            None => Ok(self),
        }
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Registers every config in `scope`, together with the provider itself
    ///
    /// Configs installed in a child scope shadow those of its ancestors.
    pub fn install(self, scope: &Scope) -> Result<Arc<ConfigProvider>, ConfigError> {
        for entry in self.configs.values() {
            (entry.install)(scope)?;
            tracing::debug!(scope = %scope.name(), config = %entry.info, "installed config");
        }

        let provider = Arc::new(self);
        scope.add_provider(
            Provider::instance(
                Key::of::<ConfigProvider>(),
                keel_di::Instance::from_arc(provider.clone()),
            )
            .no_close(),
        )?;
        Ok(provider)
    }
}

impl fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.configs.values().map(|entry| entry.info.type_name))
            .finish()
    }
}
