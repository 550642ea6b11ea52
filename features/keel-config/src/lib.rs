//! Keel Config provides a registry of configs that can be injected in the rest of the
//! application.
//!
//! Keel Config is split into two major parts:
//! 1. ConfigProvider: Used to create the registry of all configs and install it into a scope
//! 2. Config<T>: A wrapper type to be able to resolve and retrieve configs
//!
//! # Examples
//!
//! ```ignore
//! struct AppConfig {
//!     host: String,
//!     port: u16,
//! }
//!
//! let runtime = Runtime::default();
//! let mut config_provider = ConfigProvider::new();
//! config_provider.add_config(AppConfig {
//!     host: "localhost".to_string(),
//!     port: 8080,
//! })?;
//! config_provider.install(runtime.root())?;
//!
//! let config = runtime.root().get::<Config<AppConfig>>().await?;
//! assert_eq!(config.port, 8080);
//! ```

pub mod config;
pub mod errors;
pub mod provider;

pub use config::Config;
pub use errors::ConfigError;
pub use provider::ConfigProvider;
