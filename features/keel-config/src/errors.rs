use keel_di::{InjectError, TypeInfo};

/// Errors of the config registry
#[derive(thiserror::Error, Debug, Clone)]
pub enum ConfigError {
    /// The required Config is not known
    #[error("The required Config type '{0}' is not known")]
    Missing(TypeInfo),

    /// The Config type is already registered
    #[error("The Config type '{0}' is already registered")]
    AlreadyRegistered(TypeInfo),

    /// Registering the configs in a scope failed
    #[error(transparent)]
    Inject(#[from] InjectError),
}
