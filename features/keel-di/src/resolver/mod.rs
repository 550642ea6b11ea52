use crate::{arguments::Argument, errors::InjectError, key::Key};

pub mod arc;
pub mod deferred;

/// Adapter between a declared dependency and the value a producer works with
pub trait Resolver: Sized {
    /// Key requested when the dependency is declared without an explicit key
    fn dependency_key() -> Key;

    /// Applies the adapter's addressing flags to an explicit key
    fn adapt_key(key: Key) -> Key {
        key
    }

    /// Extracts the adapter from a resolved argument
    fn extract(name: &str, argument: &Argument) -> Result<Self, InjectError>;
}
