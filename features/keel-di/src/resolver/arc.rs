use std::sync::Arc;

use crate::{
    arguments::Argument,
    errors::InjectError,
    key::Key,
    resolver::Resolver,
    types::Injectable,
};

impl<T: Injectable> Resolver for Arc<T> {
    fn dependency_key() -> Key {
        Key::of::<T>()
    }

    fn extract(name: &str, argument: &Argument) -> Result<Self, InjectError> {
        match argument {
            Argument::Instance(instance) => instance.get::<T>(),
            // A deferred argument read as a plain one, only valid once resolved
            Argument::Deferred(handle) => handle
                .get()?
                .ok_or_else(|| InjectError::MissingArgument(name.to_string()))?
                .get::<T>(),
            Argument::Absent => Err(InjectError::MissingArgument(name.to_string())),
        }
    }
}

impl<Resolvable: Resolver> Resolver for Option<Resolvable> {
    fn dependency_key() -> Key {
        Resolvable::dependency_key().optional()
    }

    fn adapt_key(key: Key) -> Key {
        Resolvable::adapt_key(key).optional()
    }

    fn extract(name: &str, argument: &Argument) -> Result<Self, InjectError> {
        match argument {
            // If nobody provides the type, Option does not fail
            Argument::Absent => Ok(None),
            argument => Resolvable::extract(name, argument).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Instance;

    #[test]
    fn option_marks_key_optional() {
        let key = <Option<Arc<u32>>>::dependency_key();
        assert!(key.is_optional());
        assert_eq!(key, Key::of::<u32>());
    }

    #[test]
    fn absent_is_none_for_options_only() {
        let absent = Argument::Absent;
        assert!(<Option<Arc<u32>>>::extract("n", &absent).unwrap().is_none());
        assert!(matches!(
            <Arc<u32>>::extract("n", &absent),
            Err(InjectError::MissingArgument(name)) if name == "n"
        ));
    }

    #[test]
    fn wrong_type_is_a_downcast_error() {
        let argument = Argument::Instance(Instance::new(5u8));
        assert!(matches!(
            <Arc<u32>>::extract("n", &argument),
            Err(InjectError::DowncastFailed { .. })
        ));
    }
}
