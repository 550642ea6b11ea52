use std::collections::BTreeMap;

use crate::{
    errors::InjectError,
    resolver::{deferred::DeferredHandle, Resolver},
    types::{Injectable, Instance},
};

/// A resolved dependency as handed to a producer
#[derive(Debug, Clone)]
pub enum Argument {
    Instance(Instance),
    /// An optional dependency nobody provides
    Absent,
    Deferred(DeferredHandle),
}

/// Named arguments for a producer
///
/// Also used to pass explicit arguments, which take precedence over declared dependencies.
#[derive(Debug, Clone, Default)]
pub struct Arguments(BTreeMap<String, Argument>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value<T: Injectable>(self, name: impl Into<String>, value: T) -> Self {
        self.with_instance(name, Instance::new(value))
    }

    pub fn with_instance(mut self, name: impl Into<String>, instance: Instance) -> Self {
        self.insert(name, Argument::Instance(instance));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, argument: Argument) {
        self.0.insert(name.into(), argument);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn argument(&self, name: &str) -> Option<&Argument> {
        self.0.get(name)
    }

    /// Extracts `name` through the adapter `R`
    pub fn get<R: Resolver>(&self, name: &str) -> Result<R, InjectError> {
        let argument = self
            .0
            .get(name)
            .ok_or_else(|| InjectError::MissingArgument(name.to_string()))?;
        R::extract(name, argument)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Argument)> {
        self.0.iter().map(|(name, argument)| (name.as_str(), argument))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
