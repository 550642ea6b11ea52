use std::collections::HashMap;

use futures::{future::try_join_all, FutureExt};

use crate::{
    engine::{self, Cx},
    errors::InjectError,
    key::{ConstraintValue, Key, ReadyRequirement, Target},
    scope::Scope,
    types::Instance,
};

/// One result of [`Scope::filter_instantiate`]
#[derive(Debug, Clone)]
pub struct FilteredInstance {
    pub key: Key,
    /// Values of the filtered attributes, in the order they were asked for
    pub values: Vec<ConstraintValue>,
    pub instance: Instance,
}

impl Scope {
    /// Keys for `target` that carry every constraint named in `attributes`
    ///
    /// Searches this scope and its ancestors up to and including `stop_at` (the whole chain if
    /// `None`). Keys of more distant scopes come first, each key is reported once.
    pub fn filter(
        &self,
        target: &Target,
        attributes: &[&str],
        stop_at: Option<&Scope>,
    ) -> Result<Vec<Key>, InjectError> {
        self.filter_by(carries(target, attributes), stop_at)
    }

    /// Like [`Scope::filter`] with an arbitrary predicate over the registered keys
    pub fn filter_by(
        &self,
        predicate: impl Fn(&Key) -> bool,
        stop_at: Option<&Scope>,
    ) -> Result<Vec<Key>, InjectError> {
        Ok(self
            .registered(predicate, stop_at)?
            .into_iter()
            .map(|(_, key)| key)
            .collect())
    }

    /// Matching keys with the scope whose table holds them
    ///
    /// A key registered in several scopes keeps the position of its most distant occurrence
    /// but is attributed to the nearest one.
    fn registered(
        &self,
        predicate: impl Fn(&Key) -> bool,
        stop_at: Option<&Scope>,
    ) -> Result<Vec<(Scope, Key)>, InjectError> {
        let scopes = self.chain_until(stop_at)?;

        let mut positions: HashMap<Key, usize> = HashMap::new();
        let mut found: Vec<(Scope, Key)> = Vec::new();
        for scope in scopes.iter().rev() {
            for key in scope.keys() {
                if !predicate(&key) {
                    continue;
                }
                match positions.get(&key) {
                    Some(&position) => found[position].0 = scope.clone(),
                    None => {
                        positions.insert(key.clone(), found.len());
                        found.push((scope.clone(), key));
                    }
                }
            }
        }
        Ok(found)
    }

    /// Constructs every registration found by [`Scope::filter`]
    ///
    /// Each key is resolved concurrently through the registration found for it, a nearer
    /// registration of the same key overriding a more distant one. Instances of `allow_multiple`
    /// registrations belong to this scope.
    pub async fn filter_instantiate(
        &self,
        target: &Target,
        attributes: &[&str],
        stop_at: Option<&Scope>,
    ) -> Result<Vec<FilteredInstance>, InjectError> {
        self.filter_instantiate_inner(
            target,
            attributes,
            stop_at,
            ReadyRequirement::Default,
            Cx::top(self),
        )
        .await
    }

    /// [`Scope::filter_instantiate`] with an explicit readiness for every result
    pub async fn filter_instantiate_with(
        &self,
        target: &Target,
        attributes: &[&str],
        stop_at: Option<&Scope>,
        ready: ReadyRequirement,
    ) -> Result<Vec<FilteredInstance>, InjectError> {
        self.filter_instantiate_inner(target, attributes, stop_at, ready, Cx::top(self))
            .await
    }

    pub(crate) async fn filter_instantiate_inner(
        &self,
        target: &Target,
        attributes: &[&str],
        stop_at: Option<&Scope>,
        ready: ReadyRequirement,
        cx: Cx,
    ) -> Result<Vec<FilteredInstance>, InjectError> {
        let found = self.registered(carries(target, attributes), stop_at)?;
        tracing::trace!(scope = %self.name(), %target, found = found.len(), "filter_instantiate");

        let pending = found.into_iter().map(|(found_in, key)| {
            let values: Vec<ConstraintValue> = attributes
                .iter()
                .filter_map(|attribute| key.constraint(attribute).cloned())
                .collect();
            let request = key.clone().with_ready(ready);
            engine::resolve_registered(self.clone(), found_in, request, cx.clone()).map(
                move |resolved| {
                    resolved.map(|instance| {
                        instance.map(|instance| FilteredInstance {
                            key,
                            values,
                            instance,
                        })
                    })
                },
            )
        });

        Ok(try_join_all(pending).await?.into_iter().flatten().collect())
    }

    /// This scope and its ancestors up to and including `stop_at`, nearest first
    fn chain_until(&self, stop_at: Option<&Scope>) -> Result<Vec<Scope>, InjectError> {
        let Some(stop_at) = stop_at else {
            return Ok(self.chain().collect());
        };

        let mut scopes = Vec::new();
        for scope in self.chain() {
            let done = scope.ptr_eq(stop_at);
            scopes.push(scope);
            if done {
                return Ok(scopes);
            }
        }

        Err(InjectError::NotAnAncestor {
            scope: self.name().to_string(),
            stop_at: stop_at.name().to_string(),
        })
    }
}

fn carries<'a>(target: &'a Target, attributes: &'a [&str]) -> impl Fn(&Key) -> bool + 'a {
    move |key| {
        key.target() == target
            && attributes
                .iter()
                .all(|attribute| key.constraint(attribute).is_some())
    }
}
