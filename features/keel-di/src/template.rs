use std::collections::BTreeMap;

use futures::{
    future::{try_join_all, BoxFuture},
    FutureExt,
};

use crate::{
    engine::{self, Cx},
    errors::InjectError,
    key::Key,
    scope::Scope,
    types::{Injectable, Instance},
};

/// A tree of values where some leaves are keys still to be resolved
///
/// ```ignore
/// let template = Template::map([
///     ("uplink", Template::key(Key::of::<Network>().with("role", "outside"))),
///     ("hosts", Template::list([Template::key(db), Template::value(gateway)])),
/// ]);
/// let resolved = scope.resolve_template(&template).await?;
/// ```
#[derive(Debug, Clone)]
pub enum Template {
    Value(Instance),
    Key(Key),
    List(Vec<Template>),
    Map(BTreeMap<String, Template>),
}

impl Template {
    pub fn value<T: Injectable>(value: T) -> Self {
        Template::Value(Instance::new(value))
    }

    pub fn key(key: Key) -> Self {
        Template::Key(key)
    }

    pub fn list(items: impl IntoIterator<Item = Template>) -> Self {
        Template::List(items.into_iter().collect())
    }

    pub fn map<S: Into<String>>(entries: impl IntoIterator<Item = (S, Template)>) -> Self {
        Template::Map(
            entries
                .into_iter()
                .map(|(name, template)| (name.into(), template))
                .collect(),
        )
    }
}

/// A [`Template`] with every key replaced by its instance
#[derive(Debug, Clone)]
pub enum Resolved {
    Value(Instance),
    /// An optional key nobody provides
    Absent,
    List(Vec<Resolved>),
    Map(BTreeMap<String, Resolved>),
}

impl Resolved {
    pub fn instance(&self) -> Option<&Instance> {
        match self {
            Resolved::Value(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn index(&self, index: usize) -> Option<&Resolved> {
        match self {
            Resolved::List(items) => items.get(index),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Resolved> {
        match self {
            Resolved::Map(entries) => entries.get(name),
            _ => None,
        }
    }
}

impl Scope {
    /// Resolves every key inside `template` against this scope, concurrently
    pub async fn resolve_template(&self, template: &Template) -> Result<Resolved, InjectError> {
        walk(self.clone(), template, Cx::top(self)).await
    }
}

fn walk(scope: Scope, template: &Template, cx: Cx) -> BoxFuture<'_, Result<Resolved, InjectError>> {
    async move {
        match template {
            Template::Value(instance) => Ok(Resolved::Value(instance.clone())),
            Template::Key(key) => Ok(engine::resolve(scope, key.clone(), cx)
                .await?
                .map_or(Resolved::Absent, Resolved::Value)),
            Template::List(items) => {
                let items = items
                    .iter()
                    .map(|item| walk(scope.clone(), item, cx.clone()));
                Ok(Resolved::List(try_join_all(items).await?))
            }
            Template::Map(entries) => {
                let pending = entries.iter().map(|(name, item)| {
                    walk(scope.clone(), item, cx.clone())
                        .map(move |resolved| resolved.map(|resolved| (name.clone(), resolved)))
                });
                Ok(Resolved::Map(try_join_all(pending).await?.into_iter().collect()))
            }
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::{provider::Provider, runtime::Runtime};

    #[test]
    fn nested_keys_are_resolved_in_place() {
        let runtime = Runtime::default();
        let root = runtime.root();
        root.add_provider(Provider::value(Key::named("port"), 8080u16)).unwrap();

        let template = Template::map([
            ("port", Template::key(Key::named("port"))),
            (
                "extra",
                Template::list([
                    Template::value("literal"),
                    Template::key(Key::named("missing").optional()),
                ]),
            ),
        ]);
        let resolved = block_on(root.resolve_template(&template)).unwrap();

        let port = resolved.field("port").and_then(Resolved::instance).unwrap();
        assert_eq!(*port.get::<u16>().unwrap(), 8080);

        let extra = resolved.field("extra").unwrap();
        assert!(extra.index(0).and_then(Resolved::instance).is_some());
        assert!(matches!(extra.index(1), Some(Resolved::Absent)));
    }

    #[test]
    fn unresolvable_key_fails_the_walk() {
        let runtime = Runtime::default();
        let error = block_on(
            runtime
                .root()
                .resolve_template(&Template::list([Template::key(Key::named("missing"))])),
        )
        .unwrap_err();
        assert!(matches!(error, InjectError::UnsatisfiedDependency { .. }));
    }
}
