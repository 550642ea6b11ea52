use keel_di::{Key, Provider, Scope};

use crate::errors::ModelError;

/// Handle to an installed model, registered in the parent scope under the model's own keys
#[derive(Debug, Clone)]
pub struct ModelScope {
    pub name: String,
    pub scope: Scope,
}

/// Result of [`Model::install`]
#[derive(Debug)]
pub struct Installed {
    /// The model's own scope
    pub scope: Scope,
    /// Keys made available in the parent scope by propagation
    pub propagated: Vec<Key>,
}

/// Declarative description of a group of providers living in their own child scope
///
/// ```ignore
/// let web = Model::new("web")
///     .provides(Key::named("machine").with("host", "web.example"))
///     .add(Provider::value(Key::of::<Network>().with("role", "outside"), outside))
///     .add_default(Provider::value(Key::of::<Ntp>(), Ntp::public()))
///     .propagate(Key::of::<Network>().with("role", "outside"));
///
/// web.install(runtime.root())?;
/// ```
#[derive(Debug)]
pub struct Model {
    name: String,
    provides: Vec<Key>,
    providers: Vec<Provider>,
    defaults: Vec<Provider>,
    propagate: Vec<Key>,
    globally_unique: Vec<Key>,
    children: Vec<Model>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Model {
            name: name.into(),
            provides: Vec::new(),
            providers: Vec::new(),
            defaults: Vec::new(),
            propagate: Vec::new(),
            globally_unique: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Registers the model itself in the parent scope under `key`
    ///
    /// The constraints of the first constrained key are merged into every propagated key.
    pub fn provides(mut self, key: Key) -> Self {
        self.provides.push(key);
        self
    }

    pub fn add(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    /// A provider used only when nothing in the scope chain provides its key yet
    pub fn add_default(mut self, provider: Provider) -> Self {
        self.defaults.push(provider);
        self
    }

    /// Makes `key` resolvable from the parent scope, qualified by the model's constraints
    pub fn propagate(mut self, key: Key) -> Self {
        self.propagate.push(key);
        self
    }

    /// Makes `key` resolvable from the parent scope unchanged
    pub fn globally_unique(mut self, key: Key) -> Self {
        self.globally_unique.push(key);
        self
    }

    /// Nests `model` inside this one, its propagated keys propagate further up from here
    pub fn child(mut self, model: Model) -> Self {
        self.children.push(model);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates the model's scope below `parent` and registers everything
    ///
    /// A failed install closes the half populated scope again.
    pub fn install(self, parent: &Scope) -> Result<Installed, ModelError> {
        let name = self.name.clone();
        let scope = parent.child(name.clone())?;

        match self.install_into(parent, &scope) {
            Ok(propagated) => {
                tracing::debug!(model = %name, propagated = propagated.len(), "installed model");
                Ok(Installed { scope, propagated })
            }
            Err(error) => {
                if let Err(teardown) = scope.close() {
                    tracing::warn!(model = %name, %teardown, "closing a partially installed model failed");
                }
                Err(error)
            }
        }
    }

    fn install_into(self, parent: &Scope, scope: &Scope) -> Result<Vec<Key>, ModelError> {
        let Model {
            name,
            provides,
            providers,
            defaults,
            mut propagate,
            globally_unique,
            children,
        } = self;

        for provider in providers {
            scope.add_provider(provider)?;
        }

        for provider in defaults {
            match scope.scope_containing(provider.key()) {
                Some(existing) => {
                    tracing::debug!(model = %name, key = %provider.key(), provided_by = %existing.name(), "default overridden")
                }
                None => {
                    scope.add_provider(provider)?;
                }
            }
        }

        for child in children {
            let installed = child.install(scope)?;
            propagate.extend(installed.propagated);
        }

        let qualifier = provides.iter().find(|key| !key.is_bare());
        let requests = propagate
            .iter()
            .map(|key| (key, false))
            .chain(globally_unique.iter().map(|key| (key, true)));

        // Nothing reaches the parent before every export is known to exist
        let mut exports = Vec::new();
        for (inner, unique) in requests {
            if !scope.contains(inner) {
                return Err(ModelError::NotProvided {
                    key: inner.plain(),
                    model: name,
                });
            }

            let outer = match (unique, qualifier) {
                (true, _) => inner.plain(),
                (false, Some(qualifier)) => inner.plain().merged_with(qualifier),
                (false, None) => {
                    tracing::warn!(model = %name, key = %inner, "no constrained key to qualify propagation with, propagating unchanged");
                    inner.plain()
                }
            };
            exports.push((inner.plain(), outer));
        }

        for key in &provides {
            scope_handle(&name, parent, scope, key)?;
        }

        let mut propagated = Vec::new();
        for (inner, outer) in exports {
            if parent.contains(&outer) {
                tracing::debug!(model = %name, key = %outer, "parent already provides key, not propagating");
                continue;
            }

            parent.add_provider(Provider::xref(outer.clone(), scope, inner.clone()))?;
            tracing::debug!(model = %name, inner = %inner, outer = %outer, "propagated");
            propagated.push(outer);
        }

        Ok(propagated)
    }
}

fn scope_handle(name: &str, parent: &Scope, scope: &Scope, key: &Key) -> Result<Key, ModelError> {
    let handle = ModelScope {
        name: name.to_string(),
        scope: scope.clone(),
    };
    Ok(parent.add_provider(Provider::value(key.clone(), handle).no_close())?)
}
