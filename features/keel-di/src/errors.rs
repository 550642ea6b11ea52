use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::{key::Key, types::DynError};

/// Errors while resolving or instantiating dependencies
///
/// Every variant is `Clone`, a single failure is handed to all concurrent waiters.
#[derive(Error, Debug, Clone)]
pub enum InjectError {
    /// Nothing in the scope chain provides the key
    #[error("no provider for {key}{}", render_path(.path))]
    UnsatisfiedDependency { key: Key, path: Vec<Key> },

    /// Two registrations match and neither constraint set contains the other
    #[error("{key} is ambiguous with {other} in scope '{scope}'")]
    AmbiguousDependency { key: Key, other: Key, scope: String },

    /// The dependency (transitively) waits on itself
    #[error("dependency cycle: {}", render_keys(.chain))]
    DependencyCycle { chain: Vec<Key> },

    /// A deferred dependency was accessed before it was resolved
    #[error("deferred dependency {key} was accessed before it was resolved")]
    NotYetResolved { key: Key },

    /// A producer returned an error
    #[error("constructing {key} failed{}: {error}", render_path(.path))]
    ConstructionFailed {
        key: Key,
        path: Vec<Key>,
        error: Arc<DynError>,
    },

    /// A readiness hook returned an error
    #[error("bringing {key} to ready failed{}: {error}", render_path(.path))]
    ReadinessFailed {
        key: Key,
        path: Vec<Key>,
        error: Arc<DynError>,
    },

    /// Synchronous access to something that can only be produced asynchronously
    #[error("{key} can not be produced synchronously, use the async accessor")]
    AsyncRequired { key: Key },

    /// The scope (or the scope a deferred handle points to) has been closed
    #[error("scope '{0}' is closed")]
    ScopeClosed(String),

    #[error("Failed to downcast, required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        required_type: &'static str,
        actual_type: &'static str,
    },

    /// `stop_at` passed to a filter is not part of the scope chain
    #[error("scope '{stop_at}' is not an ancestor of '{scope}'")]
    NotAnAncestor { scope: String, stop_at: String },

    /// An argument was read that the producer never declared
    #[error("argument '{0}' is not available")]
    MissingArgument(String),
}

impl InjectError {
    /// Records that the error happened while resolving a dependency of `key`
    pub fn within(mut self, key: &Key) -> Self {
        if let Some(path) = self.path_mut() {
            path.insert(0, key.clone());
        }
        self
    }

    /// Keys that were being constructed when the error happened, outermost first
    pub fn path(&self) -> &[Key] {
        match self {
            InjectError::UnsatisfiedDependency { path, .. }
            | InjectError::ConstructionFailed { path, .. }
            | InjectError::ReadinessFailed { path, .. } => path,
            _ => &[],
        }
    }

    fn path_mut(&mut self) -> Option<&mut Vec<Key>> {
        match self {
            InjectError::UnsatisfiedDependency { path, .. }
            | InjectError::ConstructionFailed { path, .. }
            | InjectError::ReadinessFailed { path, .. } => Some(path),
            _ => None,
        }
    }

    pub(crate) fn unsatisfied(key: &Key) -> Self {
        InjectError::UnsatisfiedDependency {
            key: key.plain(),
            path: vec![key.plain()],
        }
    }

    pub(crate) fn construction(key: &Key, error: DynError) -> Self {
        InjectError::ConstructionFailed {
            key: key.plain(),
            path: vec![key.plain()],
            error: Arc::new(error),
        }
    }

    pub(crate) fn readiness(key: &Key, error: DynError) -> Self {
        InjectError::ReadinessFailed {
            key: key.plain(),
            path: vec![key.plain()],
            error: Arc::new(error),
        }
    }
}

fn render_keys(keys: &[Key]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn render_path(path: &[Key]) -> String {
    if path.len() < 2 {
        return String::new();
    }
    format!(" (via {})", render_keys(path))
}

/// A release hook that failed during teardown
#[derive(Debug, Clone)]
pub struct ReleaseFailure {
    pub key: Key,
    pub error: Arc<DynError>,
}

/// Every release failure of a scope and its children
#[derive(Error, Debug, Clone)]
pub struct TeardownError {
    pub scope: String,
    pub failures: Vec<ReleaseFailure>,
}
impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut display = Vec::new();
        display.push(format!(
            "Closing scope '{}' had {} release failure(s):",
            self.scope,
            self.failures.len()
        ));
        for failure in &self.failures {
            display.push(format!("- {}: {}", failure.key, failure.error));
        }
        f.write_str(&display.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_prepends_path() {
        let leaf = Key::named("leaf");
        let error = InjectError::unsatisfied(&leaf)
            .within(&Key::named("middle"))
            .within(&Key::named("root"));

        assert_eq!(
            error.path(),
            &[Key::named("root"), Key::named("middle"), leaf]
        );
        assert_eq!(
            error.to_string(),
            "no provider for Key('leaf') (via Key('root') -> Key('middle') -> Key('leaf'))"
        );
    }

    #[test]
    fn cycles_keep_their_chain() {
        let chain = vec![Key::named("a"), Key::named("b"), Key::named("a")];
        let error = InjectError::DependencyCycle {
            chain: chain.clone(),
        }
        .within(&Key::named("outer"));

        assert!(matches!(error, InjectError::DependencyCycle { chain: c } if c == chain));
    }

    #[test]
    fn construction_errors_keep_the_cause() {
        let error = InjectError::construction(&Key::named("db"), "connection refused".into());
        assert_eq!(
            error.to_string(),
            "constructing Key('db') failed: connection refused"
        );
    }
}
