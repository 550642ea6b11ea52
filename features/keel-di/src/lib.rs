//! Hierarchical, asynchronous dependency injection
//!
//! A [`Runtime`] owns a tree of [`Scope`]s. Each scope holds registrations ([`Provider`]s) keyed
//! by [`Key`] and resolves requests against its own table first, then against its ancestors.
//! Instances are constructed at most once per owning scope, concurrent requesters share the same
//! construction, and a scope releases what it constructed when it is closed.
//!
//! ```ignore
//! let runtime = Runtime::default();
//! let root = runtime.root();
//! root.add_provider(Provider::value(Key::named("port"), 8080u16))?;
//! root.add_provider(Provider::function(
//!     Key::of::<Server>(),
//!     Dependencies::new().add_key::<Arc<u16>>("port", Key::named("port")),
//!     |args| async move { Ok(Server::bind(*args.get::<Arc<u16>>("port")?)) },
//! ))?;
//!
//! let server = root.get::<Server>().await?;
//! runtime.shutdown()?;
//! ```

mod arguments;
mod dependency_graph;
mod engine;
mod errors;
pub mod events;
mod factories;
mod filter;
mod key;
mod lifecycle;
mod provider;
mod resolver;
mod runtime;
mod scope;
mod teardown;
mod template;
mod types;
mod wait_graph;

pub use arguments::{Argument, Arguments};
pub use dependency_graph::{DependencyGraph, DependencyGraphError, DependencyGraphErrors};
pub use errors::{InjectError, ReleaseFailure, TeardownError};
pub use events::{Event, EventKind, EventPayload, KeyPattern, ListenerId, Milestone, ProducerKind};
pub use factories::{Dependencies, Dependency, DynFactory, FnFactory, InstanceFactory};
pub use filter::FilteredInstance;
pub use key::{ConstraintValue, Key, ReadyRequirement, Target};
pub use lifecycle::{AsyncReady, Close, Component, ReadyContext};
pub use provider::{Producer, Provider};
pub use resolver::{
    deferred::{Deferred, DeferredHandle, DeferredState},
    Resolver,
};
pub use runtime::{Runtime, RuntimeOptions};
pub use scope::{Inspection, Scope, WeakScope};
pub use template::{Resolved, Template};
pub use types::{DynError, Injectable, Instance, ReadyState, TypeInfo};
