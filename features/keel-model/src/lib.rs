//! Declarative layer over [`keel_di::Scope::add_provider`]
//!
//! A [`Model`] groups providers into their own child scope and selectively makes some of them
//! visible to the enclosing scope (container propagation), qualified by the model's own key.

mod errors;
mod model;

pub use errors::ModelError;
pub use model::{Installed, Model, ModelScope};
