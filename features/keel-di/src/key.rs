use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::types::TypeInfo;

/// The thing a key ultimately asks for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    /// A Rust type
    Type(TypeInfo),
    /// An abstract, named role with no type of its own (e.g. "outside-network")
    Named(Cow<'static, str>),
}
impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Type(info) => f.write_str(info.short_name()),
            Target::Named(name) => write!(f, "'{name}'"),
        }
    }
}

/// Value of a single constraint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintValue {
    Str(String),
    Int(i64),
    Bool(bool),
}
impl fmt::Display for ConstraintValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintValue::Str(value) => write!(f, "{value:?}"),
            ConstraintValue::Int(value) => write!(f, "{value}"),
            ConstraintValue::Bool(value) => write!(f, "{value}"),
        }
    }
}
impl ConstraintValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConstraintValue::Str(value) => Some(value),
            _ => None,
        }
    }
}
impl From<&str> for ConstraintValue {
    fn from(value: &str) -> Self {
        ConstraintValue::Str(value.to_string())
    }
}
impl From<String> for ConstraintValue {
    fn from(value: String) -> Self {
        ConstraintValue::Str(value)
    }
}
impl From<i64> for ConstraintValue {
    fn from(value: i64) -> Self {
        ConstraintValue::Int(value)
    }
}
impl From<i32> for ConstraintValue {
    fn from(value: i32) -> Self {
        ConstraintValue::Int(value.into())
    }
}
impl From<bool> for ConstraintValue {
    fn from(value: bool) -> Self {
        ConstraintValue::Bool(value)
    }
}

/// Readiness a requester asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReadyRequirement {
    /// Inherit from whoever is asking, falling back to the runtime default at top level
    #[default]
    Default,
    /// The instance must have completed its readiness hook
    Ready,
    /// A constructed instance is enough
    NotReady,
}
impl ReadyRequirement {
    /// Resolves `Default` against the requirement of the enclosing request
    pub fn effective(self, inherited: bool) -> bool {
        match self {
            ReadyRequirement::Default => inherited,
            ReadyRequirement::Ready => true,
            ReadyRequirement::NotReady => false,
        }
    }
}

/// Address of a dependency
///
/// A key is a target plus a set of constraints. Equality and hashing only look at these two,
/// the flags (`optional`, `deferred`, readiness) describe how a requester wants the dependency
/// delivered and never change which registration is addressed.
#[derive(Clone)]
pub struct Key {
    target: Target,
    constraints: Arc<BTreeMap<String, ConstraintValue>>,
    optional: bool,
    deferred: bool,
    ready: ReadyRequirement,
}

impl Key {
    /// Key addressing the type `T` without constraints
    pub fn of<T: ?Sized + 'static>() -> Key {
        Key::new(Target::Type(TypeInfo::of::<T>()))
    }

    /// Key addressing an abstract role
    pub fn named(name: impl Into<Cow<'static, str>>) -> Key {
        Key::new(Target::Named(name.into()))
    }

    pub fn new(target: Target) -> Key {
        Key {
            target,
            constraints: Arc::default(),
            optional: false,
            deferred: false,
            ready: ReadyRequirement::Default,
        }
    }

    /// Adds (or overwrites) a constraint
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ConstraintValue>) -> Key {
        Arc::make_mut(&mut self.constraints).insert(name.into(), value.into());
        self
    }

    /// Adds every constraint of `other` that is not already set on this key
    pub fn merged_with(mut self, other: &Key) -> Key {
        let constraints = Arc::make_mut(&mut self.constraints);
        for (name, value) in other.constraints.iter() {
            constraints
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    pub fn optional(mut self) -> Key {
        self.optional = true;
        self
    }

    pub fn deferred(mut self) -> Key {
        self.deferred = true;
        self
    }

    pub fn not_ready(self) -> Key {
        self.with_ready(ReadyRequirement::NotReady)
    }

    pub fn require_ready(self) -> Key {
        self.with_ready(ReadyRequirement::Ready)
    }

    /// Drops the deferred flag, used once a deferred dependency is actually resolved
    pub(crate) fn immediate(mut self) -> Key {
        self.deferred = false;
        self
    }

    pub fn with_ready(mut self, ready: ReadyRequirement) -> Key {
        self.ready = ready;
        self
    }

    /// Same address, all flags reset
    pub fn plain(&self) -> Key {
        Key {
            target: self.target.clone(),
            constraints: self.constraints.clone(),
            optional: false,
            deferred: false,
            ready: ReadyRequirement::Default,
        }
    }

    /// Same target, no constraints and no flags
    pub fn bare(&self) -> Key {
        Key::new(self.target.clone())
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn constraints(&self) -> &BTreeMap<String, ConstraintValue> {
        &self.constraints
    }

    pub fn constraint(&self, name: &str) -> Option<&ConstraintValue> {
        self.constraints.get(name)
    }

    pub fn is_bare(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub fn ready(&self) -> ReadyRequirement {
        self.ready
    }

    /// True if this key has the same target and every constraint of it also appears in `other`
    pub fn is_subset_of(&self, other: &Key) -> bool {
        self.target == other.target
            && self
                .constraints
                .iter()
                .all(|(name, value)| other.constraints.get(name) == Some(value))
    }

    /// True if both keys share a target and at least one constraint, and contradict each other
    /// on none
    ///
    /// Keys that disagree on a constraint value address different things even when they share
    /// others, only requests naming neither value can hit both.
    pub(crate) fn overlaps(&self, other: &Key) -> bool {
        if self.target != other.target {
            return false;
        }
        let mut shared = false;
        for (name, value) in self.constraints.iter() {
            match other.constraints.get(name) {
                Some(theirs) if theirs == value => shared = true,
                Some(_) => return false,
                None => {}
            }
        }
        shared
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target && self.constraints == other.constraints
    }
}
impl Eq for Key {}
impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target.hash(state);
        self.constraints.hash(state);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}", self.target)?;
        for (name, value) in self.constraints.iter() {
            write!(f, ", {name}={value}")?;
        }
        f.write_str(")")
    }
}
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)?;
        if self.optional {
            f.write_str("?")?;
        }
        if self.deferred {
            f.write_str("~")?;
        }
        match self.ready {
            ReadyRequirement::Default => Ok(()),
            ReadyRequirement::Ready => f.write_str("[ready]"),
            ReadyRequirement::NotReady => f.write_str("[not-ready]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    struct Network;

    #[test]
    fn flags_do_not_change_identity() {
        let key = Key::of::<Network>().with("role", "outside");
        let flagged = key.clone().optional().deferred().not_ready();

        assert_eq!(key, flagged);

        let mut set = HashSet::new();
        set.insert(key);
        assert!(set.contains(&flagged));
    }

    #[test]
    fn constraint_order_is_irrelevant() {
        let a = Key::named("net").with("zone", "dmz").with("role", "outside");
        let b = Key::named("net").with("role", "outside").with("zone", "dmz");
        assert_eq!(a, b);
    }

    #[test]
    fn subset_requires_same_target() {
        let wide = Key::of::<Network>().with("role", "outside").with("zone", "dmz");
        let narrow = Key::of::<Network>().with("role", "outside");

        assert!(narrow.is_subset_of(&wide));
        assert!(!wide.is_subset_of(&narrow));
        assert!(!Key::named("net").with("role", "outside").is_subset_of(&wide));
    }

    #[test]
    fn conflicting_values_do_not_overlap() {
        let web = Key::of::<Network>().with("role", "outside").with("host", "web");
        let db = Key::of::<Network>().with("role", "outside").with("host", "db");
        let racked = Key::of::<Network>().with("role", "outside").with("rack", 4);

        assert!(!web.overlaps(&db));
        assert!(web.overlaps(&racked));
        assert!(!web.overlaps(&Key::of::<Network>().with("zone", "a")));
    }

    #[test]
    fn merging_keeps_own_constraints() {
        let outer = Key::named("model").with("host", "a.example").with("role", "outer");
        let inner = Key::of::<Network>().with("role", "inner");

        let merged = inner.merged_with(&outer);
        assert_eq!(merged.constraint("role"), Some(&ConstraintValue::from("inner")));
        assert_eq!(merged.constraint("host"), Some(&ConstraintValue::from("a.example")));
    }

    #[test]
    fn display_lists_constraints() {
        let key = Key::named("net").with("role", "outside").with("slot", 3);
        assert_eq!(key.to_string(), "Key('net', role=\"outside\", slot=3)");
    }
}
