use std::{
    any::{type_name, Any, TypeId},
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
};

use futures::future::{BoxFuture, WeakShared};

use crate::{
    errors::InjectError,
    key::Key,
    lifecycle::Component,
    provider::Registration,
    scope::WeakScope,
    wait_graph::Node,
};

/// All errors must be clone
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// We assume that we are using a multithreaded async runtime
/// So anything injectable needs to be Send + Sync + 'static
pub trait Injectable: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Injectable for T {}

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }

    /// Type name without the module path of the outermost type
    pub fn short_name(&self) -> &'static str {
        let head_end = self.type_name.find('<').unwrap_or(self.type_name.len());
        let start = self.type_name[..head_end]
            .rfind("::")
            .map(|index| index + 2)
            .unwrap_or(0);
        &self.type_name[start..]
    }
}

/// Lifecycle position of a cached dependency
///
/// States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadyState {
    Unconstructed,
    Constructing,
    NotReady,
    Ready,
    Closed,
}

pub(crate) type ReadyFuture = BoxFuture<'static, Result<(), InjectError>>;

/// Where a cached instance lives, used to drive its readiness later on
#[derive(Clone)]
pub(crate) struct Origin {
    pub(crate) scope: WeakScope,
    pub(crate) node: Node,
    pub(crate) key: Key,
    /// Absent for instances made by `Scope::instantiate`
    pub(crate) registration: Option<Weak<Registration>>,
}

pub(crate) struct Lifecycle {
    pub(crate) state: ReadyState,
    pub(crate) drive: Option<WeakShared<ReadyFuture>>,
    /// Dependencies that were injected at construction, with the key they were requested by
    pub(crate) dependencies: Vec<(Key, Instance)>,
    pub(crate) origin: Option<Origin>,
}

static NEXT_ORDER: AtomicU64 = AtomicU64::new(1);

/// Instance of a Provider
///
/// Cheap to clone, all clones refer to the same value and share its lifecycle.
#[derive(Clone)]
pub struct Instance(Arc<InstanceInner>);

struct InstanceInner {
    info: TypeInfo,
    value: Arc<dyn Any + Send + Sync>,
    hooks: Option<Arc<dyn Component>>,
    order: u64,
    lifecycle: Mutex<Lifecycle>,
}

impl Instance {
    /// Wraps a plain value, it is ready right away and has nothing to release
    pub fn new<T: Injectable>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Injectable>(value: Arc<T>) -> Self {
        Self::build(TypeInfo::of::<T>(), value, None)
    }

    /// Wraps a value exposing lifecycle hooks through [`Component`]
    pub fn component<T: Component>(value: T) -> Self {
        let value = Arc::new(value);
        let hooks: Arc<dyn Component> = value.clone();
        Self::build(TypeInfo::of::<T>(), value, Some(hooks))
    }

    fn build(
        info: TypeInfo,
        value: Arc<dyn Any + Send + Sync>,
        hooks: Option<Arc<dyn Component>>,
    ) -> Self {
        let needs_ready = hooks
            .as_ref()
            .is_some_and(|hooks| hooks.ready_hook().is_some());
        let state = if needs_ready {
            ReadyState::NotReady
        } else {
            ReadyState::Ready
        };

        Instance(Arc::new(InstanceInner {
            info,
            value,
            hooks,
            order: NEXT_ORDER.fetch_add(1, Ordering::Relaxed),
            lifecycle: Mutex::new(Lifecycle {
                state,
                drive: None,
                dependencies: Vec::new(),
                origin: None,
            }),
        }))
    }

    pub fn info(&self) -> TypeInfo {
        self.0.info
    }

    pub fn downcast<T: Injectable>(&self) -> Result<Arc<T>, &'static str> {
        match Arc::downcast::<T>(self.0.value.clone()) {
            Ok(downcasted) => Ok(downcasted),
            Err(_) => Err(self.0.info.type_name),
        }
    }

    /// Same as [`Instance::downcast`], reporting failure as an [`InjectError`]
    pub fn get<T: Injectable>(&self) -> Result<Arc<T>, InjectError> {
        self.downcast()
            .map_err(|actual_type| InjectError::DowncastFailed {
                required_type: type_name::<T>(),
                actual_type,
            })
    }

    pub fn ready_state(&self) -> ReadyState {
        self.lifecycle().state
    }

    pub fn is_ready(&self) -> bool {
        self.ready_state() == ReadyState::Ready
    }

    /// Monotonic construction stamp, later instances have larger values
    pub fn order(&self) -> u64 {
        self.0.order
    }

    pub fn ptr_eq(a: &Instance, b: &Instance) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub(crate) fn hooks(&self) -> Option<&Arc<dyn Component>> {
        self.0.hooks.as_ref()
    }

    pub(crate) fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        lock(&self.0.lifecycle)
    }

    pub(crate) fn set_origin(&self, origin: Origin) {
        self.lifecycle().origin.get_or_insert(origin);
    }

    pub(crate) fn record_dependencies(&self, dependencies: Vec<(Key, Instance)>) {
        self.lifecycle().dependencies = dependencies;
    }

    /// Moves the instance forward to `state`, never backward
    pub(crate) fn advance(&self, state: ReadyState) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state < state {
            lifecycle.state = state;
        }
    }

    /// Marks the instance closed and runs its release hook
    ///
    /// Returns `Ok(false)` if the instance was already closed.
    pub(crate) fn release(&self) -> Result<bool, DynError> {
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state == ReadyState::Closed {
                return Ok(false);
            }
            lifecycle.state = ReadyState::Closed;
            lifecycle.drive = None;
        }

        match self.hooks().and_then(|hooks| hooks.release_hook()) {
            Some(close) => close.close().map(|_| true),
            None => Ok(true),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.0.info.type_name)
            .field("state", &self.ready_state())
            .field("order", &self.0.order)
            .finish()
    }
}

/// Locks a mutex, recovering the data if a panicking holder poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod nested {
        pub struct Router<T>(pub T);
    }

    #[test]
    fn short_name_strips_outer_path() {
        assert_eq!(TypeInfo::of::<nested::Router<u8>>().short_name(), "Router<u8>");
        assert_eq!(TypeInfo::of::<u32>().short_name(), "u32");
    }

    #[test]
    fn plain_values_start_ready() {
        let instance = Instance::new(5u32);
        assert_eq!(instance.ready_state(), ReadyState::Ready);
        assert_eq!(*instance.get::<u32>().unwrap(), 5);
        assert!(instance.get::<String>().is_err());
    }

    #[test]
    fn state_never_moves_backward() {
        let instance = Instance::new("x");
        instance.advance(ReadyState::Closed);
        instance.advance(ReadyState::NotReady);
        assert_eq!(instance.ready_state(), ReadyState::Closed);
    }

    #[test]
    fn release_is_idempotent() {
        let instance = Instance::new(1u8);
        assert!(instance.release().unwrap());
        assert!(!instance.release().unwrap());
    }
}
