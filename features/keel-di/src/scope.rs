use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use futures::future::{AbortHandle, BoxFuture, WeakShared};
use futures_channel::mpsc::{self, UnboundedReceiver};

use crate::{
    errors::InjectError,
    events::{Event, EventBus, EventKind, EventPayload, KeyPattern, ListenerId, ProducerKind, Sink},
    key::Key,
    provider::{Producer, Provider, Registration},
    runtime::{RuntimeOptions, RuntimeShared},
    types::{lock, Instance, Origin, ReadyState},
    wait_graph::Node,
};

pub(crate) type ConstructFuture = BoxFuture<'static, Result<Instance, InjectError>>;

/// Cache entry of one registration in one scope
pub(crate) enum Slot {
    Constructing {
        future: WeakShared<ConstructFuture>,
        abort: AbortHandle,
        /// Distinguishes attempts, a failed attempt only clears its own entry
        generation: u64,
    },
    Built {
        instance: Instance,
        registration: Arc<Registration>,
    },
}

pub(crate) struct ScopeState {
    pub(crate) closed: bool,
    pub(crate) table: HashMap<Key, Arc<Registration>>,
    /// Keyed by registration id
    pub(crate) slots: HashMap<u64, Slot>,
    pub(crate) children: Vec<Scope>,
}

pub(crate) struct ScopeInner {
    id: u64,
    name: String,
    parent: Option<Scope>,
    runtime: Arc<RuntimeShared>,
    state: Mutex<ScopeState>,
    pub(crate) events: EventBus,
}

/// A node of the injector tree
///
/// Resolves keys against its own registration table first and then against its ancestors.
/// Cloning is cheap and yields a handle to the same scope. A scope owns its children, closing
/// it closes them.
#[derive(Clone)]
pub struct Scope(pub(crate) Arc<ScopeInner>);

/// Non owning handle to a [`Scope`]
#[derive(Clone, Default)]
pub struct WeakScope(Weak<ScopeInner>);

impl WeakScope {
    pub fn upgrade(&self) -> Option<Scope> {
        self.0.upgrade().map(Scope)
    }
}

/// One registration as reported by [`Scope::inspect`]
#[derive(Debug, Clone)]
pub struct Inspection {
    pub keys: Vec<Key>,
    pub producer: ProducerKind,
    pub allow_multiple: bool,
    pub no_close: bool,
    /// State of the instance cached in this scope
    pub state: ReadyState,
}

impl Scope {
    pub(crate) fn root(runtime: Arc<RuntimeShared>) -> Scope {
        Self::create(runtime.options.name.clone(), None, runtime)
    }

    fn create(name: String, parent: Option<Scope>, runtime: Arc<RuntimeShared>) -> Scope {
        Scope(Arc::new(ScopeInner {
            id: runtime.next_id(),
            name,
            parent,
            runtime,
            state: Mutex::new(ScopeState {
                closed: false,
                table: HashMap::new(),
                slots: HashMap::new(),
                children: Vec::new(),
            }),
            events: EventBus::default(),
        }))
    }

    /// Creates a child scope owned by this one
    pub fn child(&self, name: impl Into<String>) -> Result<Scope, InjectError> {
        let child = Self::create(name.into(), Some(self.clone()), self.0.runtime.clone());

        let mut state = self.state();
        if state.closed {
            return Err(InjectError::ScopeClosed(self.0.name.clone()));
        }
        state.children.push(child.clone());

        tracing::debug!(parent = %self.0.name, child = %child.0.name, "created child scope");
        Ok(child)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn downgrade(&self) -> WeakScope {
        WeakScope(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.0.runtime.options
    }

    pub(crate) fn runtime(&self) -> &Arc<RuntimeShared> {
        &self.0.runtime
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ScopeState> {
        lock(&self.0.state)
    }

    /// This scope followed by its ancestors, nearest first
    pub fn chain(&self) -> impl Iterator<Item = Scope> {
        std::iter::successors(Some(self.clone()), |scope| scope.0.parent.clone())
    }

    /// Registers a provider in this scope
    ///
    /// Re-registering a key replaces the earlier registration for that key. Fails with
    /// [`InjectError::AmbiguousDependency`] if one of the keys overlaps an existing registration
    /// of the same target without either constraint set containing the other.
    pub fn add_provider(&self, provider: Provider) -> Result<Key, InjectError> {
        let registration = Arc::new(Registration::from_provider(
            self.0.runtime.next_id(),
            provider,
        ));

        let replaced = {
            let mut state = self.state();
            if state.closed {
                return Err(InjectError::ScopeClosed(self.0.name.clone()));
            }

            if !registration.allow_multiple {
                for key in &registration.keys {
                    if let Some(other) = ambiguous_with(&state.table, key) {
                        return Err(InjectError::AmbiguousDependency {
                            key: key.clone(),
                            other,
                            scope: self.0.name.clone(),
                        });
                    }
                }
            }

            let mut replaced = false;
            for key in &registration.keys {
                replaced |= state
                    .table
                    .insert(key.clone(), registration.clone())
                    .is_some();
            }

            if let Producer::Value(instance) = &registration.producer {
                instance.set_origin(Origin {
                    scope: self.downgrade(),
                    node: Node {
                        scope: self.0.id,
                        slot: registration.id,
                    },
                    key: registration.primary.clone(),
                    registration: Some(Arc::downgrade(&registration)),
                });
                state.slots.insert(
                    registration.id,
                    Slot::Built {
                        instance: instance.clone(),
                        registration: registration.clone(),
                    },
                );
            }

            replaced
        };

        tracing::debug!(
            scope = %self.0.name,
            key = %registration.primary,
            keys = registration.keys.len(),
            producer = ?registration.producer.kind(),
            replaced,
            "added provider"
        );

        self.emit(
            &registration,
            EventPayload::AddProvider {
                producer: registration.producer.kind(),
                allow_multiple: registration.allow_multiple,
                no_close: registration.no_close,
                replaced,
            },
        );

        Ok(registration.primary.clone())
    }

    /// True if this scope itself has a registration answering `key`
    pub fn contains(&self, key: &Key) -> bool {
        !matches!(self.find_local(key), Ok(None))
    }

    /// Nearest scope in the chain with a registration answering `key`
    pub fn scope_containing(&self, key: &Key) -> Option<Scope> {
        self.chain().find(|scope| scope.contains(key))
    }

    /// Finds the registration answering `key` and the scope it lives in, nearest scope first
    pub(crate) fn lookup(
        &self,
        key: &Key,
    ) -> Result<Option<(Arc<Registration>, Scope)>, InjectError> {
        for scope in self.chain() {
            if let Some(registration) = scope.find_local(key)? {
                return Ok(Some((registration, scope)));
            }
        }
        Ok(None)
    }

    /// Registration stored in this scope's table under exactly `key`
    pub(crate) fn registration(&self, key: &Key) -> Option<Arc<Registration>> {
        self.state().table.get(key).cloned()
    }

    /// Exact match, else the most specific registration whose constraints contain the request's
    fn find_local(&self, key: &Key) -> Result<Option<Arc<Registration>>, InjectError> {
        let state = self.state();
        if let Some(registration) = state.table.get(key) {
            return Ok(Some(registration.clone()));
        }
        if key.is_bare() {
            return Ok(None);
        }

        let mut best: Option<(&Key, &Arc<Registration>)> = None;
        let mut tie: Option<&Key> = None;
        for (candidate, registration) in state.table.iter() {
            if !key.is_subset_of(candidate) {
                continue;
            }
            match best {
                Some((current, current_registration)) => {
                    let (size, current_size) =
                        (candidate.constraints().len(), current.constraints().len());
                    if size > current_size {
                        best = Some((candidate, registration));
                        tie = None;
                    } else if size == current_size
                        && !Arc::ptr_eq(registration, current_registration)
                    {
                        tie = Some(candidate);
                    }
                }
                None => best = Some((candidate, registration)),
            }
        }

        match (best, tie) {
            (Some((winner, _)), Some(other)) => Err(InjectError::AmbiguousDependency {
                key: winner.clone(),
                other: other.clone(),
                scope: self.0.name.clone(),
            }),
            (Some((_, registration)), None) => {
                tracing::trace!(scope = %self.0.name, key = %key, matched = %registration.primary, "constraint subsumption");
                Ok(Some(registration.clone()))
            }
            (None, _) => Ok(None),
        }
    }

    /// Keys registered in this scope, in registration order
    pub fn keys(&self) -> Vec<Key> {
        let state = self.state();
        let mut keys: Vec<(u64, usize, &Key)> = state
            .table
            .iter()
            .map(|(key, registration)| {
                let position = registration
                    .keys
                    .iter()
                    .position(|candidate| candidate == key)
                    .unwrap_or(usize::MAX);
                (registration.id, position, key)
            })
            .collect();
        keys.sort_by_key(|(id, position, _)| (*id, *position));
        keys.into_iter().map(|(_, _, key)| key.clone()).collect()
    }

    /// Registrations of this scope in registration order
    pub fn inspect(&self) -> Vec<Inspection> {
        let state = self.state();
        let mut seen = HashSet::new();
        let mut registrations: Vec<&Arc<Registration>> = state
            .table
            .values()
            .filter(|registration| seen.insert(registration.id))
            .collect();
        registrations.sort_by_key(|registration| registration.id);

        registrations
            .into_iter()
            .map(|registration| {
                let state = match state.slots.get(&registration.id) {
                    Some(Slot::Built { instance, .. }) => instance.ready_state(),
                    Some(Slot::Constructing { future, .. }) if future.upgrade().is_some() => {
                        ReadyState::Constructing
                    }
                    _ => ReadyState::Unconstructed,
                };
                Inspection {
                    keys: registration.keys.clone(),
                    producer: registration.producer.kind(),
                    allow_multiple: registration.allow_multiple,
                    no_close: registration.no_close,
                    state,
                }
            })
            .collect()
    }

    /// Calls `callback` for events of `kinds` from this scope and its descendants
    pub fn add_event_listener<F>(
        &self,
        pattern: impl Into<KeyPattern>,
        kinds: &[EventKind],
        callback: F,
    ) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = ListenerId(self.0.runtime.next_id());
        self.0
            .events
            .add(id, pattern.into(), kinds, Sink::Callback(Arc::new(callback)));
        id
    }

    /// Like [`Scope::add_event_listener`], delivering into a channel
    ///
    /// The subscription ends when the receiver is dropped.
    pub fn subscribe(
        &self,
        pattern: impl Into<KeyPattern>,
        kinds: &[EventKind],
    ) -> UnboundedReceiver<Event> {
        let (sender, receiver) = mpsc::unbounded();
        let id = ListenerId(self.0.runtime.next_id());
        self.0
            .events
            .add(id, pattern.into(), kinds, Sink::Channel(sender));
        receiver
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.0.events.remove(id)
    }

    /// Sends an event about `registration` to listeners of this scope and its ancestors
    pub(crate) fn emit(&self, registration: &Registration, payload: EventPayload) {
        if registration.quiet {
            return;
        }

        let event = Event {
            key: registration.primary.clone(),
            keys: registration.keys.clone(),
            scope: self.0.name.clone(),
            payload,
        };
        for scope in self.chain() {
            scope.0.events.dispatch(&event);
        }
    }
}

/// An existing key that overlaps `key` without either containing the other
fn ambiguous_with(table: &HashMap<Key, Arc<Registration>>, key: &Key) -> Option<Key> {
    table
        .iter()
        .filter(|(_, registration)| !registration.allow_multiple)
        .map(|(existing, _)| existing)
        .find(|existing| {
            *existing != key
                && key.overlaps(existing)
                && !key.is_subset_of(existing)
                && !existing.is_subset_of(key)
        })
        .cloned()
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.0.name)
            .field("id", &self.0.id)
            .finish()
    }
}

impl fmt::Debug for WeakScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(scope) => f.debug_tuple("WeakScope").field(&scope.0.name).finish(),
            None => f.write_str("WeakScope(<dropped>)"),
        }
    }
}
