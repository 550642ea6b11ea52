use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
};

use futures_channel::mpsc::UnboundedSender;

use crate::{errors::InjectError, key::Key, types::lock, types::Instance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AddProvider,
    DependencyProgress,
    DependencyFinal,
    DependencyFailed,
}
impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::AddProvider,
        EventKind::DependencyProgress,
        EventKind::DependencyFinal,
        EventKind::DependencyFailed,
    ];
}

/// What a registration produces its instance from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerKind {
    Value,
    Factory,
    Xref,
}

/// Steps of an instantiation reported through `dependency_progress`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Milestone {
    /// One declared dependency is available
    DependencyResolved(Key),
    /// The producer returned, the instance may still need its readiness hook
    Constructed,
    /// The readiness hook is about to run
    ReadyHookEntered,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    AddProvider {
        producer: ProducerKind,
        allow_multiple: bool,
        no_close: bool,
        /// True if the registration replaced an earlier one for one of its keys
        replaced: bool,
    },
    Progress(Milestone),
    Final(Instance),
    Failed(InjectError),
}

/// A lifecycle notification
///
/// Purely observational, the runtime never waits on listeners.
#[derive(Debug, Clone)]
pub struct Event {
    /// The key the listener matched, the primary key for wildcard listeners
    pub key: Key,
    /// Every key the registration answers to
    pub keys: Vec<Key>,
    /// Name of the scope the event happened in
    pub scope: String,
    pub payload: EventPayload,
}
impl Event {
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::AddProvider { .. } => EventKind::AddProvider,
            EventPayload::Progress(_) => EventKind::DependencyProgress,
            EventPayload::Final(_) => EventKind::DependencyFinal,
            EventPayload::Failed(_) => EventKind::DependencyFailed,
        }
    }
}

/// Which registrations a listener hears about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Any registration in the scope tree below the listener
    Any,
    Key(Key),
}
impl From<Key> for KeyPattern {
    fn from(key: Key) -> Self {
        KeyPattern::Key(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

pub(crate) type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Sink {
    Callback(Callback),
    Channel(UnboundedSender<Event>),
}

struct Listener {
    id: ListenerId,
    pattern: KeyPattern,
    kinds: Vec<EventKind>,
    sink: Sink,
}

/// Listener registry of one scope
#[derive(Default)]
pub(crate) struct EventBus {
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    pub(crate) fn add(&self, id: ListenerId, pattern: KeyPattern, kinds: &[EventKind], sink: Sink) {
        lock(&self.listeners).push(Listener {
            id,
            pattern,
            kinds: kinds.to_vec(),
            sink,
        });
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        listeners.len() != before
    }

    pub(crate) fn clear(&self) {
        lock(&self.listeners).clear();
    }

    /// Delivers `event` to every matching listener, outside of the registry lock
    pub(crate) fn dispatch(&self, event: &Event) {
        let kind = event.kind();
        let matching: Vec<(ListenerId, Sink, Key)> = lock(&self.listeners)
            .iter()
            .filter(|listener| listener.kinds.contains(&kind))
            .filter_map(|listener| {
                let key = match &listener.pattern {
                    KeyPattern::Any => event.key.clone(),
                    KeyPattern::Key(key) => event.keys.iter().find(|k| *k == key)?.clone(),
                };
                Some((listener.id, listener.sink.clone(), key))
            })
            .collect();

        let mut disconnected = Vec::new();
        for (id, sink, key) in matching {
            let delivered = Event {
                key,
                ..event.clone()
            };
            match sink {
                Sink::Callback(callback) => {
                    if catch_unwind(AssertUnwindSafe(|| callback(&delivered))).is_err() {
                        tracing::warn!(listener = id.0, key = %delivered.key, "event listener panicked");
                    }
                }
                Sink::Channel(sender) => {
                    if sender.unbounded_send(delivered).is_err() {
                        disconnected.push(id);
                    }
                }
            }
        }

        if !disconnected.is_empty() {
            lock(&self.listeners).retain(|listener| !disconnected.contains(&listener.id));
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &lock(&self.listeners).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;
    use futures_channel::mpsc;

    use super::*;

    fn progress(keys: &[Key]) -> Event {
        Event {
            key: keys[0].clone(),
            keys: keys.to_vec(),
            scope: "root".to_string(),
            payload: EventPayload::Progress(Milestone::Constructed),
        }
    }

    #[test]
    fn listeners_filter_by_key_and_kind() {
        let bus = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        bus.add(
            ListenerId(1),
            Key::named("secondary").into(),
            &[EventKind::DependencyProgress],
            Sink::Callback(Arc::new(move |event: &Event| {
                assert_eq!(event.key, Key::named("secondary"));
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        let counter = hits.clone();
        bus.add(
            ListenerId(2),
            KeyPattern::Any,
            &[EventKind::AddProvider],
            Sink::Callback(Arc::new(move |_: &Event| {
                counter.fetch_add(100, Ordering::SeqCst);
            })),
        );

        bus.dispatch(&progress(&[Key::named("primary"), Key::named("secondary")]));
        bus.dispatch(&progress(&[Key::named("unrelated")]));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_stop_dispatch() {
        let bus = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.add(
            ListenerId(1),
            KeyPattern::Any,
            &EventKind::ALL,
            Sink::Callback(Arc::new(|_: &Event| panic!("listener bug"))),
        );
        let counter = hits.clone();
        bus.add(
            ListenerId(2),
            KeyPattern::Any,
            &EventKind::ALL,
            Sink::Callback(Arc::new(move |_: &Event| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        bus.dispatch(&progress(&[Key::named("a")]));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_channels_are_pruned() {
        let bus = EventBus::default();
        let (tx, mut rx) = mpsc::unbounded();
        bus.add(ListenerId(1), KeyPattern::Any, &EventKind::ALL, Sink::Channel(tx));

        bus.dispatch(&progress(&[Key::named("a")]));
        let received = futures::executor::block_on(rx.next()).unwrap();
        assert_eq!(received.key, Key::named("a"));

        drop(rx);
        bus.dispatch(&progress(&[Key::named("a")]));
        assert!(!bus.remove(ListenerId(1)));
    }
}
