use std::{mem, sync::Arc};

use crate::{
    errors::{ReleaseFailure, TeardownError},
    provider::Registration,
    scope::{Scope, Slot},
    types::Instance,
};

impl Scope {
    /// Closes the scope
    ///
    /// In-flight constructions are cancelled, cached instances are released newest first
    /// (registrations marked `no_close` are left alone) and children are closed afterwards.
    /// A failing release hook does not stop the others, every failure is collected into the
    /// returned [`TeardownError`]. Closing an already closed scope does nothing.
    pub fn close(&self) -> Result<(), TeardownError> {
        let (built, aborts, children) = {
            let mut state = self.state();
            if state.closed {
                return Ok(());
            }
            state.closed = true;

            let mut built: Vec<(Instance, Arc<Registration>)> = Vec::new();
            let mut aborts = Vec::new();
            for (_, slot) in state.slots.drain() {
                match slot {
                    Slot::Built {
                        instance,
                        registration,
                    } => built.push((instance, registration)),
                    Slot::Constructing { abort, .. } => aborts.push(abort),
                }
            }
            state.table.clear();
            (built, aborts, mem::take(&mut state.children))
        };

        tracing::info!(
            scope = %self.name(),
            instances = built.len(),
            in_flight = aborts.len(),
            children = children.len(),
            "closing scope"
        );

        for abort in aborts {
            abort.abort();
        }

        let mut failures = Vec::new();
        let mut built = built;
        built.sort_by_key(|(instance, _)| std::cmp::Reverse(instance.order()));
        for (instance, registration) in built {
            if registration.no_close {
                tracing::trace!(scope = %self.name(), key = %registration.primary, "leaving no_close instance open");
                continue;
            }
            match instance.release() {
                Ok(true) => {
                    tracing::debug!(scope = %self.name(), key = %registration.primary, "released")
                }
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(scope = %self.name(), key = %registration.primary, %error, "release failed");
                    failures.push(ReleaseFailure {
                        key: registration.primary.clone(),
                        error: Arc::new(error),
                    });
                }
            }
        }

        for child in children {
            if let Err(error) = child.close() {
                failures.extend(error.failures);
            }
        }

        self.0.events.clear();
        if let Some(parent) = self.parent() {
            parent
                .state()
                .children
                .retain(|child| !child.ptr_eq(self));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError {
                scope: self.name().to_string(),
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        key::Key,
        lifecycle::{Close, Component},
        provider::Provider,
        runtime::Runtime,
        types::{DynError, ReadyState},
    };

    struct Logged {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl Close for Logged {
        fn close(&self) -> Result<(), DynError> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                return Err(format!("{} refused", self.name).into());
            }
            Ok(())
        }
    }

    impl Component for Logged {
        fn release_hook(&self) -> Option<&dyn Close> {
            Some(self)
        }
    }

    fn logged(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, fail: bool) -> Logged {
        Logged {
            name,
            log: log.clone(),
            fail,
        }
    }

    #[test]
    fn failures_are_collected_and_do_not_stop_teardown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runtime = Runtime::default();
        let root = runtime.root();
        let child = root.child("child").unwrap();

        root.add_provider(Provider::component(Key::named("a"), logged("a", &log, false)))
            .unwrap();
        child
            .add_provider(Provider::component(Key::named("b"), logged("b", &log, true)))
            .unwrap();
        root.add_provider(Provider::component(Key::named("c"), logged("c", &log, false)))
            .unwrap();

        let error = root.close().unwrap_err();
        assert_eq!(error.failures.len(), 1);
        assert_eq!(error.failures[0].key, Key::named("b"));
        // Own instances newest first, then the child
        assert_eq!(*log.lock().unwrap(), vec!["c", "a", "b"]);
        assert!(child.is_closed());
    }

    #[test]
    fn closing_twice_is_a_no_op() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runtime = Runtime::default();
        let root = runtime.root();
        let instance = Instance::component(logged("a", &log, false));
        root.add_provider(Provider::instance(Key::named("a"), instance.clone()))
            .unwrap();

        root.close().unwrap();
        root.close().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        assert_eq!(instance.ready_state(), ReadyState::Closed);
    }

    #[test]
    fn closed_child_detaches_from_parent() {
        let runtime = Runtime::default();
        let root = runtime.root();
        let child = root.child("child").unwrap();
        child.close().unwrap();

        assert!(root.state().children.is_empty());
        assert!(child.add_provider(Provider::value(Key::named("x"), 1u8)).is_err());
    }
}
