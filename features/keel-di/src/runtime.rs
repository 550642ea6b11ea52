use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{errors::TeardownError, scope::Scope, wait_graph::WaitGraph};

/// Runtime wide settings
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Name of the root scope
    pub name: String,
    /// Readiness of top level requests whose key asks for the default
    pub ready_by_default: bool,
    /// Log failed constructions at error level where they originate
    pub log_failures: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            name: "root".to_string(),
            ready_by_default: true,
            log_failures: true,
        }
    }
}

impl RuntimeOptions {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_ready_by_default(mut self, ready: bool) -> Self {
        self.ready_by_default = ready;
        self
    }

    pub fn with_log_failures(mut self, log: bool) -> Self {
        self.log_failures = log;
        self
    }
}

/// State shared by every scope of one runtime
pub(crate) struct RuntimeShared {
    pub(crate) options: RuntimeOptions,
    pub(crate) waits: Arc<WaitGraph>,
    next_id: AtomicU64,
}

impl RuntimeShared {
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Owns the root scope
///
/// Create it once when the process starts and call [`Runtime::shutdown`] before exiting.
/// Dropping a runtime that was not shut down closes the root scope as well, logging failures.
pub struct Runtime {
    root: Scope,
}

impl Runtime {
    pub fn new(options: RuntimeOptions) -> Self {
        tracing::debug!(name = %options.name, "starting runtime");
        let shared = Arc::new(RuntimeShared {
            options,
            waits: Arc::default(),
            next_id: AtomicU64::new(1),
        });

        Runtime {
            root: Scope::root(shared),
        }
    }

    pub fn root(&self) -> &Scope {
        &self.root
    }

    /// Closes the root scope and with it every scope of the runtime
    pub fn shutdown(self) -> Result<(), TeardownError> {
        self.root.close()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new(RuntimeOptions::default())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.root.is_closed() {
            return;
        }
        if let Err(error) = self.root.close() {
            tracing::warn!(%error, "runtime dropped without shutdown, teardown failed");
        }
    }
}
