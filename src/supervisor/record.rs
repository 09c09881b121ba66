use crate::error::{Error, Result};
use crate::service::{ServiceDescriptor, ServiceRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Lifecycle state of a registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Registered but never started, or its first start failed
    Registered,
    /// An execution unit is running the service
    Running,
    /// The execution unit exited while the service should have been running
    Crashed,
    /// A stop was requested and the unit has not been released yet
    Stopping,
    /// Stopped on request
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Registered => "registered",
            ServiceState::Running => "running",
            ServiceState::Crashed => "crashed",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Ownership of the task currently running one service instance.
pub(crate) struct Execution {
    /// Start counter value this unit was launched with
    pub(crate) generation: u64,
    /// The instance, kept so `stop` can be called on it
    pub(crate) instance: ServiceRef,
    /// Dropping the handle detaches the task without cancelling it
    pub(crate) handle: JoinHandle<()>,
    /// Becomes `true` when the instance's `run` has returned
    pub(crate) done: watch::Receiver<bool>,
}

impl Execution {
    pub(crate) fn is_alive(&self) -> bool {
        !*self.done.borrow() && !self.handle.is_finished()
    }
}

/// Mutable runtime state for one registered service.
pub struct ServiceRecord {
    pub(crate) descriptor: ServiceDescriptor,
    pub(crate) state: ServiceState,
    pub(crate) execution: Option<Execution>,
    pub(crate) restart_count: u32,
    pub(crate) last_restart_at: Option<Instant>,
    pub(crate) last_restart_wall: Option<DateTime<Utc>>,
    pub(crate) generation: u64,
    /// A gated restart was approved and has not completed yet
    pub(crate) recovering: bool,
    /// Number of stop requests seen; an explicit restart only starts the
    /// service again if no other stop arrived during its pause
    pub(crate) stop_requests: u64,
}

impl ServiceRecord {
    /// Creates a fresh record in [`ServiceState::Registered`].
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            descriptor,
            state: ServiceState::Registered,
            execution: None,
            restart_count: 0,
            last_restart_at: None,
            last_restart_wall: None,
            generation: 0,
            recovering: false,
            stop_requests: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Restarts counted in the current restart window.
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Monotonic time of the most recent restart attempt.
    pub fn last_restart_at(&self) -> Option<Instant> {
        self.last_restart_at
    }

    /// Wall-clock time of the most recent restart attempt.
    pub fn last_restart(&self) -> Option<DateTime<Utc>> {
        self.last_restart_wall
    }

    /// Whether an execution unit exists and has not exited.
    pub fn is_alive(&self) -> bool {
        self.execution.as_ref().is_some_and(Execution::is_alive)
    }

    pub(crate) fn current_generation(&self) -> Option<u64> {
        self.execution.as_ref().map(|exec| exec.generation)
    }
}

impl fmt::Debug for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRecord")
            .field("name", &self.name())
            .field("state", &self.state)
            .field("alive", &self.is_alive())
            .field("restart_count", &self.restart_count)
            .field("last_restart", &self.last_restart_wall)
            .field("generation", &self.generation)
            .field("recovering", &self.recovering)
            .field("stop_requests", &self.stop_requests)
            .finish()
    }
}

/// The set of registered services, guarded by one lock.
///
/// Critical sections are short and never span an `.await`; every mutation
/// of a record's state, restart counters, or execution goes through
/// [`ServiceStore::lock`].
#[derive(Clone, Default)]
pub struct ServiceStore {
    records: Arc<Mutex<HashMap<String, ServiceRecord>>>,
}

impl ServiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, ServiceRecord>>> {
        self.records
            .lock()
            .map_err(|_| Error::Lock("Failed to lock service store".to_string()))
    }

    /// Inserts a record for `descriptor`, replacing any record with the
    /// same name. Returns `true` when a record was replaced.
    pub fn insert(&self, descriptor: ServiceDescriptor) -> Result<bool> {
        let name = descriptor.name().to_string();
        let mut records = self.lock()?;
        Ok(records.insert(name, ServiceRecord::new(descriptor)).is_some())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Result<Vec<String>> {
        let records = self.lock()?;
        let mut names: Vec<String> = records.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(name))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    pub fn state(&self, name: &str) -> Result<ServiceState> {
        self.with_record(name, |record| record.state)
    }

    /// Runs `f` on the named record while holding the store lock.
    pub fn with_record<T>(&self, name: &str, f: impl FnOnce(&mut ServiceRecord) -> T) -> Result<T> {
        let mut records = self.lock()?;
        let record = records
            .get_mut(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        Ok(f(record))
    }
}
