use crate::config::SupervisorSettings;
use crate::error::{Error, Result};
use crate::service::{ServiceDescriptor, ServiceRef};
use crate::supervisor::events::{EventLog, ServiceEventKind};
use crate::supervisor::limiter::RestartLimiter;
use crate::supervisor::record::{Execution, ServiceRecord, ServiceState, ServiceStore};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::Instrument;

/// Delays used by the lifecycle controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimings {
    /// How long `stop` waits for a unit before abandoning it
    pub stop_grace_period: Duration,
    /// Pause between stop and start in an explicit restart
    pub restart_delay: Duration,
    /// Pause before restarting a unit that just crashed
    pub crash_backoff: Duration,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self {
            stop_grace_period: Duration::from_secs(10),
            restart_delay: Duration::from_secs(2),
            crash_backoff: Duration::from_secs(5),
        }
    }
}

impl LifecycleTimings {
    pub fn from_settings(settings: &SupervisorSettings) -> Self {
        Self {
            stop_grace_period: settings.stop_grace_period(),
            restart_delay: settings.restart_delay(),
            crash_backoff: settings.crash_backoff(),
        }
    }
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Nothing was running
    NotRunning,
    /// The unit exited within the grace period
    Graceful,
    /// The unit was still running after the grace period and was abandoned
    TimedOut,
}

/// Point-in-time status of one service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    /// An execution unit is running the service right now
    pub running: bool,
    pub restart_count: u32,
    pub last_restart: Option<DateTime<Utc>>,
    /// Whether the restart limiter would allow a restart now
    pub restart_eligible: bool,
}

/// Starts, stops and restarts individual services and reacts to their
/// execution units exiting.
///
/// Cloning is cheap; clones share the same store and event log. Every
/// restart, whether caused by a crash, the monitor, or an explicit request,
/// is approved by the one [`RestartLimiter`] evaluation under the store lock.
#[derive(Clone)]
pub struct LifecycleController {
    store: ServiceStore,
    limiter: RestartLimiter,
    timings: LifecycleTimings,
    events: EventLog,
}

impl LifecycleController {
    pub fn new(store: ServiceStore, limiter: RestartLimiter, timings: LifecycleTimings) -> Self {
        Self {
            store,
            limiter,
            timings,
            events: EventLog::new(),
        }
    }

    pub fn store(&self) -> &ServiceStore {
        &self.store
    }

    pub fn limiter(&self) -> RestartLimiter {
        self.limiter
    }

    pub fn timings(&self) -> LifecycleTimings {
        self.timings
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Builds a fresh instance and runs it on its own task.
    ///
    /// Starting a service whose unit is still alive is a no-op. Must be called
    /// from within a tokio runtime.
    #[tracing::instrument(skip_all, fields(service = %name))]
    pub fn start(&self, name: &str) -> Result<()> {
        self.start_if(name, |_| true).map(|_| ())
    }

    /// Starts `name` if `wanted` holds for its record both before and after
    /// the instance is built. The factory runs without the store lock held.
    ///
    /// Returns `Ok(false)` when nothing was launched: a unit is already alive
    /// or `wanted` no longer holds.
    fn start_if(&self, name: &str, wanted: impl Fn(&ServiceRecord) -> bool) -> Result<bool> {
        let descriptor = {
            let records = self.store.lock()?;
            let record = records
                .get(name)
                .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
            if !Self::may_launch(record, &wanted)? {
                return Ok(false);
            }
            record.descriptor.clone()
        };

        let instance = self.build_instance(&descriptor)?;

        let mut records = self.store.lock()?;
        let record = records
            .get_mut(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        if !Self::may_launch(record, &wanted)? {
            tracing::debug!(service = name, "Record changed while building, instance discarded");
            return Ok(false);
        }
        self.launch(record, instance);
        Ok(true)
    }

    fn may_launch(record: &ServiceRecord, wanted: &impl Fn(&ServiceRecord) -> bool) -> Result<bool> {
        if record.is_alive() {
            tracing::debug!(service = record.name(), "Service already running");
            return Ok(false);
        }
        if record.state == ServiceState::Stopping {
            return Err(Error::StartFailure {
                service: record.name().to_string(),
                reason: "a stop is still in progress".to_string(),
            });
        }
        Ok(wanted(record))
    }

    /// Runs the factory, turning an error or a panic into `StartFailure`.
    fn build_instance(&self, descriptor: &ServiceDescriptor) -> Result<ServiceRef> {
        let name = descriptor.name();
        let reason = match std::panic::catch_unwind(AssertUnwindSafe(|| descriptor.build())) {
            Ok(Ok(instance)) => return Ok(instance),
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("factory panicked: {}", panic_message(panic.as_ref())),
        };

        tracing::error!(service = name, reason = %reason, "Failed to construct service");
        self.events
            .record(name, ServiceEventKind::StartFailed, Some(reason.clone()));
        Err(Error::StartFailure {
            service: name.to_string(),
            reason,
        })
    }

    fn launch(&self, record: &mut ServiceRecord, instance: ServiceRef) {
        let name = record.name().to_string();

        record.generation += 1;
        let generation = record.generation;
        let (done_tx, done_rx) = watch::channel(false);
        let unit = self
            .clone()
            .supervise(name.clone(), generation, Arc::clone(&instance), done_tx);
        let handle = tokio::spawn(unit);

        record.execution = Some(Execution {
            generation,
            instance,
            handle,
            done: done_rx,
        });
        record.state = ServiceState::Running;
        record.recovering = false;

        tracing::info!(service = %name, generation, "Service started");
        self.events.record(&name, ServiceEventKind::Started, None);
    }

    /// Body of every execution unit: run the instance, then report how it ended.
    async fn supervise(
        self,
        name: String,
        generation: u64,
        instance: ServiceRef,
        done: watch::Sender<bool>,
    ) {
        let outcome = AssertUnwindSafe(instance.run()).catch_unwind().await;
        done.send_replace(true);

        let reason = match outcome {
            Ok(Ok(())) => "run returned".to_string(),
            Ok(Err(e)) => format!("run failed: {}", e),
            Err(panic) => format!("run panicked: {}", panic_message(panic.as_ref())),
        };

        if self.mark_crashed(&name, generation, &reason) {
            // denial and start failure are logged inside recover
            let _ = self.recover(&name, self.timings.crash_backoff).await;
        }
    }

    /// Moves the record to `Crashed` if `generation` is still its live unit
    /// and nobody asked it to stop.
    fn mark_crashed(&self, name: &str, generation: u64, reason: &str) -> bool {
        let mut records = match self.store.lock() {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(service = name, error = %e, "Cannot record service exit");
                return false;
            }
        };
        let Some(record) = records.get_mut(name) else {
            return false;
        };

        if record.current_generation() != Some(generation) {
            tracing::debug!(service = name, generation, "Detached unit exited");
            return false;
        }
        if record.state != ServiceState::Running {
            return false;
        }

        self.crash_record(record, reason);
        true
    }

    fn crash_record(&self, record: &mut ServiceRecord, reason: &str) {
        record.state = ServiceState::Crashed;
        record.execution = None;
        tracing::warn!(service = record.name(), reason, "Service crashed");
        self.events.record(
            record.name(),
            ServiceEventKind::Crashed,
            Some(reason.to_string()),
        );
    }

    fn deny_restart(&self, record: &ServiceRecord) -> Error {
        let name = record.name().to_string();
        tracing::error!(
            service = %name,
            restart_count = record.restart_count,
            "Service exceeded restart limits, not restarting"
        );
        self.events.record(
            &name,
            ServiceEventKind::RestartDenied,
            Some(format!("{} restarts in window", record.restart_count)),
        );
        Error::RestartLimitExceeded {
            service: name,
            restart_count: record.restart_count,
        }
    }

    /// Gated restart of a crashed service.
    ///
    /// Returns `Ok(false)` when there was nothing to do: the record is not
    /// crashed, another recovery already owns it, or it was stopped during
    /// `delay`.
    async fn recover(&self, name: &str, delay: Duration) -> Result<bool> {
        let restart_count = {
            let mut records = self.store.lock()?;
            let record = records
                .get_mut(name)
                .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;

            if record.state != ServiceState::Crashed || record.recovering {
                return Ok(false);
            }
            if !self.limiter.may_restart(record, Instant::now()) {
                return Err(self.deny_restart(record));
            }
            record.recovering = true;
            record.restart_count
        };

        tracing::warn!(
            service = name,
            restart_count,
            delay_secs = delay.as_secs(),
            "Restarting crashed service"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.start_if(name, |r| r.state == ServiceState::Crashed && r.recovering) {
            Ok(true) => {
                self.events.record(
                    name,
                    ServiceEventKind::Restarted,
                    Some(format!("restart {} in window", restart_count)),
                );
                Ok(true)
            }
            Ok(false) => {
                tracing::info!(service = name, "Recovery abandoned");
                Ok(false)
            }
            Err(e) => {
                // let the monitor try again on a later pass
                if let Ok(mut records) = self.store.lock() {
                    if let Some(record) = records.get_mut(name) {
                        record.recovering = false;
                    }
                }
                Err(e)
            }
        }
    }

    /// Asks the service to stop and waits up to the grace period for its unit.
    ///
    /// A unit that outlives the grace period is detached, not cancelled; the
    /// record is `Stopped` either way.
    #[tracing::instrument(skip_all, fields(service = %name))]
    pub async fn stop(&self, name: &str) -> Result<StopOutcome> {
        let (instance, mut done, generation) = {
            let mut records = self.store.lock()?;
            let record = records
                .get_mut(name)
                .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
            record.recovering = false;
            record.stop_requests += 1;

            match record.state {
                ServiceState::Registered | ServiceState::Stopped => {
                    tracing::debug!("Service not running");
                    return Ok(StopOutcome::NotRunning);
                }
                ServiceState::Crashed => {
                    record.state = ServiceState::Stopped;
                    tracing::info!("Crashed service marked stopped");
                    self.events.record(name, ServiceEventKind::Stopped, None);
                    return Ok(StopOutcome::NotRunning);
                }
                ServiceState::Running | ServiceState::Stopping => {}
            }

            let Some(exec) = record.execution.as_ref() else {
                record.state = ServiceState::Stopped;
                self.events.record(name, ServiceEventKind::Stopped, None);
                return Ok(StopOutcome::NotRunning);
            };
            let claim = (Arc::clone(&exec.instance), exec.done.clone(), exec.generation);
            record.state = ServiceState::Stopping;
            claim
        };

        tracing::info!(generation, "Stopping service");
        tokio::spawn(
            async move {
                if let Err(e) = instance.stop().await {
                    tracing::warn!(error = %e, "Service stop hook failed");
                }
            }
            .in_current_span(),
        );

        let grace = self.timings.stop_grace_period;
        // a closed channel means the unit is gone, which counts as exited
        let graceful = tokio::time::timeout(grace, done.wait_for(|finished| *finished))
            .await
            .is_ok();

        let outcome = if graceful {
            StopOutcome::Graceful
        } else {
            tracing::warn!(grace_secs = grace.as_secs(), "Service did not stop gracefully");
            self.events.record(
                name,
                ServiceEventKind::StopTimedOut,
                Some(format!("abandoned after {}s", grace.as_secs())),
            );
            StopOutcome::TimedOut
        };

        let mut records = self.store.lock()?;
        if let Some(record) = records.get_mut(name) {
            if record.current_generation() == Some(generation) {
                record.execution = None;
                record.state = ServiceState::Stopped;
                tracing::info!("Service stopped");
                self.events.record(name, ServiceEventKind::Stopped, None);
            }
        }

        Ok(outcome)
    }

    /// Stop, pause, start; approved by the restart limiter first.
    ///
    /// A denied restart leaves the service exactly as it was. A stop that
    /// arrives during the pause wins: the service stays stopped and the
    /// restart returns without starting it.
    #[tracing::instrument(skip_all, fields(service = %name))]
    pub async fn restart(&self, name: &str) -> Result<()> {
        let (restart_count, stops_before) = {
            let mut records = self.store.lock()?;
            let record = records
                .get_mut(name)
                .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
            if !self.limiter.may_restart(record, Instant::now()) {
                return Err(self.deny_restart(record));
            }
            (record.restart_count, record.stop_requests)
        };

        tracing::info!(restart_count, "Restarting service");
        self.stop(name).await?;
        tokio::time::sleep(self.timings.restart_delay).await;

        // our own stop is the only one allowed in between
        if !self.start_if(name, |r| r.stop_requests == stops_before + 1)? {
            tracing::info!("Restart abandoned, service was stopped or started meanwhile");
            return Ok(());
        }
        self.events.record(
            name,
            ServiceEventKind::Restarted,
            Some(format!("explicit restart {} in window", restart_count)),
        );
        Ok(())
    }

    /// One monitoring pass: every running record whose unit has exited is
    /// treated as crashed, and every crashed record not already being
    /// recovered goes through the gated restart immediately.
    ///
    /// Returns how many services were restarted. Per-service failures are
    /// logged and skipped; only a store failure aborts the pass.
    pub async fn check_services(&self) -> Result<usize> {
        let candidates = {
            let mut records = self.store.lock()?;
            let mut names = Vec::new();
            for (name, record) in records.iter_mut() {
                match record.state {
                    ServiceState::Running if !record.is_alive() => {
                        self.crash_record(record, "execution unit found dead by monitor");
                        names.push(name.clone());
                    }
                    ServiceState::Crashed if !record.recovering => names.push(name.clone()),
                    _ => {}
                }
            }
            names.sort();
            names
        };

        let mut restarted = 0;
        for name in candidates {
            match self.recover(&name, Duration::ZERO).await {
                Ok(true) => restarted += 1,
                Ok(false) => {}
                Err(Error::Lock(msg)) => return Err(Error::Lock(msg)),
                Err(e) => tracing::debug!(service = %name, error = %e, "Recovery attempt failed"),
            }
        }

        Ok(restarted)
    }

    /// Status of one service
    pub fn status(&self, name: &str) -> Result<ServiceStatus> {
        let records = self.store.lock()?;
        let record = records
            .get(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        Ok(self.status_of(record, Instant::now()))
    }

    /// Status of every service, keyed by name
    pub fn statuses(&self) -> Result<BTreeMap<String, ServiceStatus>> {
        let records = self.store.lock()?;
        let now = Instant::now();
        Ok(records
            .iter()
            .map(|(name, record)| (name.clone(), self.status_of(record, now)))
            .collect())
    }

    fn status_of(&self, record: &ServiceRecord, now: Instant) -> ServiceStatus {
        ServiceStatus {
            name: record.name().to_string(),
            state: record.state,
            running: record.state == ServiceState::Running && record.is_alive(),
            restart_count: record.restart_count,
            last_restart: record.last_restart_wall,
            restart_eligible: self.limiter.is_eligible(record, now),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
