/*!
 # Craft Supervisor

 Keeps the long-running pieces of a self-hosted game server alive around
 the clock: the Java server process, a VPN connection monitor, a chat bot,
 anything that can be expressed as a [`Service`].

 ## Overview

 Craft Supervisor provides functionality to:
 - Register services and start them each on their own task
 - Detect crashes and restart services, bounded by a sliding restart window
 - Periodically sweep for dead services the crash hook did not catch
 - Report a consolidated health status including host CPU, memory and disk
 - Stop everything gracefully on SIGINT/SIGTERM

 ## Basic Usage

 ```no_run
 use craft_supervisor::{Supervisor, Result};

 #[tokio::main]
 async fn main() -> Result<()> {
     // Services and supervisor settings come from a JSON file
     let supervisor = Supervisor::from_config_file("config.json")?;

     // Start everything, monitor, and block until a shutdown signal
     supervisor.run_until_shutdown().await
 }
 ```

 Registering an in-process service:

 ```no_run
 use craft_supervisor::{Supervisor, config::SupervisorSettings};
 use craft_supervisor::service::{ServiceFn, StopSignal};

 # #[tokio::main]
 # async fn main() -> craft_supervisor::Result<()> {
 let supervisor = Supervisor::new(SupervisorSettings::default())?;
 supervisor.register_service("vpn-monitor", || {
     Ok(ServiceFn::new(|stop: StopSignal| async move {
         stop.stopped().await;
         Ok::<_, anyhow::Error>(())
     }))
 })?;

 supervisor.start_all()?;
 let report = supervisor.health_check()?;
 println!("{}", report.overall_status);
 # Ok(())
 # }
 ```

 ## Features

 - **Restart limiting**: at most `maxRestarts` restarts per service inside any restart window
 - **Crash detection**: a unit that returns, fails or panics while expected to run is restarted after a back-off
 - **Graceful stop**: services are asked to stop and given a grace period before being abandoned
 - **Health**: one `healthy`/`warning`/`unhealthy` verdict per check, no history kept
 - **Configuration**: JSON config file with child-process services

 ## License

 This project is licensed under the terms in the LICENSE file.
*/

pub mod config;
pub mod error;
pub mod service;
pub mod signals;
pub mod supervisor;

pub use config::Config;
pub use error::{Error, Result};
pub use service::{ProcessService, Service, ServiceDescriptor, ServiceFn};
pub use supervisor::{HealthReport, OverallStatus, ServiceState, ServiceStatus, StopOutcome};

use config::SupervisorSettings;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use supervisor::{
    HealthAggregator, LifecycleController, LifecycleTimings, MonitorConfig, RestartLimiter,
    ServiceEvent, ServiceMonitor, ServiceStore, SysinfoMetrics, SystemMetrics,
};

/// Registers services and keeps them running.
///
/// This struct is the main entry point. Every method takes `&self`, so a
/// supervisor can be shared behind an `Arc` between a command handler, a
/// signal handler and the caller that started it.
/// All public methods are instrumented with `tracing` spans.
pub struct Supervisor {
    /// Settings the supervisor was built with
    settings: SupervisorSettings,
    /// Start/stop/restart of individual services
    controller: LifecycleController,
    /// Health reporting
    health: HealthAggregator,
    /// Periodic recovery sweep
    monitor: Mutex<ServiceMonitor>,
    /// Set by the first `start_all`; registration closes afterwards
    started: AtomicBool,
}

impl Supervisor {
    /// Create a supervisor sampling host metrics with `sysinfo`
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] if the settings fail validation.
    pub fn new(settings: SupervisorSettings) -> Result<Self> {
        Self::with_metrics(settings, Arc::new(SysinfoMetrics::new()))
    }

    /// Create a supervisor with a custom host metrics source
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] if the settings fail validation, e.g.
    /// a zero check interval or health report interval.
    #[tracing::instrument(skip_all, fields(max_restarts = settings.max_restarts))]
    pub fn with_metrics(
        settings: SupervisorSettings,
        metrics: Arc<dyn SystemMetrics>,
    ) -> Result<Self> {
        config::validator::validate_settings(&settings)?;
        tracing::info!("Creating new Supervisor");
        let controller = LifecycleController::new(
            ServiceStore::new(),
            RestartLimiter::from_settings(&settings),
            LifecycleTimings::from_settings(&settings),
        );
        let health = HealthAggregator::new(
            controller.clone(),
            metrics,
            settings.resource_warning_percent,
            settings.disk_path.clone(),
        );
        let monitor = ServiceMonitor::new(controller.clone(), MonitorConfig::from_settings(&settings));

        Ok(Self {
            settings,
            controller,
            health,
            monitor: Mutex::new(monitor),
            started: AtomicBool::new(false),
        })
    }

    /// Create a supervisor from a validated configuration, registering one
    /// [`ProcessService`] per configured service
    #[tracing::instrument(skip(config), fields(num_services = config.services.len()))]
    pub fn from_config(config: &Config) -> Result<Self> {
        config::validate_config(config)?;

        let supervisor = Self::new(config.supervisor.clone())?;
        let mut names: Vec<&String> = config.services.keys().collect();
        names.sort();
        for name in names {
            let service_config = config.services[name].clone();
            let service_name = name.clone();
            supervisor.register_service(name.clone(), move || {
                Ok(ProcessService::new(service_name.clone(), service_config.clone()))
            })?;
        }

        Ok(supervisor)
    }

    /// Create a supervisor from a configuration file path
    #[tracing::instrument(skip(path), fields(config_path = ?path.as_ref()))]
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        tracing::info!("Loading configuration from file");
        let config = Config::from_file(path)?;
        Self::from_config(&config)
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// The lifecycle controller shared by all components
    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    /// Register a service under `name`.
    ///
    /// Registering a name twice replaces the earlier registration. Must be
    /// called before [`start_all`](Self::start_all).
    pub fn register_service<F, S>(&self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> Result<S> + Send + Sync + 'static,
        S: Service,
    {
        self.register(ServiceDescriptor::new(name, factory))
    }

    /// Register a prepared [`ServiceDescriptor`]
    #[tracing::instrument(skip_all, fields(service = %descriptor.name()))]
    pub fn register(&self, descriptor: ServiceDescriptor) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            tracing::error!("Cannot register a service after start_all");
            return Err(Error::AlreadyStarted);
        }

        if self.controller.store().insert(descriptor)? {
            tracing::warn!("Service was already registered; previous registration replaced");
        } else {
            tracing::info!("Registered service");
        }
        Ok(())
    }

    /// Registered service names, sorted
    pub fn service_names(&self) -> Result<Vec<String>> {
        self.controller.store().names()
    }

    /// Start a specific service
    pub fn start_service(&self, name: &str) -> Result<()> {
        self.controller.start(name)
    }

    /// Start every registered service.
    ///
    /// All services are attempted even if some fail. Returns the names that
    /// are running; if any failed, the failure (or an aggregate of all
    /// failures) is returned instead, after the others were started.
    #[tracing::instrument(skip(self))]
    pub fn start_all(&self) -> Result<Vec<String>> {
        self.started.store(true, Ordering::SeqCst);
        let names = self.service_names()?;
        tracing::info!(services = ?names, "Starting all services");

        let mut started = Vec::new();
        let mut errors = Vec::new();
        for name in names {
            match self.controller.start(&name) {
                Ok(()) => started.push(name),
                Err(e) => {
                    tracing::error!(service = %name, error = %e, "Failed to start service");
                    errors.push((name, e));
                }
            }
        }

        if !errors.is_empty() {
            tracing::warn!(
                num_failed = errors.len(),
                "Some services failed to start: {:?}",
                errors.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>()
            );
            if errors.len() == 1 {
                return Err(errors.remove(0).1);
            }
            let error_msg = errors
                .iter()
                .map(|(name, e)| format!("{}: {}", name, e))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Other(format!(
                "Multiple services failed to start: {}",
                error_msg
            )));
        }

        tracing::info!(num_started = started.len(), "Finished starting all services");
        Ok(started)
    }

    /// Stop a specific service
    pub async fn stop_service(&self, name: &str) -> Result<StopOutcome> {
        self.controller.stop(name).await
    }

    /// Restart a specific service, subject to the restart limit
    pub async fn restart_service(&self, name: &str) -> Result<()> {
        self.controller.restart(name).await
    }

    /// Stop every service concurrently.
    ///
    /// Every service is stopped regardless of the others' outcome; the first
    /// error encountered is returned.
    #[tracing::instrument(skip(self))]
    pub async fn stop_all(&self) -> Result<()> {
        let names = self.service_names()?;
        tracing::info!("Stopping all services");

        let results =
            futures::future::join_all(names.iter().map(|name| self.controller.stop(name))).await;

        let mut first_error = None;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(outcome) => tracing::debug!(service = %name, ?outcome, "Stop finished"),
                Err(e) => {
                    tracing::error!(service = %name, error = %e, "Failed to stop service");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Restart every service one after another, each subject to its own
    /// restart limit. Returns the first error after trying all of them.
    #[tracing::instrument(skip(self))]
    pub async fn restart_all(&self) -> Result<()> {
        tracing::info!("Restarting all services");
        let mut first_error = None;
        for name in self.service_names()? {
            if let Err(e) = self.controller.restart(&name).await {
                tracing::error!(service = %name, error = %e, "Failed to restart service");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Status of a specific service
    pub fn service_status(&self, name: &str) -> Result<ServiceStatus> {
        self.controller.status(name)
    }

    /// Status of every service, keyed by name
    pub fn all_statuses(&self) -> Result<BTreeMap<String, ServiceStatus>> {
        self.controller.statuses()
    }

    /// Consolidated health of services and host
    pub fn health_check(&self) -> Result<HealthReport> {
        self.health.health_check()
    }

    /// Recent lifecycle events, newest first, for one service or all of them
    pub fn recent_events(&self, service: Option<&str>, limit: Option<usize>) -> Result<Vec<ServiceEvent>> {
        match service {
            Some(name) => self.controller.events().service_events(name, limit),
            None => self.controller.events().all_events(limit),
        }
    }

    fn monitor(&self) -> Result<std::sync::MutexGuard<'_, ServiceMonitor>> {
        self.monitor
            .lock()
            .map_err(|_| Error::Lock("Failed to lock service monitor".to_string()))
    }

    /// Start the periodic monitoring loop
    pub fn start_monitoring(&self) -> Result<()> {
        self.monitor()?.start();
        Ok(())
    }

    /// Stop the periodic monitoring loop
    pub fn stop_monitoring(&self) -> Result<()> {
        self.monitor()?.stop();
        Ok(())
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor().map(|m| m.is_running()).unwrap_or(false)
    }

    /// Stop monitoring, then stop every service
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down");
        self.stop_monitoring()?;
        let result = self.stop_all().await;
        tracing::info!("Supervisor stopped");
        result
    }

    /// Start all services and the monitor, report degraded health every
    /// `healthReportIntervalSecs`, and shut down once `shutdown` resolves.
    #[tracing::instrument(skip_all)]
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Starting supervisor");
        if let Err(e) = self.start_all() {
            tracing::warn!(error = %e, "Continuing with partially started services");
        }
        self.start_monitoring()?;

        let period = self.settings.health_report_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => match self.health_check() {
                    Ok(report) if !report.is_healthy() => {
                        tracing::warn!(status = %report.overall_status, "System health degraded");
                    }
                    Ok(_) => tracing::debug!("System healthy"),
                    Err(e) => tracing::error!(error = %e, "Health check failed"),
                },
            }
        }

        self.shutdown().await
    }

    /// [`run_until`](Self::run_until) a SIGINT/SIGTERM (or Ctrl-C) arrives
    pub async fn run_until_shutdown(&self) -> Result<()> {
        self.run_until(async {
            match signals::wait_for_shutdown_signal().await {
                Ok(signal) => tracing::info!(%signal, "Received shutdown signal"),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for shutdown signals");
                    // without signal handlers there is nothing to wait for
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }
}
