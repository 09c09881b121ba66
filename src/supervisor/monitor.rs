use crate::config::SupervisorSettings;
use crate::supervisor::lifecycle::LifecycleController;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Service monitor configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Time between passes
    pub check_interval: Duration,
    /// Sleep after a pass that failed
    pub error_backoff: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(60),
        }
    }
}

impl MonitorConfig {
    pub fn from_settings(settings: &SupervisorSettings) -> Self {
        Self {
            check_interval: settings.check_interval(),
            error_backoff: settings.error_backoff(),
        }
    }
}

/// Periodic liveness sweep over every service.
///
/// Catches units that died without their crash hook restarting them and
/// retries crashed services once their restart window allows it. A failing
/// pass is logged and followed by a longer sleep; it never ends the loop.
pub struct ServiceMonitor {
    /// Lifecycle controller the passes go through
    controller: LifecycleController,
    /// Monitor configuration
    config: MonitorConfig,
    /// Monitor task
    monitor_task: Option<JoinHandle<()>>,
}

impl ServiceMonitor {
    /// Create a new service monitor
    pub fn new(controller: LifecycleController, config: MonitorConfig) -> Self {
        Self {
            controller,
            config,
            monitor_task: None,
        }
    }

    /// Whether the monitoring task is running
    pub fn is_running(&self) -> bool {
        self.monitor_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start the monitor. Starting a running monitor is a no-op.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let controller = self.controller.clone();
        let config = self.config;

        let task = tokio::spawn(async move {
            loop {
                match controller.check_services().await {
                    Ok(restarted) => {
                        if restarted > 0 {
                            tracing::info!(restarted, "Monitor restarted services");
                        }
                        tokio::time::sleep(config.check_interval).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Error in service monitoring");
                        tokio::time::sleep(config.error_backoff).await;
                    }
                }
            }
        });

        tracing::info!(
            interval_secs = config.check_interval.as_secs(),
            "Service monitoring started"
        );
        self.monitor_task = Some(task);
    }

    /// Stop the monitor
    pub fn stop(&mut self) {
        if let Some(task) = self.monitor_task.take() {
            task.abort();
            tracing::info!("Service monitoring stopped");
        }
    }
}

impl Drop for ServiceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
