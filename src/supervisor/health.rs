use crate::error::{Error, Result};
use crate::supervisor::lifecycle::{LifecycleController, ServiceStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use sysinfo::{Disks, System};

/// Host resource usage, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
}

impl SystemSnapshot {
    /// Highest of the three readings
    pub fn peak(&self) -> f32 {
        self.cpu_percent
            .max(self.memory_percent)
            .max(self.disk_percent)
    }
}

/// Source of host resource readings.
#[cfg_attr(test, mockall::automock)]
pub trait SystemMetrics: Send + Sync {
    /// Samples CPU, memory, and the usage of the disk holding `disk_path`.
    fn sample(&self, disk_path: &Path) -> Result<SystemSnapshot>;
}

/// [`SystemMetrics`] backed by `sysinfo`.
///
/// The `System` is kept between samples so CPU usage is measured over the
/// interval since the previous call.
pub struct SysinfoMetrics {
    system: Mutex<System>,
}

impl SysinfoMetrics {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 100.0) as f32
    }
}

impl SystemMetrics for SysinfoMetrics {
    fn sample(&self, disk_path: &Path) -> Result<SystemSnapshot> {
        let (cpu_percent, memory_percent) = {
            let mut sys = self
                .system
                .lock()
                .map_err(|_| Error::Metrics("Failed to lock system info".to_string()))?;
            sys.refresh_cpu();
            sys.refresh_memory();
            (
                sys.global_cpu_info().cpu_usage(),
                percent(sys.used_memory(), sys.total_memory()),
            )
        };

        // the disk whose mount point is the longest prefix of `disk_path`
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|d| disk_path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .ok_or_else(|| {
                Error::Metrics(format!("No disk found for {}", disk_path.display()))
            })?;
        let disk_percent = percent(
            disk.total_space().saturating_sub(disk.available_space()),
            disk.total_space(),
        );

        Ok(SystemSnapshot {
            cpu_percent,
            memory_percent,
            disk_percent,
        })
    }
}

/// Consolidated health verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Warning,
    Unhealthy,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverallStatus::Healthy => "healthy",
            OverallStatus::Warning => "warning",
            OverallStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Result of one [`HealthAggregator::health_check`]
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub services: BTreeMap<String, ServiceStatus>,
    /// `None` when host metrics could not be sampled
    pub system: Option<SystemSnapshot>,
    pub overall_status: OverallStatus,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.overall_status == OverallStatus::Healthy
    }
}

/// Samples service liveness and host resources into one [`HealthReport`].
///
/// Stateless: nothing is remembered between calls.
#[derive(Clone)]
pub struct HealthAggregator {
    controller: LifecycleController,
    metrics: Arc<dyn SystemMetrics>,
    warning_percent: f32,
    disk_path: PathBuf,
}

impl HealthAggregator {
    pub fn new(
        controller: LifecycleController,
        metrics: Arc<dyn SystemMetrics>,
        warning_percent: f32,
        disk_path: PathBuf,
    ) -> Self {
        Self {
            controller,
            metrics,
            warning_percent,
            disk_path,
        }
    }

    /// Builds a report. Any service not running makes the system unhealthy;
    /// otherwise any host reading above the warning threshold makes it a
    /// warning. A metrics failure is logged and only drops the system section.
    pub fn health_check(&self) -> Result<HealthReport> {
        let services = self.controller.statuses()?;

        let system = match self.metrics.sample(&self.disk_path) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to sample host metrics");
                None
            }
        };

        let overall_status = if services.values().any(|s| !s.running) {
            OverallStatus::Unhealthy
        } else if system.is_some_and(|s| s.peak() > self.warning_percent) {
            OverallStatus::Warning
        } else {
            OverallStatus::Healthy
        };

        Ok(HealthReport {
            timestamp: Utc::now(),
            services,
            system,
            overall_status,
        })
    }
}
