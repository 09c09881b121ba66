use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a single supervised child process.
///
/// This structure defines how to launch a long-running process (a game
/// server, a VPN client wrapper, ...) and how to ask it to shut down.
///
/// # Examples
///
/// ```
/// use craft_supervisor::config::ServiceConfig;
/// use std::collections::HashMap;
///
/// let server = ServiceConfig {
///     command: "java".to_string(),
///     args: vec!["-Xmx2G".to_string(), "-jar".to_string(), "server.jar".to_string(), "nogui".to_string()],
///     env: HashMap::new(),
///     working_dir: Some("server".into()),
///     stop_command: Some("stop".to_string()),
///     kill_timeout_secs: 30,
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Command to execute. Either an absolute path or a command on the PATH.
    pub command: String,

    /// Command-line arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables added on top of the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the child, if different from ours.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Line written to the child's stdin to request a graceful shutdown.
    #[serde(default)]
    pub stop_command: Option<String>,

    /// How long to wait for the child after the stop command before killing it.
    #[serde(default = "default_kill_timeout_secs")]
    pub kill_timeout_secs: u64,
}

impl ServiceConfig {
    /// Kill timeout as a [`Duration`].
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }
}

/// Supervisor tuning knobs. Every field has a default, so an empty
/// `"supervisor": {}` section (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorSettings {
    /// Maximum restarts allowed inside one restart window.
    pub max_restarts: u32,
    /// Length of the restart window in seconds.
    pub restart_window_secs: u64,
    /// Period of the monitoring loop in seconds.
    pub check_interval_secs: u64,
    /// Sleep after a failed monitoring iteration, in seconds.
    pub error_backoff_secs: u64,
    /// How long `stop` waits for a unit to exit.
    pub stop_grace_period_secs: u64,
    /// Pause between stop and start during an explicit restart.
    pub restart_delay_secs: u64,
    /// Pause before restarting a service that just crashed.
    pub crash_backoff_secs: u64,
    /// How often `run_until_shutdown` samples health.
    pub health_report_interval_secs: u64,
    /// Host resource usage (percent) above which health degrades to warning.
    pub resource_warning_percent: f32,
    /// Path whose filesystem is sampled for disk usage.
    pub disk_path: PathBuf,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            restart_window_secs: 3600,
            check_interval_secs: 30,
            error_backoff_secs: 60,
            stop_grace_period_secs: 10,
            restart_delay_secs: 2,
            crash_backoff_secs: 5,
            health_report_interval_secs: 60,
            resource_warning_percent: 90.0,
            disk_path: default_disk_path(),
        }
    }
}

impl SupervisorSettings {
    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_secs(self.stop_grace_period_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn crash_backoff(&self) -> Duration {
        Duration::from_secs(self.crash_backoff_secs)
    }

    pub fn health_report_interval(&self) -> Duration {
        Duration::from_secs(self.health_report_interval_secs)
    }
}

fn default_kill_timeout_secs() -> u64 {
    30
}

#[cfg(windows)]
fn default_disk_path() -> PathBuf {
    PathBuf::from("C:\\")
}

#[cfg(not(windows))]
fn default_disk_path() -> PathBuf {
    PathBuf::from("/")
}

/// Main configuration document.
///
/// # JSON Schema
///
/// ```json
/// {
///   "supervisor": {
///     "maxRestarts": 5,
///     "restartWindowSecs": 3600,
///     "checkIntervalSecs": 30
///   },
///   "services": {
///     "minecraft": {
///       "command": "java",
///       "args": ["-Xmx2G", "-jar", "server.jar", "nogui"],
///       "workingDir": "server",
///       "stopCommand": "stop",
///       "killTimeoutSecs": 30
///     }
///   }
/// }
/// ```
///
/// # Examples
///
/// ```no_run
/// use craft_supervisor::config::Config;
///
/// let config = Config::from_file("config.json").unwrap();
/// println!("{} services configured", config.services.len());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Supervisor settings; defaults apply when the section is missing.
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    /// Map of service names to child-process configurations.
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }
}
