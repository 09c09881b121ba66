/// Error handling module for the craft supervisor.
///
/// This module defines the error types used throughout the library.
/// Failures local to one service are reported through these variants to
/// whoever asked for that specific operation; the supervisor itself only
/// logs them and keeps going.
///
/// # Example
///
/// ```
/// use craft_supervisor::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::ServiceNotFound(name)) => println!("Service '{}' is not registered", name),
///         Err(Error::RestartLimitExceeded { service, restart_count }) => {
///             println!("{} restarted {} times, giving up for now", service, restart_count)
///         }
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use thiserror::Error;

/// Errors that can occur in the craft-supervisor library.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to read or parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The configuration file cannot be read
    /// - The configuration JSON is malformed
    /// - Field types are incorrect
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains invalid values.
    ///
    /// This error occurs when:
    /// - A service has an empty command or name
    /// - A timing value is zero where a period is required
    /// - The resource warning threshold is outside (0, 100]
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The named service was never registered.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Registration was attempted after the supervisor started its services.
    #[error("Supervisor already started; services must be registered before start_all")]
    AlreadyStarted,

    /// The service factory or the initial launch failed.
    ///
    /// No restart accounting happens for this failure and the record keeps
    /// its previous state.
    #[error("Failed to start service '{service}': {reason}")]
    StartFailure {
        /// Service name
        service: String,
        /// Why construction or launch failed
        reason: String,
    },

    /// The restart limiter denied a restart because the service already
    /// used up its restarts inside the current window.
    #[error("Service '{service}' exceeded its restart limit ({restart_count} restarts in window)")]
    RestartLimitExceeded {
        /// Service name
        service: String,
        /// Restarts counted in the current window
        restart_count: u32,
    },

    /// Error when spawning, signalling, or waiting on a child process.
    ///
    /// This error occurs when:
    /// - The process fails to spawn
    /// - Writing the stop command to stdin fails
    /// - The process exits with a non-zero status while it was expected to run
    #[error("Process error: {0}")]
    Process(String),

    /// A service's own `run` or `stop` reported a failure.
    #[error("Service failed: {0}")]
    ServiceFailed(String),

    /// Sampling host metrics failed.
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// A shared lock was poisoned by a panicking holder.
    #[error("Lock poisoned: {0}")]
    Lock(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::ServiceFailed(format!("{:#}", err))
    }
}

/// Result type for craft-supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;
