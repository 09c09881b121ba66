//! The contract between the supervisor and the work it keeps alive.
//!
//! A [`Service`] is anything with a long-running `run` that only returns when
//! it is told to stop or when it fails. `stop` is a best-effort request for a
//! graceful exit; the default implementation does nothing, which is how a
//! service declares that it has no stop capability.
//!
//! The supervisor never looks inside a service. It builds a fresh instance
//! through the [`ServiceDescriptor`]'s factory every time it starts one,
//! watches whether `run` is still going, and calls `stop` before walking away.
//!
//! Two ready-made implementations are provided:
//!
//! * [`ServiceFn`] wraps a closure producing a fresh future per run
//! * [`ProcessService`] runs a child process and can send it a stop command
//!
//! # Examples
//!
//! ```
//! use craft_supervisor::service::{Service, ServiceDescriptor};
//! use craft_supervisor::Result;
//! use async_trait::async_trait;
//!
//! struct Heartbeat;
//!
//! #[async_trait]
//! impl Service for Heartbeat {
//!     async fn run(&self) -> Result<()> {
//!         loop {
//!             tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!         }
//!     }
//! }
//!
//! let descriptor = ServiceDescriptor::new("heartbeat", || Ok(Heartbeat));
//! assert_eq!(descriptor.name(), "heartbeat");
//! ```
mod process;
mod service_fn;

pub use process::ProcessService;
pub use service_fn::{ServiceFn, StopSignal};

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A long-running unit of work managed by the supervisor.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Performs the service's work until it is stopped or fails.
    ///
    /// Returning at all, with `Ok` or `Err`, while the supervisor still
    /// expects the service to be running counts as a crash.
    async fn run(&self) -> Result<()>;

    /// Asks a running instance to exit. Called concurrently with `run`.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared service instance as held by the supervisor.
pub type ServiceRef = Arc<dyn Service>;

/// Capability that builds a fresh service instance on demand.
pub type ServiceFactory = Arc<dyn Fn() -> Result<ServiceRef> + Send + Sync>;

/// Immutable registration data for one service: its unique name and the
/// factory used to construct instances.
#[derive(Clone)]
pub struct ServiceDescriptor {
    name: String,
    factory: ServiceFactory,
}

impl ServiceDescriptor {
    /// Creates a descriptor from any closure that builds a concrete service.
    pub fn new<F, S>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<S> + Send + Sync + 'static,
        S: Service,
    {
        let factory: ServiceFactory = Arc::new(move || {
            let service = factory()?;
            Ok(Arc::new(service) as ServiceRef)
        });
        Self {
            name: name.into(),
            factory,
        }
    }

    /// Creates a descriptor from an already type-erased factory.
    pub fn from_factory(name: impl Into<String>, factory: ServiceFactory) -> Self {
        Self {
            name: name.into(),
            factory,
        }
    }

    /// The service's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds a new instance.
    pub fn build(&self) -> Result<ServiceRef> {
        (self.factory)()
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
