//! Closure-backed service.
//!
//! [`ServiceFn`] wraps a closure `F: Fn(StopSignal) -> Fut` and produces a
//! fresh future on every `run`. The closure receives a [`StopSignal`] that
//! resolves once the supervisor calls `stop`, so cooperative shutdown is a
//! `select!` away.
//!
//! ```
//! use craft_supervisor::service::{ServiceFn, StopSignal};
//! use std::time::Duration;
//!
//! let svc = ServiceFn::new(|stop: StopSignal| async move {
//!     loop {
//!         tokio::select! {
//!             _ = stop.stopped() => return Ok::<_, anyhow::Error>(()),
//!             _ = tokio::time::sleep(Duration::from_secs(5)) => {
//!                 // poll the VPN adapter, ping the game server, ...
//!             }
//!         }
//!     }
//! });
//! # let _ = svc;
//! ```

use crate::error::Result;
use crate::service::Service;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative stop notification handed to a [`ServiceFn`] closure.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once a stop has been requested. Returns immediately if it
    /// already was.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only ends by a stop.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Function-backed service implementation.
pub struct ServiceFn<F> {
    f: F,
    stop: StopSignal,
}

impl<F> ServiceFn<F> {
    /// Wraps a closure that creates a new future per run.
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(StopSignal) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        Self {
            f,
            stop: StopSignal::new(),
        }
    }
}

#[async_trait]
impl<F, Fut> Service for ServiceFn<F>
where
    F: Fn(StopSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self) -> Result<()> {
        (self.f)(self.stop.clone()).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop.trigger();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_resolves_running_closure() {
        let svc = Arc::new(ServiceFn::new(|stop: StopSignal| async move {
            stop.stopped().await;
            Ok::<_, anyhow::Error>(())
        }));

        let runner = Arc::clone(&svc);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        svc.stop().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("service did not observe stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stop_before_run_is_not_lost() {
        let svc = ServiceFn::new(|stop: StopSignal| async move {
            stop.stopped().await;
            Ok::<_, anyhow::Error>(())
        });
        svc.stop().await.unwrap();
        assert!(tokio::time::timeout(Duration::from_secs(1), svc.run()).await.is_ok());
    }

    #[tokio::test]
    async fn test_closure_error_becomes_service_failure() {
        let svc = ServiceFn::new(|_stop: StopSignal| async move {
            Err::<(), _>(anyhow::anyhow!("server jar missing"))
        });
        let err = svc.run().await.unwrap_err();
        assert!(err.to_string().contains("server jar missing"));
    }
}
