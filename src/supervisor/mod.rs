/// Supervision internals.
///
/// This module keeps registered services alive. Components, leaves first:
///
/// * `record` - registered services and their mutable runtime state, behind one lock
/// * `limiter` - sliding-window restart policy
/// * `lifecycle` - start, stop and restart of one service; crash detection
/// * `monitor` - periodic sweep that recovers dead or crashed services
/// * `health` - consolidated health report with host resource usage
/// * `events` - bounded history of lifecycle events
///
/// Most callers only need [`crate::Supervisor`]; the pieces are public so they
/// can be composed or tested on their own.
///
/// # Examples
///
/// Driving a single service by hand:
///
/// ```
/// use craft_supervisor::service::{ServiceDescriptor, ServiceFn, StopSignal};
/// use craft_supervisor::supervisor::{
///     LifecycleController, LifecycleTimings, RestartLimiter, ServiceState, ServiceStore,
/// };
///
/// # #[tokio::main]
/// # async fn main() -> craft_supervisor::Result<()> {
/// let store = ServiceStore::new();
/// store.insert(ServiceDescriptor::new("vpn-monitor", || {
///     Ok(ServiceFn::new(|stop: StopSignal| async move {
///         stop.stopped().await;
///         Ok::<_, anyhow::Error>(())
///     }))
/// }))?;
///
/// let controller = LifecycleController::new(
///     store.clone(),
///     RestartLimiter::default(),
///     LifecycleTimings::default(),
/// );
/// controller.start("vpn-monitor")?;
/// assert_eq!(store.state("vpn-monitor")?, ServiceState::Running);
///
/// controller.stop("vpn-monitor").await?;
/// assert_eq!(store.state("vpn-monitor")?, ServiceState::Stopped);
/// # Ok(())
/// # }
/// ```
pub mod events;
pub mod health;
pub mod lifecycle;
pub mod limiter;
pub mod monitor;
pub mod record;

pub use events::{EventLog, ServiceEvent, ServiceEventKind};
pub use health::{
    HealthAggregator, HealthReport, OverallStatus, SysinfoMetrics, SystemMetrics, SystemSnapshot,
};
pub use lifecycle::{LifecycleController, LifecycleTimings, ServiceStatus, StopOutcome};
pub use limiter::RestartLimiter;
pub use monitor::{MonitorConfig, ServiceMonitor};
pub use record::{ServiceRecord, ServiceState, ServiceStore};
