use async_trait::async_trait;
use craft_supervisor::config::SupervisorSettings;
use craft_supervisor::error::{Error, Result};
use craft_supervisor::service::{Service, ServiceFn, StopSignal};
use craft_supervisor::supervisor::{ServiceEventKind, SystemMetrics, SystemSnapshot};
use craft_supervisor::{ServiceState, StopOutcome, Supervisor};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct IdleHost;

impl SystemMetrics for IdleHost {
    fn sample(&self, _disk_path: &Path) -> Result<SystemSnapshot> {
        Ok(SystemSnapshot {
            cpu_percent: 5.0,
            memory_percent: 30.0,
            disk_percent: 40.0,
        })
    }
}

fn settings(max_restarts: u32, restart_window_secs: u64) -> SupervisorSettings {
    SupervisorSettings {
        max_restarts,
        restart_window_secs,
        check_interval_secs: 5,
        error_backoff_secs: 5,
        stop_grace_period_secs: 1,
        restart_delay_secs: 0,
        crash_backoff_secs: 0,
        ..SupervisorSettings::default()
    }
}

fn supervisor(settings: SupervisorSettings) -> Supervisor {
    Supervisor::with_metrics(settings, Arc::new(IdleHost)).unwrap()
}

/// Lets spawned units run without moving the clock meaningfully.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Registers a service that runs until asked to stop. Returns the number of
/// instances built so far.
fn register_waiter(supervisor: &Supervisor, name: &str) -> Arc<AtomicUsize> {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&builds);
    supervisor
        .register_service(name, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ServiceFn::new(|stop: StopSignal| async move {
                stop.stopped().await;
                Ok::<_, anyhow::Error>(())
            }))
        })
        .unwrap();
    builds
}

/// Registers a service whose first `failures` runs fail immediately; later
/// runs wait for a stop. Returns the number of runs so far.
fn register_flaky(supervisor: &Supervisor, name: &str, failures: usize) -> Arc<AtomicUsize> {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    supervisor
        .register_service(name, move || {
            let counter = Arc::clone(&counter);
            Ok(ServiceFn::new(move |stop: StopSignal| {
                let counter = Arc::clone(&counter);
                async move {
                    let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if run <= failures {
                        return Err(anyhow::anyhow!("connection lost on run {}", run));
                    }
                    stop.stopped().await;
                    Ok(())
                }
            }))
        })
        .unwrap();
    runs
}

/// Runs forever and has no stop capability.
struct Stubborn;

#[async_trait]
impl Service for Stubborn {
    async fn run(&self) -> Result<()> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
    let sup = supervisor(settings(5, 3600));
    let builds = register_waiter(&sup, "chat-bot");

    sup.start_service("chat-bot").unwrap();
    sup.start_service("chat-bot").unwrap();
    settle().await;

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    let status = sup.service_status("chat-bot").unwrap();
    assert_eq!(status.state, ServiceState::Running);
    assert!(status.running);
    assert_eq!(status.restart_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let sup = supervisor(settings(5, 3600));
    register_waiter(&sup, "chat-bot");

    // never started
    assert_eq!(sup.stop_service("chat-bot").await.unwrap(), StopOutcome::NotRunning);

    sup.start_service("chat-bot").unwrap();
    settle().await;
    assert_eq!(sup.stop_service("chat-bot").await.unwrap(), StopOutcome::Graceful);
    assert_eq!(sup.stop_service("chat-bot").await.unwrap(), StopOutcome::NotRunning);

    let status = sup.service_status("chat-bot").unwrap();
    assert_eq!(status.state, ServiceState::Stopped);
    assert!(!status.running);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_service_is_not_found() {
    let sup = supervisor(settings(5, 3600));

    assert!(matches!(sup.start_service("nope"), Err(Error::ServiceNotFound(_))));
    assert!(matches!(sup.stop_service("nope").await, Err(Error::ServiceNotFound(_))));
    assert!(matches!(sup.service_status("nope"), Err(Error::ServiceNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_restart_limit_over_sliding_window() {
    let sup = supervisor(settings(2, 100));
    let runs = register_flaky(&sup, "vpn-monitor", usize::MAX);

    sup.start_all().unwrap();
    settle().await;

    // first run plus two permitted restarts, third restart denied
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    let status = sup.service_status("vpn-monitor").unwrap();
    assert_eq!(status.state, ServiceState::Crashed);
    assert_eq!(status.restart_count, 2);
    assert!(!status.restart_eligible);

    tokio::time::advance(Duration::from_secs(50)).await;
    assert_eq!(sup.controller().check_services().await.unwrap(), 0);
    settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(sup.service_status("vpn-monitor").unwrap().state, ServiceState::Crashed);

    tokio::time::advance(Duration::from_secs(51)).await;
    assert!(sup.service_status("vpn-monitor").unwrap().restart_eligible);
    assert_eq!(sup.controller().check_services().await.unwrap(), 1);
    settle().await;

    // window reset: the monitor's restart and one crash restart, then denied again
    assert_eq!(runs.load(Ordering::SeqCst), 5);
    let status = sup.service_status("vpn-monitor").unwrap();
    assert_eq!(status.state, ServiceState::Crashed);
    assert_eq!(status.restart_count, 2);

    let denials = sup
        .recent_events(Some("vpn-monitor"), None)
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == ServiceEventKind::RestartDenied)
        .count();
    assert_eq!(denials, 3);
}

#[tokio::test(start_paused = true)]
async fn test_crash_is_restarted_after_backoff() {
    let mut s = settings(5, 3600);
    s.crash_backoff_secs = 5;
    let sup = supervisor(s);
    let runs = register_flaky(&sup, "minecraft", 1);

    sup.start_all().unwrap();
    settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(sup.service_status("minecraft").unwrap().state, ServiceState::Crashed);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    let status = sup.service_status("minecraft").unwrap();
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.restart_count, 1);
    assert!(status.last_restart.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_crash_of_one_service_does_not_affect_others() {
    let sup = supervisor(settings(1, 3600));
    let crashes = register_flaky(&sup, "vpn-monitor", usize::MAX);
    let builds = register_waiter(&sup, "minecraft");

    sup.start_all().unwrap();
    settle().await;

    assert_eq!(crashes.load(Ordering::SeqCst), 2);
    assert_eq!(sup.service_status("vpn-monitor").unwrap().state, ServiceState::Crashed);

    let minecraft = sup.service_status("minecraft").unwrap();
    assert_eq!(minecraft.state, ServiceState::Running);
    assert!(minecraft.running);
    assert_eq!(minecraft.restart_count, 0);
    assert_eq!(builds.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_panic_is_treated_as_crash() {
    let sup = supervisor(settings(1, 3600));
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    sup.register_service("panicky", move || {
        let counter = Arc::clone(&counter);
        Ok(ServiceFn::new(move |_stop: StopSignal| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < usize::MAX {
                    panic!("index out of bounds");
                }
                Ok::<_, anyhow::Error>(())
            }
        }))
    })
    .unwrap();

    sup.start_all().unwrap();
    settle().await;

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(sup.service_status("panicky").unwrap().state, ServiceState::Crashed);

    let crash = sup
        .recent_events(Some("panicky"), None)
        .unwrap()
        .into_iter()
        .find(|e| e.kind == ServiceEventKind::Crashed)
        .unwrap();
    assert!(crash.details.unwrap().contains("index out of bounds"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_crash_backoff_wins() {
    let mut s = settings(5, 3600);
    s.crash_backoff_secs = 5;
    let sup = supervisor(s);
    let runs = register_flaky(&sup, "vpn-monitor", usize::MAX);

    sup.start_all().unwrap();
    sup.start_monitoring().unwrap();
    settle().await;
    assert_eq!(sup.service_status("vpn-monitor").unwrap().state, ServiceState::Crashed);

    sup.stop_all().await.unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(sup.service_status("vpn-monitor").unwrap().state, ServiceState::Stopped);
    sup.stop_monitoring().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failing_factory_does_not_block_other_services() {
    let sup = supervisor(settings(5, 3600));
    sup.register_service("broken", || -> Result<Stubborn> {
        Err(Error::Other("server.jar missing".to_string()))
    })
    .unwrap();
    register_waiter(&sup, "chat-bot");

    let err = sup.start_all().unwrap_err();
    match err {
        Error::StartFailure { service, reason } => {
            assert_eq!(service, "broken");
            assert!(reason.contains("server.jar missing"));
        }
        other => panic!("unexpected error: {}", other),
    }

    let broken = sup.service_status("broken").unwrap();
    assert_eq!(broken.state, ServiceState::Registered);
    assert_eq!(broken.restart_count, 0);
    assert_eq!(sup.service_status("chat-bot").unwrap().state, ServiceState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_multiple_start_failures_are_aggregated() {
    let sup = supervisor(settings(5, 3600));
    for name in ["a", "b"] {
        sup.register_service(name, || -> Result<Stubborn> {
            Err(Error::Other("nope".to_string()))
        })
        .unwrap();
    }

    let err = sup.start_all().unwrap_err();
    assert!(matches!(err, Error::Other(msg) if msg.contains("a:") && msg.contains("b:")));
}

#[tokio::test(start_paused = true)]
async fn test_stop_times_out_and_service_can_start_again() {
    let sup = supervisor(settings(5, 3600));
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&builds);
    sup.register_service("stubborn", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Stubborn)
    })
    .unwrap();

    sup.start_service("stubborn").unwrap();
    settle().await;

    assert_eq!(sup.stop_service("stubborn").await.unwrap(), StopOutcome::TimedOut);
    let status = sup.service_status("stubborn").unwrap();
    assert_eq!(status.state, ServiceState::Stopped);
    assert!(!status.running);

    let kinds: Vec<_> = sup
        .recent_events(Some("stubborn"), Some(2))
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![ServiceEventKind::Stopped, ServiceEventKind::StopTimedOut]);

    sup.start_service("stubborn").unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(sup.service_status("stubborn").unwrap().state, ServiceState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_restart_respects_limit() {
    let sup = supervisor(settings(1, 3600));
    let builds = register_waiter(&sup, "chat-bot");

    sup.start_all().unwrap();
    settle().await;

    sup.restart_service("chat-bot").await.unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(sup.service_status("chat-bot").unwrap().restart_count, 1);

    let err = sup.restart_service("chat-bot").await.unwrap_err();
    assert!(matches!(err, Error::RestartLimitExceeded { restart_count: 1, .. }));

    // denial leaves the running instance alone
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    let status = sup.service_status("chat-bot").unwrap();
    assert_eq!(status.state, ServiceState::Running);
    assert!(status.running);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_recovers_service_once_window_elapses() {
    let sup = supervisor(settings(1, 10));
    let runs = register_flaky(&sup, "vpn-monitor", 2);

    sup.start_all().unwrap();
    settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(sup.service_status("vpn-monitor").unwrap().state, ServiceState::Crashed);

    sup.start_monitoring().unwrap();
    assert!(sup.is_monitoring());
    tokio::time::sleep(Duration::from_secs(16)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 3);
    let status = sup.service_status("vpn-monitor").unwrap();
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.restart_count, 1);

    sup.stop_monitoring().unwrap();
    assert!(!sup.is_monitoring());
}

#[tokio::test(start_paused = true)]
async fn test_restart_all_restarts_every_service() {
    let sup = supervisor(settings(5, 3600));
    let a = register_waiter(&sup, "chat-bot");
    let b = register_waiter(&sup, "vpn-monitor");

    sup.start_all().unwrap();
    settle().await;
    sup.restart_all().await.unwrap();

    assert_eq!(a.load(Ordering::SeqCst), 2);
    assert_eq!(b.load(Ordering::SeqCst), 2);
    for status in sup.all_statuses().unwrap().values() {
        assert_eq!(status.state, ServiceState::Running);
        assert_eq!(status.restart_count, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_register_after_start_is_rejected() {
    let sup = supervisor(settings(5, 3600));
    register_waiter(&sup, "chat-bot");
    sup.start_all().unwrap();

    let err = sup
        .register_service("late", || Ok(Stubborn))
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyStarted));
    assert_eq!(sup.service_names().unwrap(), vec!["chat-bot".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_registration_replaces_previous() {
    let sup = supervisor(settings(5, 3600));
    let first = register_waiter(&sup, "chat-bot");
    let second = register_waiter(&sup, "chat-bot");

    sup.start_all().unwrap();

    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(sup.service_names().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_until_stops_everything_on_shutdown() {
    let sup = supervisor(settings(5, 3600));
    register_waiter(&sup, "chat-bot");
    register_waiter(&sup, "minecraft");

    sup.run_until(tokio::time::sleep(Duration::from_secs(120)))
        .await
        .unwrap();

    assert!(!sup.is_monitoring());
    for status in sup.all_statuses().unwrap().values() {
        assert_eq!(status.state, ServiceState::Stopped);
        assert!(!status.running);
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_all_during_restart_delay_keeps_service_stopped() {
    let mut s = settings(5, 3600);
    s.restart_delay_secs = 2;
    let sup = Arc::new(supervisor(s));
    let builds = register_waiter(&sup, "minecraft");

    sup.start_all().unwrap();
    settle().await;

    let restarting = {
        let sup = Arc::clone(&sup);
        tokio::spawn(async move { sup.restart_service("minecraft").await })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(sup.service_status("minecraft").unwrap().state, ServiceState::Stopped);

    sup.stop_all().await.unwrap();
    restarting.await.unwrap().unwrap();
    settle().await;

    let status = sup.service_status("minecraft").unwrap();
    assert_eq!(status.state, ServiceState::Stopped);
    assert!(!status.running);
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(
        !sup.recent_events(Some("minecraft"), None)
            .unwrap()
            .iter()
            .any(|e| e.kind == ServiceEventKind::Restarted)
    );
}

#[tokio::test(start_paused = true)]
async fn test_restart_without_interference_still_starts() {
    let mut s = settings(5, 3600);
    s.restart_delay_secs = 2;
    let sup = supervisor(s);
    let builds = register_waiter(&sup, "minecraft");

    sup.start_all().unwrap();
    settle().await;
    sup.restart_service("minecraft").await.unwrap();

    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(sup.service_status("minecraft").unwrap().state, ServiceState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_factory_is_start_failure_and_store_stays_usable() {
    let sup = supervisor(settings(5, 3600));
    sup.register_service("broken", || -> Result<Stubborn> {
        panic!("server.properties unreadable");
    })
    .unwrap();
    register_waiter(&sup, "vpn-monitor");

    let err = sup.start_all().unwrap_err();
    match err {
        Error::StartFailure { service, reason } => {
            assert_eq!(service, "broken");
            assert!(reason.contains("server.properties unreadable"));
        }
        other => panic!("unexpected error: {}", other),
    }

    assert_eq!(sup.service_status("broken").unwrap().state, ServiceState::Registered);
    let vpn = sup.service_status("vpn-monitor").unwrap();
    assert_eq!(vpn.state, ServiceState::Running);
    assert!(vpn.running);

    let failed = sup
        .recent_events(Some("broken"), None)
        .unwrap()
        .into_iter()
        .find(|e| e.kind == ServiceEventKind::StartFailed)
        .unwrap();
    assert!(failed.details.unwrap().contains("factory panicked"));

    sup.stop_all().await.unwrap();
    assert_eq!(sup.service_status("vpn-monitor").unwrap().state, ServiceState::Stopped);
    assert!(sup.controller().check_services().await.is_ok());
}

#[test]
fn test_invalid_settings_are_rejected() {
    let zero_health_interval = SupervisorSettings {
        health_report_interval_secs: 0,
        ..SupervisorSettings::default()
    };
    assert!(matches!(
        Supervisor::with_metrics(zero_health_interval, Arc::new(IdleHost)),
        Err(Error::ConfigInvalid(msg)) if msg.contains("healthReportIntervalSecs")
    ));

    let zero_check_interval = SupervisorSettings {
        check_interval_secs: 0,
        ..SupervisorSettings::default()
    };
    assert!(matches!(
        Supervisor::new(zero_check_interval),
        Err(Error::ConfigInvalid(msg)) if msg.contains("checkIntervalSecs")
    ));
}
