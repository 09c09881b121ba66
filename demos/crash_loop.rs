use craft_supervisor::Supervisor;
use craft_supervisor::config::SupervisorSettings;
use craft_supervisor::error::Result;
use craft_supervisor::service::{ServiceFn, StopSignal};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    // Tight limits so the restart window is visible within a few seconds
    let settings = SupervisorSettings {
        max_restarts: 3,
        restart_window_secs: 20,
        check_interval_secs: 5,
        crash_backoff_secs: 1,
        ..SupervisorSettings::default()
    };
    let supervisor = Supervisor::new(settings)?;

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    supervisor.register_service("vpn-monitor", move || {
        let counter = Arc::clone(&counter);
        Ok(ServiceFn::new(move |stop: StopSignal| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {
                        Err(anyhow::anyhow!("tunnel dropped (attempt {})", attempt))
                    }
                    _ = stop.stopped() => Ok(()),
                }
            }
        }))
    })?;

    supervisor.register_service("chat-bot", || {
        Ok(ServiceFn::new(|stop: StopSignal| async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3));
            loop {
                tokio::select! {
                    _ = ticker.tick() => tracing::info!("chat-bot heartbeat"),
                    _ = stop.stopped() => return Ok::<_, anyhow::Error>(()),
                }
            }
        }))
    })?;

    supervisor.start_all()?;
    supervisor.start_monitoring()?;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let report = supervisor.health_check()?;
        println!("overall: {}", report.overall_status);
        for (name, status) in &report.services {
            println!(
                "  {}: {} restarts={} eligible={}",
                name, status.state, status.restart_count, status.restart_eligible
            );
        }
    }

    println!("\nRecent events:");
    for event in supervisor.recent_events(None, Some(10))? {
        println!(
            "  {} {} {:?} {}",
            event.timestamp.format("%H:%M:%S"),
            event.service,
            event.kind,
            event.details.unwrap_or_default()
        );
    }

    supervisor.shutdown().await?;
    println!("vpn-monitor ran {} times", attempts.load(Ordering::SeqCst));
    Ok(())
}
