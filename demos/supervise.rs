use craft_supervisor::Supervisor;
use craft_supervisor::error::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    // Console output filtered by RUST_LOG, plus a daily JSON log file so the
    // crash history survives a terminal being closed.
    let file_appender = tracing_appender::rolling::daily("logs", "supervisor.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().json().with_writer(file_writer))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/config.json".to_string());
    tracing::info!(config = %config_path, "Starting supervise example");

    let supervisor = Supervisor::from_config_file(&config_path)?;
    println!("Supervising: {}", supervisor.service_names()?.join(", "));
    println!("Press Ctrl-C to stop all services");

    supervisor.run_until_shutdown().await?;

    let statuses = supervisor.all_statuses()?;
    println!("\nFinal status:");
    for (name, status) in &statuses {
        println!(
            "- {}: {} ({} restarts in window)",
            name, status.state, status.restart_count
        );
    }

    Ok(())
}
