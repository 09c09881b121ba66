//! Shutdown signal handling.
//!
//! [`wait_for_shutdown_signal`] completes when the process receives a
//! termination request and reports which one arrived.
//!
//! ## Unix
//! - **SIGINT** (Ctrl-C in a terminal)
//! - **SIGTERM** (systemd stop, `kill`)
//! - **SIGQUIT**
//!
//! [`tokio::signal::ctrl_c`] is awaited alongside them as a fallback.
//!
//! ## Windows
//! Only Ctrl-C / Ctrl-Break via [`tokio::signal::ctrl_c`].

use std::fmt;

/// The termination request that ended [`wait_for_shutdown_signal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    CtrlC,
    Interrupt,
    Terminate,
    Quit,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownSignal::CtrlC => "ctrl-c",
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Quit => "SIGQUIT",
        };
        f.write_str(s)
    }
}

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let received = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            ShutdownSignal::CtrlC
        }
        _ = sigint.recv() => ShutdownSignal::Interrupt,
        _ = sigterm.recv() => ShutdownSignal::Terminate,
        _ = sigquit.recv() => ShutdownSignal::Quit,
    };
    Ok(received)
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(ShutdownSignal::CtrlC)
}
