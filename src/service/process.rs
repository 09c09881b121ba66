// src/service/process.rs
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::service::Service;
use async_process::{ChildStdin, Command, Stdio};
use async_trait::async_trait;
use futures_lite::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use futures_lite::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify, watch};

/// A supervised child process, e.g. a Java game server.
///
/// `run` spawns the process and waits for it to exit. `stop` writes the
/// configured stop command (such as `stop` for a Minecraft server) to the
/// child's stdin, waits up to the configured kill timeout, and kills the
/// child if it is still alive. Without a stop command the child is killed
/// right away.
///
/// Each instance runs its process at most once; the supervisor builds a new
/// instance for every start.
///
/// # Examples
///
/// ```no_run
/// use craft_supervisor::config::ServiceConfig;
/// use craft_supervisor::service::{ProcessService, ServiceDescriptor};
/// use std::collections::HashMap;
///
/// let config = ServiceConfig {
///     command: "java".to_string(),
///     args: vec!["-Xmx2G".into(), "-jar".into(), "server.jar".into(), "nogui".into()],
///     env: HashMap::new(),
///     working_dir: Some("server".into()),
///     stop_command: Some("stop".to_string()),
///     kill_timeout_secs: 30,
/// };
///
/// let descriptor = ServiceDescriptor::new("minecraft", move || {
///     Ok(ProcessService::new("minecraft", config.clone()))
/// });
/// ```
pub struct ProcessService {
    /// Service name, used in log fields
    name: String,
    /// Launch configuration
    config: ServiceConfig,
    /// Child stdin, present while the child runs
    stdin: Mutex<Option<ChildStdin>>,
    /// Set once the child has been spawned
    started: AtomicBool,
    /// Set once a stop was requested
    stopping: AtomicBool,
    /// Wakes `run` to kill the child
    kill: Notify,
    /// Flipped to `true` when the child has exited
    exited: watch::Sender<bool>,
}

impl ProcessService {
    /// Create a new process service from configuration
    pub fn new(name: impl Into<String>, config: ServiceConfig) -> Self {
        let (exited, _) = watch::channel(false);
        Self {
            name: name.into(),
            config,
            stdin: Mutex::new(None),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            kill: Notify::new(),
            exited,
        }
    }

    /// Get the service name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.command);
        command.args(&self.config.args);

        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        command
    }

    async fn send_stop_command(&self, line: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(Error::Process(
            "stdin is not available for the stop command".to_string(),
        ))?;

        stdin
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| Error::Process(format!("Failed to write stop command: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Process(format!("Failed to flush stdin: {}", e)))?;

        Ok(())
    }
}

/// Forwards a child's output stream to `tracing`, one event per line.
fn forward_output<R>(service: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) if stream == "stderr" => {
                    tracing::warn!(service = %service, stream, "{}", line)
                }
                Ok(line) => tracing::debug!(service = %service, stream, "{}", line),
                Err(e) => {
                    tracing::debug!(service = %service, stream, error = %e, "Output stream closed");
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl Service for ProcessService {
    #[tracing::instrument(skip(self), fields(service = %self.name))]
    async fn run(&self) -> Result<()> {
        // Claim the instance before looking at `stopping`; `stop` does the
        // reverse, so at least one side sees the other.
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Process(
                "process instance already ran; build a new instance".to_string(),
            ));
        }
        if self.stopping.load(Ordering::SeqCst) {
            tracing::debug!("Stop requested before launch, not spawning");
            self.exited.send_replace(true);
            return Ok(());
        }

        tracing::info!(command = %self.config.command, "Spawning process");
        let mut child = self
            .command()
            .spawn()
            .map_err(|e| Error::Process(format!("Failed to start process: {}", e)))?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(self.name.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(self.name.clone(), "stderr", stderr);
        }
        *self.stdin.lock().await = child.stdin.take();

        let exited = tokio::select! {
            status = child.status() => Some(status),
            _ = self.kill.notified() => None,
        };
        let status = match exited {
            Some(status) => status,
            None => {
                tracing::warn!("Killing process");
                if let Err(e) = child.kill() {
                    tracing::error!(error = %e, "Failed to kill process");
                }
                child.status().await
            }
        };

        self.stdin.lock().await.take();
        self.exited.send_replace(true);

        let status =
            status.map_err(|e| Error::Process(format!("Failed to wait for process: {}", e)))?;
        tracing::info!(%status, "Process exited");

        if self.stopping.load(Ordering::SeqCst) || status.success() {
            Ok(())
        } else {
            Err(Error::Process(format!("process exited with {}", status)))
        }
    }

    #[tracing::instrument(skip(self), fields(service = %self.name))]
    async fn stop(&self) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        if !self.started.load(Ordering::SeqCst) || *self.exited.borrow() {
            return Ok(());
        }

        let Some(line) = self.config.stop_command.as_deref() else {
            self.kill.notify_one();
            return Ok(());
        };

        if let Err(e) = self.send_stop_command(line).await {
            tracing::warn!(error = %e, "Stop command failed, killing instead");
            self.kill.notify_one();
            return Err(e);
        }
        tracing::info!(command = line, "Sent stop command");

        let mut exited = self.exited.subscribe();
        let graceful = tokio::time::timeout(
            self.config.kill_timeout(),
            exited.wait_for(|done| *done),
        )
        .await
        .is_ok();

        if !graceful {
            tracing::warn!(
                timeout_secs = self.config.kill_timeout_secs,
                "Process ignored stop command"
            );
            self.kill.notify_one();
        }

        Ok(())
    }
}
