//! Managed server subprocesses.
//!
//! One [`ManagedProcess`] wraps one spawned child: its process record, its
//! output pumps (per-server log file plus console mirroring through
//! `tracing`), and an exit-watch task that owns the [`Child`] and
//! publishes how it ended. Stopping is graceful-then-forced: SIGTERM,
//! a bounded wait, then a hard kill.
use crate::error::{Error, Result};
use crate::launch::LaunchDescriptor;
use crate::registry::RuntimeKind;
use crate::server::records::{ProcessRecord, TransportKind};
use chrono::Utc;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, watch};

/// Bounded wait after a hard kill. SIGKILL cannot be ignored, so hitting
/// this means something is deeply wrong (e.g. an unkillable D-state).
const KILL_WAIT: Duration = Duration::from_secs(10);

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal (unix only).
    pub signal: Option<i32>,
}

impl ProcessExit {
    fn unknown() -> Self {
        ProcessExit {
            code: None,
            signal: None,
        }
    }

    /// Short human description, e.g. `exit code 0` or `signal 9`.
    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exit code {}", code),
            (None, Some(signal)) => format!("signal {}", signal),
            (None, None) => "unknown status".to_string(),
        }
    }
}

/// Outcome of a stop operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    /// True when the grace period elapsed and the process had to be
    /// hard-killed.
    pub forced: bool,
}

/// Cloneable handle on one supervised subprocess.
///
/// The child itself is owned by a background watch task; handles interact
/// with it through channels, so any number of clones can observe the exit
/// or request termination.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    record: ProcessRecord,
    kill_tx: mpsc::Sender<()>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    stop_requested: Arc<AtomicBool>,
}

impl ManagedProcess {
    /// Spawns the process described by `launch` and wires up its output
    /// pumps and exit watcher.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] with an actionable hint when the OS
    /// refuses the spawn, or [`Error::Other`] when the log file cannot be
    /// opened.
    pub async fn spawn(
        name: &str,
        runtime: RuntimeKind,
        launch: &LaunchDescriptor,
        transport: TransportKind,
        port: u16,
        log_path: &Path,
    ) -> Result<ManagedProcess> {
        let log_file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await
            .map_err(|e| {
                Error::Other(format!(
                    "Failed to open log file {}: {}",
                    log_path.display(),
                    e
                ))
            })?;
        let log = Arc::new(Mutex::new(log_file));

        let mut command = Command::new(&launch.command);
        command
            .args(&launch.args)
            .envs(&launch.env)
            .current_dir(&launch.cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            let hint = spawn_hint(&e, runtime);
            Error::Spawn {
                server: name.to_string(),
                hint,
                source: e,
            }
        })?;
        let pid = child.id().unwrap_or(0);

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(
                name.to_string(),
                "stdout",
                stdout,
                Arc::clone(&log),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(
                name.to_string(),
                "stderr",
                stderr,
                Arc::clone(&log),
            ));
        }

        let (kill_tx, kill_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(watch_exit(name.to_string(), child, kill_rx, exit_tx, log));

        let record = ProcessRecord {
            name: name.to_string(),
            pid,
            port,
            transport,
            started_at: Utc::now(),
            command: launch.command.clone(),
            args: launch.args.clone(),
            log_path: log_path.to_path_buf(),
        };
        tracing::info!(server = %name, pid, port, "Spawned server process");

        Ok(ManagedProcess {
            record,
            kill_tx,
            exit_rx,
            stop_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The process record for this handle.
    pub fn record(&self) -> &ProcessRecord {
        &self.record
    }

    /// True until the exit watcher has published the process's end.
    pub fn is_live(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// The published exit, once there is one.
    pub fn last_exit(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    /// True when a stop was requested for this process. The exit handler
    /// uses this to tell a stop from a crash.
    pub fn stop_was_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Requests graceful termination.
    ///
    /// SIGTERM on unix. Windows has no TERM equivalent, so graceful
    /// degrades to a hard kill there.
    pub fn request_graceful(&self) {
        #[cfg(unix)]
        {
            let pid = self.record.pid as i32;
            // pid 0 would signal our own process group.
            if pid <= 0 {
                let _ = self.kill_tx.try_send(());
                return;
            }
            let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
            if rc != 0 {
                tracing::debug!(
                    server = %self.record.name,
                    pid,
                    "SIGTERM delivery failed, process may already be gone"
                );
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.kill_tx.try_send(());
        }
    }

    /// Requests a hard kill.
    pub fn request_kill(&self) {
        let _ = self.kill_tx.try_send(());
    }

    /// Waits for the exit publication, up to `deadline`.
    pub async fn wait_exit(&self, deadline: Duration) -> Option<ProcessExit> {
        let mut rx = self.exit_rx.clone();
        tokio::time::timeout(deadline, async move {
            loop {
                let current = *rx.borrow_and_update();
                if let Some(exit) = current {
                    return exit;
                }
                if rx.changed().await.is_err() {
                    // Watcher gone without publishing; nothing more to learn.
                    return ProcessExit::unknown();
                }
            }
        })
        .await
        .ok()
    }

    /// Waits for the exit publication with no deadline.
    pub async fn exited(&self) -> ProcessExit {
        let mut rx = self.exit_rx.clone();
        loop {
            let current = *rx.borrow_and_update();
            if let Some(exit) = current {
                return exit;
            }
            if rx.changed().await.is_err() {
                return ProcessExit::unknown();
            }
        }
    }

    /// Graceful-then-forced stop.
    ///
    /// Sends the graceful request, waits up to `grace`, then hard-kills
    /// and waits again. The outcome reports whether escalation happened.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when the process survives even the hard
    /// kill's bounded wait.
    pub async fn stop(&self, grace: Duration) -> Result<StopOutcome> {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.request_graceful();

        if self.wait_exit(grace).await.is_some() {
            tracing::info!(server = %self.record.name, "Server stopped gracefully");
            return Ok(StopOutcome { forced: false });
        }

        tracing::warn!(
            server = %self.record.name,
            grace_secs = grace.as_secs_f64(),
            "Graceful shutdown timed out, force-killing"
        );
        self.request_kill();

        match self.wait_exit(KILL_WAIT).await {
            Some(_) => Ok(StopOutcome { forced: true }),
            None => Err(Error::Timeout(format!(
                "Server '{}' did not exit after kill",
                self.record.name
            ))),
        }
    }
}

/// Maps a spawn error to an actionable hint.
///
/// Port-in-use failures usually surface later, in the child's own log,
/// because the child (not the hub) binds the socket; the `AddrInUse` arm
/// covers runtimes that report it at spawn anyway.
pub(crate) fn spawn_hint(error: &std::io::Error, runtime: RuntimeKind) -> String {
    match error.kind() {
        std::io::ErrorKind::NotFound => match runtime {
            RuntimeKind::Node => {
                "executable not found; is node installed and the install step done?".to_string()
            }
            RuntimeKind::Python => {
                "interpreter not found; is python installed and the virtualenv created?".to_string()
            }
        },
        std::io::ErrorKind::PermissionDenied => {
            "executable is not permitted to run (check file permissions)".to_string()
        }
        std::io::ErrorKind::AddrInUse => {
            "requested port is already bound by another process".to_string()
        }
        kind => format!("OS refused to spawn the process ({})", kind),
    }
}

/// Reads one output stream line by line, appending to the log file and
/// mirroring to the console.
async fn pump_lines<R>(
    name: String,
    stream: &'static str,
    reader: R,
    log: Arc<Mutex<tokio::fs::File>>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                write_log_line(&log, stream, &line).await;
                mirror_line(&name, stream, &line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %name, stream, error = %e, "Output stream closed");
                break;
            }
        }
    }
}

async fn write_log_line(log: &Mutex<tokio::fs::File>, stream: &str, line: &str) {
    let stamped = format!(
        "[{}] [{}] {}\n",
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        stream,
        line
    );
    let mut file = log.lock().await;
    if let Err(e) = file.write_all(stamped.as_bytes()).await {
        tracing::trace!(error = %e, "Failed to append to server log");
    }
}

pub(crate) fn mirror_line(name: &str, stream: &str, line: &str) {
    if stream == "stdout" {
        tracing::info!(server = %name, "{}", line);
        return;
    }
    match classify_stderr(line) {
        StderrSeverity::Info => tracing::info!(server = %name, "{}", line),
        StderrSeverity::Warning => tracing::warn!(server = %name, "{}", line),
        StderrSeverity::Error => tracing::error!(server = %name, "{}", line),
    }
}

/// Console level for one stderr line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StderrSeverity {
    Info,
    Warning,
    Error,
}

/// Classifies a stderr line for console mirroring.
///
/// Plenty of well-behaved servers write their startup banner to stderr;
/// flagging every such line as an error would drown real problems. Lines
/// with explicit error markers stay errors, banner-ish lines drop to
/// info, everything else is a warning.
pub(crate) fn classify_stderr(line: &str) -> StderrSeverity {
    const ERROR_MARKERS: &[&str] = &[
        "error",
        "fatal",
        "exception",
        "panic",
        "traceback",
        "unhandled",
        "eaddrinuse",
    ];
    const BANNER_MARKERS: &[&str] = &[
        "listening",
        "running on",
        "started",
        "ready",
        "serving",
        "compiled",
        "watching",
    ];

    let lower = line.to_lowercase();
    if ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
        return StderrSeverity::Error;
    }
    if BANNER_MARKERS.iter().any(|m| lower.contains(m)) {
        return StderrSeverity::Info;
    }
    StderrSeverity::Warning
}

/// Owns the child: waits for it to end (or for a force-kill request),
/// writes the final log line, and publishes the exit.
async fn watch_exit(
    name: String,
    mut child: Child,
    mut kill_rx: mpsc::Receiver<()>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    log: Arc<Mutex<tokio::fs::File>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = async {
            match kill_rx.recv().await {
                Some(()) => {}
                // All handles dropped without a kill request; park so the
                // other arm finishes the wait.
                None => std::future::pending::<()>().await,
            }
        } => {
            if let Err(e) = child.start_kill() {
                tracing::warn!(server = %name, error = %e, "Force kill failed");
            }
            child.wait().await
        }
    };

    let exit = match status {
        Ok(status) => ProcessExit {
            code: status.code(),
            signal: unix_signal(&status),
        },
        Err(e) => {
            tracing::warn!(server = %name, error = %e, "Failed to await server process");
            ProcessExit::unknown()
        }
    };

    write_log_line(&log, "hub", &format!("process exited ({})", exit.describe())).await;
    if exit.code == Some(0) {
        tracing::info!(server = %name, "Server process exited ({})", exit.describe());
    } else {
        tracing::warn!(server = %name, "Server process exited ({})", exit.describe());
    }

    let _ = exit_tx.send(Some(exit));
}

#[cfg(unix)]
fn unix_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn unix_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_classification() {
        assert_eq!(
            classify_stderr("Server running on http://127.0.0.1:3003"),
            StderrSeverity::Info
        );
        assert_eq!(
            classify_stderr("INFO: application startup complete, listening"),
            StderrSeverity::Info
        );
        assert_eq!(
            classify_stderr("Error: listen EADDRINUSE: address already in use"),
            StderrSeverity::Error
        );
        assert_eq!(
            classify_stderr("Traceback (most recent call last):"),
            StderrSeverity::Error
        );
        assert_eq!(
            classify_stderr("deprecation notice: flag will be removed"),
            StderrSeverity::Warning
        );
    }

    #[test]
    fn test_spawn_hint_categories() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        assert!(spawn_hint(&missing, RuntimeKind::Node).contains("node"));
        assert!(spawn_hint(&missing, RuntimeKind::Python).contains("virtualenv"));

        let bound = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        assert!(spawn_hint(&bound, RuntimeKind::Node).contains("already bound"));
    }

    #[test]
    fn test_exit_description() {
        assert_eq!(
            ProcessExit {
                code: Some(3),
                signal: None
            }
            .describe(),
            "exit code 3"
        );
        assert_eq!(
            ProcessExit {
                code: None,
                signal: Some(9)
            }
            .describe(),
            "signal 9"
        );
    }
}
