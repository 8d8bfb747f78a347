//! Install and build phases for registry servers.
//!
//! Servers arrive as source checkouts; before they can start they usually
//! need an install step (`npm install`, `pip install -e .`) and sometimes
//! a build step. The hub runs these in the server's base directory,
//! mirrors their output to the console, and records success in the
//! registry's `installed`/`built` flags.
use crate::error::{Error, Result};
use crate::registry::{RuntimeKind, ServerDescriptor};
use crate::server::process::{mirror_line, spawn_hint};
use std::fmt;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Setup phase to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupPhase {
    /// Dependency installation.
    Install,
    /// Build/compile step.
    Build,
}

impl fmt::Display for SetupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupPhase::Install => write!(f, "install"),
            SetupPhase::Build => write!(f, "build"),
        }
    }
}

/// Runs one setup phase for a server.
///
/// The command comes from the descriptor's command set; a missing install
/// command falls back to a default derived from the package-manager hint
/// and runtime, a missing build command is a no-op. Command lines are
/// split on whitespace (shell quoting is not supported).
///
/// # Errors
///
/// Returns [`Error::Spawn`] when the command cannot be spawned and
/// [`Error::Setup`] when it exits unsuccessfully.
pub async fn run_phase(name: &str, descriptor: &ServerDescriptor, phase: SetupPhase) -> Result<()> {
    let Some(command_line) = phase_command(descriptor, phase) else {
        tracing::debug!(server = %name, %phase, "No step declared, skipping");
        return Ok(());
    };

    let tokens: Vec<String> = command_line
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if tokens.is_empty() {
        return Err(Error::RegistryInvalid(format!(
            "Server '{}' has a blank {} command",
            name, phase
        )));
    }

    tracing::info!(server = %name, %phase, command = %command_line, "Running setup step");
    let mut command = Command::new(&tokens[0]);
    command
        .args(&tokens[1..])
        .current_dir(&descriptor.path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| {
        let hint = spawn_hint(&e, descriptor.runtime);
        Error::Spawn {
            server: name.to_string(),
            hint,
            source: e,
        }
    })?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(mirror_stream(name.to_string(), "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(mirror_stream(name.to_string(), "stderr", stderr));
    }

    let status = child
        .wait()
        .await
        .map_err(|e| Error::Other(format!("Failed to wait for {} step: {}", phase, e)))?;

    if status.success() {
        tracing::info!(server = %name, %phase, "Setup step finished");
        Ok(())
    } else {
        Err(Error::Setup {
            server: name.to_string(),
            phase: phase.to_string(),
            code: status.code(),
        })
    }
}

fn phase_command(descriptor: &ServerDescriptor, phase: SetupPhase) -> Option<String> {
    match phase {
        SetupPhase::Install => descriptor
            .commands
            .install
            .clone()
            .or_else(|| default_install(descriptor)),
        // No sensible default exists for builds; absence means nothing to do.
        SetupPhase::Build => descriptor.commands.build.clone(),
    }
}

fn default_install(descriptor: &ServerDescriptor) -> Option<String> {
    let command = match (descriptor.package_manager.as_deref(), descriptor.runtime) {
        (Some("pnpm"), _) => "pnpm install".to_string(),
        (Some("npm"), _) | (None, RuntimeKind::Node) => "npm install".to_string(),
        (Some("pip"), _) | (None, RuntimeKind::Python) => "pip install -e .".to_string(),
        (Some("uv"), _) => "uv pip install -e .".to_string(),
        (Some(other), _) => format!("{} install", other),
    };
    Some(command)
}

async fn mirror_stream<R>(name: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        mirror_line(&name, stream, &line);
    }
}
