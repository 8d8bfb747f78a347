//! Launch descriptor generation for MCP Hub.
//!
//! This module derives *how to launch* a server from its registry
//! descriptor: the executable, argument vector, working directory, and
//! environment. Generation is a pure function of the descriptor, the
//! resolved secrets, the requested options, and the target platform, so
//! the same inputs always produce the same descriptor (the only
//! filesystem access is an existence check for a python virtualenv).
//!
//! Three runtime shapes are supported:
//!
//! * plain node: the start script path is resolved to an absolute path
//!   under the server's base directory,
//! * python: the per-server `.venv` interpreter is preferred when present,
//!   with `-m package.module` execution preserved,
//! * node monorepo: the script path stays relative and the working
//!   directory is pinned to the base path so hoisted `node_modules`
//!   resolution works.
//!
//! # Examples
//!
//! ```
//! use mcp_hub::launch::{generate, LaunchOptions, Platform};
//! use mcp_hub::registry::{CommandSet, RuntimeKind, ServerDescriptor, TransportKind};
//! use std::collections::HashMap;
//!
//! let descriptor = ServerDescriptor {
//!     runtime: RuntimeKind::Node,
//!     path: "/srv/demo".into(),
//!     commands: CommandSet {
//!         start: Some("node dist/index.js".to_string()),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//!
//! let options = LaunchOptions {
//!     port: 3000,
//!     transport: TransportKind::Http,
//!     requested_flags: Vec::new(),
//! };
//! let launch = generate("demo", &descriptor, &HashMap::new(), &options, Platform::Linux).unwrap();
//!
//! assert_eq!(launch.command, "node");
//! assert_eq!(launch.args, vec!["/srv/demo/dist/index.js".to_string()]);
//! assert_eq!(launch.env["PORT"], "3000");
//! ```
pub mod desktop;

use crate::error::{Error, Result};
use crate::registry::{RuntimeKind, ServerDescriptor, TransportKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Conventional absolute node path on Windows. Launcher-spawned processes
/// cannot rely on `PATH`, so a bare `node` executable is rewritten to this.
const WINDOWS_NODE_PATH: &str = r"C:\Program Files\nodejs\node.exe";

/// Platform a launch descriptor targets.
///
/// Passed explicitly (rather than sniffed inside the generator) so
/// platform-specific behavior is testable from any host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Linux and other unix-likes that are not macOS.
    Linux,
    /// macOS.
    MacOs,
    /// Windows.
    Windows,
}

impl Platform {
    /// The platform this binary was compiled for.
    pub fn host() -> Platform {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    fn is_windows(self) -> bool {
        self == Platform::Windows
    }
}

/// Options for one launch.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Port the server must bind; always injected as the `PORT`
    /// environment variable.
    pub port: u16,
    /// Transport to start, selecting the start command variant.
    pub transport: TransportKind,
    /// Optional boolean flags the caller asked for. Only flags the
    /// descriptor declares in `optionalArgs` are actually appended.
    pub requested_flags: Vec<String>,
}

/// Everything needed to spawn a server process.
///
/// `env` is ordered so repeated generation (and any serialization of it)
/// is byte-identical for identical inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchDescriptor {
    /// Executable to run.
    pub command: String,
    /// Argument vector, already including secret flags and permitted
    /// optional flags.
    pub args: Vec<String>,
    /// Working directory: the server's absolute base path.
    pub cwd: PathBuf,
    /// Environment overlay: every resolved secret plus `PORT`.
    pub env: BTreeMap<String, String>,
}

/// Derives the launch descriptor for one server.
///
/// # Errors
///
/// Returns [`Error::Launch`] when the descriptor has no start command for
/// the requested transport or the start command is blank.
pub fn generate(
    name: &str,
    descriptor: &ServerDescriptor,
    secrets: &HashMap<String, String>,
    options: &LaunchOptions,
    platform: Platform,
) -> Result<LaunchDescriptor> {
    let start = descriptor.commands.start_for(options.transport).ok_or_else(|| {
        Error::Launch(format!(
            "Server '{}' has no start command for {} transport",
            name, options.transport
        ))
    })?;

    let tokens = split_command(start);
    if tokens.is_empty() {
        return Err(Error::Launch(format!(
            "Server '{}' start command is blank",
            name
        )));
    }

    let base = &descriptor.path;
    let (command, mut args) = match descriptor.runtime {
        RuntimeKind::Node => node_invocation(&tokens, base, descriptor.monorepo, platform),
        RuntimeKind::Python => python_invocation(&tokens, base, platform),
    };

    // Declarative secret -> flag table: append `<flag> <value>` for every
    // mapped secret that resolved. BTreeMap iteration keeps the order
    // stable.
    for (secret, flag) in &descriptor.secret_flags {
        if let Some(value) = secrets.get(secret) {
            args.push(flag.clone());
            args.push(value.clone());
        }
    }

    // Requested optional flags are appended only when the descriptor
    // permits them; unsupported requests are silent no-ops.
    for flag in &options.requested_flags {
        if descriptor.optional_args.iter().any(|a| a == flag) {
            args.push(flag.clone());
        }
    }

    let mut env: BTreeMap<String, String> =
        secrets.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    env.insert("PORT".to_string(), options.port.to_string());

    Ok(LaunchDescriptor {
        command,
        args,
        cwd: base.clone(),
        env,
    })
}

/// Splits a start command on whitespace. Shell quoting is not supported;
/// registry commands are expected to be simple token lists.
fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

fn node_invocation(
    tokens: &[String],
    base: &Path,
    monorepo: bool,
    platform: Platform,
) -> (String, Vec<String>) {
    let command = node_executable(&tokens[0], platform);
    let mut args: Vec<String> = tokens[1..].to_vec();

    // Monorepo servers keep the script path relative and rely on cwd;
    // everything else gets an absolute script path.
    if !monorepo {
        if let Some(first) = args.first_mut() {
            if is_relative_path_token(first) {
                *first = join_normalized(base, first, platform);
            }
        }
    }

    (command, args)
}

fn python_invocation(tokens: &[String], base: &Path, platform: Platform) -> (String, Vec<String>) {
    let venv = venv_interpreter(base, platform);
    let command = if venv.exists() {
        normalize_separators(&venv.to_string_lossy(), platform)
    } else {
        // No virtualenv yet; fall back to the interpreter named in the
        // start command and let PATH resolve it.
        tokens[0].clone()
    };

    let mut args: Vec<String> = tokens[1..].to_vec();
    // `-m package.module` execution is preserved verbatim; plain script
    // invocations get the same path resolution as node.
    if !args.iter().any(|a| a == "-m") {
        if let Some(first) = args.first_mut() {
            if is_relative_path_token(first) {
                *first = join_normalized(base, first, platform);
            }
        }
    }

    (command, args)
}

/// Path of the per-server virtualenv interpreter for the given platform.
pub fn venv_interpreter(base: &Path, platform: Platform) -> PathBuf {
    if platform.is_windows() {
        base.join(".venv").join("Scripts").join("python.exe")
    } else {
        base.join(".venv").join("bin").join("python")
    }
}

fn node_executable(token: &str, platform: Platform) -> String {
    if platform.is_windows() && token == "node" {
        WINDOWS_NODE_PATH.to_string()
    } else {
        token.to_string()
    }
}

fn is_relative_path_token(token: &str) -> bool {
    !token.starts_with('-') && !Path::new(token).is_absolute() && !is_windows_absolute(token)
}

/// Windows-style absolute paths (`C:\...`, `C:/...`, UNC `\\...`) are not
/// absolute to `Path` on unix hosts, so they need their own check.
fn is_windows_absolute(token: &str) -> bool {
    let bytes = token.as_bytes();
    if bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
    {
        return true;
    }
    token.starts_with("\\\\")
}

fn join_normalized(base: &Path, relative: &str, platform: Platform) -> String {
    let joined = base.join(relative);
    normalize_separators(&joined.to_string_lossy(), platform)
}

/// Renders a path with the separator convention of the given platform.
pub fn normalize_for(path: &Path, platform: Platform) -> String {
    normalize_separators(&path.to_string_lossy(), platform)
}

fn normalize_separators(path: &str, platform: Platform) -> String {
    if platform.is_windows() {
        path.replace('/', "\\")
    } else {
        path.replace('\\', "/")
    }
}
