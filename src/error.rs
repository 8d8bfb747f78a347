//! Error handling module for MCP Hub.
//!
//! This module defines the error types used throughout the library.
//! It provides a comprehensive set of errors that can occur when
//! supervising MCP servers, along with helpful context for debugging.
//!
//! # Example
//!
//! ```
//! use mcp_hub::error::{Error, Result};
//!
//! fn handle_error(result: Result<()>) {
//!     match result {
//!         Ok(_) => println!("Operation succeeded"),
//!         Err(Error::ServerNotFound(name)) => println!("Server '{}' is not in the registry", name),
//!         Err(Error::AlreadyRunning(name)) => println!("Server '{}' is already running", name),
//!         Err(Error::Timeout(msg)) => println!("Operation timed out: {}", msg),
//!         Err(e) => println!("Other error: {}", e),
//!     }
//! }
//! ```
use thiserror::Error;

/// Errors that can occur in the mcp-hub library.
///
/// This enum represents all possible error types that can be returned from
/// operations in the MCP Hub library. Each variant includes context
/// information to help diagnose and handle the error appropriately.
///
/// Two failure families are deliberately *not* represented here: health
/// probes report plain `bool` (an unhealthy server is an answer, not an
/// error), and record-store / registry write-back failures are logged and
/// swallowed so a persistence hiccup never fails a lifecycle operation.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to read or parse the server registry.
    ///
    /// This error occurs when:
    /// - The registry file does not exist or cannot be read
    /// - The registry JSON is malformed
    /// - Field types are incorrect
    #[error("Failed to parse registry: {0}")]
    RegistryParse(String),

    /// Registry is valid JSON but contains invalid values.
    ///
    /// This error occurs when:
    /// - The registry contains no servers
    /// - A server has no usable start command
    /// - The monorepo flag is set on a non-node runtime
    /// - A secret flag mapping references an undeclared secret
    #[error("Invalid registry: {0}")]
    RegistryInvalid(String),

    /// Requested server was not found in the registry.
    ///
    /// This error occurs when:
    /// - A server name is passed that doesn't exist in the registry document
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// The server is already running.
    ///
    /// This error occurs when:
    /// - Attempting to start a server that already has a live process record
    #[error("Server '{0}' is already running")]
    AlreadyRunning(String),

    /// The server is not running.
    ///
    /// This error occurs when:
    /// - Attempting to stop or restart a server with no live process record
    /// - Requesting a health check for a server that isn't running
    #[error("Server '{0}' is not running")]
    NotRunning(String),

    /// Failed to spawn the server subprocess.
    ///
    /// This error occurs when:
    /// - The executable does not exist (runtime not installed, or the
    ///   install step was never run)
    /// - The executable is not permitted to run
    /// - The OS refuses the spawn for any other reason
    ///
    /// The `hint` field carries an actionable description of the likely
    /// cause; the original I/O error is preserved as the source.
    #[error("Failed to spawn server '{server}': {hint}")]
    Spawn {
        /// Name of the server that failed to spawn.
        server: String,
        /// Actionable description of the likely cause.
        hint: String,
        /// Underlying I/O error from the OS.
        #[source]
        source: std::io::Error,
    },

    /// No free port could be found in the configured range.
    ///
    /// This error occurs when:
    /// - Every port in the range is in use, excluded, or reserved by a
    ///   start operation already in flight
    #[error("No available port in range {start}-{end}")]
    PortRangeExhausted {
        /// First port of the scanned range (inclusive).
        start: u16,
        /// Last port of the scanned range (inclusive).
        end: u16,
    },

    /// One or more required secrets did not resolve.
    ///
    /// This error occurs when:
    /// - A secret declared `required` is present neither in the process
    ///   environment nor in the secrets overlay file
    #[error("Missing required secrets for server '{server}': {}", .names.join(", "))]
    MissingSecrets {
        /// Name of the server whose secrets were being resolved.
        server: String,
        /// Names of every required secret that failed to resolve.
        names: Vec<String>,
    },

    /// Launch descriptor generation failed.
    ///
    /// This error occurs when:
    /// - The descriptor has no start command for the requested transport
    /// - The start command is empty or unparseable
    #[error("Launch generation error: {0}")]
    Launch(String),

    /// An install or build phase exited unsuccessfully.
    #[error("{phase} step failed for server '{server}'{}", exit_suffix(.code))]
    Setup {
        /// Name of the server being set up.
        server: String,
        /// Phase that failed (`install` or `build`).
        phase: String,
        /// Exit code, when the process exited rather than being signalled.
        code: Option<i32>,
    },

    /// Operation timed out.
    ///
    /// This error occurs when:
    /// - A process fails to exit even after a forced kill
    /// - A bounded wait elapses without the expected event
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Failed to generate or write the Claude Desktop configuration.
    #[error("Desktop config error: {0}")]
    DesktopConfig(String),

    /// Any other error not covered by the above categories.
    ///
    /// This is a catch-all error for cases not explicitly handled elsewhere.
    #[error("Other error: {0}")]
    Other(String),
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!(" (exit code {})", c),
        None => " (terminated by signal)".to_string(),
    }
}

/// Result type for mcp-hub operations.
///
/// This is a convenience type alias for `std::result::Result` with the `Error` type
/// from this module. Use this throughout the library and in client code to handle
/// errors in a consistent way.
pub type Result<T> = std::result::Result<T, Error>;
