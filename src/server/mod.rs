//! Process supervision module for MCP Hub.
//!
//! This module covers the mechanics of running servers: allocating a port,
//! spawning and watching the subprocess, probing its health endpoint, and
//! recording what runs. The [`crate::McpHub`] facade composes these pieces
//! into the public lifecycle operations.
//!
//! # Components
//!
//! * `ports` - Connect-probe port allocation over a configured range
//! * `probe` - HTTP/SSE health probing (always a `bool`, never an error)
//! * `process` - Spawn, output pumps, exit watching, graceful/forced stop
//! * `records` - Process records and their write-through JSON store
//!
//! # Examples
//!
//! Probing a server's health endpoint:
//!
//! ```no_run
//! use mcp_hub::server::{HealthProber, ProbeSettings};
//! use mcp_hub::registry::TransportKind;
//!
//! # async fn demo() {
//! let prober = HealthProber::new(ProbeSettings::default());
//! let healthy = prober.check("pg-tools", 3003, TransportKind::Http).await;
//! println!("healthy: {healthy}");
//! # }
//! ```
pub mod ports;
pub mod probe;
pub mod process;
pub mod records;

pub use ports::{PortProbe, TcpPortProbe, find_available_port};
pub use probe::{HealthProber, ProbeSettings};
pub use process::{ManagedProcess, ProcessExit, StopOutcome};
pub use records::{ProcessRecord, RecordStore, TransportKind};
