//! Port allocation for supervised servers.
//!
//! Ports are allocated by an ascending scan over a configured range: the
//! first port that is neither excluded nor accepting connections wins.
//! Probing is connect-based through the [`PortProbe`] trait so tests can
//! script occupancy; [`TcpPortProbe`] is the real implementation.
//!
//! The probe-then-bind gap is inherent to this design: a port reported
//! free can be taken by an unrelated process before the server binds it.
//! The hub serializes its *own* allocations with a reservation set, but a
//! race against external processes remains possible and surfaces as a
//! bind failure in the server's log.
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Liveness probe deciding whether a port is free.
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// True when nothing is accepting connections on the port.
    async fn is_free(&self, port: u16) -> bool;
}

/// Connect-based probe against loopback.
#[derive(Debug, Clone)]
pub struct TcpPortProbe {
    /// Per-port connection deadline.
    pub connect_timeout: Duration,
}

impl Default for TcpPortProbe {
    fn default() -> Self {
        TcpPortProbe {
            connect_timeout: Duration::from_millis(250),
        }
    }
}

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn is_free(&self, port: u16) -> bool {
        match timeout(self.connect_timeout, TcpStream::connect(("127.0.0.1", port))).await {
            // Something accepted the connection: the port is taken.
            Ok(Ok(_)) => false,
            // Refused or timed out: nothing is listening.
            Ok(Err(_)) | Err(_) => true,
        }
    }
}

/// Finds the first free port in `start..=end` that is not excluded.
///
/// # Errors
///
/// Returns [`Error::PortRangeExhausted`] when every port in the range is
/// excluded or in use.
pub async fn find_available_port(
    start: u16,
    end: u16,
    exclude: &HashSet<u16>,
    probe: &dyn PortProbe,
) -> Result<u16> {
    for port in start..=end {
        if exclude.contains(&port) {
            continue;
        }
        if probe.is_free(port).await {
            tracing::debug!(port, "Allocated port");
            return Ok(port);
        }
        tracing::trace!(port, "Port in use, trying next");
    }

    Err(Error::PortRangeExhausted { start, end })
}
