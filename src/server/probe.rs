//! Health probing for supervised servers.
//!
//! Supervised servers expose an HTTP health surface: plain-HTTP servers
//! answer `GET /health`, SSE servers answer a plain 200 to
//! `GET /sse?health=1` (the query parameter is a contract with
//! cooperating servers so the probe never has to consume an event
//! stream). Any 2xx status within the deadline counts as healthy.
//!
//! Probes answer a question rather than performing an operation, so they
//! return `bool` and never error: an unreachable or unhappy server is
//! simply unhealthy.
use crate::registry::TransportKind;
use std::time::Duration;
use tokio::time::timeout;

/// Retry and deadline settings for health probes.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Additional attempts after the first failure.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// Per-request deadline.
    pub request_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings {
            retries: 3,
            delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
        }
    }
}

/// HTTP health prober.
#[derive(Debug, Clone)]
pub struct HealthProber {
    client: reqwest::Client,
    settings: ProbeSettings,
}

impl HealthProber {
    /// Creates a prober with the given settings.
    pub fn new(settings: ProbeSettings) -> Self {
        HealthProber {
            client: reqwest::Client::new(),
            settings,
        }
    }

    /// Probe URL for a server on the given port and transport.
    pub fn probe_url(port: u16, transport: TransportKind) -> String {
        match transport {
            TransportKind::Http => format!("http://127.0.0.1:{}/health", port),
            TransportKind::Sse => format!("http://127.0.0.1:{}/sse?health=1", port),
        }
    }

    /// Checks whether the server answers its health probe.
    ///
    /// Retries up to the configured count with a fixed delay; the first
    /// 2xx answer wins. Never errors.
    pub async fn check(&self, name: &str, port: u16, transport: TransportKind) -> bool {
        let url = Self::probe_url(port, transport);
        let attempts = self.settings.retries + 1;

        for attempt in 1..=attempts {
            if self.attempt(&url).await {
                tracing::debug!(server = %name, %url, attempt, "Health probe succeeded");
                return true;
            }
            tracing::debug!(server = %name, %url, attempt, "Health probe failed");
            if attempt < attempts {
                tokio::time::sleep(self.settings.delay).await;
            }
        }

        false
    }

    /// Single probe attempt with no retries, regardless of settings. The
    /// monitor polls on its own cadence and supplies its own repetition.
    pub async fn check_once(&self, name: &str, port: u16, transport: TransportKind) -> bool {
        let url = Self::probe_url(port, transport);
        let healthy = self.attempt(&url).await;
        tracing::trace!(server = %name, %url, healthy, "Health poll");
        healthy
    }

    async fn attempt(&self, url: &str) -> bool {
        match timeout(self.settings.request_timeout, self.client.get(url).send()).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(_)) | Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_urls() {
        assert_eq!(
            HealthProber::probe_url(3003, TransportKind::Http),
            "http://127.0.0.1:3003/health"
        );
        assert_eq!(
            HealthProber::probe_url(3004, TransportKind::Sse),
            "http://127.0.0.1:3004/sse?health=1"
        );
    }
}
