use mcp_hub::registry::TransportKind;
use mcp_hub::server::{HealthProber, ProbeSettings};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves a canned HTTP response on an ephemeral port, counting hits.
async fn canned_responder(status_line: &'static str) -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "{}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                status_line
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });

    (port, hits)
}

fn quick_settings(retries: u32) -> ProbeSettings {
    ProbeSettings {
        retries,
        delay: Duration::from_millis(20),
        request_timeout: Duration::from_millis(500),
    }
}

#[tokio::test]
async fn test_200_answer_is_healthy() {
    let (port, _hits) = canned_responder("HTTP/1.1 200 OK").await;

    let prober = HealthProber::new(quick_settings(0));
    assert!(prober.check("demo", port, TransportKind::Http).await);
}

#[tokio::test]
async fn test_500_answer_is_unhealthy_after_all_retries() {
    let (port, hits) = canned_responder("HTTP/1.1 500 Internal Server Error").await;

    let prober = HealthProber::new(quick_settings(2));
    assert!(!prober.check("demo", port, TransportKind::Http).await);

    // First attempt plus two retries.
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_absent_server_is_unhealthy() {
    // Bind then drop to find a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let prober = HealthProber::new(quick_settings(0));
    assert!(!prober.check("demo", port, TransportKind::Http).await);
}

#[tokio::test]
async fn test_sse_probe_uses_health_query_convention() {
    // Answer 200 only on the SSE health path, 404 elsewhere.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let mut buf = [0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = if request.starts_with("GET /sse?health=1 ") {
                "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"
            } else {
                "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            };
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });

    let prober = HealthProber::new(quick_settings(0));
    assert!(prober.check("events", port, TransportKind::Sse).await);
    assert!(!prober.check("events", port, TransportKind::Http).await);
}

#[tokio::test]
async fn test_check_once_never_retries() {
    let (port, hits) = canned_responder("HTTP/1.1 503 Service Unavailable").await;

    // Retries are configured, but a single poll must ignore them.
    let prober = HealthProber::new(quick_settings(5));
    assert!(!prober.check_once("demo", port, TransportKind::Http).await);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
