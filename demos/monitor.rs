use mcp_hub::error::Result;
use mcp_hub::monitor::{Monitor, MonitorSettings};
use mcp_hub::{McpHub, StartOptions};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    // The monitor owns the terminal, so console logging would corrupt the
    // dashboard. Route logs to a file under the hub root instead.
    let hub = {
        let registry_path = std::env::args()
            .nth(1)
            .unwrap_or_else(|| "registry.json".to_string());
        McpHub::from_registry_file(&registry_path)?
    };

    let file_appender =
        tracing_appender::rolling::never(hub.settings().logs_dir(), "monitor-demo.log");
    let (writer, _guard) = tracing_appender::non_blocking(file_appender);
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(true)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    info!("Starting monitor demo");

    // Start everything so the dashboard has something to show. Failures
    // are fine; the monitor only lists what actually runs.
    for name in hub.server_names().await {
        if let Err(e) = hub.start_server(&name, StartOptions::default()).await {
            info!("Skipping {}: {}", name, e);
        }
    }

    Monitor::new(hub.clone(), MonitorSettings::default())
        .run()
        .await?;

    info!("Monitor closed, stopping servers");
    for (name, result) in hub.stop_all().await {
        if let Err(e) = result {
            info!("Failed to stop {}: {}", name, e);
        }
    }

    info!("monitor demo finished");
    Ok(())
}
