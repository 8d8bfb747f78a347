use mcp_hub::error::Result;
use mcp_hub::registry::Registry;
use mcp_hub::{HubSettings, McpHub, StartOptions, secrets};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(true)
        .init();

    info!("Starting supervise demo");

    // Load the registry; pass a path as the first argument or drop a
    // registry.json next to the binary.
    let registry_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "registry.json".to_string());
    let registry = Registry::from_file(&registry_path)?;
    let hub = McpHub::new(registry.clone(), HubSettings::default())?;

    // Show anything a previous session left behind.
    let previous = hub.last_session_records().await;
    if !previous.is_empty() {
        println!("Previous session records:");
        for (name, record) in &previous {
            println!("- {} (pid {}, port {})", name, record.pid, record.port);
        }
        println!();
    }

    // Show how each server's declared secrets resolve, masking the
    // sensitive ones.
    for (name, descriptor) in &registry.servers {
        if descriptor.secrets.is_empty() {
            continue;
        }
        match hub.resolve_server_secrets(name).await {
            Ok(resolved) => {
                println!("Secrets for {}:", name);
                for (key, spec) in &descriptor.secrets {
                    match resolved.get(key) {
                        Some(value) => println!("  {} = {}", key, secrets::masked(spec, value)),
                        None => println!("  {} (optional, not set)", key),
                    }
                }
            }
            Err(e) => println!("Secrets for {}: {}", name, e),
        }
    }

    // Start every registered server.
    for name in hub.server_names().await {
        println!("Starting {}...", name);
        match hub.start_server(&name, StartOptions::default()).await {
            Ok(record) => println!(
                "  pid {} on port {} (log: {})",
                record.pid,
                record.port,
                record.log_path.display()
            ),
            Err(e) => println!("  failed: {}", e),
        }
    }

    // Snapshot with health.
    println!("\nRunning servers:");
    for running in hub.list_running().await {
        let healthy = hub
            .check_health(&running.record.name)
            .await
            .unwrap_or(false);
        println!(
            "- {} on port {} (healthy: {})",
            running.record.name, running.record.port, healthy
        );
    }

    // Generate a Claude Desktop document next to the hub's own files, so
    // the demo never touches the real platform config location.
    let config_path = hub.settings().root.join("claude_desktop_config.json");
    match hub.write_desktop_config_to(&config_path, None).await {
        Ok(()) => println!("\nWrote desktop config to {}", config_path.display()),
        Err(e) => println!("\nCould not write desktop config: {}", e),
    }

    println!("\nPress Ctrl+C to stop all servers");
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to wait for Ctrl+C");

    info!("Shutting down");
    for (name, result) in hub.stop_all().await {
        match result {
            Ok(outcome) if outcome.forced => {
                warn!("{} did not stop in time and was killed", name)
            }
            Ok(_) => info!("{} stopped", name),
            Err(e) => warn!("Failed to stop {}: {}", name, e),
        }
    }

    info!("supervise demo finished");
    Ok(())
}
