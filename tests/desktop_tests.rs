use async_trait::async_trait;
use mcp_hub::error::Result;
use mcp_hub::launch::Platform;
use mcp_hub::launch::desktop::{DesktopEntry, build_entry, merge_into_file};
use mcp_hub::registry::{CommandSet, HttpSettings, Registry, RuntimeKind, ServerDescriptor};
use mcp_hub::server::PortProbe;
use mcp_hub::{HubSettings, McpHub, TransportKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tempfile::TempDir;

fn node_descriptor(path: &str, start: &str) -> ServerDescriptor {
    ServerDescriptor {
        runtime: RuntimeKind::Node,
        path: path.into(),
        commands: CommandSet {
            start: Some(start.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn read_json(path: &std::path::Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_entry_shapes_follow_launch_rules() -> Result<()> {
    // Plain node: absolute script, no cwd.
    let plain = node_descriptor("/srv/notes", "node dist/index.js");
    let entry = build_entry(
        "notes",
        &plain,
        &HashMap::new(),
        3000,
        TransportKind::Http,
        Platform::Linux,
    )?;
    assert_eq!(entry.command, "node");
    assert_eq!(entry.args, vec!["/srv/notes/dist/index.js".to_string()]);
    assert_eq!(entry.cwd, None);
    assert_eq!(entry.env["PORT"], "3000");

    // Monorepo: relative script plus an explicit cwd.
    let mut monorepo = node_descriptor("/srv/workspace", "node packages/notes/dist/index.js");
    monorepo.monorepo = true;
    let entry = build_entry(
        "notes",
        &monorepo,
        &HashMap::new(),
        3001,
        TransportKind::Http,
        Platform::Linux,
    )?;
    assert_eq!(entry.args, vec!["packages/notes/dist/index.js".to_string()]);
    assert_eq!(entry.cwd.as_deref(), Some("/srv/workspace"));

    Ok(())
}

#[tokio::test]
async fn test_merge_creates_file_and_parent_dirs() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Claude").join("claude_desktop_config.json");

    let entries = BTreeMap::from([(
        "notes".to_string(),
        DesktopEntry {
            command: "node".to_string(),
            args: vec!["/srv/notes/dist/index.js".to_string()],
            cwd: None,
            env: BTreeMap::from([("PORT".to_string(), "3000".to_string())]),
        },
    )]);
    merge_into_file(&path, &entries).await?;

    let document = read_json(&path);
    assert_eq!(document["mcpServers"]["notes"]["command"], "node");
    assert_eq!(document["mcpServers"]["notes"]["env"]["PORT"], "3000");
    // Optional fields are omitted, not null.
    assert!(
        document["mcpServers"]["notes"]
            .as_object()
            .unwrap()
            .get("cwd")
            .is_none()
    );

    Ok(())
}

#[tokio::test]
async fn test_merge_preserves_foreign_content() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("claude_desktop_config.json");
    std::fs::write(
        &path,
        r#"{
            "theme": "dark",
            "mcpServers": {
                "hand-made": { "command": "deno", "args": ["run", "server.ts"] },
                "notes": { "command": "stale", "args": [] }
            }
        }"#,
    )
    .unwrap();

    let entries = BTreeMap::from([(
        "notes".to_string(),
        DesktopEntry {
            command: "node".to_string(),
            args: vec!["/srv/notes/dist/index.js".to_string()],
            cwd: None,
            env: BTreeMap::new(),
        },
    )]);
    merge_into_file(&path, &entries).await?;

    let document = read_json(&path);
    // Foreign top-level keys and unmanaged entries survive; the managed
    // entry is replaced wholesale.
    assert_eq!(document["theme"], "dark");
    assert_eq!(document["mcpServers"]["hand-made"]["command"], "deno");
    assert_eq!(document["mcpServers"]["notes"]["command"], "node");

    Ok(())
}

#[tokio::test]
async fn test_merge_replaces_non_object_content() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("claude_desktop_config.json");
    std::fs::write(&path, "[1, 2, 3]").unwrap();

    let entries = BTreeMap::from([(
        "notes".to_string(),
        DesktopEntry {
            command: "node".to_string(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        },
    )]);
    merge_into_file(&path, &entries).await?;

    let document = read_json(&path);
    assert!(document.is_object());
    assert_eq!(document["mcpServers"]["notes"]["command"], "node");

    Ok(())
}

struct AlwaysFree;

#[async_trait]
impl PortProbe for AlwaysFree {
    async fn is_free(&self, _port: u16) -> bool {
        true
    }
}

#[tokio::test]
async fn test_hub_writes_entries_for_all_selected_servers() -> Result<()> {
    let dir = TempDir::new().unwrap();

    // One server with a pinned port, one left to the allocator.
    let mut pinned = node_descriptor("/srv/pinned", "node dist/index.js");
    pinned.http = Some(HttpSettings { port: Some(3100) });
    let floating = node_descriptor("/srv/floating", "node dist/index.js");
    let registry = Registry::new(BTreeMap::from([
        ("pinned".to_string(), pinned),
        ("floating".to_string(), floating),
    ]));

    let mut settings = HubSettings::with_root(dir.path().join("hub"));
    settings.port_range = (3100, 3105);
    let hub = McpHub::with_port_probe(registry, settings, Arc::new(AlwaysFree))?;

    let config_path = dir.path().join("claude_desktop_config.json");
    hub.write_desktop_config_to(&config_path, None).await?;

    let document = read_json(&config_path);
    assert_eq!(document["mcpServers"]["pinned"]["env"]["PORT"], "3100");
    // The floating server was assigned the next port after the pinned one.
    assert_eq!(document["mcpServers"]["floating"]["env"]["PORT"], "3101");

    // Selecting an unknown server is an error.
    assert!(
        hub.write_desktop_config_to(&config_path, Some(&["nope"]))
            .await
            .is_err()
    );

    Ok(())
}
