//! Claude Desktop launcher configuration.
//!
//! Claude Desktop launches MCP servers from a JSON document with a
//! top-level `mcpServers` key mapping server name to an entry of
//! `{ command, args, cwd?, env? }`. The launcher spawns processes without
//! a shell or a meaningful working directory, so entries must carry
//! absolute paths with platform-correct separators; they are therefore
//! derived from the same launch generation as direct supervision.
//!
//! The document is merged, not overwritten: entries for servers the hub
//! does not manage, and any foreign top-level keys, survive a write.
use crate::error::{Error, Result};
use crate::launch::{self, LaunchOptions, Platform};
use crate::registry::{ServerDescriptor, TransportKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// One `mcpServers` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesktopEntry {
    /// Absolute executable path (or PATH-resolvable name where the launch
    /// rules allow it).
    pub command: String,

    /// Argument vector.
    pub args: Vec<String>,

    /// Working directory; present for monorepo servers, which need it for
    /// module resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Environment for the server: resolved secrets plus `PORT`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Well-known Claude Desktop config location for the current user.
///
/// Resolves to `~/Library/Application Support/Claude/...` on macOS,
/// `%APPDATA%\Claude\...` on Windows, and `~/.config/Claude/...` on Linux.
///
/// # Errors
///
/// Returns [`Error::DesktopConfig`] when the user configuration directory
/// cannot be determined.
pub fn desktop_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("Claude").join("claude_desktop_config.json"))
        .ok_or_else(|| {
            Error::DesktopConfig("Could not determine the user configuration directory".to_string())
        })
}

/// Builds the desktop entry for one server.
///
/// The entry reuses [`launch::generate`], so the three runtime shapes and
/// the secret/optional flag rules apply exactly as they do for direct
/// supervision.
pub fn build_entry(
    name: &str,
    descriptor: &ServerDescriptor,
    secrets: &HashMap<String, String>,
    port: u16,
    transport: TransportKind,
    platform: Platform,
) -> Result<DesktopEntry> {
    let options = LaunchOptions {
        port,
        transport,
        requested_flags: Vec::new(),
    };
    let launch = launch::generate(name, descriptor, secrets, &options, platform)?;

    let cwd = descriptor
        .monorepo
        .then(|| launch::normalize_for(&launch.cwd, platform));

    Ok(DesktopEntry {
        command: launch.command,
        args: launch.args,
        cwd,
        env: launch.env,
    })
}

/// Merges `entries` into the desktop config file at `path`.
///
/// Existing content is preserved wherever it does not collide: foreign
/// top-level keys stay, and `mcpServers` entries not named in `entries`
/// stay. A file that is not a JSON object is replaced (with a warning).
pub async fn merge_into_file(path: &Path, entries: &BTreeMap<String, DesktopEntry>) -> Result<()> {
    let mut document = match tokio::fs::read_to_string(path).await {
        Ok(content) => match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(value) if value.is_object() => value,
            Ok(_) => {
                tracing::warn!(path = %path.display(), "Desktop config is not a JSON object, replacing");
                serde_json::json!({})
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Desktop config unparseable, replacing");
                serde_json::json!({})
            }
        },
        Err(_) => serde_json::json!({}),
    };

    let root = document
        .as_object_mut()
        .ok_or_else(|| Error::DesktopConfig("Desktop config root is not an object".to_string()))?;
    match root.get("mcpServers") {
        Some(serde_json::Value::Object(_)) => {}
        Some(_) => {
            tracing::warn!(path = %path.display(), "'mcpServers' is not an object, replacing");
            root.insert("mcpServers".to_string(), serde_json::json!({}));
        }
        None => {
            root.insert("mcpServers".to_string(), serde_json::json!({}));
        }
    }
    let servers = root
        .get_mut("mcpServers")
        .and_then(|v| v.as_object_mut())
        .ok_or_else(|| Error::DesktopConfig("'mcpServers' is not an object".to_string()))?;

    for (name, entry) in entries {
        let value = serde_json::to_value(entry)
            .map_err(|e| Error::DesktopConfig(format!("Failed to serialize entry: {}", e)))?;
        servers.insert(name.clone(), value);
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::DesktopConfig(format!("Failed to create config dir: {}", e)))?;
    }
    let serialized = serde_json::to_string_pretty(&document)
        .map_err(|e| Error::DesktopConfig(format!("Failed to serialize config: {}", e)))?;
    tokio::fs::write(path, serialized)
        .await
        .map_err(|e| Error::DesktopConfig(format!("Failed to write config: {}", e)))?;

    tracing::info!(path = %path.display(), entries = entries.len(), "Wrote Claude Desktop config");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desktop_config_path_shape() {
        let path = desktop_config_path().unwrap();
        assert!(path.ends_with(Path::new("Claude/claude_desktop_config.json")));
    }
}
