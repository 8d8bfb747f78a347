use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Runtime kind of a managed server.
///
/// The runtime decides how a launch command line is derived: node servers
/// get script paths resolved against the base path (or left relative for
/// monorepo layouts), python servers prefer a per-server virtualenv
/// interpreter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Node.js server (plain or monorepo layout).
    #[default]
    Node,
    /// Python server, typically started via `python -m package.module`.
    Python,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::Node => write!(f, "node"),
            RuntimeKind::Python => write!(f, "python"),
        }
    }
}

/// Transport a supervised server speaks.
///
/// The transport selects the start command variant (`start:http` vs
/// `start:sse`) and the health-probe URL shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain HTTP transport; health is probed at `/health`.
    #[default]
    Http,
    /// Server-sent events transport; health is probed at `/sse?health=1`.
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Http => write!(f, "http"),
            TransportKind::Sse => write!(f, "sse"),
        }
    }
}

/// Named commands a server supports.
///
/// All commands are optional; transport-specific start commands
/// (`start:http`, `start:sse`) win over the plain `start` entry when the
/// corresponding transport is requested.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandSet {
    /// Install step, e.g. `npm install` or `pip install -e .`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<String>,

    /// Build step, e.g. `npm run build`. Missing means nothing to build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,

    /// Default start command, used when no transport-specific one matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,

    /// Start command for the HTTP transport.
    #[serde(rename = "start:http", default, skip_serializing_if = "Option::is_none")]
    pub start_http: Option<String>,

    /// Start command for the SSE transport.
    #[serde(rename = "start:sse", default, skip_serializing_if = "Option::is_none")]
    pub start_sse: Option<String>,
}

impl CommandSet {
    /// Returns the start command for the given transport, falling back to
    /// the plain `start` entry.
    pub fn start_for(&self, transport: TransportKind) -> Option<&str> {
        let specific = match transport {
            TransportKind::Http => self.start_http.as_deref(),
            TransportKind::Sse => self.start_sse.as_deref(),
        };
        specific.or(self.start.as_deref())
    }

    /// True when any start variant is present.
    pub fn has_start(&self) -> bool {
        self.start.is_some() || self.start_http.is_some() || self.start_sse.is_some()
    }
}

/// Declaration of a secret a server needs at launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretSpec {
    /// Human-readable description, shown when a required secret is missing.
    #[serde(default)]
    pub description: String,

    /// Sensitive values are masked wherever they are displayed.
    #[serde(default)]
    pub sensitive: bool,

    /// Required secrets abort a start when they do not resolve.
    #[serde(default = "default_true")]
    pub required: bool,
}

impl Default for SecretSpec {
    fn default() -> Self {
        SecretSpec {
            description: String::new(),
            sensitive: false,
            required: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Optional HTTP settings for a server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Default port the server binds when none is requested explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Coarse last-known status written back into the registry file.
///
/// These flags exist so an operator reading the registry (or a future hub
/// session) sees roughly what happened; the live process map is the only
/// authority while a hub is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryStatus {
    /// The hub started this server and believes it is still up.
    Running,
    /// The server was stopped on request.
    Stopped,
    /// The server exited without being asked to stop.
    Crashed,
}

impl fmt::Display for RegistryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryStatus::Running => write!(f, "running"),
            RegistryStatus::Stopped => write!(f, "stopped"),
            RegistryStatus::Crashed => write!(f, "crashed"),
        }
    }
}

/// Registry entry for a single manageable server.
///
/// The server's name is the key it is registered under; the descriptor
/// carries everything else the hub needs to install, build, launch, and
/// probe it.
///
/// # Examples
///
/// A python server like the registry JSON would declare it:
///
/// ```
/// use mcp_hub::registry::{RuntimeKind, ServerDescriptor};
///
/// let descriptor = ServerDescriptor {
///     runtime: RuntimeKind::Python,
///     path: "/srv/servers/pg-tools".into(),
///     ..Default::default()
/// };
/// assert!(!descriptor.monorepo);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    /// Runtime kind; JSON field `type`.
    #[serde(rename = "type")]
    pub runtime: RuntimeKind,

    /// Monorepo layout flag. Meaningful for node servers only: the start
    /// script path stays relative and the process runs from the base path
    /// so hoisted `node_modules` resolution works.
    #[serde(default)]
    pub monorepo: bool,

    /// Base filesystem path of the server. Relative paths in the registry
    /// file are resolved against the file's directory at load time.
    pub path: PathBuf,

    /// Package-manager hint (`npm`, `pnpm`, `pip`, ...) used to derive
    /// default install commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,

    /// Named commands for install/build/start phases.
    #[serde(default)]
    pub commands: CommandSet,

    /// Secrets the server needs, keyed by environment-variable name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, SecretSpec>,

    /// Declarative secret-name → CLI-flag table. Every secret listed here
    /// that resolves at launch is also passed as `<flag> <value>`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secret_flags: BTreeMap<String, String>,

    /// Boolean flags the server permits. Requested flags outside this list
    /// are ignored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional_args: Vec<String>,

    /// Optional HTTP settings (default port).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSettings>,

    /// Whether the install phase has completed. Written back by the hub.
    #[serde(default)]
    pub installed: bool,

    /// Whether the build phase has completed. Written back by the hub.
    #[serde(default)]
    pub built: bool,

    /// Coarse last-known status. Written back by the hub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RegistryStatus>,
}

impl ServerDescriptor {
    /// Default port from the nested HTTP settings, when declared.
    pub fn default_port(&self) -> Option<u16> {
        self.http.as_ref().and_then(|h| h.port)
    }
}

/// The server registry: every server the hub can manage.
///
/// # JSON Schema
///
/// The registry follows this JSON schema (top-level key `servers`, one
/// descriptor per server name):
///
/// ```json
/// {
///   "servers": {
///     "pg-tools": {
///       "type": "python",
///       "path": "servers/pg_tools",
///       "packageManager": "pip",
///       "commands": {
///         "install": "pip install -e .",
///         "start": "python -m mcp_server_pg.http_server"
///       },
///       "secrets": {
///         "DATABASE_URL": { "description": "Postgres DSN", "sensitive": true }
///       },
///       "secretFlags": { "DATABASE_URL": "--database-url" },
///       "optionalArgs": ["--read-only"],
///       "http": { "port": 3003 }
///     }
///   }
/// }
/// ```
///
/// # Examples
///
/// Loading a registry from a file:
///
/// ```no_run
/// use mcp_hub::registry::Registry;
///
/// let registry = Registry::from_file("registry.json").unwrap();
/// println!("Loaded {} servers", registry.servers.len());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    /// Map of server names to their descriptors.
    pub servers: BTreeMap<String, ServerDescriptor>,

    /// Path the registry was loaded from; `None` for programmatic
    /// registries, which then have nowhere to write status flags back to.
    #[serde(skip)]
    source: Option<PathBuf>,
}

impl Registry {
    /// Creates a registry from an in-memory map, with no backing file.
    pub fn new(servers: BTreeMap<String, ServerDescriptor>) -> Self {
        Registry {
            servers,
            source: None,
        }
    }

    /// Loads a registry from a file path.
    ///
    /// Relative server base paths are resolved against the registry file's
    /// directory, so every descriptor handed out afterwards carries an
    /// absolute path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistryParse`] if the file cannot be read, is not
    /// valid JSON, or does not conform to the schema.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::RegistryParse(format!("Failed to read registry file: {}", e)))?;

        let mut registry = Self::parse_from_str(&content)?;
        if let Some(dir) = path.parent() {
            registry.resolve_paths(dir);
        }
        registry.source = Some(path.to_path_buf());
        Ok(registry)
    }

    /// Parses a registry from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistryParse`] if the string is not valid JSON or
    /// does not conform to the schema.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::RegistryParse(format!("Failed to parse registry JSON: {}", e)))
    }

    /// Looks up a server descriptor by name.
    pub fn get(&self, name: &str) -> Option<&ServerDescriptor> {
        self.servers.get(name)
    }

    /// Names of every registered server, in registry order.
    pub fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    /// Path the registry was loaded from, when it has one.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn resolve_paths(&mut self, base: &Path) {
        for descriptor in self.servers.values_mut() {
            if descriptor.path.is_relative() {
                descriptor.path = base.join(&descriptor.path);
            }
        }
    }

    /// Applies `mutate` to the named in-memory descriptor, then syncs that
    /// server's coarse flags (`installed`, `built`, `status`) back into the
    /// registry file.
    ///
    /// The file is re-read fresh before writing so edits made to *other*
    /// servers in the meantime survive; only the named server's flag fields
    /// are touched. Concurrent edits to the same server are
    /// last-writer-wins. A registry without a backing file mutates in
    /// memory only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerNotFound`] when the name is not registered.
    /// File I/O problems are reported so callers can decide whether to
    /// swallow them (the hub logs and continues).
    pub fn write_back<F>(&mut self, name: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut ServerDescriptor),
    {
        let descriptor = self
            .servers
            .get_mut(name)
            .ok_or_else(|| Error::ServerNotFound(name.to_string()))?;
        mutate(descriptor);
        let flags = (descriptor.installed, descriptor.built, descriptor.status);

        let Some(path) = self.source.clone() else {
            return Ok(());
        };

        // Merge at the JSON value level so foreign keys and other servers'
        // entries survive untouched.
        let mut document: serde_json::Value = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Registry file unreadable during write-back, rebuilding");
                serde_json::json!({})
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Registry file missing during write-back, rebuilding");
                serde_json::json!({})
            }
        };

        if !document.is_object() {
            document = serde_json::json!({});
        }
        let servers = document
            .as_object_mut()
            .and_then(|root| {
                if !root.contains_key("servers") {
                    root.insert("servers".to_string(), serde_json::json!({}));
                }
                root.get_mut("servers")
            })
            .and_then(|v| v.as_object_mut())
            .ok_or_else(|| Error::RegistryParse("Registry 'servers' key is not an object".to_string()))?;

        match servers.get_mut(name) {
            Some(serde_json::Value::Object(entry)) => {
                let (installed, built, status) = flags;
                entry.insert("installed".to_string(), serde_json::json!(installed));
                entry.insert("built".to_string(), serde_json::json!(built));
                match status {
                    Some(s) => {
                        entry.insert("status".to_string(), serde_json::json!(s));
                    }
                    None => {
                        entry.remove("status");
                    }
                }
            }
            _ => {
                // Entry vanished from disk; re-insert the in-memory copy.
                let value = serde_json::to_value(&self.servers[name])
                    .map_err(|e| Error::RegistryParse(format!("Failed to serialize descriptor: {}", e)))?;
                servers.insert(name.to_string(), value);
            }
        }

        let serialized = serde_json::to_string_pretty(&document)
            .map_err(|e| Error::RegistryParse(format!("Failed to serialize registry: {}", e)))?;
        std::fs::write(&path, serialized)
            .map_err(|e| Error::Other(format!("Failed to write registry file: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registry() {
        let registry_str = r#"{
            "servers": {
                "pg-tools": {
                    "type": "python",
                    "path": "servers/pg_tools",
                    "packageManager": "pip",
                    "commands": {
                        "install": "pip install -e .",
                        "start": "python -m mcp_server_pg.http_server"
                    },
                    "secrets": {
                        "DATABASE_URL": { "description": "Postgres DSN", "sensitive": true }
                    },
                    "secretFlags": { "DATABASE_URL": "--database-url" },
                    "optionalArgs": ["--read-only"],
                    "http": { "port": 3003 }
                }
            }
        }"#;

        let registry = Registry::parse_from_str(registry_str).unwrap();

        assert_eq!(registry.servers.len(), 1);
        let descriptor = &registry.servers["pg-tools"];
        assert_eq!(descriptor.runtime, RuntimeKind::Python);
        assert!(!descriptor.monorepo);
        assert_eq!(descriptor.default_port(), Some(3003));
        assert_eq!(
            descriptor.commands.start_for(TransportKind::Http),
            Some("python -m mcp_server_pg.http_server")
        );
        assert_eq!(descriptor.secret_flags["DATABASE_URL"], "--database-url");
        assert!(descriptor.secrets["DATABASE_URL"].required);
        assert!(descriptor.secrets["DATABASE_URL"].sensitive);
        assert!(!descriptor.installed);
    }

    #[test]
    fn test_transport_specific_start_wins() {
        let commands = CommandSet {
            start: Some("node dist/index.js".to_string()),
            start_sse: Some("node dist/sse.js".to_string()),
            ..Default::default()
        };

        assert_eq!(
            commands.start_for(TransportKind::Sse),
            Some("node dist/sse.js")
        );
        assert_eq!(
            commands.start_for(TransportKind::Http),
            Some("node dist/index.js")
        );
    }

    #[test]
    fn test_secret_spec_defaults() {
        let registry_str = r#"{
            "servers": {
                "demo": {
                    "type": "node",
                    "path": "/srv/demo",
                    "commands": { "start": "node dist/index.js" },
                    "secrets": { "API_KEY": {} }
                }
            }
        }"#;

        let registry = Registry::parse_from_str(registry_str).unwrap();
        let spec = &registry.servers["demo"].secrets["API_KEY"];
        assert!(spec.required);
        assert!(!spec.sensitive);
        assert!(spec.description.is_empty());
    }
}
