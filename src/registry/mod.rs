//! Server registry module for MCP Hub.
//!
//! The registry is the hub's source of truth for *what can run*: a JSON
//! document mapping server names to descriptors (runtime kind, base path,
//! commands, declared secrets, flag tables, default port, and the coarse
//! `installed`/`built`/`status` flags the hub writes back). What is
//! currently *running* is tracked separately by the process record store.
//!
//! # Examples
//!
//! Loading a registry from a file:
//!
//! ```no_run
//! use mcp_hub::registry::Registry;
//!
//! let registry = Registry::from_file("registry.json").unwrap();
//! println!("Loaded registry with {} servers", registry.servers.len());
//! ```
//!
//! Building a registry programmatically:
//!
//! ```
//! use mcp_hub::registry::{CommandSet, Registry, RuntimeKind, ServerDescriptor};
//! use std::collections::BTreeMap;
//!
//! let mut servers = BTreeMap::new();
//! servers.insert(
//!     "demo".to_string(),
//!     ServerDescriptor {
//!         runtime: RuntimeKind::Node,
//!         path: "/srv/demo".into(),
//!         commands: CommandSet {
//!             start: Some("node dist/index.js".to_string()),
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     },
//! );
//! let registry = Registry::new(servers);
//! assert_eq!(registry.server_names(), vec!["demo".to_string()]);
//! ```
mod parser;
pub mod validator;

pub use parser::{
    CommandSet, HttpSettings, Registry, RegistryStatus, RuntimeKind, SecretSpec, ServerDescriptor,
    TransportKind,
};
pub use validator::{validate_descriptor, validate_registry};
