//! Secret resolution for server launches.
//!
//! Descriptors declare the secrets a server needs by environment-variable
//! name. At launch time each declared secret resolves from, in order:
//!
//! 1. the hub's own process environment,
//! 2. an optional overlay file: a flat JSON string map (for values an
//!    operator does not want to export globally).
//!
//! Required secrets that resolve nowhere abort the start with a single
//! [`Error::MissingSecrets`] naming all of them; optional secrets are
//! simply absent from the resolved map. Resolved values are never logged.
use crate::error::{Error, Result};
use crate::registry::{SecretSpec, ServerDescriptor};
use std::collections::HashMap;
use std::path::Path;

/// Fixed mask rendered in place of sensitive values.
const MASK: &str = "••••••";

/// Resolves every declared secret for `name` from the process environment
/// and the optional overlay file at `overlay_path`.
///
/// # Errors
///
/// Returns [`Error::MissingSecrets`] listing every required secret that
/// resolved nowhere, or [`Error::RegistryParse`] when the overlay file
/// exists but is not a flat JSON string map.
pub fn resolve(
    name: &str,
    descriptor: &ServerDescriptor,
    overlay_path: Option<&Path>,
) -> Result<HashMap<String, String>> {
    let overlay = load_overlay(overlay_path)?;
    resolve_with(name, descriptor, &overlay, |key| std::env::var(key).ok())
}

/// Same resolution logic with an injected environment lookup.
///
/// Production code goes through [`resolve`]; tests inject a closure over a
/// plain map instead of mutating the real process environment.
pub fn resolve_with<F>(
    name: &str,
    descriptor: &ServerDescriptor,
    overlay: &HashMap<String, String>,
    lookup: F,
) -> Result<HashMap<String, String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut resolved = HashMap::new();
    let mut missing = Vec::new();

    for (key, spec) in &descriptor.secrets {
        let value = lookup(key).or_else(|| overlay.get(key).cloned());
        match value {
            Some(value) => {
                resolved.insert(key.clone(), value);
            }
            None if spec.required => missing.push(key.clone()),
            None => {
                tracing::debug!(server = %name, secret = %key, "Optional secret not set");
            }
        }
    }

    if !missing.is_empty() {
        return Err(Error::MissingSecrets {
            server: name.to_string(),
            names: missing,
        });
    }

    tracing::debug!(
        server = %name,
        count = resolved.len(),
        "Resolved secrets"
    );
    Ok(resolved)
}

/// Loads the overlay file when present; an absent file is an empty overlay.
fn load_overlay(path: Option<&Path>) -> Result<HashMap<String, String>> {
    let Some(path) = path else {
        return Ok(HashMap::new());
    };
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::RegistryParse(format!("Failed to read secrets file: {}", e)))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::RegistryParse(format!("Failed to parse secrets file: {}", e)))
}

/// Renders a secret value for display, masking it when the spec says so.
pub fn masked(spec: &SecretSpec, value: &str) -> String {
    if spec.sensitive {
        MASK.to_string()
    } else {
        value.to_string()
    }
}
