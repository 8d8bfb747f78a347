use crate::error::{Error, Result};
use crate::registry::{Registry, RuntimeKind, ServerDescriptor};

/// Validates a single server descriptor
pub fn validate_descriptor(name: &str, descriptor: &ServerDescriptor) -> Result<()> {
    if descriptor.path.as_os_str().is_empty() {
        return Err(Error::RegistryInvalid(format!(
            "Server '{}' has an empty base path",
            name
        )));
    }

    if !descriptor.commands.has_start() {
        return Err(Error::RegistryInvalid(format!(
            "Server '{}' has no start command",
            name
        )));
    }

    let starts = [
        descriptor.commands.start.as_deref(),
        descriptor.commands.start_http.as_deref(),
        descriptor.commands.start_sse.as_deref(),
    ];
    for command in starts.into_iter().flatten() {
        if command.trim().is_empty() {
            return Err(Error::RegistryInvalid(format!(
                "Server '{}' has a blank start command",
                name
            )));
        }
    }

    if descriptor.monorepo && descriptor.runtime != RuntimeKind::Node {
        return Err(Error::RegistryInvalid(format!(
            "Server '{}' sets monorepo but runtime is {}",
            name, descriptor.runtime
        )));
    }

    // The flag table only makes sense for secrets the server declared.
    for secret in descriptor.secret_flags.keys() {
        if !descriptor.secrets.contains_key(secret) {
            return Err(Error::RegistryInvalid(format!(
                "Server '{}' maps undeclared secret '{}' to a flag",
                name, secret
            )));
        }
    }

    for arg in &descriptor.optional_args {
        if !arg.starts_with('-') {
            return Err(Error::RegistryInvalid(format!(
                "Server '{}' optional arg '{}' does not look like a flag",
                name, arg
            )));
        }
    }

    Ok(())
}

/// Validates every server in a registry
pub fn validate_registry(registry: &Registry) -> Result<()> {
    if registry.servers.is_empty() {
        return Err(Error::RegistryInvalid("No servers in registry".to_string()));
    }

    for (name, descriptor) in &registry.servers {
        validate_descriptor(name, descriptor)?;
    }

    Ok(())
}
