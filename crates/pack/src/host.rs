//! Host-side configuration for running an unpacked extension.
//!
//! The host keeps a JSON file whose `mcpServers` object maps an extension
//! identifier to the `{command, args, env}` used to spawn it.

use crate::{
    error::Error,
    manifest::{DIRNAME_VAR, ProjectManifest},
    package::McpConfig,
};
use serde_json::{Map, Value};
use std::path::Path;

/// Environment variable that makes the inspector skip its auth token.
pub const INSPECTOR_OMIT_AUTH: &str = "DANGEROUSLY_OMIT_AUTH";

/// Launcher for the external inspector.
pub const INSPECTOR: &str = "npx @modelcontextprotocol/inspector";

/// Host entry for `manifest` installed at `install_dir`.
pub fn entry(manifest: &ProjectManifest, install_dir: &Path) -> McpConfig {
    let dir = install_dir.to_string_lossy();
    let expand = |s: &String| s.replace(DIRNAME_VAR, &dir);
    McpConfig {
        command: expand(&manifest.server.command),
        args: manifest.server.args.iter().map(expand).collect(),
        env: manifest
            .server
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand(v)))
            .collect(),
    }
}

/// Insert or replace `id` under `mcpServers` in the host config at `path`.
///
/// Other keys are kept as they are; the file is created when missing.
pub fn merge(path: &Path, id: &str, config: &McpConfig) -> Result<(), Error> {
    let mut root = if path.is_file() {
        let raw = std::fs::read_to_string(path).map_err(Error::io_at(path))?;
        if raw.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(&raw)?
        }
    } else {
        Value::Object(Map::new())
    };

    let obj = root.as_object_mut().ok_or_else(|| {
        Error::HostConfig(format!("{} is not a JSON object", path.display()))
    })?;
    let servers = obj
        .entry("mcpServers")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| {
            Error::HostConfig(format!("`mcpServers` in {} is not an object", path.display()))
        })?;
    servers.insert(id.to_string(), serde_json::to_value(config)?);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(Error::io_at(parent))?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&root)?).map_err(Error::io_at(path))?;
    tracing::info!(id, "updated host config {}", path.display());
    Ok(())
}

/// Shell line that opens the inspector against the installed server.
pub fn inspector_command(config: &McpConfig, omit_auth: bool) -> String {
    let mut parts = Vec::new();
    if omit_auth {
        parts.push(format!("{INSPECTOR_OMIT_AUTH}=true"));
    }
    parts.extend(config.env.iter().map(|(k, v)| format!("{k}={}", quote(v))));
    parts.push(INSPECTOR.to_string());
    parts.push(quote(&config.command));
    parts.extend(config.args.iter().map(|a| quote(a)));
    parts.join(" ")
}

fn quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@${}".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
