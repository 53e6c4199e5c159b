use std::collections::HashSet;

use log::{debug, info};

use crate::config::has_extension;
use crate::engine::models::Manifest;
use crate::error::LauncherError;
use crate::networking::NetworkClient;
use crate::util::is_sha256_hex;

/// Fetch and parse the descriptor at `url`. One attempt, no retries.
pub async fn fetch(
    network: &NetworkClient,
    url: &str,
    managed_extension: &str,
) -> Result<Manifest, LauncherError> {
    let body = network.get_text(url).await?;
    let manifest = parse(&body, managed_extension)?;
    info!("manifest: {} entries from {url}", manifest.len());
    Ok(manifest)
}

/// Parse `{ "files": [ {name, url, hash}, ... ] }` and reject anything that
/// could not be reconciled safely.
pub fn parse(body: &str, managed_extension: &str) -> Result<Manifest, LauncherError> {
    let mut manifest: Manifest = serde_json::from_str(body)
        .map_err(|e| LauncherError::Parse(format!("manifest: {e}")))?;

    let mut seen = HashSet::with_capacity(manifest.files.len());
    for entry in &mut manifest.files {
        validate_name(&entry.name)
            .map_err(|reason| LauncherError::Parse(format!("manifest entry {:?}: {reason}", entry.name)))?;
        if !has_extension(&entry.name, managed_extension) {
            return Err(LauncherError::Parse(format!(
                "manifest entry {:?} is not a .{managed_extension} file",
                entry.name
            )));
        }
        if !seen.insert(entry.name.clone()) {
            return Err(LauncherError::Parse(format!(
                "manifest lists {:?} more than once",
                entry.name
            )));
        }
        if !is_sha256_hex(&entry.hash) {
            return Err(LauncherError::Parse(format!(
                "manifest entry {:?} has malformed hash {:?}",
                entry.name, entry.hash
            )));
        }
        entry.hash.make_ascii_lowercase();
        if entry.url.trim().is_empty() {
            return Err(LauncherError::Parse(format!(
                "manifest entry {:?} has no url",
                entry.name
            )));
        }
        debug!("manifest: entry {} -> {}", entry.name, entry.url);
    }
    Ok(manifest)
}

/// Names are single plain path segments inside the mods directory.
fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty name");
    }
    if name == "." || name == ".." {
        return Err("relative path component");
    }
    if name.contains(['/', '\\', '\0']) {
        return Err("name contains a path separator");
    }
    if name.contains(':') {
        return Err("name contains a drive or stream separator");
    }
    Ok(())
}
