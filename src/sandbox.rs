//! File-backed sandbox remote
//!
//! keyward runs against an in-process identity service whose principals and
//! keys are kept in a JSON file between invocations.

use anyhow::{Context, Result};
use apikey::{MemoryRemote, Snapshot};
use std::fs;
use std::path::Path;

/// Open the sandbox at `path`; a missing file is an empty sandbox
pub fn open(path: &Path) -> Result<MemoryRemote> {
    if !path.exists() {
        log::debug!("Sandbox file does not exist, starting empty");
        return Ok(MemoryRemote::new());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read sandbox file: {}", path.display()))?;
    let snapshot: Snapshot = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse sandbox file: {}", path.display()))?;

    log::debug!(
        "Loaded sandbox from {} ({} users)",
        path.display(),
        snapshot.users.len()
    );
    Ok(MemoryRemote::from_snapshot(snapshot))
}

pub fn persist(path: &Path, remote: &MemoryRemote) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create sandbox directory: {}", dir.display()))?;
    }
    let content = serde_json::to_string_pretty(&remote.snapshot())
        .context("Failed to serialize sandbox to JSON")?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write sandbox file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apikey::{CancelToken, CreateRequest, IdentityRef, RemoteClient};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_persist_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sandbox.json");

        let remote = open(&path).unwrap();
        let user = IdentityRef::new("u1");
        remote.add_user(&user);
        let key = remote
            .create(
                &CreateRequest {
                    user_id: user.clone(),
                    key_value: "K1".into(),
                    attributes: BTreeMap::new(),
                },
                &CancelToken::new(),
            )
            .unwrap();
        persist(&path, &remote).unwrap();

        let reopened = open(&path).unwrap();
        let fetched = reopened
            .get(&user, &key.fingerprint, &CancelToken::new())
            .unwrap();
        assert_eq!(fetched, key);
    }
}
