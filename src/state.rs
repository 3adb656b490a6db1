use anyhow::{Context, Result};
use apikey::Checkpoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Tracked keys, by slot name
///
/// A slot keeps interrupted work next to its last observed record, so an
/// interruption in one run still demands a refresh in the next.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KeywardState {
    #[serde(default)]
    pub slots: BTreeMap<String, Checkpoint>,

    /// Last time the state was updated
    pub last_updated: DateTime<Utc>,
}

impl Default for KeywardState {
    fn default() -> Self {
        Self {
            slots: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

impl KeywardState {
    /// Load state from disk, or return default if file doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("State file does not exist, using default state");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!("Loaded state from {}", path.display());
        Ok(state)
    }

    /// Stamp and save state to disk
    pub fn save(&mut self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        self.last_updated = Utc::now();
        let content =
            serde_json::to_string_pretty(&self).context("Failed to serialize state to JSON")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }

    pub fn get(&self, slot: &str) -> Option<&Checkpoint> {
        self.slots.get(slot)
    }

    /// Record the current state of a slot; `None` stops tracking it
    pub fn set(&mut self, slot: &str, checkpoint: Option<Checkpoint>) {
        match checkpoint {
            Some(checkpoint) => {
                self.slots.insert(slot.to_string(), checkpoint);
            }
            None => {
                self.slots.remove(slot);
            }
        }
    }

    /// Slot currently tracking the key with resource id `id`
    pub fn slot_for(&self, id: &str) -> Option<&str> {
        self.slots
            .iter()
            .find(|(_, checkpoint)| checkpoint.id() == Some(id))
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apikey::{CreateRequest, IdentityRef, StateRecord};
    use tempfile::TempDir;

    fn record(id: &str) -> Checkpoint {
        Checkpoint::from(StateRecord {
            id: id.to_string(),
            attributes: BTreeMap::from([("state".to_string(), "ACTIVE".to_string())]),
        })
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let state = KeywardState::load(&dir.path().join("state.json")).unwrap();
        assert!(state.slots.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut state = KeywardState::default();
        state.set("ci", Some(record("users/u1/apiKeys/aa")));
        state.set("backup", Some(record("users/u2/apiKeys/bb")));
        state.set("backup", None);
        state.save(&path).unwrap();

        let loaded = KeywardState::load(&path).unwrap();
        assert_eq!(loaded.slots.len(), 1);
        assert_eq!(loaded.get("ci"), Some(&record("users/u1/apiKeys/aa")));
        assert_eq!(loaded.slot_for("users/u1/apiKeys/aa"), Some("ci"));
        assert_eq!(loaded.slot_for("users/u2/apiKeys/bb"), None);
    }

    #[test]
    fn test_interrupted_work_survives_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let pending = Checkpoint {
            record: None,
            refresh_required: true,
            pending: Some(CreateRequest {
                user_id: IdentityRef::new("u1"),
                key_value: "K1".to_string(),
                attributes: BTreeMap::new(),
            }),
        };
        let mut state = KeywardState::default();
        state.set("ci", Some(pending.clone()));
        state.save(&path).unwrap();

        let loaded = KeywardState::load(&path).unwrap();
        assert_eq!(loaded.get("ci"), Some(&pending));
        assert_eq!(loaded.slot_for("users/u1/apiKeys/(new)"), None);
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(KeywardState::load(&path).is_err());
    }
}
