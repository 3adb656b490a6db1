//! Desired key manifest (`keyward.toml`)
//!
//! ```toml
//! [keys.ci-deploy]
//! user_id = "ocid1.user.oc1..aaaa"
//! key_file = "keys/ci-deploy.pem"
//!
//! [keys.backup]
//! user_id = "ocid1.user.oc1..bbbb"
//! key_value = """
//! -----BEGIN PUBLIC KEY-----
//! ...
//! -----END PUBLIC KEY-----
//! """
//! ```

use anyhow::{Context, Result, bail};
use apikey::{DesiredConfig, IdentityRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub keys: BTreeMap<String, KeySlot>,

    /// Directory relative key files are resolved against
    #[serde(skip)]
    base_dir: PathBuf,
}

/// One named key slot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeySlot {
    pub user_id: String,
    #[serde(default)]
    pub key_file: Option<String>,
    #[serde(default)]
    pub key_value: Option<String>,
    /// Additional resource attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        let mut manifest: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;

        manifest.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        log::debug!(
            "Loaded manifest {} with {} keys",
            path.display(),
            manifest.keys.len()
        );
        Ok(manifest)
    }

    /// Desired configuration of every slot, in slot name order
    pub fn desired(&self) -> Result<Vec<(String, DesiredConfig)>> {
        self.keys
            .iter()
            .map(|(name, slot)| {
                let desired = slot
                    .desired(&self.base_dir)
                    .with_context(|| format!("Invalid key slot '{name}'"))?;
                Ok((name.clone(), desired))
            })
            .collect()
    }
}

impl KeySlot {
    fn desired(&self, base_dir: &Path) -> Result<DesiredConfig> {
        let key_value = match (&self.key_file, &self.key_value) {
            (Some(_), Some(_)) => bail!("set either key_file or key_value, not both"),
            (None, None) => bail!("one of key_file or key_value is required"),
            (None, Some(value)) => value.clone(),
            (Some(file), None) => {
                let path = paths::resolve(base_dir, file);
                fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read key file: {}", path.display()))?
            }
        };

        let mut desired = DesiredConfig::api_key(&IdentityRef::new(&self.user_id), key_value);
        for (name, value) in &self.attributes {
            desired.set(name, value);
        }
        Ok(desired)
    }
}
