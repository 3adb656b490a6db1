//! Path resolution for keyward
//!
//! # Environment Variables
//!
//! - `KEYWARD_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `XDG_CONFIG_HOME/keyward` (if set)
//! 2. Platform default:
//!    - Windows: `%APPDATA%\keyward`
//!    - macOS/Linux: `~/.config/keyward`
//!
//! For state_dir():
//! 1. `KEYWARD_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/keyward` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\keyward`
//!    - macOS/Linux: `~/.local/state/keyward`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "KEYWARD_STATE_DIR";

const APP: &str = "keyward";

/// Get the keyward config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join(APP));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join(APP))
}

/// Get the keyward state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            return Ok(local_app_data.join(APP));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".local").join("state").join(APP))
}

/// Expand `~` and environment variables in a path
///
/// Unknown variables are left as written.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Expand `path`, then anchor it at `base` if it is still relative
pub fn resolve(base: &Path, path: &str) -> PathBuf {
    let expanded = expand(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_state_dir_env_override() {
        let original = env::var(ENV_STATE_DIR).ok();
        // SAFETY: no other test reads this variable
        unsafe { env::set_var(ENV_STATE_DIR, "/custom/state") };
        let result = state_dir().unwrap();
        match original {
            // SAFETY: as above
            Some(v) => unsafe { env::set_var(ENV_STATE_DIR, v) },
            None => unsafe { env::remove_var(ENV_STATE_DIR) },
        }
        assert_eq!(result, PathBuf::from("/custom/state"));
    }

    #[test]
    fn test_expand_with_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand("~/keys/ci.pem"), home.join("keys").join("ci.pem"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let path = expand("$KEYWARD_SURELY_UNSET_VAR/x");
        assert_eq!(path, PathBuf::from("$KEYWARD_SURELY_UNSET_VAR/x"));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let base = Path::new("/etc/keyward");
        assert_eq!(resolve(base, "ci.pem"), PathBuf::from("/etc/keyward/ci.pem"));
        assert_eq!(resolve(base, "/tmp/ci.pem"), PathBuf::from("/tmp/ci.pem"));
    }
}
