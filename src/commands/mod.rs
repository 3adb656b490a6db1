pub mod keys;
pub mod list;
pub mod user;

use anyhow::{Context as _, Result};
use apikey::{CancelToken, MemoryRemote, Reconciler, ResourceDescriptor};
use std::path::PathBuf;
use std::sync::Arc;

use crate::Context;
use crate::config::Settings;
use crate::sandbox;
use crate::state::KeywardState;

/// Settings, tracked state and remote for one invocation
pub struct Session {
    pub settings: Settings,
    pub state: KeywardState,
    pub remote: Arc<MemoryRemote>,
    state_path: PathBuf,
    sandbox_path: PathBuf,
}

impl Session {
    pub fn open(ctx: &Context) -> Result<Self> {
        let settings = Settings::load(ctx.config.as_deref())?;
        let state_path = settings.state_path()?;
        let sandbox_path = settings.sandbox_path()?;

        Ok(Self {
            state: KeywardState::load(&state_path)?,
            remote: Arc::new(sandbox::open(&sandbox_path)?),
            settings,
            state_path,
            sandbox_path,
        })
    }

    /// Persist tracked state and the sandbox
    pub fn save(&mut self) -> Result<()> {
        sandbox::persist(&self.sandbox_path, &self.remote)?;
        self.state.save(&self.state_path)
    }

    /// Reconciler for a slot, restored from its checkpoint when tracked
    pub fn reconciler(&self, slot: &str) -> Result<Reconciler<Arc<MemoryRemote>>> {
        let remote = Arc::clone(&self.remote);
        let config = self.settings.reconciler_config();
        match self.state.get(slot) {
            Some(checkpoint) => {
                Reconciler::restore(remote, ResourceDescriptor::api_key(), config, checkpoint)
                    .with_context(|| format!("State of slot '{slot}' is unusable"))
            }
            None => Ok(Reconciler::new(remote, ResourceDescriptor::api_key(), config)),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        CancelToken::new()
    }
}
