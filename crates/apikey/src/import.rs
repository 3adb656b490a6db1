//! Import - reconstruct local state for a credential created elsewhere

use crate::cancel::CancelToken;
use crate::config::ReconcilerConfig;
use crate::error::{Error, Operation, RemoteFailure, Result};
use crate::remote::RemoteClient;
use crate::types::{ObservedState, ResourceId};

/// Resolves raw import ids against the remote
pub struct ImportResolver<R> {
    remote: R,
    config: ReconcilerConfig,
}

impl<R: RemoteClient> ImportResolver<R> {
    pub fn new(remote: R, config: ReconcilerConfig) -> Self {
        Self { remote, config }
    }

    /// Import the credential named by `raw_id` (`users/<user>/apiKeys/<fingerprint>`).
    ///
    /// The principal's keys are listed and the one with a matching
    /// fingerprint becomes the observed state, populated exactly as a create
    /// would populate it. Keys the remote is deleting do not match.
    pub fn import(&self, raw_id: &str, cancel: &CancelToken) -> Result<ObservedState> {
        let op = Operation::Import;
        let id: ResourceId = raw_id.parse().map_err(|source| Error::MalformedId {
            op,
            raw: raw_id.to_string(),
            source,
        })?;
        let target = id.to_string();

        let cancel = cancel.or_timeout(self.config.operation_timeout);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { op, target });
        }

        log::debug!("Importing {}", target);
        let keys = match self.remote.list(id.identity(), &cancel) {
            Ok(keys) => keys,
            Err(RemoteFailure::NotFound) => return Err(Error::NotFound { op, target }),
            Err(RemoteFailure::Cancelled) => return Err(Error::Cancelled { op, target }),
            Err(source) => return Err(Error::Remote { op, target, source }),
        };

        let key = keys
            .iter()
            .filter(|k| !(self.config.treat_deleted_as_absent && k.lifecycle_state.is_gone()))
            .find(|k| &k.fingerprint == id.fingerprint())
            .ok_or_else(|| Error::NotFound {
                op,
                target: target.clone(),
            })?;

        log::info!("Imported {}", target);
        Ok(ObservedState::from_remote(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::{MemoryRemote, RemoteOp};
    use crate::remote::CreateRequest;
    use crate::types::{IdentityRef, LifecycleState};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn seeded() -> (Arc<MemoryRemote>, ResourceId) {
        let remote = Arc::new(MemoryRemote::new());
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
        (remote, ResourceId::new(user, key.fingerprint))
    }

    #[test]
    fn test_import_existing() {
        let (remote, id) = seeded();
        let resolver = ImportResolver::new(remote, ReconcilerConfig::default());
        let observed = resolver.import(&id.to_string(), &CancelToken::new()).unwrap();
        assert_eq!(observed.id(), &id);
        assert_eq!(observed.key_value(), "K1");
    }

    #[test]
    fn test_import_malformed_is_validation() {
        let (remote, _) = seeded();
        let resolver = ImportResolver::new(remote, ReconcilerConfig::default());
        for raw in ["", "u1/aa", "users/u1/apiKeys/", "users//apiKeys/aa"] {
            let err = resolver.import(raw, &CancelToken::new()).unwrap_err();
            assert!(err.is_validation(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn test_import_missing() {
        let (remote, id) = seeded();
        let resolver = ImportResolver::new(Arc::clone(&remote), ReconcilerConfig::default());

        let err = resolver
            .import(&format!("users/{}/apiKeys/ff:ff", id.identity()), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = resolver
            .import("users/nobody/apiKeys/ff:ff", &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        remote.set_lifecycle_state(id.identity(), id.fingerprint(), LifecycleState::Deleting);
        let err = resolver.import(&id.to_string(), &CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_import_interrupted_list_is_cancelled() {
        let (remote, id) = seeded();
        remote.fail_next(RemoteOp::List, RemoteFailure::Cancelled);
        let resolver = ImportResolver::new(remote, ReconcilerConfig::default());
        let err = resolver.import(&id.to_string(), &CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_import_identity_with_slash() {
        let remote = Arc::new(MemoryRemote::new());
        let user = IdentityRef::new("team/ci");
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
        let id = ResourceId::new(user, key.fingerprint.clone());

        let resolver = ImportResolver::new(remote, ReconcilerConfig::default());
        let observed = resolver.import(&id.to_string(), &CancelToken::new()).unwrap();
        assert_eq!(observed, ObservedState::from_remote(&key));
    }
}
