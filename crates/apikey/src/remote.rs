//! Remote client abstraction
//!
//! The [`RemoteClient`] trait is the only way the core reaches the cloud
//! identity service. Transport, authentication and retry/backoff live in the
//! implementation; the core issues each call once and classifies the result.

use crate::cancel::CancelToken;
use crate::descriptor::attr;
use crate::error::RemoteFailure;
use crate::types::{DesiredConfig, Fingerprint, IdentityRef, LifecycleState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of a single remote call
pub type RemoteResult<T> = std::result::Result<T, RemoteFailure>;

/// A credential as reported by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteApiKey {
    pub user_id: IdentityRef,
    pub fingerprint: Fingerprint,
    pub key_value: String,
    pub lifecycle_state: LifecycleState,
    pub time_created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactive_status: Option<i64>,
    /// Attributes beyond the core set, as echoed back by the service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Payload of a create call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub user_id: IdentityRef,
    pub key_value: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl CreateRequest {
    /// Split a validated desired configuration into a create payload.
    ///
    /// Returns `None` when the owning user or key material is missing.
    pub fn from_config(desired: &DesiredConfig) -> Option<Self> {
        let user_id = desired.user_id()?;
        let key_value = desired.key_value()?.to_string();
        let attributes = desired
            .attributes()
            .filter(|(name, _)| !attr::CORE.contains(name))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Some(Self {
            user_id,
            key_value,
            attributes,
        })
    }
}

/// Attribute changes for an in-place update; `None` unsets the attribute
pub type AttributeChanges = BTreeMap<String, Option<String>>;

/// Calls the core makes against the identity service.
///
/// Every call receives the caller's [`CancelToken`]. An implementation that
/// abandons an outstanding call because of it must report
/// [`RemoteFailure::Cancelled`]; the core then treats the effect as unknown.
pub trait RemoteClient: Send + Sync {
    /// Register a new credential under a principal.
    fn create(&self, request: &CreateRequest, cancel: &CancelToken) -> RemoteResult<RemoteApiKey>;

    /// Fetch one credential; [`RemoteFailure::NotFound`] when absent.
    fn get(
        &self,
        user_id: &IdentityRef,
        fingerprint: &Fingerprint,
        cancel: &CancelToken,
    ) -> RemoteResult<RemoteApiKey>;

    /// List every credential of a principal in one bounded call;
    /// [`RemoteFailure::NotFound`] when the principal does not exist.
    fn list(&self, user_id: &IdentityRef, cancel: &CancelToken) -> RemoteResult<Vec<RemoteApiKey>>;

    /// Remove a credential; [`RemoteFailure::NotFound`] when already absent.
    fn delete(
        &self,
        user_id: &IdentityRef,
        fingerprint: &Fingerprint,
        cancel: &CancelToken,
    ) -> RemoteResult<()>;

    /// Apply in-place changes to non-force-new attributes.
    ///
    /// API keys have no such attributes, so the default reports the call
    /// as unsupported.
    fn update(
        &self,
        _user_id: &IdentityRef,
        _fingerprint: &Fingerprint,
        _changes: &AttributeChanges,
        _cancel: &CancelToken,
    ) -> RemoteResult<RemoteApiKey> {
        Err(RemoteFailure::Unsupported("update"))
    }
}

impl<T: RemoteClient + ?Sized> RemoteClient for Arc<T> {
    fn create(&self, request: &CreateRequest, cancel: &CancelToken) -> RemoteResult<RemoteApiKey> {
        (**self).create(request, cancel)
    }

    fn get(
        &self,
        user_id: &IdentityRef,
        fingerprint: &Fingerprint,
        cancel: &CancelToken,
    ) -> RemoteResult<RemoteApiKey> {
        (**self).get(user_id, fingerprint, cancel)
    }

    fn list(&self, user_id: &IdentityRef, cancel: &CancelToken) -> RemoteResult<Vec<RemoteApiKey>> {
        (**self).list(user_id, cancel)
    }

    fn delete(
        &self,
        user_id: &IdentityRef,
        fingerprint: &Fingerprint,
        cancel: &CancelToken,
    ) -> RemoteResult<()> {
        (**self).delete(user_id, fingerprint, cancel)
    }

    fn update(
        &self,
        user_id: &IdentityRef,
        fingerprint: &Fingerprint,
        changes: &AttributeChanges,
        cancel: &CancelToken,
    ) -> RemoteResult<RemoteApiKey> {
        (**self).update(user_id, fingerprint, changes, cancel)
    }
}
