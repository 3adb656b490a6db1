//! In-memory remote
//!
//! A [`RemoteClient`] that keeps credentials in process memory. Used by the
//! tests and by the CLI sandbox, which persists a [`Snapshot`] between runs.
//! Failures can be scripted per call kind with [`MemoryRemote::fail_next`]
//! and [`MemoryRemote::interrupt_next`].

use crate::cancel::CancelToken;
use crate::error::RemoteFailure;
use crate::remote::{AttributeChanges, CreateRequest, RemoteApiKey, RemoteClient, RemoteResult};
use crate::types::{Fingerprint, IdentityRef, LifecycleState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Keys a principal may hold at once
pub const DEFAULT_KEY_LIMIT: usize = 3;

/// Kind of remote call, for scripting faults and counting calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Create,
    Get,
    List,
    Delete,
    Update,
}

#[derive(Debug, Clone)]
enum Fault {
    /// Fail without touching the store
    Fail(RemoteFailure),
    /// Apply the call, then report it as cancelled in flight
    Interrupt,
}

/// Persistable contents of a [`MemoryRemote`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub users: BTreeMap<IdentityRef, Vec<RemoteApiKey>>,
}

/// In-memory identity service
#[derive(Debug)]
pub struct MemoryRemote {
    store: Mutex<Snapshot>,
    faults: Mutex<HashMap<RemoteOp, VecDeque<Fault>>>,
    calls: Mutex<HashMap<RemoteOp, usize>>,
    key_limit: usize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::from_snapshot(Snapshot::default())
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            store: Mutex::new(snapshot),
            faults: Mutex::default(),
            calls: Mutex::default(),
            key_limit: DEFAULT_KEY_LIMIT,
        }
    }

    pub fn with_key_limit(mut self, limit: usize) -> Self {
        self.key_limit = limit;
        self
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store().clone()
    }

    /// Register a principal; adding an existing one is a no-op
    pub fn add_user(&self, user: &IdentityRef) {
        self.store().users.entry(user.clone()).or_default();
    }

    /// Make the next call of `op` fail with `failure`
    pub fn fail_next(&self, op: RemoteOp, failure: RemoteFailure) {
        self.push_fault(op, Fault::Fail(failure));
    }

    /// Make the next call of `op` take effect but report
    /// [`RemoteFailure::Cancelled`]
    pub fn interrupt_next(&self, op: RemoteOp) {
        self.push_fault(op, Fault::Interrupt);
    }

    /// Number of calls of `op` received so far, faulted ones included
    pub fn calls(&self, op: RemoteOp) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// Delete a key behind the reconciler's back
    pub fn remove_out_of_band(&self, user: &IdentityRef, fingerprint: &Fingerprint) -> bool {
        let mut store = self.store();
        let Some(keys) = store.users.get_mut(user) else {
            return false;
        };
        let before = keys.len();
        keys.retain(|k| &k.fingerprint != fingerprint);
        keys.len() != before
    }

    /// Force the lifecycle state of a stored key
    pub fn set_lifecycle_state(
        &self,
        user: &IdentityRef,
        fingerprint: &Fingerprint,
        state: LifecycleState,
    ) -> bool {
        let mut store = self.store();
        match find_mut(&mut store, user, fingerprint) {
            Some(key) => {
                key.lifecycle_state = state;
                true
            }
            None => false,
        }
    }

    fn store(&self) -> MutexGuard<'_, Snapshot> {
        lock(&self.store)
    }

    fn push_fault(&self, op: RemoteOp, fault: Fault) {
        lock(&self.faults).entry(op).or_default().push_back(fault);
    }

    /// Count the call and pop its scripted fault, if any
    fn enter(&self, op: RemoteOp, cancel: &CancelToken) -> RemoteResult<bool> {
        *lock(&self.calls).entry(op).or_default() += 1;
        if cancel.is_cancelled() {
            return Err(RemoteFailure::Cancelled);
        }
        match lock(&self.faults).get_mut(&op).and_then(VecDeque::pop_front) {
            Some(Fault::Fail(failure)) => Err(failure),
            Some(Fault::Interrupt) => Ok(true),
            None => Ok(false),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn find_mut<'a>(
    store: &'a mut Snapshot,
    user: &IdentityRef,
    fingerprint: &Fingerprint,
) -> Option<&'a mut RemoteApiKey> {
    store
        .users
        .get_mut(user)?
        .iter_mut()
        .find(|k| &k.fingerprint == fingerprint)
}

fn interrupted<T>(interrupt: bool, value: T) -> RemoteResult<T> {
    if interrupt {
        Err(RemoteFailure::Cancelled)
    } else {
        Ok(value)
    }
}

/// Fingerprint the service would compute for `key_value`.
///
/// Surrounding whitespace and line-ending style do not change it.
pub fn fingerprint_of(key_value: &str) -> Fingerprint {
    let normalized = key_value.trim().replace("\r\n", "\n");
    let hash = blake3::hash(normalized.as_bytes());
    let mut out = String::with_capacity(47);
    for (i, byte) in hash.as_bytes()[..16].iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{byte:02x}");
    }
    Fingerprint::new(out)
}

impl RemoteClient for MemoryRemote {
    fn create(&self, request: &CreateRequest, cancel: &CancelToken) -> RemoteResult<RemoteApiKey> {
        let interrupt = self.enter(RemoteOp::Create, cancel)?;
        let mut store = self.store();
        let keys = store
            .users
            .get_mut(&request.user_id)
            .ok_or(RemoteFailure::NotFound)?;

        let fingerprint = fingerprint_of(&request.key_value);
        let live: Vec<_> = keys.iter().filter(|k| !k.lifecycle_state.is_gone()).collect();
        if live.iter().any(|k| k.fingerprint == fingerprint) {
            return Err(RemoteFailure::Service {
                status: 409,
                message: format!("key {fingerprint} already registered"),
            });
        }
        if live.len() >= self.key_limit {
            return Err(RemoteFailure::Service {
                status: 409,
                message: format!("user already holds {} keys", self.key_limit),
            });
        }

        keys.retain(|k| k.fingerprint != fingerprint);
        let key = RemoteApiKey {
            user_id: request.user_id.clone(),
            fingerprint,
            key_value: request.key_value.clone(),
            lifecycle_state: LifecycleState::Active,
            time_created: Utc::now(),
            inactive_status: None,
            attributes: request.attributes.clone(),
        };
        keys.push(key.clone());
        interrupted(interrupt, key)
    }

    fn get(
        &self,
        user_id: &IdentityRef,
        fingerprint: &Fingerprint,
        cancel: &CancelToken,
    ) -> RemoteResult<RemoteApiKey> {
        let interrupt = self.enter(RemoteOp::Get, cancel)?;
        let mut store = self.store();
        let key = find_mut(&mut store, user_id, fingerprint)
            .ok_or(RemoteFailure::NotFound)?
            .clone();
        interrupted(interrupt, key)
    }

    fn list(&self, user_id: &IdentityRef, cancel: &CancelToken) -> RemoteResult<Vec<RemoteApiKey>> {
        let interrupt = self.enter(RemoteOp::List, cancel)?;
        let keys = self
            .store()
            .users
            .get(user_id)
            .cloned()
            .ok_or(RemoteFailure::NotFound)?;
        interrupted(interrupt, keys)
    }

    fn delete(
        &self,
        user_id: &IdentityRef,
        fingerprint: &Fingerprint,
        cancel: &CancelToken,
    ) -> RemoteResult<()> {
        let interrupt = self.enter(RemoteOp::Delete, cancel)?;
        let mut store = self.store();
        let keys = store.users.get_mut(user_id).ok_or(RemoteFailure::NotFound)?;
        let before = keys.len();
        keys.retain(|k| &k.fingerprint != fingerprint);
        if keys.len() == before {
            return Err(RemoteFailure::NotFound);
        }
        interrupted(interrupt, ())
    }

    fn update(
        &self,
        user_id: &IdentityRef,
        fingerprint: &Fingerprint,
        changes: &AttributeChanges,
        cancel: &CancelToken,
    ) -> RemoteResult<RemoteApiKey> {
        let interrupt = self.enter(RemoteOp::Update, cancel)?;
        if let Some(name) = changes
            .keys()
            .find(|name| crate::descriptor::attr::CORE.contains(&name.as_str()))
        {
            return Err(RemoteFailure::Service {
                status: 400,
                message: format!("attribute {name} cannot be updated"),
            });
        }

        let mut store = self.store();
        let key = find_mut(&mut store, user_id, fingerprint).ok_or(RemoteFailure::NotFound)?;
        for (name, value) in changes {
            match value {
                Some(value) => key.attributes.insert(name.clone(), value.clone()),
                None => key.attributes.remove(name),
            };
        }
        interrupted(interrupt, key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(user: &IdentityRef, key: &str) -> CreateRequest {
        CreateRequest {
            user_id: user.clone(),
            key_value: key.into(),
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_fingerprint_ignores_whitespace() {
        let fp = fingerprint_of("KEY\n");
        assert_eq!(fp, fingerprint_of("  KEY"));
        assert_ne!(fp, fingerprint_of("OTHER"));
        assert_eq!(fp.as_str().split(':').count(), 16);
    }

    #[test]
    fn test_create_requires_known_user() {
        let remote = MemoryRemote::new();
        let user = IdentityRef::new("u1");
        let err = remote.create(&request(&user, "K1"), &CancelToken::new()).unwrap_err();
        assert_eq!(err, RemoteFailure::NotFound);
    }

    #[test]
    fn test_duplicate_and_limit() {
        let remote = MemoryRemote::new().with_key_limit(2);
        let user = IdentityRef::new("u1");
        remote.add_user(&user);
        let cancel = CancelToken::new();

        remote.create(&request(&user, "K1"), &cancel).unwrap();
        let dup = remote.create(&request(&user, "K1\n"), &cancel).unwrap_err();
        assert!(matches!(dup, RemoteFailure::Service { status: 409, .. }));

        remote.create(&request(&user, "K2"), &cancel).unwrap();
        let full = remote.create(&request(&user, "K3"), &cancel).unwrap_err();
        assert!(matches!(full, RemoteFailure::Service { status: 409, .. }));
        assert_eq!(remote.calls(RemoteOp::Create), 4);
    }

    #[test]
    fn test_scripted_faults() {
        let remote = MemoryRemote::new();
        let user = IdentityRef::new("u1");
        remote.add_user(&user);
        let cancel = CancelToken::new();

        remote.fail_next(RemoteOp::Create, RemoteFailure::Transport("reset".into()));
        assert!(remote.create(&request(&user, "K1"), &cancel).is_err());
        assert!(remote.list(&user, &cancel).unwrap().is_empty());

        remote.interrupt_next(RemoteOp::Create);
        assert_eq!(
            remote.create(&request(&user, "K1"), &cancel).unwrap_err(),
            RemoteFailure::Cancelled
        );
        assert_eq!(remote.list(&user, &cancel).unwrap().len(), 1);
    }

    #[test]
    fn test_update_rejects_core_attributes() {
        let remote = MemoryRemote::new();
        let user = IdentityRef::new("u1");
        remote.add_user(&user);
        let cancel = CancelToken::new();
        let key = remote.create(&request(&user, "K1"), &cancel).unwrap();

        let changes = AttributeChanges::from([("key_value".to_string(), Some("K2".to_string()))]);
        assert!(remote.update(&user, &key.fingerprint, &changes, &cancel).is_err());

        let changes = AttributeChanges::from([("description".to_string(), Some("ci".to_string()))]);
        let updated = remote.update(&user, &key.fingerprint, &changes, &cancel).unwrap();
        assert_eq!(updated.attributes["description"], "ci");
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let remote = MemoryRemote::new();
        let user = IdentityRef::new("u1");
        remote.add_user(&user);
        remote.create(&request(&user, "K1"), &CancelToken::new()).unwrap();

        let json = serde_json::to_string(&remote.snapshot()).unwrap();
        let restored = MemoryRemote::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.snapshot(), remote.snapshot());
    }
}
