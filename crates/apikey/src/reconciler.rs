//! State reconciler - drives one credential through its lifecycle
//!
//! ```text
//! NotExist → Creating → Active → Updating → Active
//!                          │  └─→ Replacing → Creating → Active
//!                          └─→ Deleting → NotExist
//! ```
//!
//! Each [`Reconciler`] owns the record of exactly one instance and shares no
//! mutable state with other reconcilers. At most one operation runs on an
//! instance at a time; a concurrent call is rejected rather than queued.

use crate::cancel::CancelToken;
use crate::config::ReconcilerConfig;
use crate::descriptor::{Comparison, ResourceDescriptor, attr};
use crate::diff::{Action, diff};
use crate::error::{ConfigError, Error, Operation, RemoteFailure, Result};
use crate::remote::{AttributeChanges, CreateRequest, RemoteClient};
use crate::types::{DesiredConfig, ObservedState, ResourceId, StateRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Local phase of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    NotExist,
    Creating,
    Active,
    Updating,
    Replacing,
    Deleting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotExist => "not-exist",
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Updating => "updating",
            Self::Replacing => "replacing",
            Self::Deleting => "deleting",
        };
        f.write_str(name)
    }
}

/// Result of [`Reconciler::apply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created(ObservedState),
    Updated(ObservedState),
    Replaced {
        previous: ResourceId,
        current: ObservedState,
    },
    Unchanged(ObservedState),
}

impl Outcome {
    pub fn state(&self) -> &ObservedState {
        match self {
            Self::Created(s) | Self::Updated(s) | Self::Unchanged(s) => s,
            Self::Replaced { current, .. } => current,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged(_))
    }
}

#[derive(Debug)]
struct Record {
    phase: Phase,
    observed: Option<ObservedState>,
    /// A remote call was interrupted; nothing may mutate until a read
    refresh_required: bool,
    /// Create whose outcome is unknown; a read looks for it by key material
    pending: Option<CreateRequest>,
}

impl Record {
    fn empty() -> Self {
        Self {
            phase: Phase::NotExist,
            observed: None,
            refresh_required: false,
            pending: None,
        }
    }

    fn active(observed: ObservedState) -> Self {
        Self {
            phase: Phase::Active,
            observed: Some(observed),
            refresh_required: false,
            pending: None,
        }
    }

    fn settle_active(&mut self, observed: ObservedState) {
        *self = Self::active(observed);
    }

    fn settle_absent(&mut self) {
        *self = Self::empty();
    }
}

/// Persisted form of one reconciler.
///
/// Besides the last observed record it carries interrupted work: the
/// refresh-required mark and a create whose outcome is unknown. Restoring
/// from it keeps mutations blocked until a read settles that work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<StateRecord>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub refresh_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<CreateRequest>,
}

impl Checkpoint {
    /// Resource id of the tracked object, if one is known
    pub fn id(&self) -> Option<&str> {
        self.record.as_ref().map(|r| r.id.as_str())
    }
}

impl From<StateRecord> for Checkpoint {
    fn from(record: StateRecord) -> Self {
        Self {
            record: Some(record),
            ..Self::default()
        }
    }
}

/// Marks an instance busy for the lifetime of one operation
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reconciles one API key instance against the remote
pub struct Reconciler<R> {
    remote: R,
    descriptor: Arc<ResourceDescriptor>,
    config: ReconcilerConfig,
    record: Mutex<Record>,
    busy: AtomicBool,
}

impl<R: RemoteClient> Reconciler<R> {
    /// A reconciler for an instance that does not exist yet
    pub fn new(remote: R, descriptor: Arc<ResourceDescriptor>, config: ReconcilerConfig) -> Self {
        Self::with_record(remote, descriptor, config, Record::empty())
    }

    /// A reconciler for an existing object, e.g. one reconstructed by import
    pub fn adopt(
        remote: R,
        descriptor: Arc<ResourceDescriptor>,
        config: ReconcilerConfig,
        observed: ObservedState,
    ) -> Self {
        Self::with_record(remote, descriptor, config, Record::active(observed))
    }

    /// A reconciler resumed from a persisted record
    pub fn resume(
        remote: R,
        descriptor: Arc<ResourceDescriptor>,
        config: ReconcilerConfig,
        record: &StateRecord,
    ) -> Result<Self> {
        let observed = ObservedState::from_record(record)?;
        Ok(Self::adopt(remote, descriptor, config, observed))
    }

    /// A reconciler restored from a [`Checkpoint`], interrupted work included
    pub fn restore(
        remote: R,
        descriptor: Arc<ResourceDescriptor>,
        config: ReconcilerConfig,
        checkpoint: &Checkpoint,
    ) -> Result<Self> {
        let observed = checkpoint
            .record
            .as_ref()
            .map(ObservedState::from_record)
            .transpose()?;
        let record = Record {
            phase: if observed.is_some() {
                Phase::Active
            } else {
                Phase::NotExist
            },
            observed,
            refresh_required: checkpoint.refresh_required,
            pending: checkpoint.pending.clone(),
        };
        Ok(Self::with_record(remote, descriptor, config, record))
    }

    fn with_record(
        remote: R,
        descriptor: Arc<ResourceDescriptor>,
        config: ReconcilerConfig,
        record: Record,
    ) -> Self {
        Self {
            remote,
            descriptor,
            config,
            record: Mutex::new(record),
            busy: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn observed(&self) -> Option<ObservedState> {
        self.lock().observed.clone()
    }

    pub fn resource_id(&self) -> Option<ResourceId> {
        self.lock().observed.as_ref().map(|o| o.id().clone())
    }

    /// Whether an interrupted call requires a [`read`](Self::read) first
    pub fn needs_refresh(&self) -> bool {
        self.lock().refresh_required
    }

    /// Persisted form of the current state, `None` when nothing exists
    pub fn record(&self) -> Option<StateRecord> {
        self.lock().observed.as_ref().map(ObservedState::to_record)
    }

    /// Everything needed to [`restore`](Self::restore) this instance, `None`
    /// when nothing exists and no work is outstanding
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        let record = self.lock();
        if record.observed.is_none() && record.pending.is_none() && !record.refresh_required {
            return None;
        }
        Some(Checkpoint {
            record: record.observed.as_ref().map(ObservedState::to_record),
            refresh_required: record.refresh_required,
            pending: record.pending.clone(),
        })
    }

    /// Classify what [`apply`](Self::apply) would do, without remote calls
    pub fn plan(&self, desired: &DesiredConfig) -> Action {
        diff(&self.descriptor, desired, self.lock().observed.as_ref())
    }

    /// Create the remote object. Valid only while nothing exists.
    pub fn create(&self, desired: &DesiredConfig, cancel: &CancelToken) -> Result<ObservedState> {
        let op = Operation::Create;
        let target = pending_target(desired);
        let _busy = self.begin(op, &target)?;

        {
            let record = self.lock();
            self.ensure_refreshed(op, &record, &target)?;
            if record.phase != Phase::NotExist {
                return Err(Error::InvalidPhase {
                    op,
                    target,
                    phase: record.phase,
                });
            }
        }

        let request = self.create_request(op, desired, &target)?;
        let cancel = self.bounded(cancel);
        self.create_phase(op, &request, &cancel, &target)
    }

    /// Refresh from the remote.
    ///
    /// Returns `Ok(None)` when the object no longer exists; that moves the
    /// instance to [`Phase::NotExist`] and is not an error. A successful read
    /// clears the refresh-required mark.
    pub fn read(&self, cancel: &CancelToken) -> Result<Option<ObservedState>> {
        let op = Operation::Read;
        let _busy = self.begin(op, &self.current_target())?;
        let (observed, pending) = {
            let record = self.lock();
            (record.observed.clone(), record.pending.clone())
        };
        let target = self.current_target();
        let cancel = self.bounded(cancel);

        if let Some(observed) = observed {
            return self.refresh_existing(op, &observed, &cancel, &target);
        }
        if let Some(pending) = pending {
            return self.recover_pending(op, &pending, &cancel, &target);
        }

        self.lock().settle_absent();
        Ok(None)
    }

    /// Apply in-place changes. Valid only from [`Phase::Active`] and only when
    /// the diff allows it; a change that needs replacement is rejected and
    /// leaves the observed state untouched.
    pub fn update(&self, desired: &DesiredConfig, cancel: &CancelToken) -> Result<ObservedState> {
        let op = Operation::Update;
        let target = self
            .resource_id()
            .map_or_else(|| pending_target(desired), |id| id.to_string());
        let _busy = self.begin(op, &target)?;
        let current = self.active_snapshot(op)?;
        self.validate(op, desired, &target)?;

        let changed = match diff(&self.descriptor, desired, Some(&current)) {
            Action::NoOp => return Ok(current),
            Action::InPlaceUpdate { changed } => changed,
            Action::Replace { force_new } => {
                return Err(Error::ReplaceRequired {
                    target,
                    attributes: force_new.into_iter().collect(),
                });
            }
            Action::Create => {
                return Err(Error::InvalidPhase {
                    op,
                    target,
                    phase: Phase::NotExist,
                });
            }
        };

        let changes: AttributeChanges = changed
            .into_iter()
            .map(|name| {
                let value = desired.get(&name).map(str::to_string);
                (name, value)
            })
            .collect();

        let cancel = self.bounded(cancel);
        ensure_live(op, &cancel, &target)?;
        self.set_phase(Phase::Updating);
        log::debug!("Updating {} ({} attributes)", target, changes.len());

        match self
            .remote
            .update(current.user_id(), current.fingerprint(), &changes, &cancel)
        {
            Ok(key) => {
                let observed = ObservedState::from_remote(&key);
                self.lock().settle_active(observed.clone());
                log::info!("Updated {}", target);
                Ok(observed)
            }
            Err(source) => {
                self.set_phase(Phase::Active);
                Err(self.interrupted_or_remote(op, source, &target))
            }
        }
    }

    /// Destroy the current object and create its successor.
    ///
    /// Runs as two phases: delete the old object (already absent counts as
    /// deleted), then create the new one. If the delete fails nothing has
    /// changed. If the create fails the instance is left in
    /// [`Phase::NotExist`]; the old object is not restored. From
    /// [`Phase::NotExist`] this is a plain create.
    pub fn replace(&self, desired: &DesiredConfig, cancel: &CancelToken) -> Result<ObservedState> {
        let op = Operation::Replace;
        let target = self
            .resource_id()
            .map_or_else(|| pending_target(desired), |id| id.to_string());
        let _busy = self.begin(op, &target)?;

        let (phase, old) = {
            let record = self.lock();
            self.ensure_refreshed(op, &record, &target)?;
            (record.phase, record.observed.clone())
        };
        let request = self.create_request(op, desired, &target)?;
        let cancel = self.bounded(cancel);

        let old = match (phase, old) {
            (Phase::NotExist, _) => return self.create_phase(op, &request, &cancel, &target),
            (Phase::Active, Some(old)) => old,
            (phase, _) => return Err(Error::InvalidPhase { op, target, phase }),
        };

        if !matches!(
            diff(&self.descriptor, desired, Some(&old)),
            Action::Replace { .. }
        ) {
            return Err(Error::ReplaceNotRequired { target });
        }

        // Phase one: retire the old object
        ensure_live(op, &cancel, &target)?;
        self.set_phase(Phase::Replacing);
        log::debug!("Replacing {}: deleting old object", target);

        match self.remote.delete(old.user_id(), old.fingerprint(), &cancel) {
            Ok(()) => {}
            Err(RemoteFailure::NotFound) => {
                log::debug!("Old object {} was already gone", target);
            }
            Err(source) => {
                self.set_phase(Phase::Active);
                return Err(self.interrupted_or_remote(op, source, &target));
            }
        }
        self.lock().settle_absent();

        // Phase two: mint the successor
        let created = self.create_phase(op, &request, &cancel, &target)?;
        if created.id() == old.id() {
            log::warn!("Replacement of {} kept the same id", target);
        }
        log::info!("Replaced {} with {}", target, created.id());
        Ok(created)
    }

    /// Remove the remote object. Deleting something already absent, remotely
    /// or locally, succeeds.
    pub fn delete(&self, cancel: &CancelToken) -> Result<()> {
        let op = Operation::Delete;
        let target = self
            .resource_id()
            .map_or_else(|| "(nothing)".to_string(), |id| id.to_string());
        let _busy = self.begin(op, &target)?;

        let current = {
            let record = self.lock();
            self.ensure_refreshed(op, &record, &target)?;
            match (record.phase, &record.observed) {
                (Phase::NotExist, _) => None,
                (Phase::Active, Some(observed)) => Some(observed.clone()),
                (phase, _) => return Err(Error::InvalidPhase { op, target, phase }),
            }
        };
        let Some(current) = current else {
            log::debug!("Delete: nothing to delete");
            return Ok(());
        };

        let cancel = self.bounded(cancel);
        ensure_live(op, &cancel, &target)?;
        self.set_phase(Phase::Deleting);

        match self
            .remote
            .delete(current.user_id(), current.fingerprint(), &cancel)
        {
            Ok(()) => {
                self.lock().settle_absent();
                log::info!("Deleted {}", target);
                Ok(())
            }
            Err(RemoteFailure::NotFound) => {
                self.lock().settle_absent();
                log::info!("{} was already deleted", target);
                Ok(())
            }
            Err(source) => {
                self.set_phase(Phase::Active);
                Err(self.interrupted_or_remote(op, source, &target))
            }
        }
    }

    /// Converge on `desired`: create, update, replace or leave alone as the
    /// diff dictates
    pub fn apply(&self, desired: &DesiredConfig, cancel: &CancelToken) -> Result<Outcome> {
        let (observed, refresh_required) = {
            let record = self.lock();
            (record.observed.clone(), record.refresh_required)
        };
        let action = diff(&self.descriptor, desired, observed.as_ref());
        if refresh_required {
            return Err(Error::IndeterminateState {
                op: action_operation(&action),
                target: observed
                    .as_ref()
                    .map_or_else(|| pending_target(desired), |o| o.id().to_string()),
            });
        }

        match action {
            Action::Create => self.create(desired, cancel).map(Outcome::Created),
            Action::NoOp => match observed {
                Some(current) => {
                    log::debug!("{} is up to date", current.id());
                    Ok(Outcome::Unchanged(current))
                }
                None => self.create(desired, cancel).map(Outcome::Created),
            },
            Action::InPlaceUpdate { .. } => self.update(desired, cancel).map(Outcome::Updated),
            Action::Replace { .. } => {
                let previous = observed.map(|o| o.id().clone());
                let current = self.replace(desired, cancel)?;
                Ok(match previous {
                    Some(previous) => Outcome::Replaced { previous, current },
                    None => Outcome::Created(current),
                })
            }
        }
    }

    fn create_phase(
        &self,
        op: Operation,
        request: &CreateRequest,
        cancel: &CancelToken,
        target: &str,
    ) -> Result<ObservedState> {
        ensure_live(op, cancel, target)?;
        self.set_phase(Phase::Creating);
        log::debug!("Creating API key for {}", request.user_id);

        match self.remote.create(request, cancel) {
            Ok(key) => {
                let observed = ObservedState::from_remote(&key);
                self.lock().settle_active(observed.clone());
                log::info!("Created {}", observed.id());
                Ok(observed)
            }
            Err(RemoteFailure::Cancelled) => {
                let mut record = self.lock();
                record.settle_absent();
                record.refresh_required = true;
                record.pending = Some(request.clone());
                Err(Error::IndeterminateState {
                    op,
                    target: target.to_string(),
                })
            }
            Err(source) => {
                self.lock().settle_absent();
                Err(Error::Remote {
                    op,
                    target: target.to_string(),
                    source,
                })
            }
        }
    }

    fn refresh_existing(
        &self,
        op: Operation,
        observed: &ObservedState,
        cancel: &CancelToken,
        target: &str,
    ) -> Result<Option<ObservedState>> {
        ensure_live(op, cancel, target)?;

        match self
            .remote
            .get(observed.user_id(), observed.fingerprint(), cancel)
        {
            Ok(key) if self.config.treat_deleted_as_absent && key.lifecycle_state.is_gone() => {
                log::warn!("{} is {} on the remote", target, key.lifecycle_state);
                self.lock().settle_absent();
                Ok(None)
            }
            Ok(key) => {
                let fresh = ObservedState::from_remote(&key);
                self.lock().settle_active(fresh.clone());
                Ok(Some(fresh))
            }
            Err(RemoteFailure::NotFound) => {
                log::warn!("{} was deleted outside of reconciliation", target);
                self.lock().settle_absent();
                Ok(None)
            }
            Err(source) => Err(self.interrupted_or_remote(op, source, target)),
        }
    }

    /// Find the object an interrupted create may have registered
    fn recover_pending(
        &self,
        op: Operation,
        pending: &CreateRequest,
        cancel: &CancelToken,
        target: &str,
    ) -> Result<Option<ObservedState>> {
        ensure_live(op, cancel, target)?;

        let keys = match self.remote.list(&pending.user_id, cancel) {
            Ok(keys) => keys,
            Err(RemoteFailure::NotFound) => Vec::new(),
            Err(source) => return Err(self.interrupted_or_remote(op, source, target)),
        };

        let comparison = self
            .descriptor
            .lookup(attr::KEY_VALUE)
            .map_or(Comparison::Exact, |spec| spec.comparison);
        let found = keys.into_iter().find(|k| {
            !(self.config.treat_deleted_as_absent && k.lifecycle_state.is_gone())
                && comparison.equivalent(&k.key_value, &pending.key_value)
        });

        let mut record = self.lock();
        match found {
            Some(key) => {
                let observed = ObservedState::from_remote(&key);
                log::info!("Recovered {} from interrupted create", observed.id());
                record.settle_active(observed.clone());
                Ok(Some(observed))
            }
            None => {
                record.settle_absent();
                Ok(None)
            }
        }
    }

    /// Display form of whatever the record currently tracks
    fn current_target(&self) -> String {
        let record = self.lock();
        match (&record.observed, &record.pending) {
            (Some(o), _) => o.id().to_string(),
            (None, Some(p)) => request_target(p),
            (None, None) => "(nothing)".to_string(),
        }
    }

    fn begin(&self, op: Operation, target: &str) -> Result<InFlight<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlight(&self.busy))
            .map_err(|_| Error::ConcurrentOperation {
                op,
                target: target.to_string(),
            })
    }

    fn lock(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: Phase) {
        self.lock().phase = phase;
    }

    fn bounded(&self, cancel: &CancelToken) -> CancelToken {
        cancel.or_timeout(self.config.operation_timeout)
    }

    fn ensure_refreshed(&self, op: Operation, record: &Record, target: &str) -> Result<()> {
        if record.refresh_required {
            return Err(Error::IndeterminateState {
                op,
                target: target.to_string(),
            });
        }
        Ok(())
    }

    /// Current state of an instance that must be active and refreshed
    fn active_snapshot(&self, op: Operation) -> Result<ObservedState> {
        let record = self.lock();
        let target = record
            .observed
            .as_ref()
            .map_or_else(|| "(nothing)".to_string(), |o| o.id().to_string());
        self.ensure_refreshed(op, &record, &target)?;
        match (&record.phase, &record.observed) {
            (Phase::Active, Some(observed)) => Ok(observed.clone()),
            (phase, _) => Err(Error::InvalidPhase {
                op,
                target,
                phase: *phase,
            }),
        }
    }

    fn validate(&self, op: Operation, desired: &DesiredConfig, target: &str) -> Result<()> {
        self.descriptor
            .validate(desired)
            .map_err(|source| Error::InvalidConfig {
                op,
                target: target.to_string(),
                source,
            })
    }

    fn create_request(
        &self,
        op: Operation,
        desired: &DesiredConfig,
        target: &str,
    ) -> Result<CreateRequest> {
        self.validate(op, desired, target)?;
        CreateRequest::from_config(desired).ok_or_else(|| Error::InvalidConfig {
            op,
            target: target.to_string(),
            source: ConfigError::MissingAttribute(attr::KEY_VALUE.to_string()),
        })
    }

    /// Cancellation while a call is outstanding leaves the effect unknown:
    /// keep the pre-call state and demand a refresh
    fn interrupted_or_remote(&self, op: Operation, source: RemoteFailure, target: &str) -> Error {
        let target = target.to_string();
        if source == RemoteFailure::Cancelled {
            self.lock().refresh_required = true;
            log::warn!("{} {} interrupted; refresh required", op, target);
            Error::IndeterminateState { op, target }
        } else {
            Error::Remote { op, target, source }
        }
    }
}

fn ensure_live(op: Operation, cancel: &CancelToken, target: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled {
            op,
            target: target.to_string(),
        });
    }
    Ok(())
}

/// Operation `apply` would dispatch for `action`; an unchanged instance
/// still needs its read
fn action_operation(action: &Action) -> Operation {
    match action {
        Action::Create => Operation::Create,
        Action::InPlaceUpdate { .. } => Operation::Update,
        Action::Replace { .. } => Operation::Replace,
        Action::NoOp => Operation::Read,
    }
}

fn pending_target(desired: &DesiredConfig) -> String {
    match desired.user_id() {
        Some(user) => format!("users/{user}/apiKeys/(new)"),
        None => "(unbound)".to_string(),
    }
}

fn request_target(request: &CreateRequest) -> String {
    format!("users/{}/apiKeys/(new)", request.user_id)
}
