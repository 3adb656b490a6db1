//! # Apikey
//!
//! Declarative reconciliation of API key credentials against a cloud
//! identity service.
//!
//! A credential is bound to one user principal and one public key. Neither
//! can change on a live credential: changing either means destroying the old
//! credential and creating a new one, which gets a new fingerprint and so a
//! new resource id.
//!
//! ## Core Concepts
//!
//! - **ResourceDescriptor**: Attribute names and whether each is force-new or computed
//! - **diff**: Classifies desired config vs observed state into an [`Action`]
//! - **Reconciler**: Drives one instance through create, read, update, replace and delete
//! - **ImportResolver**: Rebuilds observed state from a `users/<user>/apiKeys/<fingerprint>` id
//! - **Query**: Lists a principal's credentials and filters them by attribute
//!
//! ## Example
//!
//! ```ignore
//! use apikey::{
//!     CancelToken, DesiredConfig, IdentityRef, MemoryRemote, Reconciler,
//!     ReconcilerConfig, ResourceDescriptor,
//! };
//!
//! let remote = MemoryRemote::new();
//! let user = IdentityRef::new("ocid1.user.oc1..example");
//! remote.add_user(&user);
//!
//! let reconciler = Reconciler::new(remote, ResourceDescriptor::api_key(), ReconcilerConfig::default());
//! let key = reconciler.apply(&DesiredConfig::api_key(&user, pem), &CancelToken::new())?;
//! println!("{}", key.state().id());
//! ```
//!
//! ## Remote Client
//!
//! The crate never talks to a service directly. Callers provide a
//! [`RemoteClient`]; [`MemoryRemote`] is an in-process implementation for
//! tests and sandboxes.

pub mod cancel;
pub mod config;
pub mod descriptor;
pub mod diff;
pub mod error;
pub mod import;
pub mod memory;
pub mod query;
pub mod reconciler;
pub mod remote;
pub mod types;

// Re-export main types at crate root
pub use cancel::CancelToken;
pub use config::ReconcilerConfig;
pub use descriptor::{AttributeSpec, Comparison, Mutability, ResourceDescriptor};
pub use diff::{Action, Plan, PlanSummary, diff};
pub use error::{
    ConfigError, Error, ErrorCategory, ErrorKind, Operation, ParseIdError, RemoteFailure, Result,
};
pub use import::ImportResolver;
pub use memory::{MemoryRemote, RemoteOp, Snapshot, fingerprint_of};
pub use query::{FilterSpec, Query, QueryEngine, QueryResults};
pub use reconciler::{Checkpoint, Outcome, Phase, Reconciler};
pub use remote::{AttributeChanges, CreateRequest, RemoteApiKey, RemoteClient, RemoteResult};
pub use types::{
    DesiredConfig, Fingerprint, IdentityRef, LifecycleState, ObservedState, ResourceId,
    StateRecord,
};
