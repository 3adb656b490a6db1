//! Error types for API key reconciliation.
//!
//! Every error names the operation that failed and the object it was acting
//! on (a resource id, a raw import id or a principal). Errors are grouped by
//! [`ErrorKind`] and by [`ErrorCategory`] so callers can separate
//! configuration problems from transient remote problems from misuse.

use crate::reconciler::Phase;
use std::fmt;
use thiserror::Error;

/// Caller-facing operation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Replace,
    Delete,
    Import,
    Query,
    Resume,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Import => "import",
            Self::Query => "query",
            Self::Resume => "resume",
        };
        f.write_str(name)
    }
}

/// Failure reported by a [`RemoteClient`](crate::remote::RemoteClient).
///
/// The core never retries any of these; retry policy belongs to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteFailure {
    /// The principal or credential does not exist
    #[error("not found")]
    NotFound,

    /// The call was abandoned while outstanding; its effect is unknown
    #[error("cancelled while in flight")]
    Cancelled,

    /// The service answered with an error status
    #[error("service error {status}: {message}")]
    Service {
        /// Status code returned by the service
        status: u16,
        /// Message returned by the service
        message: String,
    },

    /// The request never produced a service response
    #[error("transport error: {0}")]
    Transport(String),

    /// The client does not implement this call
    #[error("{0} is not supported by this remote")]
    Unsupported(&'static str),
}

/// Reason a raw id could not be split into principal and fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIdError {
    #[error("expected users/<user>/apiKeys/<fingerprint>")]
    Layout,

    #[error("user segment is empty")]
    EmptyIdentity,

    #[error("fingerprint segment is empty")]
    EmptyFingerprint,
}

/// Problems with a desired configuration, found before any remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown attribute {0:?}")]
    UnknownAttribute(String),

    #[error("attribute {0:?} is computed by the remote and cannot be set")]
    ComputedAttribute(String),

    #[error("missing required attribute {0:?}")]
    MissingAttribute(String),

    #[error("attribute {0:?} must not be empty")]
    EmptyAttribute(String),
}

/// Taxonomy of failures, one per family of handling rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or a call the current state forbids; never retried
    Validation,
    /// The object does not exist
    NotFound,
    /// Opaque transport or service failure
    Remote,
    /// Another operation is already in flight on the same instance
    ConcurrentOperation,
    /// An interrupted remote call left the instance in an unknown state
    IndeterminateState,
    /// The caller cancelled and nothing was changed
    Cancelled,
}

/// Who has to act to get past an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The configuration or input needs fixing
    Configuration,
    /// The remote side misbehaved or the call was interrupted
    Transient,
    /// The caller broke the operation contract
    Misuse,
}

impl ErrorCategory {
    /// Short user-facing description of this category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Configuration => "Configuration problem",
            Self::Transient => "Transient remote problem",
            Self::Misuse => "Invalid use of the reconciler",
        }
    }

    /// Actionable advice for this category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Configuration => "Fix the configuration or identifier and try again",
            Self::Transient => "Refresh the resource state and retry the operation",
            Self::Misuse => "Check the operation order; refresh or replace as the plan requires",
        }
    }
}

/// Errors returned by the reconciler, import resolver and query engine.
#[derive(Debug, Error)]
pub enum Error {
    /// An import id could not be decomposed
    #[error("{op}: malformed resource id {raw:?}: {source}")]
    MalformedId {
        op: Operation,
        raw: String,
        #[source]
        source: ParseIdError,
    },

    /// A query filter names an attribute the resource does not have
    #[error("{op} {target}: unknown filter attribute {name:?}")]
    UnknownFilterAttribute {
        op: Operation,
        target: String,
        name: String,
    },

    /// A query filter cannot be evaluated
    #[error("{op} {target}: invalid filter {name:?}: {reason}")]
    InvalidFilter {
        op: Operation,
        target: String,
        name: String,
        reason: String,
    },

    /// The desired configuration does not satisfy the descriptor
    #[error("{op} {target}: invalid configuration: {source}")]
    InvalidConfig {
        op: Operation,
        target: String,
        #[source]
        source: ConfigError,
    },

    /// Update was asked for a change that can only be applied by replacement
    #[error("update {target}: changing {} requires replacement", .attributes.join(", "))]
    ReplaceRequired {
        target: String,
        attributes: Vec<String>,
    },

    /// Replace was asked for a change that does not touch a force-new attribute
    #[error("replace {target}: no force-new attribute changed")]
    ReplaceNotRequired { target: String },

    /// The operation is not valid in the instance's current phase
    #[error("{op} {target}: not valid while the instance is {phase}")]
    InvalidPhase {
        op: Operation,
        target: String,
        phase: Phase,
    },

    /// A persisted record is missing attributes or holds unparseable values
    #[error("resume {target}: corrupt state record: {reason}")]
    CorruptRecord { target: String, reason: String },

    /// The object to act on does not exist
    #[error("{op} {target}: not found")]
    NotFound { op: Operation, target: String },

    /// The remote client failed
    #[error("{op} {target}: remote error: {source}")]
    Remote {
        op: Operation,
        target: String,
        #[source]
        source: RemoteFailure,
    },

    /// Another operation holds the instance
    #[error("{op} {target}: another operation is already in flight on this instance")]
    ConcurrentOperation { op: Operation, target: String },

    /// A cancelled remote call left the state unknown; read before mutating
    #[error("{op} {target}: state unknown after an interrupted remote call, refresh required")]
    IndeterminateState { op: Operation, target: String },

    /// The caller's token was cancelled or expired before any change was made
    #[error("{op} {target}: cancelled")]
    Cancelled { op: Operation, target: String },
}

impl Error {
    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedId { .. }
            | Self::UnknownFilterAttribute { .. }
            | Self::InvalidFilter { .. }
            | Self::InvalidConfig { .. }
            | Self::ReplaceRequired { .. }
            | Self::ReplaceNotRequired { .. }
            | Self::InvalidPhase { .. }
            | Self::CorruptRecord { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Remote { .. } => ErrorKind::Remote,
            Self::ConcurrentOperation { .. } => ErrorKind::ConcurrentOperation,
            Self::IndeterminateState { .. } => ErrorKind::IndeterminateState,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Who has to act on this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedId { .. }
            | Self::UnknownFilterAttribute { .. }
            | Self::InvalidFilter { .. }
            | Self::InvalidConfig { .. }
            | Self::CorruptRecord { .. }
            | Self::NotFound { .. } => ErrorCategory::Configuration,
            Self::Remote {
                source: RemoteFailure::Unsupported(_),
                ..
            } => ErrorCategory::Misuse,
            Self::Remote { .. } | Self::IndeterminateState { .. } | Self::Cancelled { .. } => {
                ErrorCategory::Transient
            }
            Self::ReplaceRequired { .. }
            | Self::ReplaceNotRequired { .. }
            | Self::InvalidPhase { .. }
            | Self::ConcurrentOperation { .. } => ErrorCategory::Misuse,
        }
    }

    /// Whether this is a validation failure.
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// Operation that failed, when the error is tied to one.
    pub fn operation(&self) -> Operation {
        match self {
            Self::MalformedId { op, .. }
            | Self::UnknownFilterAttribute { op, .. }
            | Self::InvalidFilter { op, .. }
            | Self::InvalidConfig { op, .. }
            | Self::InvalidPhase { op, .. }
            | Self::NotFound { op, .. }
            | Self::Remote { op, .. }
            | Self::ConcurrentOperation { op, .. }
            | Self::IndeterminateState { op, .. }
            | Self::Cancelled { op, .. } => *op,
            Self::ReplaceRequired { .. } => Operation::Update,
            Self::ReplaceNotRequired { .. } => Operation::Replace,
            Self::CorruptRecord { .. } => Operation::Resume,
        }
    }
}

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let remote = Error::Remote {
            op: Operation::Create,
            target: "users/u1/apiKeys/-".into(),
            source: RemoteFailure::Transport("connection reset".into()),
        };
        assert_eq!(remote.kind(), ErrorKind::Remote);
        assert_eq!(remote.category(), ErrorCategory::Transient);

        let unsupported = Error::Remote {
            op: Operation::Update,
            target: "users/u1/apiKeys/aa".into(),
            source: RemoteFailure::Unsupported("update"),
        };
        assert_eq!(unsupported.category(), ErrorCategory::Misuse);

        let replace = Error::ReplaceRequired {
            target: "users/u1/apiKeys/aa".into(),
            attributes: vec!["key_value".into()],
        };
        assert!(replace.is_validation());
        assert_eq!(replace.category(), ErrorCategory::Misuse);
        assert_eq!(replace.operation(), Operation::Update);

        let malformed = Error::MalformedId {
            op: Operation::Import,
            raw: "bogus".into(),
            source: ParseIdError::Layout,
        };
        assert!(malformed.is_validation());
        assert_eq!(malformed.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_messages_carry_context() {
        let err = Error::Remote {
            op: Operation::Delete,
            target: "users/u1/apiKeys/aa:bb".into(),
            source: RemoteFailure::Service {
                status: 500,
                message: "internal".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.starts_with("delete users/u1/apiKeys/aa:bb"));
        assert!(msg.contains("500"));

        let err = Error::ReplaceRequired {
            target: "users/u1/apiKeys/aa".into(),
            attributes: vec!["key_value".into(), "user_id".into()],
        };
        assert!(err.to_string().contains("key_value, user_id"));
    }
}
