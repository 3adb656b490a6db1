//! Reconciler configuration, passed explicitly at construction

use std::time::Duration;

/// Settings shared by the reconciler, import resolver and query engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Deadline applied to operations whose token carries none
    pub operation_timeout: Option<Duration>,
    /// Treat remote objects in `DELETING`/`DELETED` as already gone
    pub treat_deleted_as_absent: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            operation_timeout: None,
            treat_deleted_as_absent: true,
        }
    }
}

impl ReconcilerConfig {
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn with_treat_deleted_as_absent(mut self, enabled: bool) -> Self {
        self.treat_deleted_as_absent = enabled;
        self
    }
}
