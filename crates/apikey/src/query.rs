//! Query & filter engine - list a principal's credentials and filter them
//!
//! Filters combine with AND across specs and OR across the values of one
//! spec. A value matches when it equals the attribute value (compared the way
//! the descriptor compares that attribute) or, for regex filters, when the
//! pattern matches the whole attribute value.

use crate::cancel::CancelToken;
use crate::config::ReconcilerConfig;
use crate::descriptor::{AttributeSpec, ResourceDescriptor};
use crate::error::{Error, Operation, RemoteFailure, Result};
use crate::remote::RemoteClient;
use crate::types::{IdentityRef, ObservedState};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One filter: attribute name and the values it may take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub name: String,
    pub values: Vec<String>,
    /// Treat each value as a regular expression
    #[serde(default)]
    pub regex: bool,
}

impl FilterSpec {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
            regex: false,
        }
    }

    pub fn regex(mut self) -> Self {
        self.regex = true;
        self
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Values(Vec<String>),
    Patterns(Vec<Regex>),
}

#[derive(Debug, Clone)]
struct CompiledFilter {
    spec: AttributeSpec,
    matcher: Matcher,
}

impl CompiledFilter {
    fn matches(&self, observed: &ObservedState) -> bool {
        let Some(value) = observed.attribute(self.spec.name) else {
            return false;
        };
        match &self.matcher {
            Matcher::Values(values) => values
                .iter()
                .any(|v| self.spec.comparison.equivalent(v, &value)),
            Matcher::Patterns(patterns) => patterns.iter().any(|p| p.is_match(&value)),
        }
    }
}

/// Compile `pattern` to match whole values only.
///
/// The pattern must parse on its own first, so it cannot close the
/// anchoring group and leave an alternative unanchored.
fn anchored(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(pattern)?;
    Regex::new(&format!("^(?:{pattern})$"))
}

/// A validated, restartable query over one principal's credentials
#[derive(Debug, Clone)]
pub struct Query {
    identity: IdentityRef,
    filters: Vec<CompiledFilter>,
}

impl Query {
    /// Build a query. Unknown attributes, empty value lists and invalid
    /// patterns are rejected here, before any remote call.
    pub fn new(
        descriptor: &ResourceDescriptor,
        identity: IdentityRef,
        filters: &[FilterSpec],
    ) -> Result<Self> {
        let op = Operation::Query;
        let target = identity.to_string();

        let compiled = filters
            .iter()
            .map(|filter| {
                let spec = descriptor.lookup(&filter.name).ok_or_else(|| {
                    Error::UnknownFilterAttribute {
                        op,
                        target: target.clone(),
                        name: filter.name.clone(),
                    }
                })?;
                let invalid = |reason: String| Error::InvalidFilter {
                    op,
                    target: target.clone(),
                    name: filter.name.clone(),
                    reason,
                };

                if filter.values.is_empty() {
                    return Err(invalid("no values given".into()));
                }

                let matcher = if filter.regex {
                    let patterns = filter
                        .values
                        .iter()
                        .map(|p| anchored(p).map_err(|e| invalid(e.to_string())))
                        .collect::<Result<Vec<_>>>()?;
                    Matcher::Patterns(patterns)
                } else {
                    Matcher::Values(filter.values.clone())
                };

                Ok(CompiledFilter {
                    spec: *spec,
                    matcher,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            identity,
            filters: compiled,
        })
    }

    pub fn identity(&self) -> &IdentityRef {
        &self.identity
    }

    /// Whether a record passes every filter
    pub fn matches(&self, observed: &ObservedState) -> bool {
        self.filters.iter().all(|f| f.matches(observed))
    }

    /// List the principal's credentials with one remote call and filter them.
    ///
    /// Every run lists afresh; nothing is cached between runs.
    pub fn run<R: RemoteClient>(&self, remote: &R, cancel: &CancelToken) -> Result<QueryResults> {
        let op = Operation::Query;
        let target = self.identity.to_string();
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { op, target });
        }

        let keys = match remote.list(&self.identity, cancel) {
            Ok(keys) => keys,
            Err(RemoteFailure::NotFound) => return Err(Error::NotFound { op, target }),
            Err(RemoteFailure::Cancelled) => return Err(Error::Cancelled { op, target }),
            Err(source) => return Err(Error::Remote { op, target, source }),
        };

        let mut matched: Vec<ObservedState> = keys
            .iter()
            .map(ObservedState::from_remote)
            .filter(|o| self.matches(o))
            .collect();
        matched.sort_by(|a, b| a.id().cmp(b.id()));

        log::debug!(
            "Query {}: {} of {} keys matched",
            target,
            matched.len(),
            keys.len()
        );
        Ok(QueryResults {
            inner: matched.into_iter(),
        })
    }
}

/// Matching records in ascending resource id order
#[derive(Debug)]
pub struct QueryResults {
    inner: std::vec::IntoIter<ObservedState>,
}

impl Iterator for QueryResults {
    type Item = ObservedState;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for QueryResults {}

/// Runs queries against one remote with a fixed descriptor
pub struct QueryEngine<R> {
    remote: R,
    descriptor: Arc<ResourceDescriptor>,
    config: ReconcilerConfig,
}

impl<R: RemoteClient> QueryEngine<R> {
    pub fn new(remote: R, descriptor: Arc<ResourceDescriptor>, config: ReconcilerConfig) -> Self {
        Self {
            remote,
            descriptor,
            config,
        }
    }

    pub fn prepare(&self, identity: IdentityRef, filters: &[FilterSpec]) -> Result<Query> {
        Query::new(&self.descriptor, identity, filters)
    }

    pub fn run(&self, query: &Query, cancel: &CancelToken) -> Result<QueryResults> {
        query.run(&self.remote, &cancel.or_timeout(self.config.operation_timeout))
    }

    /// Build and run in one step
    pub fn query(
        &self,
        identity: IdentityRef,
        filters: &[FilterSpec],
        cancel: &CancelToken,
    ) -> Result<QueryResults> {
        let query = self.prepare(identity, filters)?;
        self.run(&query, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::{MemoryRemote, RemoteOp};
    use crate::remote::CreateRequest;
    use std::collections::BTreeMap;

    fn seeded(keys: &[&str]) -> (Arc<MemoryRemote>, IdentityRef, Vec<ObservedState>) {
        let remote = Arc::new(MemoryRemote::new());
        let user = IdentityRef::new("u1");
        remote.add_user(&user);
        let created = keys
            .iter()
            .map(|k| {
                let key = remote
                    .create(
                        &CreateRequest {
                            user_id: user.clone(),
                            key_value: (*k).to_string(),
                            attributes: BTreeMap::new(),
                        },
                        &CancelToken::new(),
                    )
                    .unwrap();
                ObservedState::from_remote(&key)
            })
            .collect();
        (remote, user, created)
    }

    fn engine(remote: Arc<MemoryRemote>) -> QueryEngine<Arc<MemoryRemote>> {
        QueryEngine::new(remote, ResourceDescriptor::api_key(), ReconcilerConfig::default())
    }

    #[test]
    fn test_unfiltered_query_is_sorted() {
        let (remote, user, _) = seeded(&["K1", "K2", "K3"]);
        let results: Vec<_> = engine(remote)
            .query(user, &[], &CancelToken::new())
            .unwrap()
            .collect();
        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].id() < w[1].id()));
    }

    #[test]
    fn test_filter_by_id_and_or_semantics() {
        let (remote, user, created) = seeded(&["K1", "K2", "K3"]);
        let engine = engine(remote);

        let one = FilterSpec::new("id", [created[0].id().to_string()]);
        let results: Vec<_> = engine
            .query(user.clone(), &[one], &CancelToken::new())
            .unwrap()
            .collect();
        assert_eq!(results, vec![created[0].clone()]);

        let two = FilterSpec::new(
            "fingerprint",
            [
                created[1].fingerprint().to_string(),
                created[2].fingerprint().to_string(),
            ],
        );
        let active = FilterSpec::new("state", ["ACTIVE"]);
        let count = engine
            .query(user, &[two, active], &CancelToken::new())
            .unwrap()
            .count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_regex_filter_is_anchored() {
        let (remote, user, _) = seeded(&["K1", "K2"]);
        let engine = engine(remote);

        let all = FilterSpec::new("key_value", ["K."]).regex();
        assert_eq!(engine.query(user.clone(), &[all], &CancelToken::new()).unwrap().count(), 2);

        let partial = FilterSpec::new("key_value", ["K"]).regex();
        assert_eq!(engine.query(user, &[partial], &CancelToken::new()).unwrap().count(), 0);
    }

    #[test]
    fn test_regex_cannot_escape_anchors() {
        let (remote, user, _) = seeded(&["K1"]);
        let engine = engine(Arc::clone(&remote));

        let err = engine
            .prepare(user.clone(), &[FilterSpec::new("key_value", ["x)|(.*"]).regex()])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { .. }));

        let alternation = FilterSpec::new("key_value", ["K|K1"]).regex();
        assert_eq!(engine.query(user, &[alternation], &CancelToken::new()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_attribute_never_matches() {
        let (remote, user, _) = seeded(&["K1"]);
        let filter = FilterSpec::new("inactive_status", [".*"]).regex();
        assert_eq!(
            engine(remote).query(user, &[filter], &CancelToken::new()).unwrap().count(),
            0
        );
    }

    #[test]
    fn test_invalid_filters_rejected_before_remote_call() {
        let (remote, user, _) = seeded(&["K1"]);
        let engine = engine(Arc::clone(&remote));

        let err = engine
            .prepare(user.clone(), &[FilterSpec::new("color", ["red"])])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownFilterAttribute { .. }));

        let err = engine
            .prepare(user.clone(), &[FilterSpec::new("id", Vec::<String>::new())])
            .unwrap_err();
        assert!(err.is_validation());

        let err = engine
            .prepare(user, &[FilterSpec::new("id", ["("]).regex()])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { .. }));
        assert_eq!(remote.calls(RemoteOp::List), 0);
    }

    #[test]
    fn test_query_is_restartable() {
        let (remote, user, _) = seeded(&["K1"]);
        let engine = engine(Arc::clone(&remote));
        let query = engine.prepare(user.clone(), &[]).unwrap();
        assert_eq!(engine.run(&query, &CancelToken::new()).unwrap().len(), 1);

        remote
            .create(
                &CreateRequest {
                    user_id: user,
                    key_value: "K2".into(),
                    attributes: BTreeMap::new(),
                },
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(engine.run(&query, &CancelToken::new()).unwrap().len(), 2);
        assert_eq!(remote.calls(RemoteOp::List), 2);
    }

    #[test]
    fn test_unknown_principal() {
        let (remote, _, _) = seeded(&[]);
        let err = engine(remote)
            .query(IdentityRef::new("nobody"), &[], &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_interrupted_list_is_cancelled() {
        let (remote, user, _) = seeded(&["K1"]);
        remote.fail_next(RemoteOp::List, RemoteFailure::Cancelled);
        let err = engine(remote)
            .query(user, &[], &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
