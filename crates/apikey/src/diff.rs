//! Diff computation - classify how desired config differs from observed state

use crate::descriptor::{Mutability, ResourceDescriptor};
use crate::types::{DesiredConfig, ObservedState, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What it takes to bring an object to its desired configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Nothing exists yet
    Create,
    /// Already converged
    NoOp,
    /// Mutable attributes differ; apply them to the existing object
    InPlaceUpdate { changed: BTreeSet<String> },
    /// At least one force-new attribute differs; destroy and recreate
    Replace { force_new: BTreeSet<String> },
}

impl Action {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::NoOp => f.write_str("no change"),
            Self::InPlaceUpdate { changed } => write!(f, "update in place ({})", join(changed)),
            Self::Replace { force_new } => {
                write!(f, "replace ({} forces new resource)", join(force_new))
            }
        }
    }
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Classify the change from `observed` to `desired`.
///
/// Pure: the result depends only on the arguments. Computed attributes are
/// skipped. Any differing force-new attribute yields a single `Replace`,
/// even when mutable attributes differ as well.
pub fn diff(
    descriptor: &ResourceDescriptor,
    desired: &DesiredConfig,
    observed: Option<&ObservedState>,
) -> Action {
    let Some(observed) = observed else {
        return Action::Create;
    };

    let mut force_new = BTreeSet::new();
    let mut changed = BTreeSet::new();

    for spec in descriptor.specs() {
        if spec.mutability == Mutability::Computed {
            continue;
        }

        let wanted = desired.get(spec.name);
        let current = observed.attribute(spec.name);
        let same = match (wanted, current.as_deref()) {
            (Some(a), Some(b)) => spec.comparison.equivalent(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            continue;
        }

        if spec.mutability == Mutability::ForceNew {
            force_new.insert(spec.name.to_string());
        } else {
            changed.insert(spec.name.to_string());
        }
    }

    if !force_new.is_empty() {
        Action::Replace { force_new }
    } else if !changed.is_empty() {
        Action::InPlaceUpdate { changed }
    } else {
        Action::NoOp
    }
}

/// Planned action for one named slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Name of the slot the caller manages the credential under
    pub name: String,
    /// Resource currently tracked for the slot
    pub current: Option<ResourceId>,
    pub action: Action,
}

impl Plan {
    pub fn compute(
        name: impl Into<String>,
        descriptor: &ResourceDescriptor,
        desired: &DesiredConfig,
        observed: Option<&ObservedState>,
    ) -> Self {
        Self {
            name: name.into(),
            current: observed.map(|o| o.id().clone()),
            action: diff(descriptor, desired, observed),
        }
    }

    /// One-line human-readable description
    pub fn description(&self) -> String {
        match &self.current {
            Some(id) => format!("{}: {} [{}]", self.name, self.action, id),
            None => format!("{}: {}", self.name, self.action),
        }
    }
}

/// Plan summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub creates: usize,
    pub updates: usize,
    pub replaces: usize,
    pub unchanged: usize,
}

impl PlanSummary {
    pub fn from_plans(plans: &[Plan]) -> Self {
        let mut summary = Self::default();
        for plan in plans {
            match plan.action {
                Action::Create => summary.creates += 1,
                Action::InPlaceUpdate { .. } => summary.updates += 1,
                Action::Replace { .. } => summary.replaces += 1,
                Action::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Number of slots that need a change
    pub fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces
    }

    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{AttributeSpec, attr};
    use crate::remote::RemoteApiKey;
    use crate::types::{Fingerprint, IdentityRef, LifecycleState};
    use chrono::Utc;
    use std::collections::BTreeMap;

    const K1: &str = "-----BEGIN PUBLIC KEY-----\nK1\n-----END PUBLIC KEY-----";
    const K2: &str = "-----BEGIN PUBLIC KEY-----\nK2\n-----END PUBLIC KEY-----";

    fn observed(user: &str, key: &str, extra: &[(&str, &str)]) -> ObservedState {
        ObservedState::from_remote(&RemoteApiKey {
            user_id: IdentityRef::new(user),
            fingerprint: Fingerprint::new("aa:bb"),
            key_value: key.into(),
            lifecycle_state: LifecycleState::Active,
            time_created: Utc::now(),
            inactive_status: None,
            attributes: extra
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
        })
    }

    /// API key plus a mutable description, for exercising in-place updates
    fn described() -> ResourceDescriptor {
        let mut specs = ResourceDescriptor::api_key().specs().to_vec();
        specs.push(AttributeSpec::new("description", Mutability::Optional));
        ResourceDescriptor::new("described_api_key", specs)
    }

    #[test]
    fn test_absent_observed_is_create() {
        let desired = DesiredConfig::api_key(&IdentityRef::new("u1"), K1);
        assert_eq!(
            diff(&ResourceDescriptor::api_key(), &desired, None),
            Action::Create
        );
    }

    #[test]
    fn test_key_change_is_replace() {
        let descriptor = ResourceDescriptor::api_key();
        let desired = DesiredConfig::api_key(&IdentityRef::new("u1"), K2);
        let action = diff(&descriptor, &desired, Some(&observed("u1", K1, &[])));
        assert_eq!(
            action,
            Action::Replace {
                force_new: BTreeSet::from([attr::KEY_VALUE.to_string()])
            }
        );
    }

    #[test]
    fn test_user_change_is_replace() {
        let descriptor = ResourceDescriptor::api_key();
        let desired = DesiredConfig::api_key(&IdentityRef::new("u2"), K1);
        let action = diff(&descriptor, &desired, Some(&observed("u1", K1, &[])));
        assert!(matches!(action, Action::Replace { ref force_new } if force_new.contains("user_id")));
    }

    #[test]
    fn test_multiple_force_new_is_single_replace() {
        let descriptor = described();
        let desired = DesiredConfig::api_key(&IdentityRef::new("u2"), K2).with("description", "new");
        let action = diff(
            &descriptor,
            &desired,
            Some(&observed("u1", K1, &[("description", "old")])),
        );
        assert_eq!(
            action,
            Action::Replace {
                force_new: BTreeSet::from(["key_value".to_string(), "user_id".to_string()])
            }
        );
    }

    #[test]
    fn test_mutable_change_is_in_place() {
        let descriptor = described();
        let desired = DesiredConfig::api_key(&IdentityRef::new("u1"), K1).with("description", "new");
        let action = diff(
            &descriptor,
            &desired,
            Some(&observed("u1", K1, &[("description", "old")])),
        );
        assert_eq!(
            action,
            Action::InPlaceUpdate {
                changed: BTreeSet::from(["description".to_string()])
            }
        );

        // Dropping an optional attribute unsets it
        let desired = DesiredConfig::api_key(&IdentityRef::new("u1"), K1);
        let action = diff(
            &descriptor,
            &desired,
            Some(&observed("u1", K1, &[("description", "old")])),
        );
        assert!(matches!(action, Action::InPlaceUpdate { .. }));
    }

    #[test]
    fn test_computed_and_whitespace_ignored() {
        let descriptor = ResourceDescriptor::api_key();
        let desired = DesiredConfig::api_key(&IdentityRef::new("u1"), format!("{K1}\n"));
        let current = observed("u1", K1, &[]);
        assert_eq!(diff(&descriptor, &desired, Some(&current)), Action::NoOp);
    }

    #[test]
    fn test_diff_is_deterministic() {
        let descriptor = described();
        let desired = DesiredConfig::api_key(&IdentityRef::new("u1"), K2).with("description", "x");
        let current = observed("u1", K1, &[("description", "y")]);
        let first = diff(&descriptor, &desired, Some(&current));
        for _ in 0..10 {
            assert_eq!(diff(&descriptor, &desired, Some(&current)), first);
        }
    }

    #[test]
    fn test_plan_summary() {
        let descriptor = ResourceDescriptor::api_key();
        let user = IdentityRef::new("u1");
        let current = observed("u1", K1, &[]);
        let plans = vec![
            Plan::compute("a", &descriptor, &DesiredConfig::api_key(&user, K1), None),
            Plan::compute("b", &descriptor, &DesiredConfig::api_key(&user, K2), Some(&current)),
            Plan::compute("c", &descriptor, &DesiredConfig::api_key(&user, K1), Some(&current)),
        ];
        let summary = PlanSummary::from_plans(&plans);
        assert_eq!(summary.creates, 1);
        assert_eq!(summary.replaces, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.total_changes(), 2);
        assert!(plans[1].description().contains("replace"));
    }
}
