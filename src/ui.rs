use apikey::{Action, ObservedState, Outcome};
use colored::{ColoredString, Colorize};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Plan / Outcome Display
// ============================================================================

/// Plan symbol, terraform style
pub fn action_symbol(action: &Action) -> ColoredString {
    match action {
        Action::Create => "+".green(),
        Action::NoOp => "○".dimmed(),
        Action::InPlaceUpdate { .. } => "~".yellow(),
        Action::Replace { .. } => "±".red(),
    }
}

/// One-line result of an apply
pub fn outcome_line(slot: &str, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Created(state) => format!("{slot}: created {}", state.id()),
        Outcome::Updated(state) => format!("{slot}: updated {}", state.id()),
        Outcome::Replaced { previous, current } => {
            format!("{slot}: replaced {previous} with {}", current.id())
        }
        Outcome::Unchanged(state) => format!("{slot}: unchanged {}", state.id()),
    }
}

/// Print the attributes of one key
pub fn observed(state: &ObservedState) {
    kv("id", &state.id().to_string());
    kv("user", state.user_id().as_str());
    kv("fingerprint", state.fingerprint().as_str());
    kv("state", state.lifecycle_state().as_str());
    kv("created", &state.time_created().to_rfc3339());
    if let Some(status) = state.inactive_status() {
        kv("inactive status", &status.to_string());
    }
}

/// Print a library error with its category advice
pub fn report(err: &apikey::Error) {
    let category = err.category();
    error(&err.to_string());
    dim(&format!("{}: {}", category.description(), category.advice()));
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use apikey::{Fingerprint, IdentityRef, LifecycleState, RemoteApiKey, ResourceId};
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};

    fn state(fingerprint: &str) -> ObservedState {
        ObservedState::from_remote(&RemoteApiKey {
            user_id: IdentityRef::new("u1"),
            fingerprint: Fingerprint::new(fingerprint),
            key_value: "K".into(),
            lifecycle_state: LifecycleState::Active,
            time_created: Utc::now(),
            inactive_status: None,
            attributes: BTreeMap::new(),
        })
    }

    #[test]
    fn test_action_symbols() {
        assert!(action_symbol(&Action::Create).to_string().contains('+'));
        let replace = Action::Replace {
            force_new: BTreeSet::from(["key_value".to_string()]),
        };
        assert!(action_symbol(&replace).to_string().contains('±'));
    }

    #[test]
    fn test_outcome_line() {
        let previous: ResourceId = "users/u1/apiKeys/aa".parse().unwrap();
        let line = outcome_line(
            "ci",
            &Outcome::Replaced {
                previous,
                current: state("bb"),
            },
        );
        assert_eq!(
            line,
            "ci: replaced users/u1/apiKeys/aa with users/u1/apiKeys/bb"
        );
        assert_eq!(
            outcome_line("ci", &Outcome::Unchanged(state("aa"))),
            "ci: unchanged users/u1/apiKeys/aa"
        );
    }
}
