//! Core types for API key reconciliation

use crate::descriptor::attr;
use crate::error::{Error, ParseIdError, Result};
use crate::remote::RemoteApiKey;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Handle of the user principal that owns a credential
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityRef(String);

impl IdentityRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote-computed fingerprint of a credential's key material
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self(fingerprint.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite key of one remote credential: owning principal + fingerprint
///
/// Text form is `users/<user>/apiKeys/<fingerprint>`, which is also the
/// format accepted by import. Ordering compares the principal first, then
/// the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    identity: IdentityRef,
    fingerprint: Fingerprint,
}

const ID_PREFIX: &str = "users/";
const ID_SEPARATOR: &str = "/apiKeys/";

impl ResourceId {
    pub fn new(identity: IdentityRef, fingerprint: Fingerprint) -> Self {
        Self {
            identity,
            fingerprint,
        }
    }

    pub fn identity(&self) -> &IdentityRef {
        &self.identity
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            ID_PREFIX, self.identity, ID_SEPARATOR, self.fingerprint
        )
    }
}

impl FromStr for ResourceId {
    type Err = ParseIdError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        // Identities are opaque and may contain `/`; fingerprints never do
        let rest = raw.strip_prefix(ID_PREFIX).ok_or(ParseIdError::Layout)?;
        let (identity, fingerprint) = rest.rsplit_once(ID_SEPARATOR).ok_or(ParseIdError::Layout)?;

        if identity.is_empty() {
            return Err(ParseIdError::EmptyIdentity);
        }
        if fingerprint.is_empty() {
            return Err(ParseIdError::EmptyFingerprint);
        }
        if fingerprint.contains('/') {
            return Err(ParseIdError::Layout);
        }

        Ok(Self::new(
            IdentityRef::new(identity),
            Fingerprint::new(fingerprint),
        ))
    }
}

impl Serialize for ResourceId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle of a remote credential, owned by the remote and mirrored locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Creating,
    Active,
    Deleting,
    Deleted,
}

impl LifecycleState {
    /// Whether the remote is tearing the object down or already has
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Deleting | Self::Deleted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Active => "ACTIVE",
            Self::Deleting => "DELETING",
            Self::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "CREATING" => Ok(Self::Creating),
            "ACTIVE" => Ok(Self::Active),
            "DELETING" => Ok(Self::Deleting),
            "DELETED" => Ok(Self::Deleted),
            other => Err(format!("unknown lifecycle state {other:?}")),
        }
    }
}

/// Caller-supplied attribute values for one credential
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredConfig {
    attributes: BTreeMap<String, String>,
}

impl DesiredConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Desired state of an API key: owning user and public key PEM
    pub fn api_key(user_id: &IdentityRef, key_value: impl Into<String>) -> Self {
        Self::new()
            .with(attr::USER_ID, user_id.as_str())
            .with(attr::KEY_VALUE, key_value)
    }

    /// Set an attribute, builder style
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn user_id(&self) -> Option<IdentityRef> {
        self.get(attr::USER_ID).map(IdentityRef::new)
    }

    pub fn key_value(&self) -> Option<&str> {
        self.get(attr::KEY_VALUE)
    }
}

/// Full attribute set of a credential as last read from the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedState {
    id: ResourceId,
    key_value: String,
    lifecycle_state: LifecycleState,
    time_created: DateTime<Utc>,
    inactive_status: Option<i64>,
    extra: BTreeMap<String, String>,
}

impl ObservedState {
    /// Build local state from a remote object.
    ///
    /// Create, read and import all go through here so that every path
    /// populates the same attributes.
    pub fn from_remote(key: &RemoteApiKey) -> Self {
        Self {
            id: ResourceId::new(key.user_id.clone(), key.fingerprint.clone()),
            key_value: key.key_value.clone(),
            lifecycle_state: key.lifecycle_state,
            time_created: key.time_created,
            inactive_status: key.inactive_status,
            extra: key.attributes.clone(),
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn user_id(&self) -> &IdentityRef {
        self.id.identity()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        self.id.fingerprint()
    }

    pub fn key_value(&self) -> &str {
        &self.key_value
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle_state
    }

    pub fn time_created(&self) -> DateTime<Utc> {
        self.time_created
    }

    pub fn inactive_status(&self) -> Option<i64> {
        self.inactive_status
    }

    /// Value of one attribute in its text form, `None` when unset
    pub fn attribute(&self, name: &str) -> Option<Cow<'_, str>> {
        match name {
            attr::ID => Some(Cow::Owned(self.id.to_string())),
            attr::USER_ID => Some(Cow::Borrowed(self.id.identity().as_str())),
            attr::KEY_VALUE => Some(Cow::Borrowed(&self.key_value)),
            attr::FINGERPRINT => Some(Cow::Borrowed(self.id.fingerprint().as_str())),
            attr::STATE => Some(Cow::Borrowed(self.lifecycle_state.as_str())),
            attr::TIME_CREATED => Some(Cow::Owned(format_time(self.time_created))),
            attr::INACTIVE_STATUS => self.inactive_status.map(|s| Cow::Owned(s.to_string())),
            other => self.extra.get(other).map(|v| Cow::Borrowed(v.as_str())),
        }
    }

    /// Every set attribute, name to text value
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut attributes = self.extra.clone();
        for name in attr::CORE {
            if let Some(value) = self.attribute(name) {
                attributes.insert((*name).to_string(), value.into_owned());
            }
        }
        attributes
    }

    /// Persisted form of this state
    pub fn to_record(&self) -> StateRecord {
        StateRecord {
            id: self.id.to_string(),
            attributes: self.attributes(),
        }
    }

    /// Rebuild state from a persisted record without contacting the remote
    pub fn from_record(record: &StateRecord) -> Result<Self> {
        let corrupt = |reason: String| Error::CorruptRecord {
            target: record.id.clone(),
            reason,
        };
        let required = |name: &str| {
            record
                .attributes
                .get(name)
                .ok_or_else(|| corrupt(format!("missing attribute {name:?}")))
        };

        let id: ResourceId = record
            .id
            .parse()
            .map_err(|e: ParseIdError| corrupt(e.to_string()))?;

        if required(attr::USER_ID)? != id.identity().as_str()
            || required(attr::FINGERPRINT)? != id.fingerprint().as_str()
        {
            return Err(corrupt("id does not match user_id/fingerprint".into()));
        }

        let lifecycle_state: LifecycleState = required(attr::STATE)?.parse().map_err(corrupt)?;
        let time_created = DateTime::parse_from_rfc3339(required(attr::TIME_CREATED)?)
            .map_err(|e| corrupt(format!("time_created: {e}")))?
            .with_timezone(&Utc);
        let inactive_status = record
            .attributes
            .get(attr::INACTIVE_STATUS)
            .map(|s| s.parse::<i64>())
            .transpose()
            .map_err(|e| corrupt(format!("inactive_status: {e}")))?;

        let extra = record
            .attributes
            .iter()
            .filter(|(name, _)| !attr::CORE.contains(&name.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            key_value: required(attr::KEY_VALUE)?.clone(),
            id,
            lifecycle_state,
            time_created,
            inactive_status,
            extra,
        })
    }
}

/// Persisted record of one credential, keyed by its resource id
///
/// Holds every attribute of [`ObservedState`], enough to resume
/// reconciliation without importing again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn remote_key() -> RemoteApiKey {
        RemoteApiKey {
            user_id: IdentityRef::new("ocid1.user.oc1..u1"),
            fingerprint: Fingerprint::new("aa:bb:cc"),
            key_value: "-----BEGIN PUBLIC KEY-----\nK1\n-----END PUBLIC KEY-----".into(),
            lifecycle_state: LifecycleState::Active,
            time_created: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            inactive_status: None,
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_resource_id_text_form() {
        let id: ResourceId = "users/ocid1.user.oc1..u1/apiKeys/aa:bb:cc".parse().unwrap();
        assert_eq!(id.identity().as_str(), "ocid1.user.oc1..u1");
        assert_eq!(id.fingerprint().as_str(), "aa:bb:cc");
        assert_eq!(id.to_string(), "users/ocid1.user.oc1..u1/apiKeys/aa:bb:cc");
    }

    #[test]
    fn test_resource_id_rejects_malformed() {
        assert_eq!("aa:bb".parse::<ResourceId>(), Err(ParseIdError::Layout));
        assert_eq!(
            "users//apiKeys/aa".parse::<ResourceId>(),
            Err(ParseIdError::EmptyIdentity)
        );
        assert_eq!(
            "users/u1/apiKeys/".parse::<ResourceId>(),
            Err(ParseIdError::EmptyFingerprint)
        );
        assert_eq!(
            "users/u1/apiKeys/aa/extra".parse::<ResourceId>(),
            Err(ParseIdError::Layout)
        );
    }

    #[test]
    fn test_resource_id_identity_with_slash() {
        let id = ResourceId::new(IdentityRef::new("team/ci"), Fingerprint::new("f8:19"));
        let parsed: ResourceId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.identity().as_str(), "team/ci");

        let nested: ResourceId = "users/a/apiKeys/b/apiKeys/c".parse().unwrap();
        assert_eq!(nested.identity().as_str(), "a/apiKeys/b");
        assert_eq!(nested.fingerprint().as_str(), "c");
    }

    #[test]
    fn test_record_roundtrip_identity_with_slash() {
        let mut key = remote_key();
        key.user_id = IdentityRef::new("team/ci");
        let observed = ObservedState::from_remote(&key);
        assert_eq!(ObservedState::from_record(&observed.to_record()).unwrap(), observed);
    }

    #[test]
    fn test_observed_attributes() {
        let observed = ObservedState::from_remote(&remote_key());
        let attrs = observed.attributes();
        assert_eq!(attrs["id"], "users/ocid1.user.oc1..u1/apiKeys/aa:bb:cc");
        assert_eq!(attrs["state"], "ACTIVE");
        assert_eq!(attrs["time_created"], "2026-03-01T12:00:00Z");
        assert!(!attrs.contains_key("inactive_status"));
    }

    #[test]
    fn test_record_roundtrip() {
        let mut key = remote_key();
        key.inactive_status = Some(2);
        key.attributes.insert("description".into(), "deploy".into());
        let observed = ObservedState::from_remote(&key);

        let json = serde_json::to_string(&observed.to_record()).unwrap();
        let record: StateRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(ObservedState::from_record(&record).unwrap(), observed);
    }

    #[test]
    fn test_corrupt_record() {
        let mut record = ObservedState::from_remote(&remote_key()).to_record();
        record.attributes.remove("state");
        let err = ObservedState::from_record(&record).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("state"));

        let mut record = ObservedState::from_remote(&remote_key()).to_record();
        record.attributes.insert("fingerprint".into(), "zz".into());
        assert!(ObservedState::from_record(&record).is_err());
    }
}
