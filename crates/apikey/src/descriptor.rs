//! Resource descriptor - attribute names and how each one may change

use crate::error::ConfigError;
use crate::types::DesiredConfig;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

/// Attribute names of the API key resource
pub mod attr {
    pub const ID: &str = "id";
    pub const USER_ID: &str = "user_id";
    pub const KEY_VALUE: &str = "key_value";
    pub const FINGERPRINT: &str = "fingerprint";
    pub const STATE: &str = "state";
    pub const TIME_CREATED: &str = "time_created";
    pub const INACTIVE_STATUS: &str = "inactive_status";

    /// Attributes every API key carries, whatever its descriptor adds
    pub const CORE: &[&str] = &[
        ID,
        USER_ID,
        KEY_VALUE,
        FINGERPRINT,
        STATE,
        TIME_CREATED,
        INACTIVE_STATUS,
    ];
}

/// How an attribute may change over the life of a remote object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mutability {
    /// Must be supplied; can be changed in place
    Required,
    /// May be supplied; can be changed in place
    Optional,
    /// Must be supplied; any change destroys and recreates the object
    ForceNew,
    /// Set by the remote only; never compared
    Computed,
}

impl Mutability {
    /// Whether the caller has to supply this attribute
    pub fn is_required(&self) -> bool {
        matches!(self, Self::Required | Self::ForceNew)
    }
}

/// How two values of an attribute are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Exact,
    /// Ignore surrounding whitespace and CRLF vs LF line endings (PEM blocks)
    Text,
}

impl Comparison {
    pub fn equivalent(&self, a: &str, b: &str) -> bool {
        match self {
            Self::Exact => a == b,
            Self::Text => normalize_text(a) == normalize_text(b),
        }
    }
}

fn normalize_text(value: &str) -> String {
    value.trim().replace("\r\n", "\n")
}

/// One attribute of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub mutability: Mutability,
    pub comparison: Comparison,
}

impl AttributeSpec {
    pub const fn new(name: &'static str, mutability: Mutability) -> Self {
        Self {
            name,
            mutability,
            comparison: Comparison::Exact,
        }
    }

    pub const fn compared(mut self, comparison: Comparison) -> Self {
        self.comparison = comparison;
        self
    }
}

/// Static description of a resource's attributes
///
/// Built once and never mutated. Attribute order is declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    type_name: &'static str,
    attributes: Vec<AttributeSpec>,
}

static API_KEY: LazyLock<Arc<ResourceDescriptor>> = LazyLock::new(|| {
    Arc::new(ResourceDescriptor::new(
        "identity_api_key",
        [
            AttributeSpec::new(attr::USER_ID, Mutability::ForceNew),
            AttributeSpec::new(attr::KEY_VALUE, Mutability::ForceNew).compared(Comparison::Text),
            AttributeSpec::new(attr::ID, Mutability::Computed),
            AttributeSpec::new(attr::FINGERPRINT, Mutability::Computed),
            AttributeSpec::new(attr::STATE, Mutability::Computed),
            AttributeSpec::new(attr::TIME_CREATED, Mutability::Computed),
            AttributeSpec::new(attr::INACTIVE_STATUS, Mutability::Computed),
        ],
    ))
});

impl ResourceDescriptor {
    /// Build a descriptor.
    ///
    /// # Panics
    /// If an attribute name is declared twice.
    pub fn new(type_name: &'static str, attributes: impl IntoIterator<Item = AttributeSpec>) -> Self {
        let attributes: Vec<AttributeSpec> = attributes.into_iter().collect();
        for (i, spec) in attributes.iter().enumerate() {
            assert!(
                !attributes[..i].iter().any(|s| s.name == spec.name),
                "attribute {:?} declared twice in {}",
                spec.name,
                type_name
            );
        }
        Self {
            type_name,
            attributes,
        }
    }

    /// The API key resource: user and key material are force-new, the rest
    /// is computed by the remote
    pub fn api_key() -> Arc<Self> {
        Arc::clone(&API_KEY)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Attribute names in declaration order
    pub fn attributes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.attributes.iter().map(|s| s.name)
    }

    pub fn specs(&self) -> &[AttributeSpec] {
        &self.attributes
    }

    pub fn lookup(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|s| s.name == name)
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Mutability of a declared attribute.
    ///
    /// # Panics
    /// If `name` is not declared; asking about an unknown attribute is a
    /// programming error.
    pub fn mutability_of(&self, name: &str) -> Mutability {
        match self.lookup(name) {
            Some(spec) => spec.mutability,
            None => panic!("{} has no attribute {:?}", self.type_name, name),
        }
    }

    pub fn force_new(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.with_mutability(Mutability::ForceNew)
    }

    pub fn computed(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.with_mutability(Mutability::Computed)
    }

    fn with_mutability(&self, mutability: Mutability) -> impl Iterator<Item = &'static str> + '_ {
        self.attributes
            .iter()
            .filter(move |s| s.mutability == mutability)
            .map(|s| s.name)
    }

    /// Check a desired configuration against this descriptor
    pub fn validate(&self, desired: &DesiredConfig) -> Result<(), ConfigError> {
        for (name, value) in desired.attributes() {
            match self.lookup(name) {
                None => return Err(ConfigError::UnknownAttribute(name.to_string())),
                Some(spec) if spec.mutability == Mutability::Computed => {
                    return Err(ConfigError::ComputedAttribute(name.to_string()));
                }
                Some(spec) if spec.mutability.is_required() && value.trim().is_empty() => {
                    return Err(ConfigError::EmptyAttribute(name.to_string()));
                }
                Some(_) => {}
            }
        }

        if let Some(missing) = self
            .attributes
            .iter()
            .find(|s| s.mutability.is_required() && desired.get(s.name).is_none())
        {
            return Err(ConfigError::MissingAttribute(missing.name.to_string()));
        }

        Ok(())
    }
}
