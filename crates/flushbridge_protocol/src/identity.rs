//! Entity identities and detached references.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The identifier of an entity: identifier-field name to value.
///
/// Composite identifiers carry one entry per identifier field. Two
/// identities are equal when every component is equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(BTreeMap<String, Value>);

impl Identity {
    /// Creates an empty identity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a single-field identity.
    pub fn single(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut identity = Self::new();
        identity.insert(field, value);
        identity
    }

    /// Creates an identity from `(field, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Sets one identifier component.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Returns one identifier component.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Iterates over `(field, value)` components in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when there are no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true when there is at least one component and none is null.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.0.is_empty() && self.0.values().all(|v| !v.is_null())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (field, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}: {value}")?;
        }
        write!(f, "}}")
    }
}

/// A partial, non-authoritative copy of an entity.
///
/// Only the identifying fields are required. When the entity was persisted
/// earlier in the same flush and has no identifier yet, `temporary_uid`
/// names it instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedEntity {
    /// Entity type name.
    pub entity_type: String,
    /// Field values known to the client; at least the identifier fields.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Client-local placeholder id of a not-yet-persisted entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary_uid: Option<String>,
}

impl DetachedEntity {
    /// Creates a detached reference with no fields.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: BTreeMap::new(),
            temporary_uid: None,
        }
    }

    /// Creates a detached reference carrying a single identifier value.
    pub fn with_id(
        entity_type: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self::new(entity_type).field(field, value)
    }

    /// Creates a detached reference to an entity persisted in the same flush.
    pub fn pending(entity_type: impl Into<String>, temporary_uid: impl Into<String>) -> Self {
        let mut detached = Self::new(entity_type);
        detached.temporary_uid = Some(temporary_uid.into());
        detached
    }

    /// Sets a field value.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builds a detached reference from an identity.
    pub fn from_identity(entity_type: impl Into<String>, identity: &Identity) -> Self {
        let mut detached = Self::new(entity_type);
        for (field, value) in identity.iter() {
            detached.fields.insert(field.to_string(), value.clone());
        }
        detached
    }
}
