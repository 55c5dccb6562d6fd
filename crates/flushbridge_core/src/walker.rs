//! Deserialization of persist payloads.
//!
//! Persist operations carry their entity as an opaque payload. A
//! [`DeserializationWalker`] turns that payload into a [`WireEntity`] the
//! executor can attach to the store.

use crate::error::{FlushError, FlushResult};
use flushbridge_protocol::WireEntity;
use std::collections::BTreeSet;

/// Converts an encoded entity payload into its wire form.
pub trait DeserializationWalker {
    /// Decodes one payload.
    fn walk(&mut self, payload: &[u8]) -> FlushResult<WireEntity>;
}

impl<F> DeserializationWalker for F
where
    F: FnMut(&[u8]) -> FlushResult<WireEntity>,
{
    fn walk(&mut self, payload: &[u8]) -> FlushResult<WireEntity> {
        self(payload)
    }
}

/// Walker for CBOR-encoded [`WireEntity`] payloads.
///
/// With an allow-list, payloads of any other entity type are rejected.
#[derive(Debug, Clone, Default)]
pub struct CborWalker {
    allowed: Option<BTreeSet<String>>,
}

impl CborWalker {
    /// Creates a walker accepting every entity type.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity type to the allow-list.
    #[must_use]
    pub fn allow(mut self, entity_type: impl Into<String>) -> Self {
        self.allowed
            .get_or_insert_with(BTreeSet::new)
            .insert(entity_type.into());
        self
    }

    /// Returns true if payloads of this type are accepted.
    pub fn accepts(&self, entity_type: &str) -> bool {
        self.allowed
            .as_ref()
            .map_or(true, |allowed| allowed.contains(entity_type))
    }
}

impl DeserializationWalker for CborWalker {
    fn walk(&mut self, payload: &[u8]) -> FlushResult<WireEntity> {
        let entity = WireEntity::decode(payload)?;
        if !self.accepts(&entity.entity_type) {
            return Err(FlushError::invalid_operation(format!(
                "entity type {} may not be created by clients",
                entity.entity_type
            )));
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(entity_type: &str) -> Vec<u8> {
        WireEntity::new(entity_type)
            .field("name", "Le Guin")
            .encode()
            .unwrap()
    }

    #[test]
    fn decodes_payload() {
        let mut walker = CborWalker::new();
        let entity = walker.walk(&payload("Author")).unwrap();
        assert_eq!(entity.entity_type, "Author");
        assert_eq!(entity.get("name").and_then(|v| v.as_text()), Some("Le Guin"));
    }

    #[test]
    fn allow_list_rejects_other_types() {
        let mut walker = CborWalker::new().allow("Book");
        assert!(walker.accepts("Book"));
        assert!(!walker.accepts("Author"));

        let err = walker.walk(&payload("Author")).unwrap_err();
        assert!(matches!(err, FlushError::InvalidOperation { .. }));
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        let mut walker = CborWalker::new();
        let err = walker.walk(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, FlushError::Protocol(_)));
    }

    #[test]
    fn closures_are_walkers() {
        let mut calls = 0;
        let mut walker = |_: &[u8]| -> FlushResult<WireEntity> {
            calls += 1;
            Ok(WireEntity::new("Tag").field("code", "fixed"))
        };
        let entity = walker.walk(b"ignored").unwrap();
        assert_eq!(entity.get("code").and_then(|v| v.as_text()), Some("fixed"));
        assert_eq!(calls, 1);
    }
}
