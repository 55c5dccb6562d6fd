//! Property-based test generators using proptest.
//!
//! Provides strategies for generating flush operations against the
//! library fixture, plus a reference model of collection membership.

use crate::fixtures::{tag, SEEDED_TAGS};
use flushbridge_protocol::{CollectionChangeType, DetachedEntity, Value};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Strategy for scalar values, null included.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-zA-Z0-9 ]{0,24}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ]
}

/// Strategy for book titles (never null).
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,12}( [A-Z][a-z]{1,12}){0,3}").expect("Invalid regex")
}

/// Strategy for author names.
pub fn author_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{2,10}").expect("Invalid regex")
}

/// Strategy for collection change types.
pub fn change_type_strategy() -> impl Strategy<Value = CollectionChangeType> {
    prop_oneof![
        Just(CollectionChangeType::Add),
        Just(CollectionChangeType::Remove),
        Just(CollectionChangeType::Reset),
    ]
}

/// Strategy for item lists drawn from the seeded tags; repeats allowed.
pub fn seeded_tag_items_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::sample::select(SEEDED_TAGS.to_vec()), 0..5)
        .prop_map(|codes| codes.into_iter().map(str::to_string).collect())
}

/// A collection change on a book's tags, in model form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagChange {
    /// Kind of change.
    pub change_type: CollectionChangeType,
    /// Tag codes.
    pub items: Vec<String>,
}

impl TagChange {
    /// Returns the items as detached references.
    pub fn detached_items(&self) -> Vec<DetachedEntity> {
        self.items.iter().map(|code| tag(code)).collect()
    }

    /// Applies the change to a membership model.
    pub fn apply_to(&self, members: &mut BTreeSet<String>) {
        match self.change_type {
            CollectionChangeType::Add => members.extend(self.items.iter().cloned()),
            CollectionChangeType::Remove => {
                for item in &self.items {
                    members.remove(item);
                }
            }
            CollectionChangeType::Reset => {
                members.clear();
                members.extend(self.items.iter().cloned());
            }
        }
    }
}

/// Strategy for a sequence of tag changes.
pub fn tag_changes_strategy(max: usize) -> impl Strategy<Value = Vec<TagChange>> {
    prop::collection::vec(
        (change_type_strategy(), seeded_tag_items_strategy())
            .prop_map(|(change_type, items)| TagChange { change_type, items }),
        0..=max,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_reset_replaces() {
        let mut members: BTreeSet<String> = ["scifi".to_string()].into_iter().collect();
        TagChange {
            change_type: CollectionChangeType::Reset,
            items: vec!["classic".into(), "classic".into()],
        }
        .apply_to(&mut members);
        assert_eq!(members.into_iter().collect::<Vec<_>>(), vec!["classic"]);
    }

    proptest! {
        #[test]
        fn items_are_seeded_tags(items in seeded_tag_items_strategy()) {
            for item in items {
                prop_assert!(SEEDED_TAGS.contains(&item.as_str()));
            }
        }
    }
}
