//! Shared fixtures for unit tests.

use crate::memory::MemoryStore;
use crate::schema::{AssociationSlot, ClassMetadata, FieldSlot, IdGenerator, PropertyAccessor, Schema};
use flushbridge_protocol::{DetachedEntity, WireEntity};

/// Authors, books, tags, and composite-keyed order lines.
pub fn library_schema() -> Schema {
    Schema::new()
        .with(
            ClassMetadata::builder("Author")
                .id("id")
                .required_field("name")
                .field("country")
                .generator(IdGenerator::Sequence)
                .build()
                .unwrap(),
        )
        .with(
            ClassMetadata::builder("Book")
                .id("id")
                .required_field("title")
                .field("year")
                .to_one("author", "Author")
                .to_many("tags", "Tag")
                .generator(IdGenerator::Sequence)
                .build()
                .unwrap(),
        )
        .with(
            ClassMetadata::builder("Tag")
                .id("code")
                .field("label")
                .build()
                .unwrap(),
        )
        .with(
            ClassMetadata::builder("OrderLine")
                .id("order")
                .id("line")
                .field("quantity")
                .build()
                .unwrap(),
        )
}

/// A store holding two authors, three tags, three books and two order
/// lines. Book 3 points at an author that does not exist.
pub fn library_store() -> MemoryStore {
    let mut store = MemoryStore::new(library_schema()).unwrap();
    let author = |id: i64| DetachedEntity::with_id("Author", "id", id);
    let tag = |code: &str| DetachedEntity::with_id("Tag", "code", code);

    store
        .seed(WireEntity::new("Author").field("id", 1).field("name", "Le Guin"))
        .unwrap();
    store
        .seed(
            WireEntity::new("Author")
                .field("id", 2)
                .field("name", "Butler")
                .field("country", "US"),
        )
        .unwrap();
    for code in ["scifi", "fantasy", "classic"] {
        store.seed(WireEntity::new("Tag").field("code", code)).unwrap();
    }
    store
        .seed(
            WireEntity::new("Book")
                .field("id", 1)
                .field("title", "Earthsea")
                .field("year", 1968)
                .reference("author", Some(author(1)))
                .collection("tags", vec![tag("classic")]),
        )
        .unwrap();
    store
        .seed(
            WireEntity::new("Book")
                .field("id", 2)
                .field("title", "Dawn")
                .field("year", 1987)
                .reference("author", Some(author(2)))
                .collection("tags", vec![tag("scifi"), tag("fantasy")]),
        )
        .unwrap();
    store
        .seed(
            WireEntity::new("Book")
                .field("id", 3)
                .field("title", "Lost")
                .reference("author", Some(author(99))),
        )
        .unwrap();
    for line in [1, 2] {
        store
            .seed(
                WireEntity::new("OrderLine")
                    .field("order", 100)
                    .field("line", line)
                    .field("quantity", 1),
            )
            .unwrap();
    }
    store
}

pub fn slot_of_field(metadata: &ClassMetadata, name: &str) -> FieldSlot {
    match metadata.classify(name) {
        Some(PropertyAccessor::Field(slot)) => slot,
        other => panic!("{name} is not a field: {other:?}"),
    }
}

pub fn slot_of_one(metadata: &ClassMetadata, name: &str) -> AssociationSlot {
    match metadata.classify(name) {
        Some(PropertyAccessor::ToOne(slot)) => slot,
        other => panic!("{name} is not a to-one association: {other:?}"),
    }
}

pub fn slot_of_many(metadata: &ClassMetadata, name: &str) -> AssociationSlot {
    match metadata.classify(name) {
        Some(PropertyAccessor::ToMany(slot)) => slot,
        other => panic!("{name} is not a to-many association: {other:?}"),
    }
}
