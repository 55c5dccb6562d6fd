//! Test fixtures and store helpers.
//!
//! Provides a small library schema (authors, books, tags and
//! composite-keyed order lines), a seeded in-memory store and shorthand
//! constructors for detached references and operations.

use flushbridge_core::{
    CborWalker, ChangeSet, ClassMetadata, FlushConfig, FlushExecutor, FlushResult, FlushStats,
    IdGenerator, MemoryStore, Schema,
};
use flushbridge_protocol::{
    CollectionChangeOperation, CollectionChangeType, DetachedEntity, FlushSet, Identity,
    PersistOperation, PropertyChangeOperation, PropertyValue, RemoveOperation, Value, WireEntity,
};

/// Tag codes present in a freshly seeded library.
pub const SEEDED_TAGS: [&str; 3] = ["classic", "fantasy", "scifi"];

/// Builds the library schema.
///
/// - `Author { id (sequence), name (required), country }`
/// - `Book { id (sequence), title (required), year, author -> Author, tags -> [Tag] }`
/// - `Tag { code (assigned), label }`
/// - `OrderLine { order + line (assigned, composite), quantity }`
pub fn library_schema() -> Schema {
    let author = ClassMetadata::builder("Author")
        .id("id")
        .required_field("name")
        .field("country")
        .generator(IdGenerator::Sequence)
        .build()
        .expect("author metadata");
    let book = ClassMetadata::builder("Book")
        .id("id")
        .required_field("title")
        .field("year")
        .to_one("author", "Author")
        .to_many("tags", "Tag")
        .generator(IdGenerator::Sequence)
        .build()
        .expect("book metadata");
    let tag = ClassMetadata::builder("Tag")
        .id("code")
        .field("label")
        .build()
        .expect("tag metadata");
    let order_line = ClassMetadata::builder("OrderLine")
        .id("order")
        .id("line")
        .field("quantity")
        .build()
        .expect("order line metadata");

    Schema::new()
        .with(author)
        .with(book)
        .with(tag)
        .with(order_line)
}

/// Creates a store seeded with the library data set:
///
/// - authors 1 (Le Guin) and 2 (Butler, US)
/// - tags `classic`, `fantasy`, `scifi`
/// - book 1 (Earthsea, 1968, author 1, tags `classic`)
/// - book 2 (Dawn, 1987, author 2, tags `scifi` and `fantasy`)
/// - order lines (100, 1) and (100, 2)
pub fn seeded_store() -> MemoryStore {
    let mut store = MemoryStore::new(library_schema()).expect("library schema is valid");
    let seeds = [
        WireEntity::new("Author").field("id", 1).field("name", "Le Guin"),
        WireEntity::new("Author")
            .field("id", 2)
            .field("name", "Butler")
            .field("country", "US"),
        WireEntity::new("Tag").field("code", "classic"),
        WireEntity::new("Tag").field("code", "fantasy"),
        WireEntity::new("Tag").field("code", "scifi"),
        WireEntity::new("Book")
            .field("id", 1)
            .field("title", "Earthsea")
            .field("year", 1968)
            .reference("author", Some(author(1)))
            .collection("tags", vec![tag("classic")]),
        WireEntity::new("Book")
            .field("id", 2)
            .field("title", "Dawn")
            .field("year", 1987)
            .reference("author", Some(author(2)))
            .collection("tags", vec![tag("scifi"), tag("fantasy")]),
        WireEntity::new("OrderLine")
            .field("order", 100)
            .field("line", 1)
            .field("quantity", 3),
        WireEntity::new("OrderLine")
            .field("order", 100)
            .field("line", 2)
            .field("quantity", 1),
    ];
    for entity in seeds {
        store.seed(entity).expect("seed row");
    }
    store
}

/// A seeded store plus a walker, flushed through a fresh executor each time.
pub struct Library {
    /// The store.
    pub store: MemoryStore,
    walker: CborWalker,
    config: FlushConfig,
    last_stats: FlushStats,
}

impl Library {
    /// Creates a library over the seeded data set.
    pub fn new() -> Self {
        Self::over(seeded_store())
    }

    /// Creates a library over an arbitrary store.
    pub fn over(store: MemoryStore) -> Self {
        Self {
            store,
            walker: CborWalker::new(),
            config: FlushConfig::default(),
            last_stats: FlushStats::default(),
        }
    }

    /// Replaces the flush configuration.
    #[must_use]
    pub fn with_config(mut self, config: FlushConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs one flush.
    pub fn flush(&mut self, flush_set: FlushSet) -> FlushResult<ChangeSet> {
        let mut executor = FlushExecutor::new(&mut self.store, &mut self.walker)
            .with_config(self.config.clone());
        let result = executor.flush(flush_set);
        self.last_stats = executor.stats();
        result
    }

    /// Returns the counters of the last flush.
    pub fn last_stats(&self) -> FlushStats {
        self.last_stats
    }

    /// Reads a committed book.
    pub fn book(&self, id: i64) -> WireEntity {
        self.store
            .row("Book", &Identity::single("id", id))
            .unwrap_or_else(|| panic!("book {id} is not stored"))
    }

    /// Returns the sorted tag codes of a committed book.
    pub fn book_tags(&self, id: i64) -> Vec<String> {
        let book = self.book(id);
        let mut codes: Vec<String> = book
            .collections
            .get("tags")
            .into_iter()
            .flatten()
            .filter_map(|tag| tag.fields.get("code").and_then(Value::as_text))
            .map(str::to_string)
            .collect();
        codes.sort();
        codes
    }
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for Library {
    type Target = MemoryStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl std::ops::DerefMut for Library {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.store
    }
}

/// Detached reference to an author.
pub fn author(id: i64) -> DetachedEntity {
    DetachedEntity::with_id("Author", "id", id)
}

/// Detached reference to a book.
pub fn book(id: i64) -> DetachedEntity {
    DetachedEntity::with_id("Book", "id", id)
}

/// Detached reference to a tag.
pub fn tag(code: &str) -> DetachedEntity {
    DetachedEntity::with_id("Tag", "code", code)
}

/// Detached reference to an order line.
pub fn order_line(order: i64, line: i64) -> DetachedEntity {
    DetachedEntity::new("OrderLine")
        .field("order", order)
        .field("line", line)
}

/// Persist operation with a CBOR-encoded payload.
pub fn persist(entity: WireEntity, temporary_uid: &str) -> PersistOperation {
    let payload = entity.encode().expect("encode persist payload");
    PersistOperation::new(payload, temporary_uid)
}

/// Property change setting a scalar field.
pub fn set_field(
    entity: DetachedEntity,
    property: &str,
    value: impl Into<Value>,
) -> PropertyChangeOperation {
    PropertyChangeOperation::new(entity, property, PropertyValue::Scalar(value.into()))
}

/// Property change setting (or clearing) a to-one association.
pub fn set_reference(
    entity: DetachedEntity,
    property: &str,
    target: Option<DetachedEntity>,
) -> PropertyChangeOperation {
    PropertyChangeOperation::new(entity, property, PropertyValue::Entity(target))
}

/// Collection change of the given type.
pub fn change_collection(
    entity: DetachedEntity,
    property: &str,
    change_type: CollectionChangeType,
    items: Vec<DetachedEntity>,
) -> CollectionChangeOperation {
    CollectionChangeOperation::new(entity, property, change_type, items)
}

/// Remove operation.
pub fn remove(entity: DetachedEntity) -> RemoveOperation {
    RemoveOperation::new(entity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_store_contents() {
        let library = Library::new();
        assert_eq!(library.count("Author"), 2);
        assert_eq!(library.count("Tag"), SEEDED_TAGS.len());
        assert_eq!(library.count("OrderLine"), 2);
        assert_eq!(library.book_tags(2), vec!["fantasy", "scifi"]);
    }

    #[test]
    fn persist_payload_decodes() {
        let op = persist(WireEntity::new("Tag").field("code", "x"), "tmp");
        let decoded = WireEntity::decode(&op.entity).unwrap();
        assert_eq!(decoded.entity_type, "Tag");
        assert_eq!(op.temporary_uid, "tmp");
    }
}
