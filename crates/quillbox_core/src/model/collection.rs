//! Declared schema for every collection a snapshot carries.
//!
//! # Responsibility
//! - Name each collection once: snapshot key, SQLite table, parents, fields.
//! - Map every snapshot field to one column, with the accepted spellings.
//! - Derive the parent-before-child order used by replace-all restores.
//!
//! # Invariants
//! - The first field of every collection is its `id` primary key.
//! - A field's `column` spelling is always accepted as an alias, so
//!   snake_case documents decode without key rewriting.
//! - `Collection::insert_order()` lists every parent before its children.
//! - `references` names one field per declared parent link.

use once_cell::sync::Lazy;
use std::fmt::{Display, Formatter};

/// One top-level list inside a snapshot document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Books,
    Characters,
    Chapters,
    Ideas,
    TimelineEvents,
    WishlistItems,
    Images,
    Connections,
    ChapterIllustrations,
}

/// Storage shape of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text. Numbers and booleans are stringified on decode.
    Text,
    /// 64-bit integer.
    Integer,
    /// Stored as `0/1`, rendered as JSON `true/false`.
    Boolean,
    /// Epoch milliseconds. RFC 3339 strings are accepted on decode.
    Timestamp,
    /// Lists or structured objects, stored as compact JSON text.
    Json,
}

/// Value used when a non-required field is absent or `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    Null,
    EmptyText,
    EmptyList,
    EmptyObject,
    False,
    Zero,
}

/// Mapping between one snapshot field and one SQLite column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Canonical camelCase name written by `encode`.
    pub name: &'static str,
    /// snake_case column name; also accepted on decode.
    pub column: &'static str,
    /// Older spellings accepted on decode, checked after `name` and `column`.
    pub aliases: &'static [&'static str],
    pub kind: FieldKind,
    pub required: bool,
    pub default: FieldDefault,
}

impl FieldSpec {
    const fn new(name: &'static str, column: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            column,
            aliases: &[],
            kind,
            required: false,
            default: FieldDefault::Null,
        }
    }

    const fn text(name: &'static str, column: &'static str) -> Self {
        Self::new(name, column, FieldKind::Text)
    }

    const fn integer(name: &'static str, column: &'static str) -> Self {
        Self::new(name, column, FieldKind::Integer)
    }

    const fn timestamp(name: &'static str, column: &'static str) -> Self {
        Self::new(name, column, FieldKind::Timestamp)
    }

    const fn json(name: &'static str, column: &'static str, default: FieldDefault) -> Self {
        Self::new(name, column, FieldKind::Json).or(default)
    }

    const fn boolean(name: &'static str, column: &'static str) -> Self {
        Self::new(name, column, FieldKind::Boolean).or(FieldDefault::False)
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn or(mut self, default: FieldDefault) -> Self {
        self.default = default;
        self
    }

    const fn aka(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    /// Every key accepted for this field, in lookup priority order.
    pub fn accepted_keys(&self) -> impl Iterator<Item = &'static str> {
        let aliases: &'static [&'static str] = self.aliases;
        [self.name, self.column]
            .into_iter()
            .chain(aliases.iter().copied())
    }
}

/// A field holding the `id` of a row in a parent collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentRef {
    pub field: &'static str,
    pub parent: Collection,
}

const fn refers(field: &'static str, parent: Collection) -> ParentRef {
    ParentRef { field, parent }
}

/// Declared layout of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSchema {
    pub collection: Collection,
    pub table: &'static str,
    pub fields: &'static [FieldSpec],
    pub parents: &'static [Collection],
    pub references: &'static [ParentRef],
}

impl CollectionSchema {
    /// Position of a field by canonical name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Field spec by canonical name.
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        let fields: &'static [FieldSpec] = self.fields;
        fields.iter().find(|field| field.name == name)
    }

    /// Comma-separated column list in field order.
    pub fn column_list(&self) -> String {
        self.fields
            .iter()
            .map(|field| field.column)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

const ID: FieldSpec = FieldSpec::text("id", "id").required();
const BOOK_REF: FieldSpec = FieldSpec::text("bookId", "book_id")
    .required()
    .aka(&["book"]);
const CREATED_AT: FieldSpec = FieldSpec::timestamp("createdAt", "created_at");
const UPDATED_AT: FieldSpec = FieldSpec::timestamp("updatedAt", "updated_at");
const SORT_ORDER: FieldSpec = FieldSpec::integer("sortOrder", "sort_order")
    .or(FieldDefault::Zero)
    .aka(&["order", "position"]);
const CHARACTER_IDS: FieldSpec = FieldSpec::json("characterIds", "character_ids", FieldDefault::EmptyList)
    .aka(&["linkedCharacters", "characters"]);

const BOOKS: CollectionSchema = CollectionSchema {
    collection: Collection::Books,
    table: "books",
    fields: &[
        ID,
        FieldSpec::text("title", "title").or(FieldDefault::EmptyText),
        FieldSpec::text("description", "description"),
        FieldSpec::text("genre", "genre"),
        FieldSpec::text("coverImage", "cover_image").aka(&["cover"]),
        FieldSpec::integer("wordGoal", "word_goal").aka(&["targetWordCount"]),
        CREATED_AT,
        UPDATED_AT,
    ],
    parents: &[],
    references: &[],
};

const CHARACTERS: CollectionSchema = CollectionSchema {
    collection: Collection::Characters,
    table: "characters",
    fields: &[
        ID,
        BOOK_REF,
        FieldSpec::text("name", "name").or(FieldDefault::EmptyText),
        FieldSpec::text("role", "role"),
        FieldSpec::text("description", "description"),
        FieldSpec::json("traits", "traits", FieldDefault::EmptyList),
        FieldSpec::text("avatar", "avatar").aka(&["image", "imageUrl"]),
        CREATED_AT,
        UPDATED_AT,
    ],
    parents: &[Collection::Books],
    references: &[refers("bookId", Collection::Books)],
};

const CHAPTERS: CollectionSchema = CollectionSchema {
    collection: Collection::Chapters,
    table: "chapters",
    fields: &[
        ID,
        BOOK_REF,
        FieldSpec::text("title", "title").or(FieldDefault::EmptyText),
        FieldSpec::text("content", "content"),
        SORT_ORDER,
        FieldSpec::integer("wordCount", "word_count"),
        CREATED_AT,
        UPDATED_AT,
    ],
    parents: &[Collection::Books],
    references: &[refers("bookId", Collection::Books)],
};

// `position` is a storyboard coordinate here, not an ordering key.
const IDEAS: CollectionSchema = CollectionSchema {
    collection: Collection::Ideas,
    table: "ideas",
    fields: &[
        ID,
        BOOK_REF,
        FieldSpec::text("title", "title").or(FieldDefault::EmptyText),
        FieldSpec::text("content", "content"),
        FieldSpec::text("color", "color"),
        FieldSpec::json("position", "position", FieldDefault::EmptyObject),
        CHARACTER_IDS,
        FieldSpec::json("tags", "tags", FieldDefault::EmptyList),
        CREATED_AT,
        UPDATED_AT,
    ],
    parents: &[Collection::Books],
    references: &[refers("bookId", Collection::Books)],
};

const TIMELINE_EVENTS: CollectionSchema = CollectionSchema {
    collection: Collection::TimelineEvents,
    table: "timeline_events",
    fields: &[
        ID,
        BOOK_REF,
        FieldSpec::text("title", "title").or(FieldDefault::EmptyText),
        FieldSpec::text("description", "description"),
        FieldSpec::text("eventDate", "event_date").aka(&["date"]),
        SORT_ORDER,
        CHARACTER_IDS,
        CREATED_AT,
        UPDATED_AT,
    ],
    parents: &[Collection::Books],
    references: &[refers("bookId", Collection::Books)],
};

const WISHLIST_ITEMS: CollectionSchema = CollectionSchema {
    collection: Collection::WishlistItems,
    table: "wishlist_items",
    fields: &[
        ID,
        FieldSpec::text("bookId", "book_id"),
        FieldSpec::text("title", "title").or(FieldDefault::EmptyText),
        FieldSpec::text("description", "description"),
        FieldSpec::text("priority", "priority"),
        FieldSpec::boolean("completed", "completed").aka(&["done", "isCompleted"]),
        CREATED_AT,
        UPDATED_AT,
    ],
    parents: &[Collection::Books],
    references: &[refers("bookId", Collection::Books)],
};

const IMAGES: CollectionSchema = CollectionSchema {
    collection: Collection::Images,
    table: "images",
    fields: &[
        ID,
        FieldSpec::text("name", "name").aka(&["fileName"]),
        FieldSpec::text("mimeType", "mime_type").aka(&["type"]),
        FieldSpec::text("data", "data")
            .or(FieldDefault::EmptyText)
            .aka(&["dataUrl", "blob"]),
        CREATED_AT,
    ],
    parents: &[],
    references: &[],
};

const CONNECTIONS: CollectionSchema = CollectionSchema {
    collection: Collection::Connections,
    table: "connections",
    fields: &[
        ID,
        BOOK_REF,
        FieldSpec::text("fromIdeaId", "from_idea_id")
            .required()
            .aka(&["from", "sourceId", "source"]),
        FieldSpec::text("toIdeaId", "to_idea_id")
            .required()
            .aka(&["to", "targetId", "target"]),
        FieldSpec::text("label", "label"),
        CREATED_AT,
    ],
    parents: &[Collection::Books, Collection::Ideas],
    references: &[
        refers("bookId", Collection::Books),
        refers("fromIdeaId", Collection::Ideas),
        refers("toIdeaId", Collection::Ideas),
    ],
};

const CHAPTER_ILLUSTRATIONS: CollectionSchema = CollectionSchema {
    collection: Collection::ChapterIllustrations,
    table: "chapter_illustrations",
    fields: &[
        ID,
        FieldSpec::text("chapterId", "chapter_id").required().aka(&["chapter"]),
        FieldSpec::text("imageId", "image_id"),
        FieldSpec::text("caption", "caption"),
        SORT_ORDER,
        CREATED_AT,
    ],
    parents: &[Collection::Chapters, Collection::Images],
    references: &[
        refers("chapterId", Collection::Chapters),
        refers("imageId", Collection::Images),
    ],
};

static INSERT_ORDER: Lazy<Vec<Collection>> = Lazy::new(topological_order);

impl Collection {
    /// Every collection in declaration order.
    pub const ALL: [Collection; 9] = [
        Collection::Books,
        Collection::Characters,
        Collection::Chapters,
        Collection::Ideas,
        Collection::TimelineEvents,
        Collection::WishlistItems,
        Collection::Images,
        Collection::Connections,
        Collection::ChapterIllustrations,
    ];

    /// Top-level key in a snapshot document.
    pub fn key(self) -> &'static str {
        match self {
            Self::Books => "books",
            Self::Characters => "characters",
            Self::Chapters => "chapters",
            Self::Ideas => "ideas",
            Self::TimelineEvents => "timelineEvents",
            Self::WishlistItems => "wishlistItems",
            Self::Images => "images",
            Self::Connections => "connections",
            Self::ChapterIllustrations => "chapterIllustrations",
        }
    }

    /// Whether a document without this key must be rejected.
    ///
    /// Optional collections were added after the first snapshot version.
    pub fn is_required(self) -> bool {
        !matches!(self, Self::Connections | Self::ChapterIllustrations)
    }

    pub fn schema(self) -> &'static CollectionSchema {
        match self {
            Self::Books => &BOOKS,
            Self::Characters => &CHARACTERS,
            Self::Chapters => &CHAPTERS,
            Self::Ideas => &IDEAS,
            Self::TimelineEvents => &TIMELINE_EVENTS,
            Self::WishlistItems => &WISHLIST_ITEMS,
            Self::Images => &IMAGES,
            Self::Connections => &CONNECTIONS,
            Self::ChapterIllustrations => &CHAPTER_ILLUSTRATIONS,
        }
    }

    pub fn table(self) -> &'static str {
        self.schema().table
    }

    /// Parent-before-child order for bulk inserts.
    pub fn insert_order() -> &'static [Collection] {
        INSERT_ORDER.as_slice()
    }

    /// Child-before-parent order for wiping tables with foreign keys on.
    pub fn delete_order() -> impl Iterator<Item = Collection> {
        INSERT_ORDER.iter().rev().copied()
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Kahn's algorithm over declared parents, stable on declaration order.
fn topological_order() -> Vec<Collection> {
    let mut ordered: Vec<Collection> = Vec::with_capacity(Collection::ALL.len());
    while ordered.len() < Collection::ALL.len() {
        let next = Collection::ALL.iter().copied().find(|candidate| {
            !ordered.contains(candidate)
                && candidate
                    .schema()
                    .parents
                    .iter()
                    .all(|parent| ordered.contains(parent))
        });
        match next {
            Some(collection) => ordered.push(collection),
            // A cycle would leave the remaining collections unplaceable; the
            // schema table is static, so this is unreachable unless edited badly.
            None => unreachable!("collection schema declares a parent cycle"),
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::{Collection, FieldKind};
    use std::collections::HashSet;

    fn position(collection: Collection) -> usize {
        Collection::insert_order()
            .iter()
            .position(|current| *current == collection)
            .expect("every collection is ordered")
    }

    #[test]
    fn insert_order_places_parents_first() {
        assert_eq!(Collection::insert_order().len(), Collection::ALL.len());
        for collection in Collection::ALL {
            for parent in collection.schema().parents {
                assert!(
                    position(*parent) < position(collection),
                    "{parent} must precede {collection}"
                );
            }
        }
    }

    #[test]
    fn references_cover_exactly_the_declared_parents() {
        for collection in Collection::ALL {
            let schema = collection.schema();
            let referenced: HashSet<Collection> =
                schema.references.iter().map(|reference| reference.parent).collect();
            let declared: HashSet<Collection> = schema.parents.iter().copied().collect();
            assert_eq!(referenced, declared, "{collection}");
            for reference in schema.references {
                let field = schema.field(reference.field).unwrap();
                assert_eq!(field.kind, FieldKind::Text);
            }
        }
    }

    #[test]
    fn delete_order_is_reverse_of_insert_order() {
        let deletes: Vec<Collection> = Collection::delete_order().collect();
        let mut inserts = Collection::insert_order().to_vec();
        inserts.reverse();
        assert_eq!(deletes, inserts);
    }

    #[test]
    fn books_come_first_and_link_tables_last() {
        assert_eq!(Collection::insert_order()[0], Collection::Books);
        assert!(position(Collection::Connections) > position(Collection::Ideas));
        assert!(position(Collection::ChapterIllustrations) > position(Collection::Chapters));
    }

    #[test]
    fn every_collection_starts_with_required_text_id() {
        for collection in Collection::ALL {
            let id = collection.schema().fields[0];
            assert_eq!(id.name, "id");
            assert!(id.required);
            assert_eq!(id.kind, FieldKind::Text);
        }
    }

    #[test]
    fn accepted_keys_are_unambiguous_within_a_collection() {
        for collection in Collection::ALL {
            let mut seen = HashSet::new();
            for field in collection.schema().fields {
                for key in field.accepted_keys().collect::<HashSet<_>>() {
                    assert!(
                        seen.insert(key),
                        "key `{key}` maps to two fields in {collection}"
                    );
                }
            }
        }
    }

    #[test]
    fn only_link_collections_are_optional() {
        let optional: Vec<Collection> = Collection::ALL
            .into_iter()
            .filter(|collection| !collection.is_required())
            .collect();
        assert_eq!(
            optional,
            vec![Collection::Connections, Collection::ChapterIllustrations]
        );
    }
}
