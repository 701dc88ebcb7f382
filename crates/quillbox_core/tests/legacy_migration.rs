mod support;

use quillbox_core::legacy::{migrate, LegacyError, LegacyStore};
use quillbox_core::{open_db_in_memory, Collection};
use rusqlite::Connection;
use serde_json::json;
use support::{count_rows, seeded_connection, two_books_five_chapters, write_legacy_db};

#[test]
fn legacy_books_and_chapters_move_into_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");
    write_legacy_db(&path, &two_books_five_chapters());
    let legacy = LegacyStore::new(&path);
    assert!(legacy.has_legacy_data());

    let conn = open_db_in_memory().unwrap();
    let report = migrate(&legacy, &conn).unwrap().unwrap();

    assert_eq!(report.books, 2);
    assert_eq!(report.restored.count(Collection::Chapters), 5);
    assert_eq!(report.restored.count(Collection::Ideas), 1);
    assert_eq!(count_rows(&conn, "books"), 2);
    assert_eq!(count_rows(&conn, "chapters"), 5);
    let idea_id: String = conn
        .query_row("SELECT id FROM ideas;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(idea_id, "idea-key-1");
    assert_eq!(report.orphans_dropped, 0);
    assert!(report.legacy_removed);

    assert!(!path.exists());
    assert!(!legacy.has_legacy_data());
}

#[test]
fn migration_refuses_non_empty_canonical_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");
    write_legacy_db(&path, &two_books_five_chapters());
    let legacy = LegacyStore::new(&path);

    let conn = seeded_connection();
    let err = migrate(&legacy, &conn).unwrap_err();

    assert!(matches!(err, LegacyError::CanonicalStoreNotEmpty));
    assert!(path.exists());
}

#[test]
fn legacy_without_books_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");
    write_legacy_db(
        &path,
        &[("wishlist", "w1", json!({"title": "orphan wish"}).to_string())],
    );
    let legacy = LegacyStore::new(&path);

    let conn = open_db_in_memory().unwrap();
    assert!(migrate(&legacy, &conn).unwrap().is_none());
    assert!(path.exists());
    assert_eq!(count_rows(&conn, "wishlist_items"), 0);
}

#[test]
fn invalid_legacy_records_abort_without_touching_anything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");
    let mut rows = two_books_five_chapters();
    rows.push(("chapters", "bad", "not json".to_string()));
    write_legacy_db(&path, &rows);
    let legacy = LegacyStore::new(&path);

    let conn = open_db_in_memory().unwrap();
    let err = migrate(&legacy, &conn).unwrap_err();

    assert!(matches!(err, LegacyError::InvalidRecord { .. }));
    assert!(path.exists());
    assert_eq!(count_rows(&conn, "books"), 0);
}

#[test]
fn orphaned_legacy_rows_are_dropped_and_the_rest_migrates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");
    let mut rows = two_books_five_chapters();
    rows.push((
        "chapters",
        "ch-orphan",
        json!({"bookId": "deleted-book", "title": "Lost"}).to_string(),
    ));
    rows.push((
        "chapterIllustrations",
        "ill-orphan",
        json!({"chapterId": "ch-orphan", "caption": "under a lost chapter"}).to_string(),
    ));
    rows.push((
        "chapterIllustrations",
        "ill-kept",
        json!({"chapterId": "ch1", "imageId": "deleted-image"}).to_string(),
    ));
    rows.push((
        "wishlist",
        "w1",
        json!({"bookId": "deleted-book", "title": "Keep me"}).to_string(),
    ));
    write_legacy_db(&path, &rows);
    let legacy = LegacyStore::new(&path);

    let conn = open_db_in_memory().unwrap();
    let report = migrate(&legacy, &conn).unwrap().unwrap();

    assert_eq!(report.books, 2);
    assert_eq!(report.orphans_dropped, 2);
    assert_eq!(count_rows(&conn, "chapters"), 5);
    assert_eq!(count_rows(&conn, "chapter_illustrations"), 1);
    assert_eq!(count_rows(&conn, "wishlist_items"), 1);
    let image_id: Option<String> = conn
        .query_row(
            "SELECT image_id FROM chapter_illustrations WHERE id = 'ill-kept';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(image_id, None);
    let wish_book: Option<String> = conn
        .query_row("SELECT book_id FROM wishlist_items;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(wish_book, None);
    assert!(!legacy.has_legacy_data());
}

#[test]
fn undeletable_legacy_files_do_not_undo_a_committed_migration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");
    write_legacy_db(&path, &two_books_five_chapters());
    std::fs::create_dir(dir.path().join("legacy.db-shm")).unwrap();
    let legacy = LegacyStore::new(&path);

    let conn = open_db_in_memory().unwrap();
    let report = migrate(&legacy, &conn).unwrap().unwrap();

    assert!(!report.legacy_removed);
    assert_eq!(report.books, 2);
    assert_eq!(count_rows(&conn, "books"), 2);
    assert_eq!(count_rows(&conn, "chapters"), 5);
    assert!(matches!(
        migrate(&legacy, &conn),
        Err(LegacyError::CanonicalStoreNotEmpty)
    ));
}

#[test]
fn missing_or_foreign_files_are_not_legacy_data() {
    let dir = tempfile::tempdir().unwrap();
    assert!(!LegacyStore::new(dir.path().join("absent.db")).has_legacy_data());

    let other = dir.path().join("other.db");
    Connection::open(&other)
        .unwrap()
        .execute_batch("CREATE TABLE notes (id TEXT);")
        .unwrap();
    assert!(!LegacyStore::new(&other).has_legacy_data());
}
