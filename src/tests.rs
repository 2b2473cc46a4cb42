use crate::config::Config;
use crate::db::{Database, READ_COLLECTION, TO_READ_COLLECTION, User, now_timestamp};
use crate::error::AppError;
use crate::library::{Book, BookOrder, Page};
use crate::server::{self, AppState};
use chrono::Utc;
use std::path::Path;

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn create_user(db: &Database, id: &str, email: &str) {
    let user = User {
        id: id.to_string(),
        email: email.to_string(),
        password_hash: "hash".to_string(),
        admin: false,
        created_at: now_timestamp(),
    };
    db.create_user(&user).unwrap();
}

fn collection_id(db: &Database, user_id: &str, name: &str) -> String {
    db.collections_of(user_id)
        .unwrap()
        .into_iter()
        .find(|c| c.name == name)
        .unwrap()
        .id
}

fn catalog_book(key: &str, title: &str, collection_id: &str) -> Book {
    Book {
        key: key.to_string(),
        title: title.to_string(),
        author: "Some Author".to_string(),
        release_year: 1965,
        collection_id: collection_id.to_string(),
        ..Default::default()
    }
}

fn read_book(key: &str, title: &str, collection_id: &str) -> Book {
    Book {
        start_reading: Some(Utc::now() - chrono::Duration::days(7)),
        finish_reading: Some(Utc::now()),
        my_rating: Some(4.5),
        comment: Some("great".to_string()),
        ..catalog_book(key, title, collection_id)
    }
}

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.auth.secret = "test-secret".to_string();
    // Nothing listens on port 1: the external branch fails fast.
    config.catalog.search_url = "http://127.0.0.1:1/search.json?q=".to_string();
    config.catalog.timeout_seconds = 2;
    config.covers.dir = dir.join("covers");
    config.covers.timeout_seconds = 2;
    config
}

// ========== USERS AND COLLECTIONS ==========

#[test]
fn db_user_gets_reserved_collections() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    let collections = db.collections_of("user-1").unwrap();
    assert_eq!(collections.len(), 2);

    let read = collections.iter().find(|c| c.name == READ_COLLECTION).unwrap();
    assert!(read.exclusive);
    assert!(read.read_col);
    assert!(!read.editable);

    let to_read = collections.iter().find(|c| c.name == TO_READ_COLLECTION).unwrap();
    assert!(!to_read.read_col);
    assert!(!to_read.editable);
}

#[test]
fn db_duplicate_email_fails_without_partial_rows() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    let dup = User {
        id: "user-2".to_string(),
        email: "alice@example.com".to_string(),
        password_hash: "hash".to_string(),
        admin: false,
        created_at: now_timestamp(),
    };
    assert!(matches!(db.create_user(&dup), Err(AppError::Conflict(_))));
    assert!(db.collections_of("user-2").unwrap().is_empty());
    assert!(db.get_user_by_id("user-2").unwrap().is_none());
}

#[test]
fn db_get_user_by_email_ignores_case() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    let user = db.get_user_by_email("  Alice@Example.COM ").unwrap().unwrap();
    assert_eq!(user.id, "user-1");
}

#[test]
fn collection_create_update_delete() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    let created = db.create_collection("user-1", "Sci-fi", false).unwrap();
    assert!(created.editable);
    assert!(!created.read_col);

    db.update_collection(&created.id, "user-1", "Science fiction", true)
        .unwrap();

    db.register_book(&catalog_book("OL1M", "Dune", &created.id), "user-1")
        .unwrap();

    let listed = db.collections_of("user-1").unwrap();
    assert_eq!(listed.len(), 3);
    let updated = listed.iter().find(|c| c.id == created.id).unwrap();
    assert_eq!(updated.name, "Science fiction");
    assert!(updated.exclusive);
    assert_eq!(updated.contained_books, 1);

    db.delete_collection(&created.id, "user-1").unwrap();
    assert_eq!(db.collections_of("user-1").unwrap().len(), 2);

    let (books, associations) = db.row_counts().unwrap();
    assert_eq!(books, 1);
    assert_eq!(associations, 0);
}

#[test]
fn collection_reserved_is_not_editable() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let read = collection_id(&db, "user-1", READ_COLLECTION);

    assert!(matches!(
        db.update_collection(&read, "user-1", "Finished", true),
        Err(AppError::NotEditable)
    ));
    assert!(matches!(
        db.delete_collection(&read, "user-1"),
        Err(AppError::NotEditable)
    ));
    assert_eq!(db.collections_of("user-1").unwrap().len(), 2);
}

#[test]
fn collection_of_another_user_is_not_found() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    create_user(&db, "user-2", "bob@example.com");
    let theirs = db.create_collection("user-2", "Bob's", false).unwrap();

    assert!(matches!(
        db.delete_collection(&theirs.id, "user-1"),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        db.update_collection(&theirs.id, "user-1", "Mine now", false),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        db.create_collection("user-1", "   ", false),
        Err(AppError::Validation(_))
    ));
}

// ========== INGESTION ==========

#[test]
fn ingest_new_key_creates_book_and_association() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);

    let registration = db
        .register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap();

    assert!(registration.created);
    assert!(!registration.book.id.is_empty());
    assert!(registration.book.date_added.is_some());
    assert_eq!(db.row_counts().unwrap(), (1, 1));

    let stored = db.get_book(&registration.book.id).unwrap().unwrap();
    assert_eq!(stored.key, "OL1M");
    assert_eq!(stored.title, "Dune");
}

#[test]
fn ingest_existing_key_reuses_book() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    create_user(&db, "user-2", "bob@example.com");
    let alice = collection_id(&db, "user-1", TO_READ_COLLECTION);
    let bob = collection_id(&db, "user-2", TO_READ_COLLECTION);

    let first = db
        .register_book(&catalog_book("OL1M", "Dune", &alice), "user-1")
        .unwrap();
    let second = db
        .register_book(&catalog_book("OL1M", "Dune", &bob), "user-2")
        .unwrap();

    assert!(!second.created);
    assert_eq!(first.book.id, second.book.id);
    assert_eq!(db.row_counts().unwrap(), (1, 2));
}

#[test]
fn ingest_same_collection_twice_is_conflict() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);

    db.register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap();
    let err = db
        .register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(db.row_counts().unwrap(), (1, 1));
}

#[test]
fn ingest_already_read_is_rejected_and_rolled_back() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let read = collection_id(&db, "user-1", READ_COLLECTION);
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);

    db.register_book(&read_book("OL1M", "Dune", &read), "user-1")
        .unwrap();
    let before = db.row_counts().unwrap();

    let err = db
        .register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyRead));
    assert_eq!(err.to_string(), "book already read");

    let err = db
        .register_book(&read_book("OL1M", "Dune", &read), "user-1")
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyRead));

    assert_eq!(db.row_counts().unwrap(), before);
}

#[test]
fn ingest_read_by_one_user_is_free_for_another() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    create_user(&db, "user-2", "bob@example.com");
    let alice_read = collection_id(&db, "user-1", READ_COLLECTION);
    let bob = collection_id(&db, "user-2", TO_READ_COLLECTION);

    db.register_book(&read_book("OL1M", "Dune", &alice_read), "user-1")
        .unwrap();
    db.register_book(&catalog_book("OL1M", "Dune", &bob), "user-2")
        .unwrap();

    assert_eq!(db.row_counts().unwrap(), (1, 2));
}

#[test]
fn ingest_mark_read_clears_prior_shelves() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    create_user(&db, "user-2", "bob@example.com");
    let read = collection_id(&db, "user-1", READ_COLLECTION);
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);
    let favourites = db.create_collection("user-1", "Favourites", false).unwrap();
    let bob = collection_id(&db, "user-2", TO_READ_COLLECTION);

    let shelved = db
        .register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap();
    db.register_book(&catalog_book("OL1M", "Dune", &favourites.id), "user-1")
        .unwrap();
    db.register_book(&catalog_book("OL1M", "Dune", &bob), "user-2")
        .unwrap();
    assert_eq!(db.row_counts().unwrap(), (1, 3));

    db.register_book(&read_book("OL1M", "Dune", &read), "user-1")
        .unwrap();

    let shelves = db.shelves_of(&shelved.book.id, "user-1").unwrap();
    assert_eq!(shelves.len(), 1);
    assert_eq!(shelves[0].collection_id, read);
    assert!(shelves[0].finish_reading.is_some());
    assert!(shelves[0].start_reading.is_some());
    assert_eq!(shelves[0].rating, Some(4.5));
    assert_eq!(shelves[0].comment.as_deref(), Some("great"));

    // Bob's shelf is untouched.
    assert_eq!(db.shelves_of(&shelved.book.id, "user-2").unwrap().len(), 1);
    assert_eq!(db.row_counts().unwrap(), (1, 2));
}

#[test]
fn ingest_requires_owned_collection() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    create_user(&db, "user-2", "bob@example.com");
    let bob = collection_id(&db, "user-2", TO_READ_COLLECTION);

    let err = db
        .register_book(&catalog_book("OL1M", "Dune", &bob), "user-1")
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    // The book row is rolled back with the rest.
    assert_eq!(db.row_counts().unwrap(), (0, 0));
}

#[test]
fn ingest_requires_key_and_collection() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);

    assert!(matches!(
        db.register_book(&catalog_book("  ", "Dune", &to_read), "user-1"),
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        db.register_book(&catalog_book("OL1M", "Dune", ""), "user-1"),
        Err(AppError::Validation(_))
    ));
}

// ========== MOVE / REMOVE ==========

#[test]
fn move_unread_book_between_collections() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);
    let favourites = db.create_collection("user-1", "Favourites", false).unwrap();

    let registration = db
        .register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap();

    let mut moved = registration.book.clone();
    moved.collection_id = favourites.id.clone();
    moved.comment = Some("next up".to_string());
    db.move_book(&moved, &to_read, "user-1").unwrap();

    let shelves = db.shelves_of(&moved.id, "user-1").unwrap();
    assert_eq!(shelves.len(), 1);
    assert_eq!(shelves[0].collection_id, favourites.id);
    assert_eq!(shelves[0].comment.as_deref(), Some("next up"));
    assert!(shelves[0].finish_reading.is_none());

    // The source no longer holds it.
    assert!(matches!(
        db.move_book(&moved, &to_read, "user-1"),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn move_only_touches_the_source_row() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);
    let a = db.create_collection("user-1", "A", false).unwrap();
    let b = db.create_collection("user-1", "B", false).unwrap();

    let registration = db
        .register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap();
    db.register_book(&catalog_book("OL1M", "Dune", &a.id), "user-1")
        .unwrap();

    let mut moved = registration.book.clone();
    moved.collection_id = b.id.clone();
    db.move_book(&moved, &a.id, "user-1").unwrap();

    let mut collections: Vec<_> = db
        .shelves_of(&moved.id, "user-1")
        .unwrap()
        .into_iter()
        .map(|s| s.collection_id)
        .collect();
    collections.sort();
    let mut expected = vec![to_read, b.id];
    expected.sort();
    assert_eq!(collections, expected);
}

#[test]
fn move_with_finish_date_marks_read() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let read = collection_id(&db, "user-1", READ_COLLECTION);
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);

    let registration = db
        .register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap();

    let mut finished = registration.book.clone();
    finished.collection_id = read.clone();
    finished.finish_reading = Some(Utc::now());
    db.move_book(&finished, &to_read, "user-1").unwrap();

    let shelves = db.shelves_of(&finished.id, "user-1").unwrap();
    assert_eq!(shelves.len(), 1);
    assert_eq!(shelves[0].collection_id, read);
    assert!(shelves[0].finish_reading.is_some());

    assert!(matches!(
        db.register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1"),
        Err(AppError::AlreadyRead)
    ));
}

#[test]
fn move_into_foreign_collection_is_not_found() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    create_user(&db, "user-2", "bob@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);
    let bob = collection_id(&db, "user-2", TO_READ_COLLECTION);

    let registration = db
        .register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap();

    let mut moved = registration.book.clone();
    moved.collection_id = bob;
    assert!(matches!(
        db.move_book(&moved, &to_read, "user-1"),
        Err(AppError::NotFound(_))
    ));
    assert_eq!(db.shelves_of(&moved.id, "user-1").unwrap()[0].collection_id, to_read);
}

#[test]
fn remove_from_collection() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    create_user(&db, "user-2", "bob@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);

    let registration = db
        .register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap();
    let book_id = registration.book.id;

    // Only the owner can remove it.
    assert!(!db.remove_from_collection(&book_id, &to_read, "user-2").unwrap());
    assert!(db.remove_from_collection(&book_id, &to_read, "user-1").unwrap());
    assert!(!db.remove_from_collection(&book_id, &to_read, "user-1").unwrap());

    // The catalog row stays.
    assert_eq!(db.row_counts().unwrap(), (1, 0));
}

// ========== LISTING ==========

#[test]
fn collection_books_pagination() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);

    for i in 0..25 {
        db.register_book(
            &catalog_book(&format!("OL{}M", i), &format!("Book {:02}", i), &to_read),
            "user-1",
        )
        .unwrap();
    }

    let page = |amount, number| {
        db.books_of_collection(&to_read, "user-1", Page::new(amount, number).unwrap(), BookOrder::TitleAsc)
            .unwrap()
    };

    let first = page(10, 1);
    assert_eq!(first.len(), 10);
    assert_eq!(first[0].title, "Book 00");
    assert_eq!(first[0].collection_id, to_read);
    assert!(first[0].date_added.is_some());

    let second = page(10, 2);
    assert_eq!(second.len(), 10);
    assert_eq!(second[0].title, "Book 10");

    assert_eq!(page(10, 3).len(), 5);
    assert!(page(10, 4).is_empty());

    let desc = db
        .books_of_collection(&to_read, "user-1", Page::new(10, 3).unwrap(), BookOrder::TitleDesc)
        .unwrap();
    assert_eq!(desc.last().unwrap().title, "Book 00");
}

#[test]
fn collection_books_of_foreign_collection_is_not_found() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    create_user(&db, "user-2", "bob@example.com");
    let bob = collection_id(&db, "user-2", TO_READ_COLLECTION);

    let result = db.books_of_collection(&bob, "user-1", Page::new(10, 1).unwrap(), BookOrder::default());
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[test]
fn library_lists_all_books() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);

    db.register_book(&catalog_book("OL2M", "Neuromancer", &to_read), "user-1")
        .unwrap();
    db.register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap();

    let titles: Vec<_> = db.all_books().unwrap().into_iter().map(|b| b.title).collect();
    assert_eq!(titles, vec!["Dune", "Neuromancer"]);
}

// ========== LOCAL SEARCH ==========

#[test]
fn search_local_ignores_case_and_diacritics() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    create_user(&db, "user-2", "bob@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);

    db.register_book(&catalog_book("OL1M", "Cien años de soledad", &to_read), "user-1")
        .unwrap();
    db.register_book(&catalog_book("OL2M", "Dune", &to_read), "user-1")
        .unwrap();

    for query in ["cien anos", "AÑOS", "Soledad", "  años de  "] {
        let found = db.search_books(query, "user-1", 50).unwrap();
        assert_eq!(found.len(), 1, "query {:?}", query);
        assert_eq!(found[0].key, "OL1M");
        assert_eq!(found[0].collection_id, to_read);
    }

    // Another user sees the book without any shelf.
    let found = db.search_books("soledad", "user-2", 50).unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].collection_id.is_empty());
    assert!(found[0].date_added.is_none());

    assert!(db.search_books("   ", "user-1", 50).unwrap().is_empty());
    assert!(db.search_books("100%", "user-1", 50).unwrap().is_empty());
}

#[test]
fn search_local_reports_read_state() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let read = collection_id(&db, "user-1", READ_COLLECTION);

    db.register_book(&read_book("OL1M", "Dune", &read), "user-1")
        .unwrap();

    let found = db.search_books("dune", "user-1", 50).unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].is_read());
    assert_eq!(found[0].my_rating, Some(4.5));
}

#[test]
fn search_local_respects_limit() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);

    for i in 0..5 {
        db.register_book(
            &catalog_book(&format!("OL{}M", i), &format!("Foundation {}", i), &to_read),
            "user-1",
        )
        .unwrap();
    }

    assert_eq!(db.search_books("foundation", "user-1", 3).unwrap().len(), 3);
}

// ========== METADATA ==========

#[test]
fn update_book_metadata() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);

    let first = db
        .register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap();
    db.register_book(&catalog_book("OL2M", "Neuromancer", &to_read), "user-1")
        .unwrap();

    let mut edited = first.book.clone();
    edited.title = "Dune Messiah".to_string();
    edited.page_count = 256;
    db.update_book(&edited).unwrap();

    let stored = db.get_book(&edited.id).unwrap().unwrap();
    assert_eq!(stored.title, "Dune Messiah");
    assert_eq!(stored.page_count, 256);
    assert_eq!(db.search_books("messiah", "user-1", 10).unwrap().len(), 1);

    edited.key = "OL2M".to_string();
    assert!(matches!(db.update_book(&edited), Err(AppError::Conflict(_))));

    let mut missing = edited.clone();
    missing.id = "nope".to_string();
    missing.key = "OL9M".to_string();
    assert!(matches!(db.update_book(&missing), Err(AppError::NotFound(_))));
}

// ========== COVERS ==========

#[tokio::test]
async fn cover_failure_keeps_remote_url() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);
    let state = AppState::new(test_config(dir.path()), db.clone()).unwrap();

    let remote = "http://127.0.0.1:1/b/olid/OL1M-M.jpg";
    let mut book = catalog_book("OL1M", "Dune", &to_read);
    book.cover_url = remote.to_string();

    let registration = db.register_book(&book, "user-1").unwrap();
    assert!(!state.ingest_cover(&registration.book.id, "OL1M", remote).await);

    let stored = db.get_book(&registration.book.id).unwrap().unwrap();
    assert_eq!(stored.cover_url, remote);
}

/// Serve a 360x540 PNG at `/OL1M-M.jpg` and return the server's base URL.
async fn serve_cover() -> String {
    use axum::routing::get;
    use image::{Rgb, RgbImage};

    let mut png = Vec::new();
    RgbImage::from_pixel(360, 540, Rgb([10, 120, 60]))
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = axum::Router::new().route("/OL1M-M.jpg", get(move || async move { png }));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn cover_success_points_book_at_local_copy() {
    let base = serve_cover().await;

    let dir = tempfile::tempdir().unwrap();
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);
    let state = AppState::new(test_config(dir.path()), db.clone()).unwrap();

    let remote = format!("{}/OL1M-M.jpg", base);
    let registration = db
        .register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap();
    assert!(state.ingest_cover(&registration.book.id, "OL1M", &remote).await);

    let stored = db.get_book(&registration.book.id).unwrap().unwrap();
    assert_eq!(stored.cover_url, "/covers/OL1M.jpg");
    assert!(dir.path().join("covers").join("OL1M.jpg").exists());
}

#[tokio::test]
async fn cover_update_waits_for_lock_off_the_runtime() {
    use std::time::{Duration, Instant};

    let base = serve_cover().await;

    let dir = tempfile::tempdir().unwrap();
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    let to_read = collection_id(&db, "user-1", TO_READ_COLLECTION);
    let state = AppState::new(test_config(dir.path()), db.clone()).unwrap();
    let registration = db
        .register_book(&catalog_book("OL1M", "Dune", &to_read), "user-1")
        .unwrap();

    // Another writer holds the connection while the cover is stored.
    let (locked_tx, locked_rx) = std::sync::mpsc::channel();
    let holder = {
        let db = db.clone();
        std::thread::spawn(move || {
            db.transaction(|_| {
                locked_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(600));
                Ok(Instant::now())
            })
            .unwrap()
        })
    };
    locked_rx.recv().unwrap();

    let remote = format!("{}/OL1M-M.jpg", base);
    let (stored, ticked) = tokio::join!(
        state.ingest_cover(&registration.book.id, "OL1M", &remote),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Instant::now()
        }
    );
    let released = holder.join().unwrap();

    assert!(stored);
    assert!(ticked < released, "runtime was blocked on the database lock");
    assert_eq!(
        db.get_book(&registration.book.id).unwrap().unwrap().cover_url,
        "/covers/OL1M.jpg"
    );
}

// ========== HTTP ==========

async fn spawn_server(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn http_library_flow() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db();
    let state = AppState::new(test_config(dir.path()), db.clone()).unwrap();
    let admin = state.auth.register("admin@example.com", "secret", true).unwrap();
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let ping = client.get(format!("{}/ping", base)).send().await.unwrap();
    assert_eq!(ping.text().await.unwrap(), "OK");

    // Protected routes need a token.
    let resp = client
        .get(format!("{}/collection/{}", base, admin.id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{}/auth/login", base))
        .json(&serde_json::json!({"email": "admin@example.com", "password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let token: String = client
        .post(format!("{}/auth/login", base))
        .json(&serde_json::json!({"email": "admin@example.com", "password": "secret"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let collection: serde_json::Value = client
        .post(format!("{}/collection", base))
        .bearer_auth(&token)
        .json(&serde_json::json!({"name": "Favourites"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let favourites = collection["id"].as_str().unwrap().to_string();
    assert_eq!(collection["editable"], true);

    let collections: Vec<serde_json::Value> = client
        .get(format!("{}/collection/{}", base, admin.id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(collections.len(), 3);

    let book: serde_json::Value = client
        .post(format!("{}/book", base))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "title": "Cien años de soledad",
            "author": "Gabriel García Márquez",
            "key": "OL7826547M",
            "releaseYear": 1967,
            "coverURL": "",
            "collectionID": favourites,
            "finishReading": "0001-01-01T00:00:00Z"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let book_id = book["id"].as_str().unwrap().to_string();
    assert!(book.get("finishReading").is_none());

    let listed: Vec<serde_json::Value> = client
        .get(format!("{}/book/{}?amount=10&page=1&order=2", base, favourites))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["key"], "OL7826547M");

    let resp = client
        .get(format!("{}/book/{}?amount=0&page=1", base, favourites))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // External catalog is down; the local branch still answers.
    let found: Vec<serde_json::Value> = client
        .post(format!("{}/book/search", base))
        .bearer_auth(&token)
        .json(&serde_json::json!({"title": "cien anos"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    let resp = client
        .post(format!("{}/book/search", base))
        .bearer_auth(&token)
        .json(&serde_json::json!({"title": "nothing like this"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);

    let resp = client
        .put(format!("{}/book/delete", base))
        .bearer_auth(&token)
        .json(&serde_json::json!({"id": book_id, "collectionID": favourites}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .put(format!("{}/book/delete", base))
        .bearer_auth(&token)
        .json(&serde_json::json!({"id": book_id, "collectionID": favourites}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let library: Vec<serde_json::Value> = client
        .get(format!("{}/library", base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(library.len(), 1);

    let resp = client
        .delete(format!("{}/collection/{}", base, favourites))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn http_domain_errors() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db();
    let state = AppState::new(test_config(dir.path()), db.clone()).unwrap();
    let user = state.auth.register("reader@example.com", "secret", false).unwrap();
    let token = state.auth.login("reader@example.com", "secret").unwrap();
    let read = collection_id(&db, &user.id, READ_COLLECTION);
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "title": "Dune",
        "key": "OL1M",
        "collectionID": read,
        "finishReading": "2024-03-01T10:00:00Z"
    });

    let resp = client
        .post(format!("{}/book", base))
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/book", base))
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let error: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(error["message"], "The book is already marked as read");

    let resp = client
        .delete(format!("{}/collection/{}", base, read))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);

    // Malformed body.
    let resp = client
        .post(format!("{}/collection", base))
        .bearer_auth(&token)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Non-admins cannot register users or list other users' collections.
    let resp = client
        .post(format!("{}/admin/register", base))
        .bearer_auth(&token)
        .json(&serde_json::json!({"email": "new@example.com", "password": "secret"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .get(format!("{}/collection/someone-else", base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // A fresh token is not ready to be refreshed.
    let resp = client
        .post(format!("{}/auth/refresh", base))
        .header("authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{}/auth/refresh", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn http_admin_registers_user() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db();
    let state = AppState::new(test_config(dir.path()), db.clone()).unwrap();
    state.auth.register("admin@example.com", "secret", true).unwrap();
    let token = state.auth.login("admin@example.com", "secret").unwrap();
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let created: serde_json::Value = client
        .post(format!("{}/admin/register", base))
        .bearer_auth(&token)
        .json(&serde_json::json!({"email": "New@Example.com", "password": "secret"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["email"], "new@example.com");
    assert!(created.get("password_hash").is_none());

    let user_id = created["id"].as_str().unwrap();
    assert_eq!(db.collections_of(user_id).unwrap().len(), 2);

    let resp = client
        .post(format!("{}/admin/register", base))
        .bearer_auth(&token)
        .json(&serde_json::json!({"email": "new@example.com", "password": "secret"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
}
