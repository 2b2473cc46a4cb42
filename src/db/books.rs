//! Book storage and the reading-state transitions.
//!
//! A book row is shared by every user and deduplicated on its catalog key.
//! Reading state lives on `collection_has_book`: a row with
//! `finish_reading` set marks the book read for the collection's owner, and
//! a user holds at most one such row per book.

use crate::db::collections::ensure_owned;
use crate::db::{Database, StoredBook, now_timestamp, timestamp_to_datetime};
use crate::error::{AppError, Result, storage};
use crate::library::{Book, BookOrder, Page, Registration, search_key};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

/// Columns selected for a book joined with one association row, in the
/// order `row_to_book` reads them.
const BOOK_COLUMNS: &str = r#"b.id, b.title, b.author, b."key", b.author_key, b.release_year,
    chb.date_added, chb.start_reading, chb.finish_reading, b.cover_url,
    chb.rating, chb."comment", b.avg_rating, b.page_count, chb.collection_id"#;

/// Id of the stored book with this catalog key, if any.
fn find_book_id(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        r#"SELECT id FROM book WHERE "key" = ?1"#,
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(storage("Failed to look up book key"))
}

/// Whether `user_id` already has a finished-reading row for the book.
fn has_read(conn: &Connection, book_id: &str, user_id: &str) -> Result<bool> {
    conn.query_row(
        "SELECT chb.id
         FROM collection_has_book chb
         JOIN collection c ON c.id = chb.collection_id
         WHERE chb.book_id = ?1
           AND c.owner_id = ?2
           AND chb.finish_reading IS NOT NULL
         LIMIT 1",
        params![book_id, user_id],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(storage("Failed to check read state"))
}

/// Whether the book is already shelved unread in this collection.
fn is_shelved(conn: &Connection, book_id: &str, collection_id: &str) -> Result<bool> {
    conn.query_row(
        "SELECT id FROM collection_has_book
         WHERE book_id = ?1 AND collection_id = ?2 AND finish_reading IS NULL
         LIMIT 1",
        params![book_id, collection_id],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(storage("Failed to check collection"))
}

/// Insert a new book row and return its generated id.
fn insert_book(conn: &Connection, book: &Book) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        r#"INSERT INTO book
           (id, "key", title, search_title, author, author_key,
            release_year, cover_url, avg_rating, page_count)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
        params![
            id,
            book.key,
            book.title,
            search_key(&book.title),
            book.author,
            book.author_key,
            book.release_year,
            book.cover_url,
            book.avg_rating,
            book.page_count,
        ],
    )
    .map_err(|e| unique_to_conflict(e, &book.key, "Failed to insert book"))?;
    Ok(id)
}

/// Shelve the book without reading state.
fn insert_association(conn: &Connection, book: &Book, date_added: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO collection_has_book (date_added, book_id, collection_id)
         VALUES (?1, ?2, ?3)",
        params![date_added, book.id, book.collection_id],
    )
    .map_err(storage("Failed to add book to collection"))?;
    Ok(())
}

/// Replace every association the user has for this book with a single
/// finished-reading row in the target collection.
fn mark_as_read(conn: &Connection, book: &Book, user_id: &str, date_added: i64) -> Result<()> {
    let finish = book
        .finish_reading
        .ok_or_else(|| AppError::Internal("mark_as_read without finish date".to_string()))?;

    conn.execute(
        "DELETE FROM collection_has_book
         WHERE book_id = ?1
           AND collection_id IN (SELECT id FROM collection WHERE owner_id = ?2)",
        params![book.id, user_id],
    )
    .map_err(storage("Failed to clear previous shelves"))?;

    conn.execute(
        r#"INSERT INTO collection_has_book
           (date_added, book_id, collection_id, rating, "comment", start_reading, finish_reading)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        params![
            date_added,
            book.id,
            book.collection_id,
            book.my_rating,
            book.comment,
            book.start_reading.map(|d| d.timestamp()),
            finish.timestamp(),
        ],
    )
    .map_err(storage("Failed to mark book as read"))?;
    Ok(())
}

fn unique_to_conflict(e: rusqlite::Error, key: &str, context: &str) -> AppError {
    if e.to_string().contains("UNIQUE constraint") {
        AppError::Conflict(format!("A book with key '{}' already exists", key))
    } else {
        AppError::Storage(format!("{}: {}", context, e))
    }
}

fn row_to_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        key: row.get(3)?,
        author_key: row.get(4)?,
        release_year: row.get(5)?,
        date_added: row.get::<_, Option<i64>>(6)?.map(timestamp_to_datetime),
        start_reading: row.get::<_, Option<i64>>(7)?.map(timestamp_to_datetime),
        finish_reading: row.get::<_, Option<i64>>(8)?.map(timestamp_to_datetime),
        cover_url: row.get(9)?,
        my_rating: row.get(10)?,
        comment: row.get(11)?,
        avg_rating: row.get(12)?,
        page_count: row.get(13)?,
        collection_id: row.get::<_, Option<String>>(14)?.unwrap_or_default(),
    })
}

fn row_to_stored_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredBook> {
    Ok(StoredBook {
        id: row.get(0)?,
        key: row.get(1)?,
        title: row.get(2)?,
        author: row.get(3)?,
        author_key: row.get(4)?,
        release_year: row.get(5)?,
        cover_url: row.get(6)?,
        avg_rating: row.get(7)?,
        page_count: row.get(8)?,
    })
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl Database {
    // ========== INGESTION ==========

    /// Add a book to one of the user's collections, or mark it read.
    ///
    /// The book row is created on first sight of its catalog key and reused
    /// afterwards. A book the user has already read is rejected with
    /// [`AppError::AlreadyRead`]. With a finish date, every other shelf the
    /// user has for the book is cleared first. All writes share one
    /// transaction.
    pub fn register_book(&self, book: &Book, user_id: &str) -> Result<Registration> {
        if book.key.trim().is_empty() {
            return Err(AppError::Validation("Book key is required".to_string()));
        }
        if book.collection_id.is_empty() {
            return Err(AppError::Validation("Collection is required".to_string()));
        }

        let now = Utc::now();
        let mut book = book.clone();
        book.date_added = Some(now);
        let date_added = now.timestamp();

        let created = self.transaction(|tx| {
            ensure_owned(tx, &book.collection_id, user_id)?;

            let created = match find_book_id(tx, &book.key)? {
                Some(existing_id) => {
                    if has_read(tx, &existing_id, user_id)? {
                        return Err(AppError::AlreadyRead);
                    }
                    book.id = existing_id;
                    false
                }
                None => {
                    book.id = insert_book(tx, &book)?;
                    true
                }
            };

            if book.is_read() {
                mark_as_read(tx, &book, user_id, date_added)?;
            } else {
                if !created && is_shelved(tx, &book.id, &book.collection_id)? {
                    return Err(AppError::Conflict(
                        "The book is already in this collection".to_string(),
                    ));
                }
                insert_association(tx, &book, date_added)?;
            }

            Ok(created)
        })?;

        tracing::debug!(book_id = %book.id, key = %book.key, created, read = book.is_read(), "Registered book");
        Ok(Registration { book, created })
    }

    // ========== MOVE / REMOVE ==========

    /// Move an unread book from one of the user's collections to another, or
    /// mark it read in the target collection.
    ///
    /// Unread moves update the row keyed by (book, source collection) in
    /// place, carrying the new comment and rating.
    pub fn move_book(&self, book: &Book, from_collection_id: &str, user_id: &str) -> Result<()> {
        if book.id.is_empty() {
            return Err(AppError::Validation("Book id is required".to_string()));
        }
        if book.collection_id.is_empty() {
            return Err(AppError::Validation("Target collection is required".to_string()));
        }

        self.transaction(|tx| {
            ensure_owned(tx, &book.collection_id, user_id)?;

            if book.is_read() {
                return mark_as_read(tx, book, user_id, now_timestamp());
            }

            ensure_owned(tx, from_collection_id, user_id)?;
            let rows = tx
                .execute(
                    r#"UPDATE collection_has_book
                       SET collection_id = ?1, "comment" = ?2, rating = ?3
                       WHERE book_id = ?4 AND collection_id = ?5 AND finish_reading IS NULL"#,
                    params![
                        book.collection_id,
                        book.comment,
                        book.my_rating,
                        book.id,
                        from_collection_id,
                    ],
                )
                .map_err(storage("Failed to move book"))?;

            if rows == 0 {
                return Err(AppError::NotFound(format!(
                    "Book {} is not shelved in collection {}",
                    book.id, from_collection_id
                )));
            }
            Ok(())
        })
    }

    /// Remove the (book, collection) association. Returns whether a row was
    /// deleted.
    pub fn remove_from_collection(&self, book_id: &str, collection_id: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM collection_has_book
                 WHERE book_id = ?1
                   AND collection_id = ?2
                   AND collection_id IN (SELECT id FROM collection WHERE owner_id = ?3)",
                params![book_id, collection_id, user_id],
            )
            .map_err(storage("Failed to remove book from collection"))?;
        Ok(rows > 0)
    }

    // ========== QUERIES ==========

    /// One page of the books shelved in a collection.
    pub fn books_of_collection(
        &self,
        collection_id: &str,
        user_id: &str,
        page: Page,
        order: BookOrder,
    ) -> Result<Vec<Book>> {
        let conn = self.conn.lock();
        ensure_owned(&conn, collection_id, user_id)?;

        let query = format!(
            "SELECT {}
             FROM book b JOIN collection_has_book chb ON b.id = chb.book_id
             WHERE chb.collection_id = ?1
             {} LIMIT ?2 OFFSET ?3",
            BOOK_COLUMNS,
            order.order_by()
        );

        let mut stmt = conn
            .prepare(&query)
            .map_err(storage("Failed to prepare query"))?;

        let books = stmt
            .query_map(
                params![collection_id, page.amount, page.offset()],
                row_to_book,
            )
            .map_err(storage("Failed to get collection books"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage("Failed to collect books"))?;

        Ok(books)
    }

    /// Stored books whose title contains `fragment`, ignoring case and
    /// diacritics. Each book carries the user's most relevant association
    /// (a read row first, then the latest shelf), if any.
    pub fn search_books(&self, fragment: &str, user_id: &str, limit: u32) -> Result<Vec<Book>> {
        let needle = search_key(fragment);
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!("%{}%", escape_like(&needle));

        let query = format!(
            r#"SELECT {}
               FROM book b
               LEFT JOIN (
                   SELECT a.*, ROW_NUMBER() OVER (
                       PARTITION BY a.book_id
                       ORDER BY a.finish_reading IS NULL, a.date_added DESC
                   ) AS pos
                   FROM collection_has_book a
                   JOIN collection c ON c.id = a.collection_id
                   WHERE c.owner_id = ?2
               ) chb ON chb.book_id = b.id AND chb.pos = 1
               WHERE b.search_title LIKE ?1 ESCAPE '\'
               ORDER BY b.title
               LIMIT ?3"#,
            BOOK_COLUMNS
        );

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&query)
            .map_err(storage("Failed to prepare query"))?;

        let books = stmt
            .query_map(params![pattern, user_id, limit], row_to_book)
            .map_err(storage("Failed to search books"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage("Failed to collect books"))?;

        Ok(books)
    }

    /// Every stored book, by title.
    pub fn all_books(&self) -> Result<Vec<StoredBook>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                r#"SELECT id, "key", title, author, author_key, release_year,
                          cover_url, avg_rating, page_count
                   FROM book ORDER BY title"#,
            )
            .map_err(storage("Failed to prepare query"))?;

        let books = stmt
            .query_map([], row_to_stored_book)
            .map_err(storage("Failed to get all books"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage("Failed to collect books"))?;

        Ok(books)
    }

    // ========== METADATA ==========

    /// Update a book's catalog metadata.
    pub fn update_book(&self, book: &Book) -> Result<()> {
        if book.id.is_empty() {
            return Err(AppError::Validation("Book id is required".to_string()));
        }

        let conn = self.conn.lock();
        let rows = conn
            .execute(
                r#"UPDATE book SET
                       title = ?1,
                       search_title = ?2,
                       author = ?3,
                       "key" = ?4,
                       author_key = ?5,
                       release_year = ?6,
                       cover_url = ?7,
                       avg_rating = ?8,
                       page_count = ?9
                   WHERE id = ?10"#,
                params![
                    book.title,
                    search_key(&book.title),
                    book.author,
                    book.key,
                    book.author_key,
                    book.release_year,
                    book.cover_url,
                    book.avg_rating,
                    book.page_count,
                    book.id,
                ],
            )
            .map_err(|e| unique_to_conflict(e, &book.key, "Failed to update book"))?;

        if rows == 0 {
            return Err(AppError::NotFound(format!("Book not found: {}", book.id)));
        }
        Ok(())
    }

    /// Point a book at a new cover URL. Returns whether the row exists.
    pub fn update_cover_url(&self, book_id: &str, cover_url: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE book SET cover_url = ?1 WHERE id = ?2",
                params![cover_url, book_id],
            )
            .map_err(storage("Failed to update cover"))?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
impl Database {
    /// Get book by ID.
    pub fn get_book(&self, id: &str) -> Result<Option<StoredBook>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"SELECT id, "key", title, author, author_key, release_year,
                      cover_url, avg_rating, page_count
               FROM book WHERE id = ?1"#,
            params![id],
            row_to_stored_book,
        )
        .optional()
        .map_err(storage("Failed to get book"))
    }

    /// Associations of a book within the user's collections.
    pub fn shelves_of(&self, book_id: &str, user_id: &str) -> Result<Vec<crate::db::CollectionBook>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                r#"SELECT chb.id, chb.book_id, chb.collection_id, chb.date_added,
                          chb.start_reading, chb.finish_reading, chb.rating, chb."comment"
                   FROM collection_has_book chb
                   JOIN collection c ON c.id = chb.collection_id
                   WHERE chb.book_id = ?1 AND c.owner_id = ?2
                   ORDER BY chb.date_added"#,
            )
            .map_err(storage("Failed to prepare query"))?;

        let shelves = stmt
            .query_map(params![book_id, user_id], |row| {
                Ok(crate::db::CollectionBook {
                    id: row.get(0)?,
                    book_id: row.get(1)?,
                    collection_id: row.get(2)?,
                    date_added: row.get(3)?,
                    start_reading: row.get(4)?,
                    finish_reading: row.get(5)?,
                    rating: row.get(6)?,
                    comment: row.get(7)?,
                })
            })
            .map_err(storage("Failed to get shelves"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage("Failed to collect shelves"))?;

        Ok(shelves)
    }

    /// Number of book rows and association rows.
    pub fn row_counts(&self) -> Result<(i64, i64)> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT (SELECT COUNT(*) FROM book), (SELECT COUNT(*) FROM collection_has_book)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(storage("Failed to count rows"))
    }
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("100%_done\\"), "100\\%\\_done\\\\");
    }
}
