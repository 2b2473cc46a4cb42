use crate::db::*;
use crate::error::{AppError, Result, storage};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How long a statement waits on a locked database file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    pub(super) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        Self::from_connection(conn)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| AppError::Internal(format!("Failed to set busy timeout: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                admin INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            -- Collections table
            CREATE TABLE IF NOT EXISTS collection (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                creation_date INTEGER NOT NULL,
                owner_id TEXT NOT NULL,
                exclusive INTEGER NOT NULL DEFAULT 0,
                read_col INTEGER NOT NULL DEFAULT 0,
                editable INTEGER NOT NULL DEFAULT 1,
                FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Catalog books, deduplicated on the external key
            CREATE TABLE IF NOT EXISTS book (
                id TEXT PRIMARY KEY,
                "key" TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                search_title TEXT NOT NULL,
                author TEXT NOT NULL DEFAULT '',
                author_key TEXT NOT NULL DEFAULT '',
                release_year INTEGER NOT NULL DEFAULT 0,
                cover_url TEXT NOT NULL DEFAULT '',
                avg_rating REAL NOT NULL DEFAULT 0,
                page_count INTEGER NOT NULL DEFAULT 0
            );

            -- Book-in-collection association with reading state
            CREATE TABLE IF NOT EXISTS collection_has_book (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date_added INTEGER NOT NULL,
                start_reading INTEGER,
                finish_reading INTEGER,
                rating REAL,
                comment TEXT,
                book_id TEXT NOT NULL,
                collection_id TEXT NOT NULL,
                FOREIGN KEY (book_id) REFERENCES book(id) ON DELETE CASCADE,
                FOREIGN KEY (collection_id) REFERENCES collection(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_collection_owner ON collection(owner_id);
            CREATE INDEX IF NOT EXISTS idx_book_search ON book(search_title);
            CREATE INDEX IF NOT EXISTS idx_chb_book ON collection_has_book(book_id);
            CREATE INDEX IF NOT EXISTS idx_chb_collection ON collection_has_book(collection_id);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`. On `Err`, or if `f` panics, the
    /// transaction is dropped uncommitted and rolled back.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Transaction(format!("Failed to begin transaction: {}", e)))?;

        let value = f(&tx)?;

        tx.commit()
            .map_err(|e| AppError::Transaction(format!("Failed to commit transaction: {}", e)))?;
        Ok(value)
    }

    // ========== USER OPERATIONS ==========

    /// Create a user together with the reserved "Read" and "To-read"
    /// collections.
    pub fn create_user(&self, user: &User) -> Result<()> {
        self.transaction(|tx| {
            tx.execute(
                "INSERT INTO users (id, email, password_hash, admin, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id,
                    user.email,
                    user.password_hash,
                    user.admin,
                    user.created_at,
                ],
            )
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint") {
                    AppError::Conflict(format!("Email '{}' already registered", user.email))
                } else {
                    AppError::Storage(format!("Failed to create user: {}", e))
                }
            })?;

            // (name, exclusive, read_col)
            let reserved = [(READ_COLLECTION, true, true), (TO_READ_COLLECTION, false, false)];
            for (name, exclusive, read_col) in reserved {
                tx.execute(
                    "INSERT INTO collection (id, name, creation_date, owner_id, exclusive, read_col, editable)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                    params![
                        uuid::Uuid::new_v4().to_string(),
                        name,
                        user.created_at,
                        user.id,
                        exclusive,
                        read_col,
                    ],
                )
                .map_err(storage("Failed to create reserved collection"))?;
            }

            Ok(())
        })
    }

    /// Get user by email (case-insensitive).
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, email, password_hash, admin, created_at
             FROM users WHERE email = ?1",
            params![email.trim().to_lowercase()],
            Self::row_to_user,
        )
        .optional()
        .map_err(storage("Failed to get user"))
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, email, password_hash, admin, created_at
                 FROM users ORDER BY email",
            )
            .map_err(storage("Failed to prepare query"))?;

        let users = stmt
            .query_map([], Self::row_to_user)
            .map_err(storage("Failed to list users"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage("Failed to collect users"))?;

        Ok(users)
    }

    /// Update user password.
    pub fn update_user_password(&self, email: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE email = ?2",
                params![password_hash, email.trim().to_lowercase()],
            )
            .map_err(storage("Failed to update password"))?;
        Ok(rows > 0)
    }

    fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            admin: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

#[cfg(test)]
impl Database {
    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, email, password_hash, admin, created_at
             FROM users WHERE id = ?1",
            params![id],
            Self::row_to_user,
        )
        .optional()
        .map_err(storage("Failed to get user"))
    }
}
