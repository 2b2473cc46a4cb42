mod books;
mod collections;
mod schema;

pub use schema::Database;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the reserved collection holding finished books.
pub const READ_COLLECTION: &str = "Read";

/// Name of the reserved wish-list collection.
pub const TO_READ_COLLECTION: &str = "To-read";

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Lowercase email used for login.
    pub email: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Whether the user can register other users.
    pub admin: bool,
    /// Account creation timestamp.
    pub created_at: i64,
}

/// A user-owned shelf of books.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    /// Unique collection ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Creation time.
    pub creation_date: DateTime<Utc>,
    /// Owner user ID.
    #[serde(rename = "ownerID")]
    pub owner_id: String,
    /// System-reserved collection.
    pub exclusive: bool,
    /// This collection represents "has been read".
    pub read_col: bool,
    /// Whether the owner may rename or delete it.
    pub editable: bool,
    /// Number of association rows in the collection.
    pub contained_books: i64,
}

/// Stored catalog book row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBook {
    /// Book ID.
    pub id: String,
    /// External catalog key (unique).
    pub key: String,
    /// Book title.
    pub title: String,
    /// Display author string.
    pub author: String,
    /// Joined author keys.
    pub author_key: String,
    /// First publication year.
    pub release_year: i32,
    /// Cover image URL.
    pub cover_url: String,
    /// Average external rating.
    pub avg_rating: f32,
    /// Page count.
    pub page_count: i32,
}

/// Association of a book with a collection, carrying reading state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionBook {
    /// Row ID.
    pub id: i64,
    /// Book ID.
    pub book_id: String,
    /// Collection ID.
    pub collection_id: String,
    /// Date added (timestamp).
    pub date_added: i64,
    /// Start reading (timestamp).
    pub start_reading: Option<i64>,
    /// Finish reading (timestamp). Set means read.
    pub finish_reading: Option<i64>,
    /// Personal rating.
    pub rating: Option<f32>,
    /// Personal comment.
    pub comment: Option<String>,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
