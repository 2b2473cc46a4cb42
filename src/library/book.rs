//! Book model as seen by clients: catalog metadata plus the caller's
//! reading state for one collection.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A catalog book, optionally annotated with a collection association.
///
/// `key` is the external catalog identifier and the deduplication anchor;
/// `id` is the local surrogate id (empty until the book is stored).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Book {
    /// Local surrogate id (UUID v4).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Book title.
    pub title: String,

    /// Display author string, multiple authors joined with `", "`.
    pub author: String,

    /// External catalog key (cover edition key).
    pub key: String,

    /// External author keys joined with `", "`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub author_key: String,

    /// First publication year.
    pub release_year: i32,

    /// When the book was added to the collection.
    #[serde(
        deserialize_with = "zero_time_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_added: Option<DateTime<Utc>>,

    /// When the user started reading.
    #[serde(
        deserialize_with = "zero_time_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_reading: Option<DateTime<Utc>>,

    /// When the user finished reading. `Some` marks the book as read.
    #[serde(
        deserialize_with = "zero_time_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub finish_reading: Option<DateTime<Utc>>,

    /// Cover image URL (remote until the local copy is stored).
    #[serde(rename = "coverURL")]
    pub cover_url: String,

    /// Personal rating.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_rating: Option<f32>,

    /// Average rating in the external catalog.
    pub avg_rating: f32,

    /// Personal comment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Median page count.
    pub page_count: i32,

    /// Collection the association belongs to.
    #[serde(rename = "collectionID", skip_serializing_if = "String::is_empty")]
    pub collection_id: String,
}

impl Book {
    /// Whether the caller is marking this book as read.
    pub fn is_read(&self) -> bool {
        self.finish_reading.is_some()
    }
}

/// Outcome of registering a book into a collection.
#[derive(Debug, Clone)]
pub struct Registration {
    /// The book with its id and date added filled in.
    pub book: Book,
    /// Whether a new book row was inserted.
    pub created: bool,
}

/// Ordering for collection listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BookOrder {
    /// Oldest additions first.
    DateAsc,
    /// Newest additions first.
    #[default]
    DateDesc,
    /// Title A-Z.
    TitleAsc,
    /// Title Z-A.
    TitleDesc,
}

impl BookOrder {
    /// Decode the numeric order code used by clients. Unknown codes fall
    /// back to newest first.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => BookOrder::DateAsc,
            1 => BookOrder::DateDesc,
            2 => BookOrder::TitleAsc,
            3 => BookOrder::TitleDesc,
            _ => BookOrder::DateDesc,
        }
    }

    /// SQL `ORDER BY` clause.
    pub fn order_by(&self) -> &'static str {
        match self {
            BookOrder::DateAsc => "ORDER BY chb.date_added ASC, b.title ASC",
            BookOrder::DateDesc => "ORDER BY chb.date_added DESC, b.title ASC",
            BookOrder::TitleAsc => "ORDER BY b.title ASC",
            BookOrder::TitleDesc => "ORDER BY b.title DESC",
        }
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Page size.
    pub amount: u32,
    /// Page number, starting at 1.
    pub number: u32,
}

impl Page {
    /// Largest accepted page size.
    pub const MAX_AMOUNT: u32 = 100;

    /// Validate a page request.
    pub fn new(amount: u32, number: u32) -> crate::error::Result<Self> {
        if amount == 0 || amount > Self::MAX_AMOUNT {
            return Err(crate::error::AppError::Validation(format!(
                "amount must be between 1 and {}",
                Self::MAX_AMOUNT
            )));
        }
        if number == 0 {
            return Err(crate::error::AppError::Validation(
                "page starts at 1".to_string(),
            ));
        }
        Ok(Self { amount, number })
    }

    /// Row offset of this page.
    pub fn offset(&self) -> i64 {
        self.amount as i64 * (self.number as i64 - 1)
    }
}

/// Treat `null` and the zero time (`0001-01-01T00:00:00Z`) as no date.
fn zero_time_as_none<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(value.filter(|dt| dt.year() > 1))
}
