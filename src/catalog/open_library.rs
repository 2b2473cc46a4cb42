//! OpenLibrary search client.

use crate::catalog::BookSource;
use crate::error::Result;
use crate::library::{Book, normalize_title};
use serde::Deserialize;
use std::time::Duration;

/// Search response envelope.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SearchResponse {
    /// Total hits reported by the catalog.
    #[serde(rename = "numFound")]
    pub num_found: i64,
    /// Returned hits.
    pub docs: Vec<SearchDoc>,
}

/// One search hit. Only the fields the library keeps are decoded.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
#[allow(missing_docs)]
pub struct SearchDoc {
    pub title: String,
    pub author_name: Vec<String>,
    pub author_key: Vec<String>,
    pub cover_edition_key: String,
    pub first_publish_year: i32,
    pub number_of_pages_median: i32,
    pub ratings_average: f32,
}

/// HTTP client for the OpenLibrary search API.
#[derive(Debug, Clone)]
pub struct OpenLibraryClient {
    http: reqwest::Client,
    search_url: String,
    image_url: String,
    user_agent: String,
}

impl OpenLibraryClient {
    /// Create a client with its own request timeout.
    pub fn new(
        search_url: impl Into<String>,
        image_url: impl Into<String>,
        user_agent: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            search_url: search_url.into(),
            image_url: image_url.into(),
            user_agent: user_agent.into(),
        })
    }

    /// Full request URL for a title query.
    pub fn search_request_url(&self, title: &str) -> String {
        format!("{}{}", self.search_url, query_string(title))
    }

    /// Fetch and map the hits for `title`.
    pub async fn search_title(&self, title: &str) -> Result<Vec<Book>> {
        let url = self.search_request_url(title);
        tracing::debug!(url = %url, "Querying external catalog");

        let response: SearchResponse = self
            .http
            .get(&url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::debug!(num_found = response.num_found, docs = response.docs.len(), "External catalog answered");
        Ok(map_docs(response.docs, &self.image_url))
    }
}

impl BookSource for OpenLibraryClient {
    fn name(&self) -> &'static str {
        "openlibrary"
    }

    async fn search(&self, title: &str) -> Result<Vec<Book>> {
        self.search_title(title).await
    }
}

/// Diacritic-free, `+`-joined, percent-encoded query words.
fn query_string(title: &str) -> String {
    normalize_title(title)
        .split_whitespace()
        .map(|word| urlencoding::encode(word).into_owned())
        .collect::<Vec<_>>()
        .join("+")
}

/// Convert search hits into books. Hits without a cover edition key have
/// nothing to deduplicate on and are skipped.
pub fn map_docs(docs: Vec<SearchDoc>, image_url: &str) -> Vec<Book> {
    docs.into_iter()
        .filter(|doc| !doc.cover_edition_key.is_empty())
        .map(|doc| {
            let author = if doc.author_name.is_empty() {
                "Unknown".to_string()
            } else {
                doc.author_name.join(", ")
            };

            Book {
                cover_url: format!("{}{}-M.jpg", image_url, doc.cover_edition_key),
                title: doc.title,
                author,
                key: doc.cover_edition_key,
                author_key: doc.author_key.join(", "),
                release_year: doc.first_publish_year,
                avg_rating: doc.ratings_average,
                page_count: doc.number_of_pages_median,
                ..Default::default()
            }
        })
        .collect()
}
