//! Book search across the external catalog and the local store.
//!
//! Both sources are queried concurrently and their results merged. The
//! search only fails when nothing was found and at least one source errored.

mod local;
mod open_library;

pub use local::LocalCatalog;
pub use open_library::{OpenLibraryClient, SearchDoc, SearchResponse, map_docs};

use crate::error::{AppError, Result};
use crate::library::Book;
use std::future::Future;
use std::time::Instant;

/// A searchable source of books.
pub trait BookSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Books whose title matches `title`.
    fn search(&self, title: &str) -> impl Future<Output = Result<Vec<Book>>> + Send;
}

/// Query both sources concurrently and merge their results.
///
/// Both branches always run to completion; a failure in one does not cancel
/// the other. Results are concatenated external-first, but callers must not
/// rely on any ordering.
pub async fn search_all<E, L>(external: &E, local: &L, title: &str) -> Result<Vec<Book>>
where
    E: BookSource,
    L: BookSource,
{
    let start = Instant::now();
    let (remote, stored) = tokio::join!(external.search(title), local.search(title));

    let merged = merge_branches(vec![(external.name(), remote), (local.name(), stored)]);

    tracing::debug!(
        title = %title,
        elapsed = ?start.elapsed(),
        found = merged.as_ref().map(Vec::len).unwrap_or(0),
        "Search finished"
    );
    merged
}

/// Merge finished branch results.
///
/// Succeeds with whatever was collected unless the merged list is empty and
/// some branch failed, in which case the search is reported unavailable.
pub fn merge_branches(branches: Vec<(&'static str, Result<Vec<Book>>)>) -> Result<Vec<Book>> {
    let mut books = Vec::new();
    let mut failed = Vec::new();

    for (name, result) in branches {
        match result {
            Ok(found) => books.extend(found),
            Err(e) => {
                tracing::warn!(source = name, error = %e, "Search branch failed");
                failed.push(name);
            }
        }
    }

    if books.is_empty() && !failed.is_empty() {
        return Err(AppError::Unavailable(format!(
            "Search is unavailable ({} failed)",
            failed.join(", ")
        )));
    }

    Ok(books)
}
