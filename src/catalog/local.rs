//! Search over books already stored in the library.

use crate::catalog::BookSource;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::library::Book;

/// Local title search scoped to one user's reading state.
#[derive(Clone)]
pub struct LocalCatalog {
    db: Database,
    user_id: String,
    limit: u32,
}

impl LocalCatalog {
    /// Search `db` on behalf of `user_id`, returning at most `limit` books.
    pub fn new(db: Database, user_id: impl Into<String>, limit: u32) -> Self {
        Self {
            db,
            user_id: user_id.into(),
            limit,
        }
    }
}

impl BookSource for LocalCatalog {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn search(&self, title: &str) -> Result<Vec<Book>> {
        let db = self.db.clone();
        let user_id = self.user_id.clone();
        let title = title.to_string();
        let limit = self.limit;

        tokio::task::spawn_blocking(move || db.search_books(&title, &user_id, limit))
            .await
            .map_err(|e| AppError::Internal(format!("Local search task failed: {}", e)))?
    }
}
