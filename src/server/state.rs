//! Application state shared across handlers.

use crate::auth::AuthService;
use crate::catalog::{self, LocalCatalog, OpenLibraryClient};
use crate::config::Config;
use crate::covers::CoverStore;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::library::{Book, Registration};
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// External catalog client.
    pub catalog: Arc<OpenLibraryClient>,
    /// Local cover storage.
    pub covers: Arc<CoverStore>,
}

impl AppState {
    /// Build the services described by `config` around an open database.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        let auth = AuthService::new(
            db.clone(),
            config.auth.secret.clone(),
            config.auth.issuer.clone(),
            config.auth.token_minutes,
            config.auth.refresh_window_minutes,
        );

        let catalog = OpenLibraryClient::new(
            config.catalog.search_url.clone(),
            config.catalog.image_url.clone(),
            config.catalog.user_agent.clone(),
            Duration::from_secs(config.catalog.timeout_seconds),
        )?;

        let covers = CoverStore::new(
            config.covers.dir.clone(),
            config.covers.public_url.clone(),
            config.covers.width,
            Duration::from_secs(config.covers.timeout_seconds),
        )?;

        Ok(Self {
            config: Arc::new(config),
            db,
            auth: Arc::new(auth),
            catalog: Arc::new(catalog),
            covers: Arc::new(covers),
        })
    }

    /// Register a book for `user_id`.
    ///
    /// When a new book row was committed with a remote cover, a background
    /// task stores a local copy. The caller's result never depends on it.
    pub fn register_book(&self, book: &Book, user_id: &str) -> Result<Registration> {
        let registration = self.db.register_book(book, user_id)?;

        if registration.created && is_remote(&registration.book.cover_url) {
            let state = self.clone();
            let book_id = registration.book.id.clone();
            let key = registration.book.key.clone();
            let url = registration.book.cover_url.clone();
            tokio::spawn(async move {
                state.ingest_cover(&book_id, &key, &url).await;
            });
        }

        Ok(registration)
    }

    /// Store a local cover for a committed book and point the book at it.
    ///
    /// Failures are logged and leave the remote URL in place. Returns
    /// whether the book now uses the local copy.
    pub async fn ingest_cover(&self, book_id: &str, key: &str, url: &str) -> bool {
        let local_url = match self.covers.fetch_and_store(url, key).await {
            Ok(local_url) => local_url,
            Err(e) => {
                tracing::warn!(book_id = %book_id, url = %url, error = %e, "Cover download failed, keeping remote URL");
                return false;
            }
        };

        let db = self.db.clone();
        let id = book_id.to_string();
        let cover = local_url.clone();
        let updated = tokio::task::spawn_blocking(move || db.update_cover_url(&id, &cover))
            .await
            .unwrap_or_else(|e| Err(AppError::Internal(format!("Cover update task failed: {}", e))));

        match updated {
            Ok(true) => {
                tracing::debug!(book_id = %book_id, cover = %local_url, "Cover stored");
                true
            }
            Ok(false) => {
                tracing::warn!(book_id = %book_id, "Book vanished before its cover was stored");
                false
            }
            Err(e) => {
                tracing::error!(book_id = %book_id, error = %e, "Failed to update cover URL");
                false
            }
        }
    }

    /// Search the external catalog and the user's library concurrently.
    pub async fn search(&self, title: &str, user_id: &str) -> Result<Vec<Book>> {
        let local = LocalCatalog::new(self.db.clone(), user_id, self.config.catalog.local_limit);
        catalog::search_all(self.catalog.as_ref(), &local, title).await
    }
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
