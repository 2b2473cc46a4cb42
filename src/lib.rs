//! green-library: a personal library backend.
//!
//! Users keep books in collections, track what they have read and search
//! the OpenLibrary catalog together with the books already stored locally.
//!
//! # Features
//!
//! - Collections with reserved "Read" and "To-read" shelves
//! - Book deduplication on the catalog key
//! - Read tracking with one finished-reading record per user and book
//! - Concurrent external and local title search
//! - Local cover copies
//! - Token authentication

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and user management.
pub mod auth;
/// Catalog search.
pub mod catalog;
/// Configuration and CLI.
pub mod config;
/// Cover storage.
pub mod covers;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Book models and title normalization.
pub mod library;
/// HTTP server.
pub mod server;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
