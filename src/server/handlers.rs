//! HTTP request handlers.

use crate::auth::Claims;
use crate::db::{Collection, StoredBook, User};
use crate::error::{AppError, Result};
use crate::library::{Book, BookOrder, Page};
use crate::server::AppState;
use axum::{
    extract::{FromRequest, Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, header},
};
use serde::{Deserialize, Serialize};

/// JSON extractor whose rejections become 400 responses.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct Json<T>(pub T);

impl<T: Serialize> axum::response::IntoResponse for Json<T> {
    fn into_response(self) -> axum::response::Response {
        axum::Json(self.0).into_response()
    }
}

/// Liveness probe.
pub async fn ping() -> &'static str {
    "OK"
}

// ============================================================================
// AUTH
// ============================================================================

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

/// Login: returns a signed token.
pub async fn auth_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<String>> {
    let token = state.auth.login(&req.email, &req.password)?;
    Ok(Json(token))
}

/// Reissue a token close to its expiry.
pub async fn auth_refresh(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<String>> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Missing Authorization header".to_string()))?;

    let token = state.auth.refresh(value)?;
    Ok(Json(token))
}

/// Register request.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    email: String,
    password: String,
    #[serde(default)]
    admin: bool,
}

/// Create a user with the default collections. Admin only.
pub async fn admin_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<User>> {
    let claims = authenticated(&state, &headers)?;
    if !claims.admin {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }

    let user = state.auth.register(&req.email, &req.password, req.admin)?;
    Ok(Json(user))
}

// ============================================================================
// COLLECTIONS
// ============================================================================

/// Collection create/update request.
#[derive(Debug, Deserialize)]
pub struct CollectionRequest {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    exclusive: bool,
}

/// Create a collection owned by the caller.
pub async fn collection_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CollectionRequest>,
) -> Result<Json<Collection>> {
    let claims = authenticated(&state, &headers)?;
    let collection = state
        .db
        .create_collection(&claims.user_key, &req.name, req.exclusive)?;
    Ok(Json(collection))
}

/// Rename a collection or change its exclusivity.
pub async fn collection_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CollectionRequest>,
) -> Result<Json<Collection>> {
    let claims = authenticated(&state, &headers)?;
    if req.id.is_empty() {
        return Err(AppError::Validation("Collection id is required".to_string()));
    }

    state
        .db
        .update_collection(&req.id, &claims.user_key, &req.name, req.exclusive)?;

    let updated = state
        .db
        .collections_of(&claims.user_key)?
        .into_iter()
        .find(|c| c.id == req.id)
        .ok_or_else(|| AppError::NotFound(format!("Collection not found: {}", req.id)))?;
    Ok(Json(updated))
}

/// Collections of a user. Users may only list their own unless admin.
pub async fn collection_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Collection>>> {
    let claims = authenticated(&state, &headers)?;
    if claims.user_key != user_id && !claims.admin {
        return Err(AppError::Forbidden("Cannot list another user's collections".to_string()));
    }

    Ok(Json(state.db.collections_of(&user_id)?))
}

/// Delete an editable collection.
pub async fn collection_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(collection_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let claims = authenticated(&state, &headers)?;
    state.db.delete_collection(&collection_id, &claims.user_key)?;

    tracing::info!(collection_id = %collection_id, "Deleted collection");
    Ok(Json(serde_json::Value::Null))
}

// ============================================================================
// BOOKS
// ============================================================================

/// Add a book to a collection, or mark it read.
pub async fn book_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(book): Json<Book>,
) -> Result<Json<Book>> {
    let claims = authenticated(&state, &headers)?;
    let registration = state.register_book(&book, &claims.user_key)?;
    Ok(Json(registration.book))
}

/// Update a book's catalog metadata.
pub async fn book_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(book): Json<Book>,
) -> Result<Json<Book>> {
    authenticated(&state, &headers)?;
    state.db.update_book(&book)?;
    Ok(Json(book))
}

/// Collection listing query. `ammount` is accepted for older clients.
#[derive(Debug, Deserialize)]
pub struct CollectionBooksParams {
    #[serde(alias = "ammount")]
    amount: Option<u32>,
    page: Option<u32>,
    order: Option<i64>,
}

/// One page of a collection's books.
pub async fn book_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(collection_id): Path<String>,
    query: std::result::Result<Query<CollectionBooksParams>, QueryRejection>,
) -> Result<Json<Vec<Book>>> {
    let claims = authenticated(&state, &headers)?;
    let Query(params) = query?;

    let amount = params
        .amount
        .ok_or_else(|| AppError::Validation("amount is required".to_string()))?;
    let page = Page::new(amount, params.page.unwrap_or(1))?;
    let order = params.order.map(BookOrder::from_code).unwrap_or_default();

    let books = state
        .db
        .books_of_collection(&collection_id, &claims.user_key, page, order)?;
    Ok(Json(books))
}

/// Search request.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    title: String,
}

/// Search the external catalog and the library at once.
pub async fn book_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<Book>>> {
    let claims = authenticated(&state, &headers)?;
    if req.title.trim().is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }

    let books = state.search(&req.title, &claims.user_key).await?;
    Ok(Json(books))
}

/// Remove request: the book and the collection to take it out of.
#[derive(Debug, Deserialize, Serialize)]
pub struct RemoveRequest {
    id: String,
    #[serde(rename = "collectionID")]
    collection_id: String,
}

/// Remove a book from one collection.
pub async fn book_remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RemoveRequest>,
) -> Result<Json<RemoveRequest>> {
    let claims = authenticated(&state, &headers)?;

    if !state
        .db
        .remove_from_collection(&req.id, &req.collection_id, &claims.user_key)?
    {
        return Err(AppError::NotFound(format!(
            "Book {} is not in collection {}",
            req.id, req.collection_id
        )));
    }
    Ok(Json(req))
}

/// Move request: the book as it should end up, plus where it comes from.
#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    #[serde(flatten)]
    book: Book,
    #[serde(rename = "fromCollectionID", default)]
    from_collection_id: String,
}

/// Move a book between collections, or mark it read.
pub async fn book_move(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MoveRequest>,
) -> Result<Json<Book>> {
    let claims = authenticated(&state, &headers)?;
    if !req.book.is_read() && req.from_collection_id.is_empty() {
        return Err(AppError::Validation("fromCollectionID is required".to_string()));
    }

    state
        .db
        .move_book(&req.book, &req.from_collection_id, &claims.user_key)?;
    Ok(Json(req.book))
}

/// Every stored book.
pub async fn library_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<StoredBook>>> {
    authenticated(&state, &headers)?;
    Ok(Json(state.db.all_books()?))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Extract bearer token from Authorization header.
fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Verify the caller's token and return its claims.
fn authenticated(state: &AppState, headers: &HeaderMap) -> Result<Claims> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    state.auth.validate(token)
}
