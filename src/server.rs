//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/login", post(handlers::auth_login))
        .route("/refresh", post(handlers::auth_refresh));

    let admin_routes = Router::new().route("/register", post(handlers::admin_register));

    let collection_routes = Router::new()
        .route(
            "/",
            post(handlers::collection_create).put(handlers::collection_update),
        )
        // GET takes a user id, DELETE a collection id.
        .route(
            "/{id}",
            get(handlers::collection_list).delete(handlers::collection_delete),
        );

    let book_routes = Router::new()
        .route("/", post(handlers::book_create).put(handlers::book_update))
        .route("/search", post(handlers::book_search))
        .route("/delete", put(handlers::book_remove))
        .route("/move", put(handlers::book_move))
        .route("/{collection}", get(handlers::book_list));

    let mut router = Router::new()
        .route("/ping", get(handlers::ping))
        .route("/library", get(handlers::library_list))
        .nest("/auth", auth_routes)
        .nest("/admin", admin_routes)
        .nest("/collection", collection_routes)
        .nest("/book", book_routes);

    if let Some(mount) = state.config.covers.mount_path() {
        router = router.nest_service(&mount, ServeDir::new(state.covers.dir()));
    }

    let cors = cors_layer(&state.config.server.cors_origins);

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS policy for the configured origins. No origins means any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
        .allow_credentials(true)
}
