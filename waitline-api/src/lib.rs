//! HTTP surface of the waitlist coordinator.
//!
//! This crate is a thin composition layer: the session-bound party API, the
//! HTML pages, and the per-client SSE event stream. Admission policy lives in
//! `waitline-service`; handlers here only validate input, talk to the store,
//! and enqueue follow-up jobs.

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_sessions::{cookie::Key, Expiry, MemoryStore, SessionManagerLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod pages;
pub mod session;

pub use handlers::AppState;

/// The full router, session and CORS layers included.
pub fn app(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_signed(Key::derive_from(state.config.session_key.as_bytes()))
        .with_expiry(Expiry::OnInactivity(time::Duration::seconds(
            state.config.cookie_max_age_seconds,
        )));

    Router::new()
        .route("/", get(pages::root))
        .route("/party/new", get(pages::new_party))
        .route(
            "/party",
            post(handlers::create_party)
                .get(pages::party_status)
                .delete(handlers::delete_party),
        )
        .route("/party/check-in", patch(handlers::check_in))
        .route("/party/events", get(events::party_events))
        .route("/health", get(handlers::health))
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", handlers::ApiDoc::openapi()),
        )
        .layer(middleware::from_fn(session::expire_served_sessions))
        .layer(session_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
