//! JSON Share
//!
//! Upload a JSON document once, hand out short share codes for it, and
//! stream it back to anyone holding a code.

pub mod client;
pub mod config;
pub mod content;
pub mod db;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod shares;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use error::{ErrorKind, Result, ShareError};
pub use state::AppState;

/// Room for multipart boundaries and the optional hash field on top of the
/// document itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

fn upload_body_limit(max_content_bytes: usize) -> usize {
    max_content_bytes.saturating_add(MULTIPART_OVERHEAD)
}

pub fn app(state: AppState) -> Router {
    let body_limit = upload_body_limit(state.contents.max_bytes());

    Router::new()
        .route("/health", get(handlers::health))
        .route("/files/verify", post(handlers::verify_file))
        .route("/files/upload", post(handlers::upload_file))
        .route("/shares", post(handlers::create_share))
        .route("/shares/mine", get(handlers::list_shares))
        .route(
            "/shares/:share",
            get(handlers::get_share).delete(handlers::delete_share),
        )
        .route("/shares/:share/download", get(handlers::download_share))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
