//! HTTP façade: wires the five component crates into the routes described
//! in the external interfaces list. The worker and cleanup binaries live
//! under `src/bin/` since they share no routing surface with this one, only
//! the same `chatmem-config`-resolved settings.

mod error;
mod handlers;
mod state;

pub use state::AppState;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/chat-semantic", post(handlers::chat_semantic))
        .route("/chat-rfm", post(handlers::chat_rfm))
        .route("/chat-rfm-semantic", post(handlers::chat_rfm_semantic))
        .with_state(state)
}
