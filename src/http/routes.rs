use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session creation
        .route("/mailboxes/:mailbox/reader", post(handlers::start_reader))
        .route("/mailboxes/:mailbox/writer", post(handlers::start_writer))
        // Reader control
        .route("/sessions/:session_id/commands", post(handlers::send_command))
        .route("/sessions/:session_id/folder", post(handlers::submit_folder))
        // Writer control
        .route("/sessions/:session_id/record", post(handlers::record))
        .route("/sessions/:session_id/stop", post(handlers::stop))
        .route("/sessions/:session_id/save", post(handlers::save))
        // Call control and queries
        .route("/sessions/:session_id/hangup", post(handlers::hangup))
        .route("/sessions/:session_id/status", get(handlers::get_session_status))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
