//! HTTP API for driving sessions against simulated calls
//!
//! - POST /mailboxes/:mailbox/reader - Start a reader session
//! - POST /mailboxes/:mailbox/writer - Start a writer session
//! - POST /sessions/:id/commands - Send a reader command
//! - POST /sessions/:id/folder - Choose a folder from the folder menu
//! - POST /sessions/:id/record, /stop, /save - Writer control
//! - POST /sessions/:id/hangup - Simulate the caller hanging up
//! - GET /sessions/:id/status - Query session status
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, SessionEntry};
