use super::state::{AppState, SessionEntry};
use crate::error::SessionError;
use crate::mailbox::Navigation;
use crate::services::{ControlChannel, SimulatedChannel};
use crate::session::{
    ReaderCommand, ReaderSession, ReaderState, SessionConfig, SessionContext, WriterSession,
    WriterState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    /// Reader command name, e.g. "next" or "delete"
    pub command: String,
}

#[derive(Debug, Deserialize)]
pub struct FolderRequest {
    /// Keypad selector of the folder
    pub selector: String,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub kind: String,
    pub mailbox: String,
    pub channel_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn not_found(session_id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("Session {} not found", session_id),
    )
}

fn session_error(err: SessionError) -> Response {
    match err {
        SessionError::Failed(err) => {
            error!("Session operation failed: {:#}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err))
        }
        other => error_response(StatusCode::CONFLICT, other.to_string()),
    }
}

fn parse_command(command: &str) -> Option<ReaderCommand> {
    let command = match command {
        "first" => ReaderCommand::Play(Navigation::First),
        "next" => ReaderCommand::Play(Navigation::Next),
        "previous" => ReaderCommand::Play(Navigation::Previous),
        "replay" | "repeat" => ReaderCommand::Play(Navigation::Current),
        "delete" => ReaderCommand::Delete,
        "change_folder" => ReaderCommand::ChangeFolder,
        "repeat_menu" => ReaderCommand::RepeatMenu,
        "previous_menu" => ReaderCommand::PreviousMenu,
        _ => return None,
    };
    Some(command)
}

// ============================================================================
// Handlers
// ============================================================================

async fn start_session(state: &AppState, mailbox: String, kind: &'static str) -> Response {
    let channel = SimulatedChannel::new(format!("channel-{}", uuid::Uuid::new_v4()));
    let config = SessionConfig::from_config(&state.config, &mailbox);
    let session_id = config.session_id.clone();
    let ctx = SessionContext::new(config, state.services.clone(), Arc::new(channel.clone()));

    info!("Starting {} session {} for mailbox {}", kind, session_id, mailbox);

    let pruned = state.prune_finished().await;
    if pruned > 0 {
        info!("Pruned {} finished sessions", pruned);
    }

    let entry = match kind {
        "writer" => SessionEntry::Writer {
            handle: WriterSession::spawn(ctx),
            channel: channel.clone(),
        },
        _ => SessionEntry::Reader {
            handle: ReaderSession::spawn(ctx),
            channel: channel.clone(),
        },
    };

    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(session_id.clone(), entry);
    }

    (
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id,
            kind: kind.to_string(),
            mailbox,
            channel_id: channel.id().to_string(),
        }),
    )
        .into_response()
}

/// POST /mailboxes/:mailbox/reader
/// Start browsing a mailbox on a new simulated call
pub async fn start_reader(State(state): State<AppState>, Path(mailbox): Path<String>) -> Response {
    start_session(&state, mailbox, "reader").await
}

/// POST /mailboxes/:mailbox/writer
/// Start leaving a message in a mailbox on a new simulated call
pub async fn start_writer(State(state): State<AppState>, Path(mailbox): Path<String>) -> Response {
    start_session(&state, mailbox, "writer").await
}

/// POST /sessions/:session_id/commands
pub async fn send_command(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> Response {
    let Some(entry) = state.session(&session_id).await else {
        return not_found(&session_id);
    };
    let SessionEntry::Reader { handle, .. } = entry else {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("Session {} does not accept reader commands", session_id),
        );
    };
    let Some(command) = parse_command(&req.command) else {
        warn!("Rejecting unknown command {:?}", req.command);
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("Unknown command {:?}", req.command),
        );
    };

    if !handle.send(command) {
        return session_error(SessionError::Ended);
    }
    (StatusCode::ACCEPTED, Json(handle.status())).into_response()
}

/// POST /sessions/:session_id/folder
/// Choose a folder; responds once it has been loaded
pub async fn submit_folder(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<FolderRequest>,
) -> Response {
    match state.session(&session_id).await {
        Some(SessionEntry::Reader { handle, .. }) => {
            match handle.submit_folder(&req.selector).await {
                Ok(folder) => (StatusCode::OK, Json(folder)).into_response(),
                Err(err) => session_error(err),
            }
        }
        Some(_) => error_response(
            StatusCode::BAD_REQUEST,
            format!("Session {} has no folders to choose", session_id),
        ),
        None => not_found(&session_id),
    }
}

/// POST /sessions/:session_id/record
/// Responds once capture has started
pub async fn record(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    match state.session(&session_id).await {
        Some(SessionEntry::Writer { handle, .. }) => match handle.record().await {
            Ok(()) => (StatusCode::OK, Json(handle.status())).into_response(),
            Err(err) => session_error(err),
        },
        Some(_) => error_response(StatusCode::BAD_REQUEST, "Only writer sessions record"),
        None => not_found(&session_id),
    }
}

/// POST /sessions/:session_id/stop
pub async fn stop(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    match state.session(&session_id).await {
        Some(SessionEntry::Writer { handle, .. }) => {
            handle.stop();
            (StatusCode::ACCEPTED, Json(handle.status())).into_response()
        }
        Some(_) => error_response(StatusCode::BAD_REQUEST, "Only writer sessions stop"),
        None => not_found(&session_id),
    }
}

/// POST /sessions/:session_id/save
/// Responds with the committed message
pub async fn save(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    match state.session(&session_id).await {
        Some(SessionEntry::Writer { handle, .. }) => match handle.save().await {
            Ok(message) => (StatusCode::OK, Json(message)).into_response(),
            Err(err) => session_error(err),
        },
        Some(_) => error_response(StatusCode::BAD_REQUEST, "Only writer sessions save"),
        None => not_found(&session_id),
    }
}

/// POST /sessions/:session_id/hangup
/// Simulate the caller hanging up
pub async fn hangup(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    match state.session(&session_id).await {
        Some(entry) => {
            info!("Caller hung up {} session {}", entry.kind(), session_id);
            entry.channel().caller_hangup();
            StatusCode::ACCEPTED.into_response()
        }
        None => not_found(&session_id),
    }
}

/// GET /sessions/:session_id/status
/// A finished session reports its final status once and is then forgotten
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(entry) = state.session(&session_id).await else {
        return not_found(&session_id);
    };

    let (response, done) = match &entry {
        SessionEntry::Reader { handle, .. } => {
            let status = handle.status();
            let done = status.state == ReaderState::Done;
            ((StatusCode::OK, Json(status)).into_response(), done)
        }
        SessionEntry::Writer { handle, .. } => {
            let status = handle.status();
            let done = status.state == WriterState::Done;
            ((StatusCode::OK, Json(status)).into_response(), done)
        }
    };

    if done && state.remove(&session_id).await.is_some() {
        info!("Removed finished {} session {}", entry.kind(), session_id);
    }
    response
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
