use crate::config::Config;
use crate::services::SimulatedChannel;
use crate::session::{ReaderHandle, ReaderState, SessionServices, WriterHandle, WriterState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A running session and the call it is attached to
#[derive(Clone)]
pub enum SessionEntry {
    Reader {
        handle: ReaderHandle,
        channel: SimulatedChannel,
    },
    Writer {
        handle: WriterHandle,
        channel: SimulatedChannel,
    },
}

impl SessionEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEntry::Reader { .. } => "reader",
            SessionEntry::Writer { .. } => "writer",
        }
    }

    /// Whether the session has reached its terminal state
    pub fn is_done(&self) -> bool {
        match self {
            SessionEntry::Reader { handle, .. } => handle.status().state == ReaderState::Done,
            SessionEntry::Writer { handle, .. } => handle.status().state == WriterState::Done,
        }
    }

    pub fn channel(&self) -> &SimulatedChannel {
        match self {
            SessionEntry::Reader { channel, .. } | SessionEntry::Writer { channel, .. } => channel,
        }
    }
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Active sessions (session_id → session)
    pub sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,

    /// Collaborators handed to every new session
    pub services: SessionServices,

    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(services: SessionServices, config: Config) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            services,
            config: Arc::new(config),
        }
    }

    pub async fn session(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.write().await.remove(session_id)
    }

    /// Drop every session that has ended, returning how many were removed
    pub async fn prune_finished(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.is_done());
        before - sessions.len()
    }
}
