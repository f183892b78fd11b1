use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::prompts::PromptSet;
use crate::config::{Config, RecordingFormat};
use crate::services::{ControlChannel, Notifier, PromptPlayer, Storage};

/// Configuration for one reader or writer session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "session-<uuid>")
    pub session_id: String,

    /// Mailbox being browsed or recorded into
    pub mailbox: String,

    /// Capture settings used by the writer
    pub recording: RecordingFormat,
}

impl SessionConfig {
    pub fn new(mailbox: impl Into<String>) -> Self {
        Self {
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            mailbox: mailbox.into(),
            recording: RecordingFormat::default(),
        }
    }

    /// Session for `mailbox` using the mailbox's configured recording format
    pub fn from_config(config: &Config, mailbox: &str) -> Self {
        Self {
            recording: config.recording_for(mailbox),
            ..Self::new(mailbox)
        }
    }
}

/// Collaborators shared by every session on a server
#[derive(Clone)]
pub struct SessionServices {
    pub storage: Arc<dyn Storage>,
    pub player: Arc<dyn PromptPlayer>,
    pub notifier: Arc<dyn Notifier>,
    pub prompts: Arc<PromptSet>,
}

/// Everything a session controller needs, passed in at spawn
#[derive(Clone)]
pub struct SessionContext {
    pub config: SessionConfig,
    pub services: SessionServices,
    pub channel: Arc<dyn ControlChannel>,
}

impl SessionContext {
    pub fn new(
        config: SessionConfig,
        services: SessionServices,
        channel: Arc<dyn ControlChannel>,
    ) -> Self {
        Self {
            config,
            services,
            channel,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn mailbox(&self) -> &str {
        &self.config.mailbox
    }
}
