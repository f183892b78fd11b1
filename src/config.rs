use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub recording: RecordingFormat,
    /// Per-mailbox overrides of the recording format
    pub mailboxes: HashMap<String, MailboxConfig>,
    /// Overrides of the built-in prompt set, by symbolic key
    pub prompts: HashMap<String, Vec<String>>,
    pub nats: Option<NatsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "voicemail-session".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

/// How new messages are captured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingFormat {
    /// Container/codec name handed to the channel (e.g. "wav")
    pub format: String,

    /// Longest message the channel will capture
    pub max_duration_secs: u64,

    /// Play a beep before capture starts
    pub beep: bool,
}

impl Default for RecordingFormat {
    fn default() -> Self {
        Self {
            format: "wav".to_string(),
            max_duration_secs: 180,
            beep: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub recording: Option<RecordingFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    pub url: String,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

fn default_subject_prefix() -> String {
    "voicemail.mwi".to_string()
}

impl Config {
    /// Load from an optional file, then `VOICEMAIL__*` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("VOICEMAIL").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Recording format for a mailbox, falling back to the global default
    pub fn recording_for(&self, mailbox: &str) -> RecordingFormat {
        self.mailboxes
            .get(mailbox)
            .and_then(|m| m.recording.clone())
            .unwrap_or_else(|| self.recording.clone())
    }
}
