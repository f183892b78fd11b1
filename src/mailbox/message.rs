use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A stored voice message
///
/// Two messages are equal when they share an `id`, regardless of the other
/// fields; the in-memory copy may lag the store on `read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Opaque identity, stable across fetches
    pub id: String,

    /// Owning mailbox
    pub mailbox: String,

    /// Folder the message is filed under
    pub folder_id: String,

    /// When the message was recorded
    pub timestamp: DateTime<Utc>,

    /// Whether the message has been listened to in full
    pub read: bool,

    /// Handle to the stored audio, also used as the playback sound key
    pub audio_ref: String,

    /// Length of the recording
    pub duration: Duration,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Message {}

/// A named partition of a mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,

    /// Human-readable name (e.g. "INBOX", "Old")
    pub name: String,

    /// Sound key announcing the folder in menus
    pub display_key: String,

    /// Keypad code that selects the folder
    pub selector: String,
}

impl Folder {
    pub fn new(id: &str, name: &str, display_key: &str, selector: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            display_key: display_key.to_string(),
            selector: selector.to_string(),
        }
    }
}

/// Fields supplied by the writer when committing a recording
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub audio_ref: String,
    pub duration: Duration,
}
