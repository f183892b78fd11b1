use serde::Serialize;

use crate::mailbox::{Folder, MenuAction, Message};

/// Reader state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderState {
    Init,
    Intro,
    Ready,
    Fetching,
    Processing,
    ChangingFolder,
    LoadingFolder,
    Done,
}

/// Writer state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterState {
    Init,
    Ready,
    StoppingPrompt,
    Recording,
    StoppingRecording,
    RecordingFinished,
    SavingRecording,
    Done,
}

/// Snapshot of a reader session, republished after every event
#[derive(Debug, Clone, Serialize)]
pub struct ReaderStatus {
    pub session_id: String,
    pub mailbox: String,
    pub state: ReaderState,

    /// Folder being browsed, once loaded
    pub folder: Option<Folder>,

    pub message_count: usize,
    pub unread_count: usize,
    pub cursor: usize,
    pub cursor_live: bool,

    /// Menu entries available from the current position
    pub menu: Vec<MenuAction>,

    /// Id of the message most recently started for playback
    pub last_played: Option<String>,

    /// Commands waiting for a later state
    pub deferred: usize,
}

/// Snapshot of a writer session, republished after every event
#[derive(Debug, Clone, Serialize)]
pub struct WriterStatus {
    pub session_id: String,
    pub mailbox: String,
    pub state: WriterState,

    /// Whether the greeting is currently playing
    pub prompt_playing: bool,

    pub recording_id: Option<String>,

    /// Captured length, known once the recording has finished
    pub duration_secs: Option<f64>,

    /// The committed message, once saved
    pub saved_message: Option<Message>,

    /// Why the session ended early, if it failed
    pub error: Option<String>,

    pub deferred: usize,
}
