use thiserror::Error;

/// Failures reported to a caller awaiting a session command
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has ended")]
    Ended,

    #[error("no folder is selected by {0:?}")]
    UnknownFolder(String),

    #[error("{0} is not available in the current state")]
    NotAvailable(&'static str),

    #[error("nothing has been recorded")]
    NothingRecorded,

    #[error("a recording has already been started")]
    AlreadyRecording,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}
