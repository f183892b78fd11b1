use anyhow::Result;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::RecordingFormat;

/// Events raised by the telephony side of a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The caller hung up
    Hangup,
    /// An audio capture ended, either stopped or because the call dropped
    RecordingFinished {
        recording: String,
        duration: Duration,
    },
}

/// Control channel for one live call
#[async_trait::async_trait]
pub trait ControlChannel: Send + Sync {
    /// Channel identifier passed to the prompt player
    fn id(&self) -> &str;

    /// Subscribe to call events. Dropping the receiver detaches the listener.
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;

    /// End the call from our side
    async fn hangup(&self) -> Result<()>;

    /// Begin capturing caller audio
    async fn start_recording(&self, format: &RecordingFormat) -> Result<Box<dyn RecordingHandle>>;

    /// Remove stored audio belonging to a deleted message
    async fn delete_stored_audio(&self, audio_ref: &str) -> Result<()>;
}

/// An in-progress audio capture
#[async_trait::async_trait]
pub trait RecordingHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Where the captured audio will be stored
    fn audio_ref(&self) -> &str;

    /// Ask the capture to end; completion arrives as
    /// [`ChannelEvent::RecordingFinished`]
    async fn stop(&self) -> Result<()>;
}
