use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::services::{ChannelEvent, ControlChannel};

/// A session's subscription to its call's events
///
/// Released at most once; a released listener never yields again.
pub struct ChannelListener {
    receiver: Option<broadcast::Receiver<ChannelEvent>>,
}

impl ChannelListener {
    pub fn attach(channel: &dyn ControlChannel) -> Self {
        Self {
            receiver: Some(channel.subscribe()),
        }
    }

    /// Next call event; `None` once the channel has gone away
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        let Some(receiver) = self.receiver.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} channel events", skipped);
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Detach from the channel. Returns `false` if already detached.
    pub fn release(&mut self) -> bool {
        self.receiver.take().is_some()
    }

    pub fn is_attached(&self) -> bool {
        self.receiver.is_some()
    }
}
