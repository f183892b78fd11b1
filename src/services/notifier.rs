use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::mailbox::Message;

/// What changed in a mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    MessageRead,
    MessageDeleted,
    NewMessage,
}

/// Message-waiting indication updates
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, kind: NotificationKind, mailbox: &str, message: &Message)
        -> Result<()>;

    async fn message_read(&self, mailbox: &str, message: &Message) -> Result<()> {
        self.notify(NotificationKind::MessageRead, mailbox, message).await
    }

    async fn message_deleted(&self, mailbox: &str, message: &Message) -> Result<()> {
        self.notify(NotificationKind::MessageDeleted, mailbox, message).await
    }

    async fn new_message(&self, mailbox: &str, message: &Message) -> Result<()> {
        self.notify(NotificationKind::NewMessage, mailbox, message).await
    }
}
