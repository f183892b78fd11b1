use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::mailbox::{Folder, Message, NewMessage};

/// Persistence for folders and messages
///
/// Implementations are shared between sessions and must tolerate
/// double-deletes: deleting a message that is already gone returns `None`
/// rather than an error.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// All folders, in menu order. The first folder is the default.
    async fn all_folders(&self) -> Result<Vec<Folder>>;

    /// Every message in a folder, unread first, each group oldest first
    async fn all_messages(&self, mailbox: &str, folder: &Folder) -> Result<Vec<Message>>;

    /// Messages in a folder strictly newer than `since`, oldest first
    async fn latest_messages(
        &self,
        mailbox: &str,
        folder: &Folder,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>>;

    async fn message_exists(&self, message: &Message) -> Result<bool>;

    /// Flag a message as read. Returns whether the stored flag changed.
    async fn mark_read(&self, message: &Message) -> Result<bool>;

    async fn move_to_folder(&self, message: &Message, folder: &Folder) -> Result<Message>;

    async fn delete_message(&self, message: &Message) -> Result<Option<Message>>;

    /// Persist a new message. The store assigns the id and timestamp and
    /// starts it unread.
    async fn create_message(
        &self,
        mailbox: &str,
        folder: &Folder,
        fields: NewMessage,
    ) -> Result<Message>;
}
