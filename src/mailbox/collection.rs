use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::message::{Folder, Message};
use crate::services::Storage;

/// Cursor movements a caller can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Navigation {
    First,
    Next,
    Previous,
    Current,
}

/// Menu entries offered after a prompt, in the order they are read out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuAction {
    First,
    Previous,
    Repeat,
    Next,
    Delete,
}

impl MenuAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MenuAction::First => "first",
            MenuAction::Previous => "previous",
            MenuAction::Repeat => "repeat",
            MenuAction::Next => "next",
            MenuAction::Delete => "delete",
        }
    }
}

/// In-memory, cursor-driven view over one folder of a mailbox
///
/// Items are kept unread-first, then read, each group oldest first. Every
/// message handed out by navigation has been confirmed to still exist in the
/// store; entries that vanished are evicted on the way.
pub struct MessageCollection {
    storage: Arc<dyn Storage>,
    mailbox: String,
    folder: Folder,
    items: Vec<Message>,
    cursor: usize,

    /// Set once the cursor has been moved onto a message; distinguishes a
    /// fresh listing from "positioned on the first message"
    cursor_live: bool,

    /// Newest timestamp seen, bounds incremental fetches
    high_water_mark: Option<DateTime<Utc>>,
}

impl MessageCollection {
    pub fn new(storage: Arc<dyn Storage>, mailbox: impl Into<String>, folder: Folder) -> Self {
        Self {
            storage,
            mailbox: mailbox.into(),
            folder,
            items: Vec::new(),
            cursor: 0,
            cursor_live: false,
            high_water_mark: None,
        }
    }

    /// Replace the contents with a full listing of the folder
    pub async fn load(&mut self) -> Result<usize> {
        self.items.clear();
        self.cursor = 0;
        self.cursor_live = false;
        self.high_water_mark = None;

        let messages = self
            .storage
            .all_messages(&self.mailbox, &self.folder)
            .await
            .with_context(|| format!("Failed to load folder {}", self.folder.name))?;

        let added = self.add(messages);
        info!(
            "Loaded {} messages from {}/{}",
            added, self.mailbox, self.folder.name
        );
        Ok(added)
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    pub fn folder(&self) -> &Folder {
        &self.folder
    }

    pub fn messages(&self) -> &[Message] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|m| !m.read).count()
    }

    pub fn read_count(&self) -> usize {
        self.items.len() - self.unread_count()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_cursor_live(&self) -> bool {
        self.cursor_live
    }

    pub fn high_water_mark(&self) -> Option<DateTime<Utc>> {
        self.high_water_mark
    }

    /// The message under a live cursor, without consulting the store
    pub fn current_message(&self) -> Option<&Message> {
        if self.cursor_live {
            self.items.get(self.cursor)
        } else {
            None
        }
    }

    pub async fn first(&mut self) -> Result<Option<Message>> {
        self.navigate(Navigation::First).await
    }

    pub async fn next(&mut self) -> Result<Option<Message>> {
        self.navigate(Navigation::Next).await
    }

    pub async fn previous(&mut self) -> Result<Option<Message>> {
        self.navigate(Navigation::Previous).await
    }

    pub async fn current(&mut self) -> Result<Option<Message>> {
        self.navigate(Navigation::Current).await
    }

    /// Move the cursor and resolve the message under it
    ///
    /// A candidate that no longer exists in the store is evicted and the same
    /// movement is repeated. Each retry removes one entry, so this ends once
    /// the stale entries are exhausted.
    pub async fn navigate(&mut self, navigation: Navigation) -> Result<Option<Message>> {
        loop {
            let Some(candidate) = self.step(navigation).await? else {
                return Ok(None);
            };

            let exists = self
                .storage
                .message_exists(&candidate)
                .await
                .context("Failed to check message existence")?;
            if exists {
                return Ok(Some(candidate));
            }

            info!(
                "Message {} vanished from {}/{}, evicting",
                candidate.id, self.mailbox, self.folder.name
            );
            self.remove(&candidate);
        }
    }

    async fn step(&mut self, navigation: Navigation) -> Result<Option<Message>> {
        match navigation {
            Navigation::First => {
                self.cursor = 0;
                self.cursor_live = true;
                if self.items.is_empty() {
                    self.sync_latest().await?;
                }
            }
            Navigation::Next => {
                // A fresh cursor reveals its current position before advancing
                if self.cursor_live {
                    self.cursor += 1;
                }
                self.cursor_live = true;
                if self.cursor >= self.items.len() {
                    self.sync_latest().await?;
                    if self.cursor >= self.items.len() {
                        self.cursor = self.items.len().saturating_sub(1);
                        return Ok(None);
                    }
                }
            }
            Navigation::Previous => {
                self.cursor = self.cursor.saturating_sub(1);
                self.cursor_live = true;
            }
            Navigation::Current => {
                self.cursor_live = true;
            }
        }

        Ok(self.items.get(self.cursor).cloned())
    }

    /// Fetch anything newer than the high-water mark and merge it in
    async fn sync_latest(&mut self) -> Result<usize> {
        let fetched = match self.high_water_mark {
            Some(since) => {
                self.storage
                    .latest_messages(&self.mailbox, &self.folder, since)
                    .await
            }
            None => self.storage.all_messages(&self.mailbox, &self.folder).await,
        }
        .with_context(|| format!("Failed to fetch latest messages for {}", self.folder.name))?;

        let added = self.add(fetched);
        if added > 0 {
            debug!("Synced {} new messages into {}", added, self.folder.name);
        }
        Ok(added)
    }

    /// Merge messages, skipping identities already present
    ///
    /// Returns how many were added. A collection that already held messages
    /// is re-sorted afterwards; an empty one keeps the fetch order.
    pub fn add(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        let was_empty = self.items.is_empty();
        let mut added = 0;

        for message in messages {
            if self.items.iter().any(|m| m.id == message.id) {
                continue;
            }
            if self.high_water_mark.map_or(true, |mark| message.timestamp > mark) {
                self.high_water_mark = Some(message.timestamp);
            }
            self.items.push(message);
            added += 1;
        }

        if !was_empty && added > 0 {
            self.items.sort_by_key(|m| (m.read, m.timestamp));
        }

        added
    }

    /// Flag a message as read in memory and in the store
    ///
    /// Returns whether the store's flag changed. Skips the store when the
    /// message is already read here or no longer held.
    pub async fn mark_as_read(&mut self, message: &Message) -> Result<bool> {
        let Some(held) = self.items.iter().find(|m| m.id == message.id) else {
            debug!("Message {} not held, skipping mark-read", message.id);
            return Ok(false);
        };
        if held.read {
            return Ok(false);
        }

        let changed = self
            .storage
            .mark_read(message)
            .await
            .context("Failed to mark message read")?;
        if !changed {
            debug!("Message {} was already read in the store", message.id);
        }

        if let Some(held) = self.items.iter_mut().find(|m| m.id == message.id) {
            held.read = true;
        }
        Ok(changed)
    }

    /// Drop a message from memory
    ///
    /// The cursor keeps its index but is no longer live, so the next movement
    /// lands on whatever shifted into that slot.
    pub fn remove(&mut self, message: &Message) -> bool {
        let before = self.items.len();
        self.items.retain(|m| m.id != message.id);
        self.cursor_live = false;
        self.items.len() != before
    }

    /// Remove a message from memory and the store
    ///
    /// Returns the stored copy, or `None` when someone else already deleted it.
    pub async fn delete(&mut self, message: &Message) -> Result<Option<Message>> {
        self.remove(message);
        self.storage
            .delete_message(message)
            .await
            .context("Failed to delete message")
    }

    /// Re-file a message into another folder, dropping it from this view
    pub async fn move_to_folder(&mut self, message: &Message, folder: &Folder) -> Result<Message> {
        let moved = self
            .storage
            .move_to_folder(message, folder)
            .await
            .with_context(|| format!("Failed to move message to {}", folder.name))?;
        self.remove(message);
        Ok(moved)
    }

    /// Menu entries available from the current position
    pub fn calculate_menu(&self) -> Vec<MenuAction> {
        let len = self.items.len();
        let on_message = self.cursor_live && self.cursor < len;
        let mut menu = Vec::new();

        if self.cursor == 0 && !self.cursor_live && len > 0 {
            menu.push(MenuAction::First);
        }
        if self.cursor > 0 {
            menu.push(MenuAction::Previous);
        }
        if on_message {
            menu.push(MenuAction::Repeat);
        }
        if self.cursor + 1 < len {
            menu.push(MenuAction::Next);
        }
        if on_message {
            menu.push(MenuAction::Delete);
        }

        menu
    }
}
