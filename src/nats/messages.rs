use serde::{Deserialize, Serialize};

use crate::mailbox::Message;
use crate::services::NotificationKind;

/// Message-waiting indication published to NATS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MwiEvent {
    pub mailbox: String,
    pub event: NotificationKind,
    pub message_id: String,
    pub folder_id: String,
    pub timestamp: String, // RFC3339 timestamp
}

impl MwiEvent {
    pub fn new(kind: NotificationKind, mailbox: &str, message: &Message) -> Self {
        Self {
            mailbox: mailbox.to_string(),
            event: kind,
            message_id: message.id.clone(),
            folder_id: message.folder_id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Subject a mailbox's events are published on
pub fn mwi_subject(prefix: &str, mailbox: &str) -> String {
    format!("{}.{}", prefix, mailbox)
}
