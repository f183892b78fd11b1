use anyhow::{Context, Result};
use async_nats::Client;
use tracing::{debug, info};

use super::messages::{mwi_subject, MwiEvent};
use crate::mailbox::Message;
use crate::services::{NotificationKind, Notifier};

/// Publishes message-waiting updates to NATS
pub struct NatsNotifier {
    client: Client,
    subject_prefix: String,
}

impl NatsNotifier {
    /// Connect to NATS server
    pub async fn connect(url: &str, subject_prefix: impl Into<String>) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            subject_prefix: subject_prefix.into(),
        })
    }

    pub fn subject_for(&self, mailbox: &str) -> String {
        mwi_subject(&self.subject_prefix, mailbox)
    }
}

#[async_trait::async_trait]
impl Notifier for NatsNotifier {
    async fn notify(&self, kind: NotificationKind, mailbox: &str, message: &Message) -> Result<()> {
        let subject = self.subject_for(mailbox);
        let event = MwiEvent::new(kind, mailbox, message);
        let payload = serde_json::to_vec(&event)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish MWI event")?;

        debug!("Published {:?} for {} to {}", kind, message.id, subject);

        Ok(())
    }
}
