//! In-process collaborators
//!
//! Used by the demo server and the integration tests. Everything lives in
//! memory; nothing touches real telephony.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, MutexGuard, Notify};
use tracing::{debug, info};

use super::channel::{ChannelEvent, ControlChannel, RecordingHandle};
use super::notifier::{NotificationKind, Notifier};
use super::prompt::{apply_replacements, Prompt, PromptPlayer, Replacements};
use super::storage::Storage;
use crate::config::RecordingFormat;
use crate::mailbox::{Folder, Message, NewMessage};

fn lock<T>(mutex: &StdMutex<T>) -> StdGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Default)]
struct StoreState {
    folders: Vec<Folder>,
    messages: Vec<Message>,
    failing: bool,
}

/// Message store held in memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new(folders: Vec<Folder>) -> Self {
        Self {
            state: Mutex::new(StoreState {
                folders,
                ..Default::default()
            }),
        }
    }

    /// Store seeded with the standard folder layout
    pub fn with_default_folders() -> Self {
        Self::new(Self::default_folders())
    }

    pub fn default_folders() -> Vec<Folder> {
        vec![
            Folder::new("inbox", "INBOX", "vm-INBOX", "0"),
            Folder::new("old", "Old", "vm-Old", "1"),
            Folder::new("work", "Work", "vm-Work", "2"),
            Folder::new("family", "Family", "vm-Family", "3"),
            Folder::new("friends", "Friends", "vm-Friends", "4"),
        ]
    }

    /// Make every subsequent operation fail until cleared
    pub async fn set_failing(&self, failing: bool) {
        self.state.lock().await.failing = failing;
    }

    /// Insert a message with an explicit timestamp
    pub async fn add_message(
        &self,
        mailbox: &str,
        folder_id: &str,
        timestamp: DateTime<Utc>,
        read: bool,
    ) -> Message {
        let id = uuid::Uuid::new_v4().to_string();
        let message = Message {
            audio_ref: format!("recordings/{}.wav", id),
            id,
            mailbox: mailbox.to_string(),
            folder_id: folder_id.to_string(),
            timestamp,
            read,
            duration: Duration::from_secs(30),
        };
        self.state.lock().await.messages.push(message.clone());
        message
    }

    pub async fn get(&self, id: &str) -> Option<Message> {
        let state = self.state.lock().await;
        state.messages.iter().find(|m| m.id == id).cloned()
    }

    /// Messages in a folder, in store order
    pub async fn messages(&self, mailbox: &str, folder_id: &str) -> Vec<Message> {
        let state = self.state.lock().await;
        state
            .messages
            .iter()
            .filter(|m| m.mailbox == mailbox && m.folder_id == folder_id)
            .cloned()
            .collect()
    }

    /// Remove a message behind any session's back
    pub async fn remove_out_of_band(&self, id: &str) {
        self.state.lock().await.messages.retain(|m| m.id != id);
    }

    async fn ready(&self) -> Result<MutexGuard<'_, StoreState>> {
        let state = self.state.lock().await;
        if state.failing {
            bail!("message store unavailable");
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStore {
    async fn all_folders(&self) -> Result<Vec<Folder>> {
        Ok(self.ready().await?.folders.clone())
    }

    async fn all_messages(&self, mailbox: &str, folder: &Folder) -> Result<Vec<Message>> {
        let state = self.ready().await?;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.mailbox == mailbox && m.folder_id == folder.id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.read, m.timestamp));
        Ok(messages)
    }

    async fn latest_messages(
        &self,
        mailbox: &str,
        folder: &Folder,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let state = self.ready().await?;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.mailbox == mailbox && m.folder_id == folder.id && m.timestamp > since)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    async fn message_exists(&self, message: &Message) -> Result<bool> {
        let state = self.ready().await?;
        Ok(state.messages.iter().any(|m| m.id == message.id))
    }

    async fn mark_read(&self, message: &Message) -> Result<bool> {
        let mut state = self.ready().await?;
        match state.messages.iter_mut().find(|m| m.id == message.id) {
            Some(stored) if !stored.read => {
                stored.read = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn move_to_folder(&self, message: &Message, folder: &Folder) -> Result<Message> {
        let mut state = self.ready().await?;
        match state.messages.iter_mut().find(|m| m.id == message.id) {
            Some(stored) => {
                stored.folder_id = folder.id.clone();
                Ok(stored.clone())
            }
            None => bail!("message {} no longer exists", message.id),
        }
    }

    async fn delete_message(&self, message: &Message) -> Result<Option<Message>> {
        let mut state = self.ready().await?;
        let position = state.messages.iter().position(|m| m.id == message.id);
        Ok(position.map(|index| state.messages.remove(index)))
    }

    async fn create_message(
        &self,
        mailbox: &str,
        folder: &Folder,
        fields: NewMessage,
    ) -> Result<Message> {
        let mut state = self.ready().await?;
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            mailbox: mailbox.to_string(),
            folder_id: folder.id.clone(),
            timestamp: Utc::now(),
            read: false,
            audio_ref: fields.audio_ref,
            duration: fields.duration,
        };
        state.messages.push(message.clone());
        Ok(message)
    }
}

// ============================================================================
// Prompt playback
// ============================================================================

/// How simulated prompts behave when played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Complete on the next scheduler tick
    Immediate,
    /// Never complete on their own; only `stop` ends them
    Hold,
    /// Take this long per sound key
    Timed(Duration),
    /// Fail every playback
    Fail,
}

/// Prompt player that logs instead of emitting audio
pub struct SimulatedPlayer {
    mode: StdMutex<PlaybackMode>,
    played: Arc<StdMutex<Vec<Vec<String>>>>,
}

impl SimulatedPlayer {
    pub fn new(mode: PlaybackMode) -> Self {
        Self {
            mode: StdMutex::new(mode),
            played: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    /// Change the mode for prompts created from now on
    pub fn set_mode(&self, mode: PlaybackMode) {
        *lock(&self.mode) = mode;
    }

    /// Every prompt that started playing, with placeholders expanded
    pub fn history(&self) -> Vec<Vec<String>> {
        lock(&self.played).clone()
    }

    /// Whether any played prompt contained `key`
    pub fn played_key(&self, key: &str) -> bool {
        lock(&self.played).iter().flatten().any(|k| k == key)
    }
}

impl PromptPlayer for SimulatedPlayer {
    fn create(
        &self,
        keys: Vec<String>,
        channel_id: &str,
        replacements: Replacements,
    ) -> Arc<dyn Prompt> {
        Arc::new(SimulatedPrompt {
            keys: apply_replacements(&keys, &replacements),
            channel_id: channel_id.to_string(),
            mode: *lock(&self.mode),
            stopped: AtomicBool::new(false),
            wake: Notify::new(),
            played: Arc::clone(&self.played),
        })
    }
}

struct SimulatedPrompt {
    keys: Vec<String>,
    channel_id: String,
    mode: PlaybackMode,
    stopped: AtomicBool,
    wake: Notify,
    played: Arc<StdMutex<Vec<Vec<String>>>>,
}

#[async_trait::async_trait]
impl Prompt for SimulatedPrompt {
    async fn play(&self) -> Result<bool> {
        if self.mode == PlaybackMode::Fail {
            bail!("playback failed on {}", self.channel_id);
        }

        debug!("Playing on {}: {:?}", self.channel_id, self.keys);
        lock(&self.played).push(self.keys.clone());

        match self.mode {
            PlaybackMode::Immediate | PlaybackMode::Fail => {
                tokio::task::yield_now().await;
                Ok(!self.stopped.load(Ordering::SeqCst))
            }
            PlaybackMode::Hold => {
                if !self.stopped.load(Ordering::SeqCst) {
                    self.wake.notified().await;
                }
                Ok(false)
            }
            PlaybackMode::Timed(per_key) => {
                let total = per_key * self.keys.len() as u32;
                tokio::select! {
                    _ = tokio::time::sleep(total) => Ok(!self.stopped.load(Ordering::SeqCst)),
                    _ = self.wake.notified() => Ok(false),
                }
            }
        }
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.wake.notify_one();
        }
    }
}

// ============================================================================
// Control channel
// ============================================================================

struct ActiveRecording {
    id: String,
    started: Instant,
}

#[derive(Default)]
struct ChannelState {
    hung_up: bool,
    active: Option<ActiveRecording>,
    recordings_started: usize,
    deleted_audio: Vec<String>,
    fail_recording: bool,
}

struct ChannelInner {
    id: String,
    events: broadcast::Sender<ChannelEvent>,
    state: StdMutex<ChannelState>,
    recording_duration: Option<Duration>,
}

impl ChannelInner {
    fn finish_recording(&self, recording: &str) {
        let finished = {
            let mut state = lock(&self.state);
            let matches = state.active.as_ref().is_some_and(|a| a.id == recording);
            if matches {
                state.active.take()
            } else {
                None
            }
        };

        if let Some(active) = finished {
            let duration = self
                .recording_duration
                .unwrap_or_else(|| active.started.elapsed());
            info!(
                "Recording {} on {} finished after {:.1}s",
                active.id,
                self.id,
                duration.as_secs_f64()
            );
            let _ = self.events.send(ChannelEvent::RecordingFinished {
                recording: active.id,
                duration,
            });
        }
    }

    fn finish_active(&self) {
        let active = lock(&self.state).active.as_ref().map(|a| a.id.clone());
        if let Some(id) = active {
            self.finish_recording(&id);
        }
    }
}

/// A call that exists only in memory
#[derive(Clone)]
pub struct SimulatedChannel {
    inner: Arc<ChannelInner>,
}

impl SimulatedChannel {
    pub fn new(id: impl Into<String>) -> Self {
        Self::build(id.into(), None)
    }

    /// Report every recording as lasting exactly `duration`
    pub fn with_recording_duration(id: impl Into<String>, duration: Duration) -> Self {
        Self::build(id.into(), Some(duration))
    }

    fn build(id: String, recording_duration: Option<Duration>) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(ChannelInner {
                id,
                events,
                state: StdMutex::new(ChannelState::default()),
                recording_duration,
            }),
        }
    }

    /// The caller hangs up. Any capture in progress ends with the call.
    pub fn caller_hangup(&self) {
        info!("Caller hung up on {}", self.inner.id);
        lock(&self.inner.state).hung_up = true;
        let _ = self.inner.events.send(ChannelEvent::Hangup);
        self.inner.finish_active();
    }

    pub fn is_hung_up(&self) -> bool {
        lock(&self.inner.state).hung_up
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.inner.state).active.is_some()
    }

    pub fn recordings_started(&self) -> usize {
        lock(&self.inner.state).recordings_started
    }

    pub fn deleted_audio(&self) -> Vec<String> {
        lock(&self.inner.state).deleted_audio.clone()
    }

    /// Number of attached event listeners
    pub fn listener_count(&self) -> usize {
        self.inner.events.receiver_count()
    }

    pub fn set_recording_fails(&self, fails: bool) {
        lock(&self.inner.state).fail_recording = fails;
    }
}

#[async_trait::async_trait]
impl ControlChannel for SimulatedChannel {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    async fn hangup(&self) -> Result<()> {
        info!("Hanging up {}", self.inner.id);
        lock(&self.inner.state).hung_up = true;
        self.inner.finish_active();
        Ok(())
    }

    async fn start_recording(&self, format: &RecordingFormat) -> Result<Box<dyn RecordingHandle>> {
        let id = uuid::Uuid::new_v4().to_string();
        {
            let mut state = lock(&self.inner.state);
            if state.fail_recording {
                bail!("channel {} refused to record", self.inner.id);
            }
            if state.hung_up {
                bail!("channel {} is no longer connected", self.inner.id);
            }
            state.active = Some(ActiveRecording {
                id: id.clone(),
                started: Instant::now(),
            });
            state.recordings_started += 1;
        }

        info!(
            "Recording {} started on {} ({}, max {}s)",
            id, self.inner.id, format.format, format.max_duration_secs
        );

        Ok(Box::new(SimulatedRecording {
            audio_ref: format!("recordings/{}.{}", id, format.format),
            id,
            channel: Arc::clone(&self.inner),
        }))
    }

    async fn delete_stored_audio(&self, audio_ref: &str) -> Result<()> {
        debug!("Deleting stored audio {}", audio_ref);
        lock(&self.inner.state)
            .deleted_audio
            .push(audio_ref.to_string());
        Ok(())
    }
}

struct SimulatedRecording {
    id: String,
    audio_ref: String,
    channel: Arc<ChannelInner>,
}

#[async_trait::async_trait]
impl RecordingHandle for SimulatedRecording {
    fn id(&self) -> &str {
        &self.id
    }

    fn audio_ref(&self) -> &str {
        &self.audio_ref
    }

    async fn stop(&self) -> Result<()> {
        self.channel.finish_recording(&self.id);
        Ok(())
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// A delivered notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub mailbox: String,
    pub message_id: String,
}

/// Notifier that records and logs every update
#[derive(Default)]
pub struct MemoryNotifier {
    sent: StdMutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        lock(&self.sent).iter().filter(|n| n.kind == kind).count()
    }
}

#[async_trait::async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        mailbox: &str,
        message: &Message,
    ) -> Result<()> {
        info!("Mailbox {}: {:?} ({})", mailbox, kind, message.id);
        lock(&self.sent).push(Notification {
            kind,
            mailbox: mailbox.to_string(),
            message_id: message.id.clone(),
        });
        Ok(())
    }
}
