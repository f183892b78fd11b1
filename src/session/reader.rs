use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::config::SessionContext;
use super::deferred::DeferredQueue;
use super::listener::ChannelListener;
use super::stats::{ReaderState, ReaderStatus};
use crate::error::SessionError;
use crate::mailbox::{Folder, Message, MessageCollection, Navigation};
use crate::services::{ChannelEvent, Prompt, Replacements};

/// Commands accepted by a reader session
#[derive(Debug)]
pub enum ReaderCommand {
    /// Move through the folder and play the resolved message
    Play(Navigation),
    Delete,
    ChangeFolder,
    SubmitFolder {
        selector: String,
        reply: oneshot::Sender<Result<Folder, SessionError>>,
    },
    /// Re-file the current message into the folder with this selector
    SaveToFolder {
        selector: String,
    },
    RepeatMenu,
    PreviousMenu,
}

impl ReaderCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ReaderCommand::Play(Navigation::First) => "first",
            ReaderCommand::Play(Navigation::Next) => "next",
            ReaderCommand::Play(Navigation::Previous) => "previous",
            ReaderCommand::Play(Navigation::Current) => "replay",
            ReaderCommand::Delete => "delete",
            ReaderCommand::ChangeFolder => "change_folder",
            ReaderCommand::SubmitFolder { .. } => "submit_folder",
            ReaderCommand::SaveToFolder { .. } => "save_to_folder",
            ReaderCommand::RepeatMenu => "repeat_menu",
            ReaderCommand::PreviousMenu => "previous_menu",
        }
    }
}

enum ReaderEvent {
    Command(ReaderCommand),
    PromptFinished { prompt_id: u64, outcome: Result<bool> },
}

enum Wake {
    Event(Option<ReaderEvent>),
    Channel(Option<ChannelEvent>),
}

/// What happens when a prompt ends
enum PromptPurpose {
    Intro,
    Message(Option<Message>),
    Menu,
    FolderSelection,
    Goodbye,
}

struct ActivePrompt {
    id: u64,
    prompt: Arc<dyn Prompt>,
    purpose: PromptPurpose,
}

/// Caller-side handle to a running reader session
#[derive(Clone)]
pub struct ReaderHandle {
    session_id: String,
    events: mpsc::UnboundedSender<ReaderEvent>,
    status: watch::Receiver<ReaderStatus>,
}

impl ReaderHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue a command. Returns `false` if the session has already ended.
    pub fn send(&self, command: ReaderCommand) -> bool {
        let name = command.name();
        if self.events.send(ReaderEvent::Command(command)).is_err() {
            debug!("Reader {} has ended, dropping {}", self.session_id, name);
            return false;
        }
        true
    }

    pub fn first(&self) {
        self.send(ReaderCommand::Play(Navigation::First));
    }

    pub fn next(&self) {
        self.send(ReaderCommand::Play(Navigation::Next));
    }

    pub fn previous(&self) {
        self.send(ReaderCommand::Play(Navigation::Previous));
    }

    pub fn replay(&self) {
        self.send(ReaderCommand::Play(Navigation::Current));
    }

    pub fn delete(&self) {
        self.send(ReaderCommand::Delete);
    }

    pub fn change_folder(&self) {
        self.send(ReaderCommand::ChangeFolder);
    }

    pub fn save_to_folder(&self, selector: &str) {
        self.send(ReaderCommand::SaveToFolder {
            selector: selector.to_string(),
        });
    }

    pub fn repeat_menu(&self) {
        self.send(ReaderCommand::RepeatMenu);
    }

    pub fn previous_menu(&self) {
        self.send(ReaderCommand::PreviousMenu);
    }

    /// Choose a folder while the folder menu is active
    ///
    /// Resolves with the new folder once it has been loaded.
    pub async fn submit_folder(&self, selector: &str) -> Result<Folder, SessionError> {
        let (reply, response) = oneshot::channel();
        let sent = self.send(ReaderCommand::SubmitFolder {
            selector: selector.to_string(),
            reply,
        });
        if !sent {
            return Err(SessionError::Ended);
        }
        response.await.unwrap_or(Err(SessionError::Ended))
    }

    pub fn status(&self) -> ReaderStatus {
        self.status.borrow().clone()
    }

    pub fn current_folder(&self) -> Option<Folder> {
        self.status.borrow().folder.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReaderStatus> {
        self.status.clone()
    }

    /// Wait until the published status satisfies `predicate`
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&ReaderStatus) -> bool,
    ) -> Result<ReaderStatus, SessionError> {
        let mut status = self.status.clone();
        let matched = status
            .wait_for(predicate)
            .await
            .map_err(|_| SessionError::Ended)?;
        Ok(matched.clone())
    }
}

/// Interactive browsing of a mailbox over a call
pub struct ReaderSession;

impl ReaderSession {
    /// Start a reader for the call in `ctx` on the current tokio runtime
    pub fn spawn(ctx: SessionContext) -> ReaderHandle {
        let (events, inbox) = mpsc::unbounded_channel();
        let listener = ChannelListener::attach(ctx.channel.as_ref());
        let session_id = ctx.session_id().to_string();

        let machine = ReaderMachine::new(ctx, events.clone(), listener);
        let status = machine.status.subscribe();
        tokio::spawn(machine.run(inbox));

        ReaderHandle {
            session_id,
            events,
            status,
        }
    }
}

struct ReaderMachine {
    ctx: SessionContext,
    state: ReaderState,
    folders: Vec<Folder>,
    collection: Option<MessageCollection>,
    deferred: DeferredQueue<ReaderState, ReaderCommand>,
    prompt: Option<ActivePrompt>,
    prompt_seq: u64,
    last_played: Option<String>,
    events: mpsc::UnboundedSender<ReaderEvent>,
    listener: ChannelListener,
    status: watch::Sender<ReaderStatus>,
}

impl ReaderMachine {
    fn new(
        ctx: SessionContext,
        events: mpsc::UnboundedSender<ReaderEvent>,
        listener: ChannelListener,
    ) -> Self {
        let (status, _) = watch::channel(ReaderStatus {
            session_id: ctx.session_id().to_string(),
            mailbox: ctx.mailbox().to_string(),
            state: ReaderState::Init,
            folder: None,
            message_count: 0,
            unread_count: 0,
            cursor: 0,
            cursor_live: false,
            menu: Vec::new(),
            last_played: None,
            deferred: 0,
        });

        Self {
            ctx,
            state: ReaderState::Init,
            folders: Vec::new(),
            collection: None,
            deferred: DeferredQueue::new(),
            prompt: None,
            prompt_seq: 0,
            last_played: None,
            events,
            listener,
            status,
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<ReaderEvent>) {
        info!(
            "Reader session {} started for mailbox {}",
            self.ctx.session_id(),
            self.ctx.mailbox()
        );

        self.initialize().await;
        self.drain_deferred().await;
        self.publish();

        while self.state != ReaderState::Done {
            let wake = tokio::select! {
                event = inbox.recv() => Wake::Event(event),
                signal = self.listener.next() => Wake::Channel(signal),
            };

            match wake {
                Wake::Event(Some(event)) => self.handle_event(event).await,
                Wake::Event(None) => break,
                Wake::Channel(signal) => self.handle_channel_event(signal),
            }

            self.drain_deferred().await;
            self.publish();
        }

        info!("Reader session {} finished", self.ctx.session_id());
    }

    async fn initialize(&mut self) {
        match self.load_default_folder().await {
            Ok(()) => self.enter_intro(true),
            Err(err) => {
                self.fail(err.context("Failed to initialize reader session"))
                    .await
            }
        }
    }

    async fn load_default_folder(&mut self) -> Result<()> {
        let storage = Arc::clone(&self.ctx.services.storage);
        let folders = storage
            .all_folders()
            .await
            .context("Failed to load folders")?;
        let default = folders
            .first()
            .cloned()
            .context("Mailbox has no folders")?;

        let mut collection = MessageCollection::new(storage, self.ctx.mailbox(), default);
        collection.load().await?;

        self.folders = folders;
        self.collection = Some(collection);
        Ok(())
    }

    async fn drain_deferred(&mut self) {
        while let Some(command) = self.deferred.pop(self.state) {
            debug!("Replaying deferred {} in {:?}", command.name(), self.state);
            self.dispatch(command).await;
        }
    }

    async fn handle_event(&mut self, event: ReaderEvent) {
        match event {
            ReaderEvent::Command(command) => self.dispatch(command).await,
            ReaderEvent::PromptFinished { prompt_id, outcome } => {
                let active = match self.prompt.take() {
                    Some(active) if active.id == prompt_id => active,
                    other => {
                        self.prompt = other;
                        debug!("Ignoring completion of superseded prompt {}", prompt_id);
                        return;
                    }
                };

                match outcome {
                    Ok(completed) => self.prompt_finished(active.purpose, completed).await,
                    Err(err) => self.fail(err.context("Prompt playback failed")).await,
                }
            }
        }
    }

    fn handle_channel_event(&mut self, signal: Option<ChannelEvent>) {
        match signal {
            Some(ChannelEvent::Hangup) => {
                info!(
                    "Caller hung up reader {} during {:?}",
                    self.ctx.session_id(),
                    self.state
                );
                self.finish();
            }
            Some(ChannelEvent::RecordingFinished { recording, .. }) => {
                debug!("Reader ignoring recording {} finishing", recording);
            }
            None => {
                warn!("Channel for reader {} went away", self.ctx.session_id());
                self.finish();
            }
        }
    }

    async fn dispatch(&mut self, command: ReaderCommand) {
        if self.saying_goodbye() {
            debug!("Ignoring {} while hanging up", command.name());
            return;
        }

        match self.state {
            ReaderState::Init | ReaderState::LoadingFolder => {
                self.deferred.defer(ReaderState::Intro, command);
            }
            ReaderState::Intro | ReaderState::Fetching | ReaderState::Processing => {
                self.interrupt_prompt();
                self.deferred.defer(ReaderState::Ready, command);
            }
            ReaderState::Ready => self.handle_ready(command).await,
            ReaderState::ChangingFolder => self.handle_changing_folder(command).await,
            ReaderState::Done => {
                debug!("Reader {} has ended, ignoring {}", self.ctx.session_id(), command.name());
            }
        }
    }

    async fn handle_ready(&mut self, command: ReaderCommand) {
        match command {
            ReaderCommand::Play(navigation) => {
                self.cancel_prompt();
                self.play(navigation).await;
            }
            ReaderCommand::Delete => {
                self.cancel_prompt();
                self.delete_current().await;
            }
            ReaderCommand::ChangeFolder => {
                self.cancel_prompt();
                self.transition(ReaderState::ChangingFolder);
                self.play_folder_selection(Vec::new());
            }
            ReaderCommand::SubmitFolder { reply, .. } => {
                let _ = reply.send(Err(SessionError::NotAvailable("folder selection")));
            }
            ReaderCommand::SaveToFolder { selector } => {
                self.cancel_prompt();
                self.save_to_folder(&selector).await;
            }
            ReaderCommand::RepeatMenu => {
                self.cancel_prompt();
                self.enter_intro(false);
            }
            ReaderCommand::PreviousMenu => {
                self.cancel_prompt();
                let goodbye = self.ctx.services.prompts.get("goodbye");
                self.start_prompt(goodbye, Replacements::new(), PromptPurpose::Goodbye);
            }
        }
    }

    async fn handle_changing_folder(&mut self, command: ReaderCommand) {
        match command {
            ReaderCommand::SubmitFolder { selector, reply } => {
                self.cancel_prompt();
                self.submit_folder(selector, reply).await;
            }
            ReaderCommand::RepeatMenu => {
                self.cancel_prompt();
                self.play_folder_selection(Vec::new());
            }
            ReaderCommand::PreviousMenu => {
                self.cancel_prompt();
                self.enter_intro(false);
            }
            other => debug!("Ignoring {} while choosing a folder", other.name()),
        }
    }

    async fn play(&mut self, navigation: Navigation) {
        self.transition(ReaderState::Fetching);

        let Some(collection) = self.collection.as_mut() else {
            return self.fail(anyhow!("no folder loaded")).await;
        };
        let resolved = match collection.navigate(navigation).await {
            Ok(resolved) => resolved,
            Err(err) => return self.fail(err).await,
        };

        let (keys, replacements) = self.message_prompt(resolved.as_ref());
        if let Some(message) = &resolved {
            debug!("Playing message {}", message.id);
            self.last_played = Some(message.id.clone());
        }
        self.start_prompt(keys, replacements, PromptPurpose::Message(resolved));
    }

    /// Positional wording plus the recording itself, or "no more messages"
    fn message_prompt(&self, message: Option<&Message>) -> (Vec<String>, Replacements) {
        let prompts = &self.ctx.services.prompts;
        let (Some(message), Some(collection)) = (message, self.collection.as_ref()) else {
            return (prompts.get("message_none"), Replacements::new());
        };

        let position = collection.cursor();
        let mut keys = if position == 0 {
            prompts.get("message_first")
        } else if position + 1 == collection.len() {
            prompts.get("message_last")
        } else {
            prompts.get("message_number")
        };
        keys.extend(prompts.get("message_received"));
        keys.push(message.audio_ref.clone());

        let replacements = Replacements::from([
            ("number".to_string(), (position + 1).to_string()),
            (
                "received".to_string(),
                message.timestamp.format("%Y-%m-%d %H:%M").to_string(),
            ),
        ]);
        (keys, replacements)
    }

    async fn prompt_finished(&mut self, purpose: PromptPurpose, completed: bool) {
        match purpose {
            PromptPurpose::Intro | PromptPurpose::Menu => self.transition(ReaderState::Ready),
            PromptPurpose::FolderSelection => {}
            PromptPurpose::Goodbye => {
                if let Err(err) = self.ctx.channel.hangup().await {
                    warn!("Failed to hang up {}: {:#}", self.ctx.channel.id(), err);
                }
                self.finish();
            }
            PromptPurpose::Message(resolved) => {
                if !completed {
                    debug!("Playback interrupted, leaving read state untouched");
                    self.transition(ReaderState::Ready);
                    return;
                }
                if let Some(message) = resolved {
                    if !self.mark_read(&message).await {
                        return;
                    }
                }
                self.enter_processing(Vec::new());
            }
        }
    }

    /// Returns `false` if the session failed
    async fn mark_read(&mut self, message: &Message) -> bool {
        let Some(collection) = self.collection.as_mut() else {
            return true;
        };

        match collection.mark_as_read(message).await {
            Ok(true) => {
                if let Err(err) = self
                    .ctx
                    .services
                    .notifier
                    .message_read(self.ctx.mailbox(), message)
                    .await
                {
                    warn!("Failed to notify read of {}: {:#}", message.id, err);
                }
                true
            }
            Ok(false) => true,
            Err(err) => {
                self.fail(err).await;
                false
            }
        }
    }

    /// Delete the message under the cursor. Cleanup is best-effort: another
    /// session may already have removed it.
    async fn delete_current(&mut self) {
        let Some(collection) = self.collection.as_mut() else {
            return self.enter_processing(Vec::new());
        };
        let Some(message) = collection.current_message().cloned() else {
            debug!("Nothing selected to delete");
            return self.enter_processing(Vec::new());
        };

        match collection.delete(&message).await {
            Ok(Some(_)) => info!("Deleted message {} from {}", message.id, self.ctx.mailbox()),
            Ok(None) => info!("Message {} was already deleted", message.id),
            Err(err) => warn!("Failed to delete message {}: {:#}", message.id, err),
        }

        if let Err(err) = self.ctx.channel.delete_stored_audio(&message.audio_ref).await {
            warn!("Failed to delete audio {}: {:#}", message.audio_ref, err);
        }
        if let Err(err) = self
            .ctx
            .services
            .notifier
            .message_deleted(self.ctx.mailbox(), &message)
            .await
        {
            warn!("Failed to notify deletion of {}: {:#}", message.id, err);
        }

        let confirmation = self.ctx.services.prompts.get("message_deleted");
        self.enter_processing(confirmation);
    }

    async fn save_to_folder(&mut self, selector: &str) {
        let prompts = Arc::clone(&self.ctx.services.prompts);
        let Some(folder) = self.find_folder(selector) else {
            info!("No folder for selector {:?}", selector);
            return self.enter_processing(prompts.get("folder_invalid"));
        };
        let Some(collection) = self.collection.as_mut() else {
            return self.enter_processing(Vec::new());
        };
        let Some(message) = collection.current_message().cloned() else {
            debug!("Nothing selected to re-file");
            return self.enter_processing(Vec::new());
        };
        if collection.folder().id == folder.id {
            return self.enter_processing(prompts.get("message_saved"));
        }

        match collection.move_to_folder(&message, &folder).await {
            Ok(_) => {
                info!("Moved message {} to {}", message.id, folder.name);
                self.enter_processing(prompts.get("message_saved"));
            }
            Err(err) => self.fail(err).await,
        }
    }

    async fn submit_folder(
        &mut self,
        selector: String,
        reply: oneshot::Sender<Result<Folder, SessionError>>,
    ) {
        let Some(folder) = self.find_folder(&selector) else {
            info!("No folder for selector {:?}", selector);
            let invalid = self.ctx.services.prompts.get("folder_invalid");
            self.play_folder_selection(invalid);
            let _ = reply.send(Err(SessionError::UnknownFolder(selector)));
            return;
        };

        self.transition(ReaderState::LoadingFolder);
        let mut collection = MessageCollection::new(
            Arc::clone(&self.ctx.services.storage),
            self.ctx.mailbox(),
            folder.clone(),
        );

        match collection.load().await {
            Ok(count) => {
                info!(
                    "Reader {} switched to {} ({} messages)",
                    self.ctx.session_id(),
                    folder.name,
                    count
                );
                self.collection = Some(collection);
                let _ = reply.send(Ok(folder));
                self.enter_intro(true);
            }
            Err(err) => {
                warn!("Failed to load folder {}: {:#}", folder.name, err);
                self.transition(ReaderState::ChangingFolder);
                let _ = reply.send(Err(SessionError::Failed(err)));
            }
        }
    }

    fn find_folder(&self, selector: &str) -> Option<Folder> {
        self.folders.iter().find(|f| f.selector == selector).cloned()
    }

    fn enter_intro(&mut self, summary: bool) {
        self.transition(ReaderState::Intro);

        let mut keys = Vec::new();
        let mut replacements = Replacements::new();
        if let (true, Some(collection)) = (summary, self.collection.as_ref()) {
            let prompts = &self.ctx.services.prompts;
            if collection.is_empty() {
                keys.extend(prompts.get("intro_empty"));
            } else {
                keys.extend(prompts.get("intro_summary"));
            }
            replacements.insert("unread".to_string(), collection.unread_count().to_string());
            replacements.insert("read".to_string(), collection.read_count().to_string());
            replacements.insert("folder".to_string(), collection.folder().display_key.clone());
        }
        keys.extend(self.menu_keys());

        self.start_prompt(keys, replacements, PromptPurpose::Intro);
    }

    fn enter_processing(&mut self, lead_in: Vec<String>) {
        self.transition(ReaderState::Processing);
        let mut keys = lead_in;
        keys.extend(self.menu_keys());
        self.start_prompt(keys, Replacements::new(), PromptPurpose::Menu);
    }

    fn play_folder_selection(&mut self, lead_in: Vec<String>) {
        let mut keys = lead_in;
        keys.extend(self.ctx.services.prompts.folder_selection(&self.folders));
        self.start_prompt(keys, Replacements::new(), PromptPurpose::FolderSelection);
    }

    fn menu_keys(&self) -> Vec<String> {
        let actions = self
            .collection
            .as_ref()
            .map(|c| c.calculate_menu())
            .unwrap_or_default();
        self.ctx.services.prompts.menu(&actions)
    }

    /// Start playing, replacing any prompt in flight
    fn start_prompt(&mut self, keys: Vec<String>, replacements: Replacements, purpose: PromptPurpose) {
        self.cancel_prompt();
        self.prompt_seq += 1;
        let prompt_id = self.prompt_seq;

        let prompt = self
            .ctx
            .services
            .player
            .create(keys, self.ctx.channel.id(), replacements);
        let playing = Arc::clone(&prompt);
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = playing.play().await;
            let _ = events.send(ReaderEvent::PromptFinished { prompt_id, outcome });
        });

        self.prompt = Some(ActivePrompt {
            id: prompt_id,
            prompt,
            purpose,
        });
    }

    /// Stop the active prompt but still act on its completion
    fn interrupt_prompt(&self) {
        if let Some(active) = &self.prompt {
            active.prompt.stop();
        }
    }

    /// Stop the active prompt and forget it
    fn cancel_prompt(&mut self) {
        if let Some(active) = self.prompt.take() {
            active.prompt.stop();
        }
    }

    fn saying_goodbye(&self) -> bool {
        matches!(
            self.prompt,
            Some(ActivePrompt {
                purpose: PromptPurpose::Goodbye,
                ..
            })
        )
    }

    fn transition(&mut self, next: ReaderState) {
        if self.state != next {
            debug!(
                "Reader {}: {:?} -> {:?}",
                self.ctx.session_id(),
                self.state,
                next
            );
            self.state = next;
        }
    }

    /// Fatal error: hang up and end the session
    async fn fail(&mut self, err: anyhow::Error) {
        error!(
            "Reader session {} failed in {:?}: {:#}",
            self.ctx.session_id(),
            self.state,
            err
        );
        if let Err(err) = self.ctx.channel.hangup().await {
            warn!("Failed to hang up {}: {:#}", self.ctx.channel.id(), err);
        }
        self.finish();
    }

    fn finish(&mut self) {
        if self.state == ReaderState::Done {
            return;
        }

        self.cancel_prompt();
        let discarded = self.deferred.clear();
        if !discarded.is_empty() {
            debug!("Discarding {} deferred commands", discarded.len());
        }
        for command in discarded {
            if let ReaderCommand::SubmitFolder { reply, .. } = command {
                let _ = reply.send(Err(SessionError::Ended));
            }
        }
        if self.listener.release() {
            debug!("Released hangup listener for {}", self.ctx.session_id());
        }
        self.transition(ReaderState::Done);
    }

    fn publish(&self) {
        let collection = self.collection.as_ref();
        self.status.send_replace(ReaderStatus {
            session_id: self.ctx.session_id().to_string(),
            mailbox: self.ctx.mailbox().to_string(),
            state: self.state,
            folder: collection.map(|c| c.folder().clone()),
            message_count: collection.map_or(0, |c| c.len()),
            unread_count: collection.map_or(0, |c| c.unread_count()),
            cursor: collection.map_or(0, |c| c.cursor()),
            cursor_live: collection.is_some_and(|c| c.is_cursor_live()),
            menu: collection.map(|c| c.calculate_menu()).unwrap_or_default(),
            last_played: self.last_played.clone(),
            deferred: self.deferred.len(),
        });
    }
}
