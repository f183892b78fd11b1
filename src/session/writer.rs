use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::config::SessionContext;
use super::deferred::DeferredQueue;
use super::listener::ChannelListener;
use super::stats::{WriterState, WriterStatus};
use crate::error::SessionError;
use crate::mailbox::{Folder, Message, NewMessage};
use crate::services::{ChannelEvent, Prompt, RecordingHandle, Replacements};

/// Commands accepted by a writer session
#[derive(Debug)]
pub enum WriterCommand {
    /// Play the greeting, then start capturing
    Record {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Skip the greeting, or end the capture
    Stop,
    /// Commit the finished recording as a new message
    Save {
        reply: oneshot::Sender<Result<Message, SessionError>>,
    },
}

impl WriterCommand {
    pub fn name(&self) -> &'static str {
        match self {
            WriterCommand::Record { .. } => "record",
            WriterCommand::Stop => "stop",
            WriterCommand::Save { .. } => "save",
        }
    }
}

enum WriterEvent {
    Command(WriterCommand),
    PromptFinished { prompt_id: u64, outcome: Result<bool> },
}

enum Wake {
    Event(Option<WriterEvent>),
    Channel(Option<ChannelEvent>),
}

/// Caller-side handle to a running writer session
#[derive(Clone)]
pub struct WriterHandle {
    session_id: String,
    events: mpsc::UnboundedSender<WriterEvent>,
    status: watch::Receiver<WriterStatus>,
}

impl WriterHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn send(&self, command: WriterCommand) -> bool {
        let name = command.name();
        if self.events.send(WriterEvent::Command(command)).is_err() {
            debug!("Writer {} has ended, dropping {}", self.session_id, name);
            return false;
        }
        true
    }

    /// Play the greeting and start recording
    ///
    /// Resolves once audio capture has begun.
    pub async fn record(&self) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        if !self.send(WriterCommand::Record { reply }) {
            return Err(SessionError::Ended);
        }
        response.await.unwrap_or(Err(SessionError::Ended))
    }

    pub fn stop(&self) {
        self.send(WriterCommand::Stop);
    }

    /// Commit the recording once it has finished
    pub async fn save(&self) -> Result<Message, SessionError> {
        let (reply, response) = oneshot::channel();
        if !self.send(WriterCommand::Save { reply }) {
            return Err(SessionError::Ended);
        }
        response.await.unwrap_or(Err(SessionError::Ended))
    }

    pub fn status(&self) -> WriterStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WriterStatus> {
        self.status.clone()
    }

    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&WriterStatus) -> bool,
    ) -> Result<WriterStatus, SessionError> {
        let mut status = self.status.clone();
        let matched = status
            .wait_for(predicate)
            .await
            .map_err(|_| SessionError::Ended)?;
        Ok(matched.clone())
    }
}

/// Records and commits a new message over a call
pub struct WriterSession;

impl WriterSession {
    pub fn spawn(ctx: SessionContext) -> WriterHandle {
        let (events, inbox) = mpsc::unbounded_channel();
        let listener = ChannelListener::attach(ctx.channel.as_ref());
        let session_id = ctx.session_id().to_string();

        let machine = WriterMachine::new(ctx, events.clone(), listener);
        let status = machine.status.subscribe();
        tokio::spawn(machine.run(inbox));

        WriterHandle {
            session_id,
            events,
            status,
        }
    }
}

struct WriterMachine {
    ctx: SessionContext,
    state: WriterState,
    folder: Option<Folder>,
    deferred: DeferredQueue<WriterState, WriterCommand>,
    prompt: Option<(u64, Arc<dyn Prompt>)>,
    prompt_seq: u64,
    recording: Option<Box<dyn RecordingHandle>>,
    duration: Option<Duration>,

    /// Caller waiting for capture to begin
    pending_record: Option<oneshot::Sender<Result<(), SessionError>>>,

    /// Caller hung up mid-capture; commit as soon as the capture ends
    hangup_pending: bool,

    saved: Option<Message>,
    error: Option<String>,
    events: mpsc::UnboundedSender<WriterEvent>,
    listener: ChannelListener,
    status: watch::Sender<WriterStatus>,
}

impl WriterMachine {
    fn new(
        ctx: SessionContext,
        events: mpsc::UnboundedSender<WriterEvent>,
        listener: ChannelListener,
    ) -> Self {
        let (status, _) = watch::channel(WriterStatus {
            session_id: ctx.session_id().to_string(),
            mailbox: ctx.mailbox().to_string(),
            state: WriterState::Init,
            prompt_playing: false,
            recording_id: None,
            duration_secs: None,
            saved_message: None,
            error: None,
            deferred: 0,
        });

        Self {
            ctx,
            state: WriterState::Init,
            folder: None,
            deferred: DeferredQueue::new(),
            prompt: None,
            prompt_seq: 0,
            recording: None,
            duration: None,
            pending_record: None,
            hangup_pending: false,
            saved: None,
            error: None,
            events,
            listener,
            status,
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<WriterEvent>) {
        info!(
            "Writer session {} started for mailbox {}",
            self.ctx.session_id(),
            self.ctx.mailbox()
        );

        self.initialize().await;
        self.drain_deferred().await;
        self.publish();

        while self.state != WriterState::Done {
            let wake = tokio::select! {
                event = inbox.recv() => Wake::Event(event),
                signal = self.listener.next() => Wake::Channel(signal),
            };

            match wake {
                Wake::Event(Some(event)) => self.handle_event(event).await,
                Wake::Event(None) => break,
                Wake::Channel(signal) => self.handle_channel_event(signal).await,
            }

            self.drain_deferred().await;
            self.publish();
        }

        info!("Writer session {} finished", self.ctx.session_id());
    }

    async fn initialize(&mut self) {
        let folders = match self
            .ctx
            .services
            .storage
            .all_folders()
            .await
            .context("Failed to load folders")
        {
            Ok(folders) => folders,
            Err(err) => return self.fail(err).await,
        };

        let Some(folder) = folders.into_iter().next() else {
            return self.fail(anyhow!("mailbox has no folders")).await;
        };

        let format = &self.ctx.config.recording;
        info!(
            "Writer {} recording into {}/{} as {} (max {}s)",
            self.ctx.session_id(),
            self.ctx.mailbox(),
            folder.name,
            format.format,
            format.max_duration_secs
        );
        self.folder = Some(folder);
        self.transition(WriterState::Ready);
    }

    async fn drain_deferred(&mut self) {
        while let Some(command) = self.deferred.pop(self.state) {
            debug!("Replaying deferred {} in {:?}", command.name(), self.state);
            self.dispatch(command).await;
        }
    }

    async fn handle_event(&mut self, event: WriterEvent) {
        match event {
            WriterEvent::Command(command) => self.dispatch(command).await,
            WriterEvent::PromptFinished { prompt_id, outcome } => {
                if self.prompt.as_ref().map(|(id, _)| *id) != Some(prompt_id) {
                    debug!("Ignoring completion of superseded prompt {}", prompt_id);
                    return;
                }
                self.prompt = None;

                match outcome {
                    Ok(completed) => {
                        if !completed {
                            debug!("Greeting skipped");
                        }
                        self.begin_recording().await;
                    }
                    Err(err) => self.fail(err.context("Greeting playback failed")).await,
                }
            }
        }
    }

    async fn handle_channel_event(&mut self, signal: Option<ChannelEvent>) {
        match signal {
            Some(ChannelEvent::Hangup) => self.on_hangup().await,
            Some(ChannelEvent::RecordingFinished {
                recording,
                duration,
            }) => self.on_recording_finished(&recording, duration).await,
            None => {
                warn!("Channel for writer {} went away", self.ctx.session_id());
                self.on_hangup().await;
            }
        }
    }

    async fn dispatch(&mut self, command: WriterCommand) {
        match command {
            WriterCommand::Record { reply } => self.record(reply),
            WriterCommand::Stop => self.stop().await,
            WriterCommand::Save { reply } => match self.state {
                WriterState::Init => {
                    self.deferred
                        .defer(WriterState::Ready, WriterCommand::Save { reply });
                }
                WriterState::Ready if self.prompt.is_none() => {
                    let _ = reply.send(Err(SessionError::NothingRecorded));
                }
                WriterState::Ready
                | WriterState::StoppingPrompt
                | WriterState::Recording
                | WriterState::StoppingRecording => {
                    self.deferred.defer(
                        WriterState::RecordingFinished,
                        WriterCommand::Save { reply },
                    );
                }
                WriterState::RecordingFinished => self.save(Some(reply)).await,
                WriterState::SavingRecording => {
                    let _ = reply.send(Err(SessionError::NotAvailable("save")));
                }
                WriterState::Done => {
                    let _ = reply.send(Err(SessionError::Ended));
                }
            },
        }
    }

    fn record(&mut self, reply: oneshot::Sender<Result<(), SessionError>>) {
        match self.state {
            WriterState::Init => {
                self.deferred
                    .defer(WriterState::Ready, WriterCommand::Record { reply });
            }
            WriterState::Ready if self.prompt.is_none() && self.pending_record.is_none() => {
                self.pending_record = Some(reply);
                self.play_greeting();
            }
            WriterState::Done => {
                let _ = reply.send(Err(SessionError::Ended));
            }
            _ => {
                let _ = reply.send(Err(SessionError::AlreadyRecording));
            }
        }
    }

    async fn stop(&mut self) {
        match self.state {
            WriterState::Init => self.deferred.defer(WriterState::Ready, WriterCommand::Stop),
            WriterState::Ready => match &self.prompt {
                Some((_, prompt)) => {
                    prompt.stop();
                    self.transition(WriterState::StoppingPrompt);
                }
                None => debug!("Nothing to stop"),
            },
            WriterState::Recording => {
                self.transition(WriterState::StoppingRecording);
                let stopped = match &self.recording {
                    Some(recording) => recording.stop().await,
                    None => Err(anyhow!("no recording in progress")),
                };
                if let Err(err) = stopped {
                    self.fail(err.context("Failed to stop recording")).await;
                }
            }
            state => debug!("Ignoring stop in {:?}", state),
        }
    }

    fn play_greeting(&mut self) {
        let prompts = &self.ctx.services.prompts;
        let mut keys = prompts.get("writer_greeting");
        if self.ctx.config.recording.beep {
            keys.extend(prompts.get("writer_beep"));
        }

        self.prompt_seq += 1;
        let prompt_id = self.prompt_seq;
        let prompt = self
            .ctx
            .services
            .player
            .create(keys, self.ctx.channel.id(), Replacements::new());
        let playing = Arc::clone(&prompt);
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = playing.play().await;
            let _ = events.send(WriterEvent::PromptFinished { prompt_id, outcome });
        });
        self.prompt = Some((prompt_id, prompt));
    }

    async fn begin_recording(&mut self) {
        let started = self
            .ctx
            .channel
            .start_recording(&self.ctx.config.recording)
            .await;

        match started {
            Ok(recording) => {
                info!(
                    "Writer {} capturing into {}",
                    self.ctx.session_id(),
                    recording.audio_ref()
                );
                self.recording = Some(recording);
                self.transition(WriterState::Recording);
                if let Some(reply) = self.pending_record.take() {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(err) => self.fail(err.context("Failed to start recording")).await,
        }
    }

    async fn on_hangup(&mut self) {
        match self.state {
            WriterState::Recording | WriterState::StoppingRecording => {
                info!(
                    "Caller hung up writer {} mid-recording, waiting for capture to finish",
                    self.ctx.session_id()
                );
                self.hangup_pending = true;
            }
            WriterState::RecordingFinished => {
                info!("Caller hung up before saving, committing recording");
                self.hangup_pending = true;
                self.save(None).await;
            }
            WriterState::SavingRecording => self.hangup_pending = true,
            WriterState::Done => {}
            _ => {
                info!(
                    "Caller hung up writer {} during {:?}",
                    self.ctx.session_id(),
                    self.state
                );
                self.finish();
            }
        }
    }

    async fn on_recording_finished(&mut self, recording: &str, duration: Duration) {
        let ours = self.recording.as_ref().is_some_and(|r| r.id() == recording);
        let capturing = matches!(
            self.state,
            WriterState::Recording | WriterState::StoppingRecording
        );
        if !ours || !capturing {
            debug!("Ignoring finish of recording {}", recording);
            return;
        }

        info!(
            "Writer {} recorded {:.1}s",
            self.ctx.session_id(),
            duration.as_secs_f64()
        );
        self.duration = Some(duration);
        self.transition(WriterState::RecordingFinished);

        if self.hangup_pending {
            let reply = self.take_waiting_save();
            self.save(reply).await;
        }
    }

    /// A caller's `save` queued behind the capture, if any
    fn take_waiting_save(&mut self) -> Option<oneshot::Sender<Result<Message, SessionError>>> {
        match self.deferred.pop(WriterState::RecordingFinished)? {
            WriterCommand::Save { reply } => Some(reply),
            other => {
                self.deferred.defer(WriterState::RecordingFinished, other);
                None
            }
        }
    }

    /// Persist the finished recording. `reply` is the caller waiting on
    /// `save`, absent when committing after a hangup.
    async fn save(&mut self, reply: Option<oneshot::Sender<Result<Message, SessionError>>>) {
        self.transition(WriterState::SavingRecording);

        match self.commit().await {
            Ok(message) => {
                info!(
                    "Saved message {} ({:.1}s) to {}",
                    message.id,
                    message.duration.as_secs_f64(),
                    self.ctx.mailbox()
                );
                if let Err(err) = self
                    .ctx
                    .services
                    .notifier
                    .new_message(self.ctx.mailbox(), &message)
                    .await
                {
                    warn!("Failed to notify new message {}: {:#}", message.id, err);
                }
                self.saved = Some(message.clone());
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(message));
                }
                self.finish();
            }
            Err(err) => {
                let err = err.context("Failed to save recording");
                match reply {
                    Some(reply) => {
                        self.record_failure(&err);
                        let _ = reply.send(Err(SessionError::Failed(err)));
                        self.hang_up().await;
                        self.finish();
                    }
                    None => self.fail(err).await,
                }
            }
        }
    }

    async fn commit(&self) -> Result<Message> {
        let folder = self.folder.as_ref().context("no default folder")?;
        let recording = self.recording.as_ref().context("no recording")?;
        let duration = self.duration.context("recording has not finished")?;

        self.ctx
            .services
            .storage
            .create_message(
                self.ctx.mailbox(),
                folder,
                NewMessage {
                    audio_ref: recording.audio_ref().to_string(),
                    duration,
                },
            )
            .await
    }

    fn transition(&mut self, next: WriterState) {
        if self.state != next {
            debug!(
                "Writer {}: {:?} -> {:?}",
                self.ctx.session_id(),
                self.state,
                next
            );
            self.state = next;
        }
    }

    fn record_failure(&mut self, err: &anyhow::Error) {
        error!(
            "Writer session {} failed in {:?}: {:#}",
            self.ctx.session_id(),
            self.state,
            err
        );
        self.error = Some(format!("{:#}", err));
    }

    async fn hang_up(&self) {
        if let Err(err) = self.ctx.channel.hangup().await {
            warn!("Failed to hang up {}: {:#}", self.ctx.channel.id(), err);
        }
    }

    /// Fatal error: surface it to whoever is waiting, hang up, end
    async fn fail(&mut self, err: anyhow::Error) {
        self.record_failure(&err);
        if let Some(reply) = self.pending_record.take() {
            let _ = reply.send(Err(SessionError::Failed(err)));
        }
        self.hang_up().await;
        self.finish();
    }

    fn finish(&mut self) {
        if self.state == WriterState::Done {
            return;
        }

        if let Some((_, prompt)) = self.prompt.take() {
            prompt.stop();
        }
        let discarded = self.deferred.clear();
        if !discarded.is_empty() {
            debug!("Discarding {} deferred commands", discarded.len());
        }
        for command in discarded {
            self.answer_discarded(command);
        }
        if let Some(reply) = self.pending_record.take() {
            let _ = reply.send(Err(SessionError::Ended));
        }
        if self.listener.release() {
            debug!("Detached channel listeners for {}", self.ctx.session_id());
        }
        self.transition(WriterState::Done);
    }

    /// Callers still waiting when the session ends learn how it ended
    fn answer_discarded(&self, command: WriterCommand) {
        match command {
            WriterCommand::Record { reply } => {
                let _ = reply.send(Err(SessionError::Ended));
            }
            WriterCommand::Save { reply } => {
                let outcome = match (&self.saved, &self.error) {
                    (Some(message), _) => Ok(message.clone()),
                    (None, Some(error)) => Err(SessionError::Failed(anyhow!("{}", error))),
                    (None, None) => Err(SessionError::Ended),
                };
                let _ = reply.send(outcome);
            }
            WriterCommand::Stop => {}
        }
    }

    fn publish(&self) {
        self.status.send_replace(WriterStatus {
            session_id: self.ctx.session_id().to_string(),
            mailbox: self.ctx.mailbox().to_string(),
            state: self.state,
            prompt_playing: self.prompt.is_some(),
            recording_id: self.recording.as_ref().map(|r| r.id().to_string()),
            duration_secs: self.duration.map(|d| d.as_secs_f64()),
            saved_message: self.saved.clone(),
            error: self.error.clone(),
            deferred: self.deferred.len(),
        });
    }
}
