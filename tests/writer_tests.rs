// Integration tests for the writer session
//
// A writer plays the greeting, records over a simulated call and commits
// the capture as a new message in the default folder.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use voicemail_session::config::RecordingFormat;
use voicemail_session::services::{
    MemoryNotifier, MemoryStore, NotificationKind, PlaybackMode, SimulatedChannel, SimulatedPlayer,
};
use voicemail_session::{
    PromptSet, SessionConfig, SessionContext, SessionError, SessionServices, WriterHandle,
    WriterSession, WriterState, WriterStatus,
};

const MAILBOX: &str = "100";

struct Harness {
    store: Arc<MemoryStore>,
    player: Arc<SimulatedPlayer>,
    notifier: Arc<MemoryNotifier>,
    channel: SimulatedChannel,
}

impl Harness {
    fn new(mode: PlaybackMode) -> Self {
        Self {
            store: Arc::new(MemoryStore::with_default_folders()),
            player: Arc::new(SimulatedPlayer::new(mode)),
            notifier: Arc::new(MemoryNotifier::new()),
            channel: SimulatedChannel::with_recording_duration(
                "channel-test",
                Duration::from_secs(5),
            ),
        }
    }

    fn spawn(&self) -> WriterHandle {
        self.spawn_with(RecordingFormat::default())
    }

    fn spawn_with(&self, recording: RecordingFormat) -> WriterHandle {
        let services = SessionServices {
            storage: self.store.clone(),
            player: self.player.clone(),
            notifier: self.notifier.clone(),
            prompts: Arc::new(PromptSet::default()),
        };
        let config = SessionConfig {
            recording,
            ..SessionConfig::new(MAILBOX)
        };
        WriterSession::spawn(SessionContext::new(
            config,
            services,
            Arc::new(self.channel.clone()),
        ))
    }
}

async fn within<T>(future: impl Future<Output = T>) -> Result<T> {
    Ok(tokio::time::timeout(Duration::from_secs(2), future).await?)
}

async fn wait_for(
    handle: &WriterHandle,
    predicate: impl FnMut(&WriterStatus) -> bool,
) -> Result<WriterStatus> {
    Ok(within(handle.wait_until(predicate)).await??)
}

#[tokio::test]
async fn test_record_stop_save() -> Result<()> {
    let harness = Harness::new(PlaybackMode::Immediate);
    let handle = harness.spawn();

    within(handle.record()).await??;
    wait_for(&handle, |s| s.state == WriterState::Recording).await?;
    assert!(harness.channel.is_recording());
    assert_eq!(harness.player.history()[0], vec!["vm-intro", "beep"]);

    handle.stop();
    let status = wait_for(&handle, |s| s.state == WriterState::RecordingFinished).await?;
    assert_eq!(status.duration_secs, Some(5.0));

    let message = within(handle.save()).await??;
    assert_eq!(message.mailbox, MAILBOX);
    assert_eq!(message.folder_id, "inbox");
    assert_eq!(message.duration, Duration::from_secs(5));
    assert!(!message.read);
    assert!(message.audio_ref.ends_with(".wav"));

    let status = wait_for(&handle, |s| s.state == WriterState::Done).await?;
    assert_eq!(status.saved_message, Some(message.clone()));
    assert!(status.error.is_none());
    assert_eq!(harness.store.messages(MAILBOX, "inbox").await, vec![message]);
    assert_eq!(harness.notifier.count(NotificationKind::NewMessage), 1);
    assert_eq!(harness.channel.listener_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_greeting_without_beep() -> Result<()> {
    let harness = Harness::new(PlaybackMode::Immediate);
    let handle = harness.spawn_with(RecordingFormat {
        format: "gsm".to_string(),
        max_duration_secs: 60,
        beep: false,
    });

    within(handle.record()).await??;

    assert_eq!(harness.player.history()[0], vec!["vm-intro"]);
    assert!(!harness.player.played_key("beep"));

    handle.stop();
    let message = within(handle.save()).await??;
    assert!(message.audio_ref.ends_with(".gsm"));

    Ok(())
}

#[tokio::test]
async fn test_stop_during_greeting_starts_recording() -> Result<()> {
    let harness = Harness::new(PlaybackMode::Hold);
    let handle = harness.spawn();

    let recorder = handle.clone();
    let recording = tokio::spawn(async move { recorder.record().await });
    wait_for(&handle, |s| s.prompt_playing).await?;
    assert!(!harness.channel.is_recording());

    handle.stop();
    within(recording).await???;

    let status = wait_for(&handle, |s| s.state == WriterState::Recording).await?;
    assert!(!status.prompt_playing);
    assert!(status.recording_id.is_some());
    assert_eq!(harness.channel.recordings_started(), 1);

    Ok(())
}

#[tokio::test]
async fn test_save_while_recording_waits_for_finish() -> Result<()> {
    let harness = Harness::new(PlaybackMode::Immediate);
    let handle = harness.spawn();
    within(handle.record()).await??;

    let saver = handle.clone();
    let saving = tokio::spawn(async move { saver.save().await });
    wait_for(&handle, |s| s.deferred == 1).await?;

    handle.stop();
    let message = within(saving).await???;

    assert_eq!(harness.store.get(&message.id).await, Some(message));

    Ok(())
}

#[tokio::test]
async fn test_save_before_recording() -> Result<()> {
    let harness = Harness::new(PlaybackMode::Immediate);
    let handle = harness.spawn();

    let result = within(handle.save()).await?;
    assert!(matches!(result, Err(SessionError::NothingRecorded)));

    // The session carries on
    within(handle.record()).await??;
    assert!(harness.channel.is_recording());

    Ok(())
}

#[tokio::test]
async fn test_record_twice() -> Result<()> {
    let harness = Harness::new(PlaybackMode::Immediate);
    let handle = harness.spawn();

    within(handle.record()).await??;
    let result = within(handle.record()).await?;

    assert!(matches!(result, Err(SessionError::AlreadyRecording)));
    assert_eq!(harness.channel.recordings_started(), 1);

    Ok(())
}

#[tokio::test]
async fn test_hangup_during_greeting_saves_nothing() -> Result<()> {
    let harness = Harness::new(PlaybackMode::Hold);
    let handle = harness.spawn();

    let recorder = handle.clone();
    let recording = tokio::spawn(async move { recorder.record().await });
    wait_for(&handle, |s| s.prompt_playing).await?;

    harness.channel.caller_hangup();
    let result = within(recording).await??;
    assert!(matches!(result, Err(SessionError::Ended)));

    let status = wait_for(&handle, |s| s.state == WriterState::Done).await?;
    assert!(status.saved_message.is_none());
    assert_eq!(harness.channel.recordings_started(), 0);
    assert!(harness.store.messages(MAILBOX, "inbox").await.is_empty());
    assert_eq!(harness.channel.listener_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_hangup_during_recording_keeps_message() -> Result<()> {
    let harness = Harness::new(PlaybackMode::Immediate);
    let handle = harness.spawn();
    within(handle.record()).await??;

    harness.channel.caller_hangup();
    let status = wait_for(&handle, |s| s.state == WriterState::Done).await?;

    let saved = status.saved_message.clone();
    assert!(saved.is_some());
    assert_eq!(harness.store.messages(MAILBOX, "inbox").await.len(), 1);
    assert_eq!(harness.notifier.count(NotificationKind::NewMessage), 1);
    assert_eq!(status.duration_secs, Some(5.0));

    Ok(())
}

#[tokio::test]
async fn test_hangup_after_recording_finished_keeps_message() -> Result<()> {
    let harness = Harness::new(PlaybackMode::Immediate);
    let handle = harness.spawn();
    within(handle.record()).await??;

    handle.stop();
    wait_for(&handle, |s| s.state == WriterState::RecordingFinished).await?;

    harness.channel.caller_hangup();
    let status = wait_for(&handle, |s| s.state == WriterState::Done).await?;

    assert!(status.saved_message.is_some());
    assert_eq!(harness.store.messages(MAILBOX, "inbox").await.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_recording_start_failure() -> Result<()> {
    let harness = Harness::new(PlaybackMode::Immediate);
    harness.channel.set_recording_fails(true);
    let handle = harness.spawn();

    let result = within(handle.record()).await?;
    assert!(matches!(result, Err(SessionError::Failed(_))));

    let status = wait_for(&handle, |s| s.state == WriterState::Done).await?;
    assert!(status
        .error
        .as_deref()
        .is_some_and(|e| e.contains("Failed to start recording")));
    assert!(harness.channel.is_hung_up());

    Ok(())
}

#[tokio::test]
async fn test_save_failure_reports_error() -> Result<()> {
    let harness = Harness::new(PlaybackMode::Immediate);
    let handle = harness.spawn();
    within(handle.record()).await??;

    handle.stop();
    wait_for(&handle, |s| s.state == WriterState::RecordingFinished).await?;

    harness.store.set_failing(true).await;
    let result = within(handle.save()).await?;
    assert!(matches!(result, Err(SessionError::Failed(_))));

    let status = wait_for(&handle, |s| s.state == WriterState::Done).await?;
    assert!(status.error.is_some());
    assert!(status.saved_message.is_none());
    assert_eq!(harness.notifier.count(NotificationKind::NewMessage), 0);

    Ok(())
}

#[tokio::test]
async fn test_save_then_hangup_while_recording_returns_message() -> Result<()> {
    let harness = Harness::new(PlaybackMode::Immediate);
    let handle = harness.spawn();
    within(handle.record()).await??;

    let saver = handle.clone();
    let saving = tokio::spawn(async move { saver.save().await });
    wait_for(&handle, |s| s.deferred == 1).await?;

    harness.channel.caller_hangup();
    let message = within(saving).await???;

    let stored = harness.store.messages(MAILBOX, "inbox").await;
    assert_eq!(stored, vec![message.clone()]);
    let status = wait_for(&handle, |s| s.state == WriterState::Done).await?;
    assert_eq!(status.saved_message, Some(message));
    assert_eq!(harness.notifier.count(NotificationKind::NewMessage), 1);

    Ok(())
}

#[tokio::test]
async fn test_save_then_hangup_with_failing_store_reports_failure() -> Result<()> {
    let harness = Harness::new(PlaybackMode::Immediate);
    let handle = harness.spawn();
    within(handle.record()).await??;

    let saver = handle.clone();
    let saving = tokio::spawn(async move { saver.save().await });
    wait_for(&handle, |s| s.deferred == 1).await?;

    harness.store.set_failing(true).await;
    harness.channel.caller_hangup();
    let result = within(saving).await??;
    assert!(matches!(result, Err(SessionError::Failed(_))));

    let status = wait_for(&handle, |s| s.state == WriterState::Done).await?;
    assert!(status.error.is_some());
    assert!(status.saved_message.is_none());

    Ok(())
}
