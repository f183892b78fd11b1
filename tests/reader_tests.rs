// Integration tests for the reader session
//
// Each test drives a reader over a simulated call and observes it through
// the published status, the prompts played, the store and the notifier.

use anyhow::Result;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use voicemail_session::services::{
    MemoryNotifier, MemoryStore, NotificationKind, PlaybackMode, SimulatedChannel, SimulatedPlayer,
};
use voicemail_session::{
    Message, PromptSet, ReaderHandle, ReaderSession, ReaderState, ReaderStatus, SessionConfig,
    SessionContext, SessionError, SessionServices,
};

const MAILBOX: &str = "100";

struct Harness {
    store: Arc<MemoryStore>,
    player: Arc<SimulatedPlayer>,
    notifier: Arc<MemoryNotifier>,
    channel: SimulatedChannel,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::with_default_folders()),
            player: Arc::new(SimulatedPlayer::new(PlaybackMode::Immediate)),
            notifier: Arc::new(MemoryNotifier::new()),
            channel: SimulatedChannel::new("channel-test"),
        }
    }

    /// Seed `count` unread messages into a folder, oldest first
    async fn seed(&self, folder_id: &str, count: i64) -> Vec<Message> {
        let now = Utc::now();
        let mut messages = Vec::new();
        for i in 0..count {
            let timestamp = now - chrono::Duration::minutes(60 - i);
            messages.push(self.store.add_message(MAILBOX, folder_id, timestamp, false).await);
        }
        messages
    }

    fn spawn(&self) -> ReaderHandle {
        let services = SessionServices {
            storage: self.store.clone(),
            player: self.player.clone(),
            notifier: self.notifier.clone(),
            prompts: Arc::new(PromptSet::default()),
        };
        ReaderSession::spawn(SessionContext::new(
            SessionConfig::new(MAILBOX),
            services,
            Arc::new(self.channel.clone()),
        ))
    }
}

async fn within<T>(future: impl Future<Output = T>) -> Result<T> {
    Ok(tokio::time::timeout(Duration::from_secs(2), future).await?)
}

async fn wait_for(
    handle: &ReaderHandle,
    predicate: impl FnMut(&ReaderStatus) -> bool,
) -> Result<ReaderStatus> {
    Ok(within(handle.wait_until(predicate)).await??)
}

async fn wait_ready(handle: &ReaderHandle) -> Result<ReaderStatus> {
    wait_for(handle, |s| s.state == ReaderState::Ready).await
}

/// Ready again after playing `message`
async fn wait_played(handle: &ReaderHandle, message: &Message) -> Result<ReaderStatus> {
    let id = message.id.clone();
    wait_for(handle, move |s| {
        s.state == ReaderState::Ready && s.last_played.as_deref() == Some(id.as_str())
    })
    .await
}

#[tokio::test]
async fn test_intro_summarizes_default_folder() -> Result<()> {
    let harness = Harness::new();
    harness.seed("inbox", 3).await;
    let handle = harness.spawn();

    let status = wait_ready(&handle).await?;

    assert_eq!(status.folder.map(|f| f.id), Some("inbox".to_string()));
    assert_eq!(status.message_count, 3);
    assert_eq!(status.unread_count, 3);
    assert!(!status.cursor_live);

    let intro = &harness.player.history()[0];
    assert_eq!(intro[0], "vm-youhave");
    assert!(intro.contains(&"digits/3".to_string()));
    assert!(intro.contains(&"vm-INBOX".to_string()));
    assert!(intro.contains(&"vm-first".to_string()));
    assert_eq!(harness.channel.listener_count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_empty_folder_intro() -> Result<()> {
    let harness = Harness::new();
    let handle = harness.spawn();

    let status = wait_ready(&handle).await?;

    assert_eq!(status.message_count, 0);
    assert!(status.menu.is_empty());
    assert!(harness.player.played_key("vm-no"));

    Ok(())
}

#[tokio::test]
async fn test_browsing_marks_messages_read() -> Result<()> {
    let harness = Harness::new();
    let messages = harness.seed("inbox", 3).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    handle.next();
    let status = wait_played(&handle, &messages[0]).await?;
    assert_eq!(status.cursor, 0);
    assert_eq!(status.unread_count, 2);
    assert!(harness.player.played_key(&messages[0].audio_ref));
    assert!(harness.player.played_key("vm-first"));

    handle.next();
    let status = wait_played(&handle, &messages[1]).await?;
    assert_eq!(status.cursor, 1);
    assert_eq!(status.unread_count, 1);

    handle.previous();
    let status = wait_for(&handle, |s| {
        s.state == ReaderState::Ready && s.cursor == 0 && s.last_played.is_some()
    })
    .await?;
    assert_eq!(status.last_played, Some(messages[0].id.clone()));

    for message in &messages[..2] {
        let stored = harness.store.get(&message.id).await;
        assert!(stored.map(|m| m.read).unwrap_or(false));
    }
    assert!(!harness.store.get(&messages[2].id).await.map(|m| m.read).unwrap_or(true));

    // Replaying an already-read message does not notify again
    assert_eq!(harness.notifier.count(NotificationKind::MessageRead), 2);

    Ok(())
}

#[tokio::test]
async fn test_next_past_end_says_no_more() -> Result<()> {
    let harness = Harness::new();
    let messages = harness.seed("inbox", 1).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    handle.next();
    wait_played(&handle, &messages[0]).await?;
    let played_before = harness.player.history().len();

    // "No more messages" followed by the menu
    handle.next();
    within(async {
        while harness.player.history().len() < played_before + 2 {
            tokio::task::yield_now().await;
        }
    })
    .await?;

    assert!(harness.player.played_key("vm-nomore"));
    assert_eq!(handle.status().cursor, 0);

    Ok(())
}

#[tokio::test]
async fn test_delete_current_message() -> Result<()> {
    let harness = Harness::new();
    let messages = harness.seed("inbox", 2).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    handle.next();
    wait_played(&handle, &messages[0]).await?;

    handle.delete();
    let status = wait_for(&handle, |s| {
        s.state == ReaderState::Ready && s.message_count == 1
    })
    .await?;

    assert!(!status.cursor_live);
    assert!(harness.store.get(&messages[0].id).await.is_none());
    assert_eq!(harness.channel.deleted_audio(), vec![messages[0].audio_ref.clone()]);
    assert_eq!(harness.notifier.count(NotificationKind::MessageDeleted), 1);
    assert!(harness.player.played_key("vm-msgdeleted"));

    // The following message moved into the freed slot
    handle.next();
    wait_played(&handle, &messages[1]).await?;

    Ok(())
}

#[tokio::test]
async fn test_delete_message_removed_elsewhere() -> Result<()> {
    let harness = Harness::new();
    let messages = harness.seed("inbox", 2).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    handle.next();
    wait_played(&handle, &messages[0]).await?;
    harness.store.remove_out_of_band(&messages[0].id).await;

    handle.delete();
    let status = wait_for(&handle, |s| {
        s.state == ReaderState::Ready && s.message_count == 1
    })
    .await?;

    assert_eq!(status.state, ReaderState::Ready);
    assert!(harness.store.get(&messages[1].id).await.is_some());

    Ok(())
}

#[tokio::test]
async fn test_change_folder() -> Result<()> {
    let harness = Harness::new();
    harness.seed("inbox", 1).await;
    let work = harness.seed("work", 2).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    handle.change_folder();
    wait_for(&handle, |s| s.state == ReaderState::ChangingFolder).await?;

    let folder = within(handle.submit_folder("2")).await??;
    assert_eq!(folder.id, "work");

    let status = wait_for(&handle, |s| {
        s.state == ReaderState::Ready && s.folder.as_ref().is_some_and(|f| f.id == "work")
    })
    .await?;
    assert_eq!(status.message_count, 2);
    assert_eq!(handle.current_folder().map(|f| f.name), Some("Work".to_string()));
    assert!(harness.player.played_key("vm-changeto"));
    assert!(harness.player.played_key("vm-Work"));

    handle.next();
    wait_played(&handle, &work[0]).await?;

    Ok(())
}

#[tokio::test]
async fn test_unknown_folder_selector() -> Result<()> {
    let harness = Harness::new();
    harness.seed("inbox", 1).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    handle.change_folder();
    wait_for(&handle, |s| s.state == ReaderState::ChangingFolder).await?;

    let result = within(handle.submit_folder("9")).await?;
    assert!(matches!(result, Err(SessionError::UnknownFolder(ref s)) if s == "9"));

    let status = handle.status();
    assert_eq!(status.state, ReaderState::ChangingFolder);
    assert_eq!(status.folder.map(|f| f.id), Some("inbox".to_string()));
    assert!(harness.player.played_key("vm-invalid-folder"));

    Ok(())
}

#[tokio::test]
async fn test_previous_menu_from_folder_selection_returns_to_intro() -> Result<()> {
    let harness = Harness::new();
    harness.seed("inbox", 1).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    handle.change_folder();
    wait_for(&handle, |s| s.state == ReaderState::ChangingFolder).await?;

    handle.previous_menu();
    let status = wait_ready(&handle).await?;

    assert_eq!(status.folder.map(|f| f.id), Some("inbox".to_string()));
    assert!(!harness.channel.is_hung_up());

    Ok(())
}

#[tokio::test]
async fn test_submit_folder_outside_folder_menu() -> Result<()> {
    let harness = Harness::new();
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    let result = within(handle.submit_folder("1")).await?;
    assert!(matches!(result, Err(SessionError::NotAvailable(_))));

    Ok(())
}

#[tokio::test]
async fn test_save_to_folder_refiles_current_message() -> Result<()> {
    let harness = Harness::new();
    let messages = harness.seed("inbox", 2).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    handle.next();
    wait_played(&handle, &messages[0]).await?;

    handle.save_to_folder("3");
    wait_for(&handle, |s| {
        s.state == ReaderState::Ready && s.message_count == 1
    })
    .await?;

    let stored = harness.store.get(&messages[0].id).await;
    assert_eq!(stored.map(|m| m.folder_id), Some("family".to_string()));
    assert!(harness.player.played_key("vm-msgsaved"));

    Ok(())
}

#[tokio::test]
async fn test_interrupted_playback_leaves_message_unread() -> Result<()> {
    let harness = Harness::new();
    let messages = harness.seed("inbox", 2).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    harness.player.set_mode(PlaybackMode::Hold);
    handle.next();
    let first = messages[0].id.clone();
    wait_for(&handle, move |s| {
        s.state == ReaderState::Fetching && s.last_played.as_deref() == Some(first.as_str())
    })
    .await?;

    // Skipping ahead interrupts the playback in progress
    handle.next();
    let second = messages[1].id.clone();
    wait_for(&handle, move |s| {
        s.state == ReaderState::Fetching && s.last_played.as_deref() == Some(second.as_str())
    })
    .await?;

    assert!(!harness.store.get(&messages[0].id).await.map(|m| m.read).unwrap_or(true));
    assert_eq!(harness.notifier.count(NotificationKind::MessageRead), 0);

    Ok(())
}

#[tokio::test]
async fn test_hangup_during_playback_ends_session() -> Result<()> {
    let harness = Harness::new();
    let messages = harness.seed("inbox", 1).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    harness.player.set_mode(PlaybackMode::Hold);
    handle.next();
    wait_for(&handle, |s| s.state == ReaderState::Fetching).await?;

    harness.channel.caller_hangup();
    let status = wait_for(&handle, |s| s.state == ReaderState::Done).await?;

    assert_eq!(status.deferred, 0);
    assert_eq!(harness.channel.listener_count(), 0);
    assert!(!harness.store.get(&messages[0].id).await.map(|m| m.read).unwrap_or(true));

    // Commands after the call has ended are rejected
    let result = within(handle.submit_folder("1")).await?;
    assert!(matches!(result, Err(SessionError::Ended)));

    Ok(())
}

#[tokio::test]
async fn test_previous_menu_says_goodbye_and_hangs_up() -> Result<()> {
    let harness = Harness::new();
    harness.seed("inbox", 1).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    handle.previous_menu();
    wait_for(&handle, |s| s.state == ReaderState::Done).await?;

    assert!(harness.player.played_key("vm-goodbye"));
    assert!(harness.channel.is_hung_up());
    assert_eq!(harness.channel.listener_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_store_failure_at_start_hangs_up() -> Result<()> {
    let harness = Harness::new();
    harness.store.set_failing(true).await;
    let handle = harness.spawn();

    let status = wait_for(&handle, |s| s.state == ReaderState::Done).await?;

    assert!(status.folder.is_none());
    assert!(harness.channel.is_hung_up());
    assert_eq!(harness.channel.listener_count(), 0);
    assert!(harness.player.history().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_playback_failure_hangs_up() -> Result<()> {
    let harness = Harness::new();
    harness.seed("inbox", 1).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    harness.player.set_mode(PlaybackMode::Fail);
    handle.next();
    wait_for(&handle, |s| s.state == ReaderState::Done).await?;

    assert!(harness.channel.is_hung_up());

    Ok(())
}

/// Index of the first prompt that played `message`
fn played_at(harness: &Harness, message: &Message) -> Option<usize> {
    harness
        .player
        .history()
        .iter()
        .position(|keys| keys.contains(&message.audio_ref))
}

#[tokio::test]
async fn test_commands_queued_during_playback_replay_in_order() -> Result<()> {
    let harness = Harness::new();
    let messages = harness.seed("inbox", 3).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    harness.player.set_mode(PlaybackMode::Hold);
    handle.next();
    let first = messages[0].id.clone();
    wait_for(&handle, move |s| {
        s.state == ReaderState::Fetching && s.last_played.as_deref() == Some(first.as_str())
    })
    .await?;

    // The held prompt only ends when interrupted; later prompts play through
    harness.player.set_mode(PlaybackMode::Immediate);
    handle.next();
    handle.next();
    handle.delete();

    let status = wait_for(&handle, |s| {
        s.state == ReaderState::Ready && s.message_count == 2 && s.deferred == 0
    })
    .await?;

    // next, next, delete: the second next lands on the last message, which is deleted
    assert_eq!(status.last_played.as_deref(), Some(messages[2].id.as_str()));
    assert!(harness.store.get(&messages[2].id).await.is_none());
    assert!(harness.store.get(&messages[1].id).await.is_some_and(|m| m.read));
    assert!(harness.store.get(&messages[0].id).await.is_some_and(|m| !m.read));

    let second = played_at(&harness, &messages[1]);
    let third = played_at(&harness, &messages[2]);
    assert!(second.is_some() && second < third);
    assert!(harness.player.played_key("vm-msgdeleted"));

    Ok(())
}

#[tokio::test]
async fn test_hangup_discards_queued_commands() -> Result<()> {
    let harness = Harness::new();
    let messages = harness.seed("inbox", 3).await;
    let handle = harness.spawn();
    wait_ready(&handle).await?;

    harness.player.set_mode(PlaybackMode::Hold);
    handle.next();
    let first = messages[0].id.clone();
    wait_for(&handle, move |s| {
        s.state == ReaderState::Fetching && s.last_played.as_deref() == Some(first.as_str())
    })
    .await?;

    // The first replayed next holds on the second message, leaving two queued
    handle.next();
    handle.next();
    handle.delete();
    let second = messages[1].id.clone();
    wait_for(&handle, move |s| {
        s.state == ReaderState::Fetching
            && s.last_played.as_deref() == Some(second.as_str())
            && s.deferred == 2
    })
    .await?;

    harness.channel.caller_hangup();
    let status = wait_for(&handle, |s| s.state == ReaderState::Done).await?;
    assert_eq!(status.deferred, 0);

    // Give a stray replay the chance to run
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(played_at(&harness, &messages[2]), None);
    assert!(!harness.player.played_key("vm-msgdeleted"));
    for message in &messages {
        assert!(harness.store.get(&message.id).await.is_some_and(|m| !m.read));
    }
    assert_eq!(harness.channel.listener_count(), 0);

    Ok(())
}
