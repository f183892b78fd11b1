//! Collaborators the session controllers depend on
//!
//! - `Storage`: folder and message persistence
//! - `PromptPlayer` / `Prompt`: sound-key playback on a channel
//! - `ControlChannel` / `RecordingHandle`: the live call and audio capture
//! - `Notifier`: message-waiting indication updates
//!
//! `memory` provides in-process implementations of all of them.

pub mod channel;
pub mod memory;
pub mod notifier;
pub mod prompt;
pub mod storage;

pub use channel::{ChannelEvent, ControlChannel, RecordingHandle};
pub use memory::{
    MemoryNotifier, MemoryStore, Notification, PlaybackMode, SimulatedChannel, SimulatedPlayer,
};
pub use notifier::{NotificationKind, Notifier};
pub use prompt::{apply_replacements, Prompt, PromptPlayer, Replacements};
pub use storage::Storage;
