//! Session controllers
//!
//! Each call is driven by one controller task:
//! - `ReaderSession`: browse, play, delete and re-file messages in a mailbox
//! - `WriterSession`: play a greeting, record, and commit a new message
//!
//! Callers talk to a running controller through its handle; commands are
//! queued to the controller's inbox and status is republished after every
//! event.

mod config;
mod deferred;
mod listener;
mod prompts;
mod reader;
mod stats;
mod writer;

pub use config::{SessionConfig, SessionContext, SessionServices};
pub use deferred::DeferredQueue;
pub use listener::ChannelListener;
pub use prompts::PromptSet;
pub use reader::{ReaderCommand, ReaderHandle, ReaderSession};
pub use stats::{ReaderState, ReaderStatus, WriterState, WriterStatus};
pub use writer::{WriterCommand, WriterHandle, WriterSession};
