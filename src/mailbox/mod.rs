//! Mailbox data model
//!
//! `Message` and `Folder` are the records shared with the store; the
//! `MessageCollection` is the reader's cursor-driven view over one folder.

mod collection;
mod message;

pub use collection::{MenuAction, MessageCollection, Navigation};
pub use message::{Folder, Message, NewMessage};
