pub mod client;
pub mod messages;

pub use client::NatsNotifier;
pub use messages::{mwi_subject, MwiEvent};
