pub mod config;
pub mod error;
pub mod http;
pub mod mailbox;
pub mod nats;
pub mod services;
pub mod session;

pub use config::Config;
pub use error::SessionError;
pub use http::{create_router, AppState};
pub use mailbox::{Folder, MenuAction, Message, MessageCollection, Navigation, NewMessage};
pub use nats::{MwiEvent, NatsNotifier};
pub use session::{
    PromptSet, ReaderHandle, ReaderSession, ReaderState, ReaderStatus, SessionConfig,
    SessionContext, SessionServices, WriterHandle, WriterSession, WriterState, WriterStatus,
};
