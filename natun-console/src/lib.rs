pub mod api;
pub mod clipboard;
pub mod config;
pub mod console;
pub mod feedback;
pub mod poller;
pub mod storage;
pub mod timer;

pub use api::{AgentApi, AgentClient, ApiError};
pub use clipboard::{ClipboardError, ClipboardSink, SystemClipboard};
pub use console::{Console, ConsoleError, ConsoleEvent, ConsoleSettings, CopyField};
pub use storage::FileStore;
