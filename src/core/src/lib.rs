pub mod client;
pub mod config;
pub mod error;
pub mod paths;
pub mod session;
pub mod update;

pub use client::{BackendClient, ChunkStream};
pub use config::{AuthConfig, BackendConfig, ChatConfig, MnemoConfig};
pub use error::ClientError;
pub use session::view::{MemoryGroup, TranscriptItem};
pub use session::ChatSession;
pub use update::SessionUpdate;
