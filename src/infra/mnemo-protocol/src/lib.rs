mod chunk;
mod sse;

pub use chunk::{
    canonical_id, now_unix, ChunkType, MemoryPayload, Message, Payload, RawChunk, Role,
    ThreadRecord, TEMP_ID_PREFIX,
};
pub use sse::{SseDecoder, StreamEvent, DONE_SENTINEL};

use thiserror::Error;

/// Errors produced while decoding backend wire data.
///
/// These are per-item errors: a malformed stream event invalidates that
/// event only, never the surrounding stream.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown chunk_type: {0}")]
    UnknownChunkType(String),
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("malformed stream event: {0}")]
    MalformedEvent(#[from] serde_json::Error),
}
