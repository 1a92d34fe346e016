use crate::{ProtocolError, RawChunk};

/// Literal sentinel the backend emits as the final event of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A chat chunk payload.
    Chunk(RawChunk),
    /// End-of-stream sentinel; no further events will follow.
    Done,
}

/// Incremental decoder for a `text/event-stream` body.
///
/// Feed raw transport bytes as they arrive; complete events are returned in
/// arrival order. Framing state (a partially received line or event block)
/// is carried across calls, so chunk boundaries may fall anywhere.
///
/// ```text
/// data: {"chunk_id":"c1","chunk_type":"ai_delta","content":"Hel"}
///
/// data: [DONE]
/// ```
///
/// Malformed event payloads are surfaced as `Err` items; the decoder itself
/// stays usable and subsequent events decode normally.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume transport bytes, returning every event completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent, ProtocolError>> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
            // `event:`, `id:`, `retry:` and comment lines are not used by
            // the backend and are ignored.
        }
        events
    }

    /// Flush any event left unterminated when the transport closes.
    pub fn finish(&mut self) -> Option<Result<StreamEvent, ProtocolError>> {
        if !self.buf.is_empty() {
            let tail: Vec<u8> = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&tail);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<Result<StreamEvent, ProtocolError>> {
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        if data == DONE_SENTINEL {
            return Some(Ok(StreamEvent::Done));
        }
        Some(
            serde_json::from_str::<RawChunk>(&data)
                .map(StreamEvent::Chunk)
                .map_err(ProtocolError::from),
        )
    }
}
