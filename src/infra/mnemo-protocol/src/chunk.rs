use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// Prefix used for locally-synthesized ids (optimistic user inserts).
///
/// Stripped before identity comparisons so a local message and its
/// server-acknowledged twin deduplicate to one entry.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Strip the optimistic-insert prefix from a chunk id, if present.
pub fn canonical_id(id: &str) -> &str {
    id.strip_prefix(TEMP_ID_PREFIX).unwrap_or(id)
}

/// Current time as unix seconds, the backend's timestamp unit.
pub fn now_unix() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Discriminates how a chunk is normalized, grouped, and rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    AiDelta,
    AiMessage,
    MemoryRetrieve,
    MemoryExtract,
    KgRetrieve,
    SearchResults,
    ToolResult,
    TitleUpdate,
    UserInput,
}

impl ChunkType {
    pub fn from_wire(v: &str) -> Result<Self, ProtocolError> {
        match v {
            "ai_delta" => Ok(Self::AiDelta),
            "ai_message" => Ok(Self::AiMessage),
            "memory_retrieve" => Ok(Self::MemoryRetrieve),
            "memory_extract" => Ok(Self::MemoryExtract),
            "kg_retrieve" => Ok(Self::KgRetrieve),
            "search_results" => Ok(Self::SearchResults),
            "tool_result" => Ok(Self::ToolResult),
            "title_update" => Ok(Self::TitleUpdate),
            "user_input" => Ok(Self::UserInput),
            other => Err(ProtocolError::UnknownChunkType(other.to_string())),
        }
    }

    /// Retrieval chunks are pulled out of the linear transcript and rendered
    /// as collapsible groups.
    pub fn is_retrieval(self) -> bool {
        matches!(
            self,
            Self::MemoryRetrieve | Self::MemoryExtract | Self::KgRetrieve | Self::SearchResults
        )
    }

    /// Role implied by the chunk type when the wire omits one.
    pub fn default_role(self) -> Role {
        match self {
            Self::UserInput => Role::User,
            Self::ToolResult => Role::Tool,
            _ => Role::Assistant,
        }
    }
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn from_wire(v: &str) -> Result<Self, ProtocolError> {
        match v {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => Err(ProtocolError::UnknownRole(other.to_string())),
        }
    }
}

/// One raw event object as the backend sends it.
///
/// Every field is optional; the backend fills different subsets depending on
/// the event kind, and several fields have legacy aliases. Conversion to the
/// strict [`Message`] shape happens at the normalization boundary, not here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawChunk {
    pub chunk_id: Option<String>,
    /// Legacy alias for `chunk_id`.
    pub dialogue_id: Option<String>,
    pub thread_id: Option<String>,
    pub role: Option<String>,
    pub content: Option<String>,
    /// Alias for `content` used by completion-style events.
    pub output_text: Option<String>,
    pub chunk_type: Option<String>,
    pub is_final: Option<bool>,
    /// Server-assigned total order; `created_at` is the fallback.
    pub sequence: Option<i64>,
    pub created_at: Option<f64>,
    pub memory: Option<Value>,
    pub memory_data: Option<Value>,
    pub results: Option<Value>,
    pub results_data: Option<Value>,
    pub data: Option<Value>,
    pub tool_calls: Option<Value>,
    pub name: Option<String>,
    pub tool_call_id: Option<String>,
    pub new_title: Option<String>,
}

impl RawChunk {
    /// Best id available on the wire, in preference order.
    pub fn wire_id(&self) -> Option<&str> {
        self.chunk_id
            .as_deref()
            .or(self.dialogue_id.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Display text, honoring the `output_text` alias.
    pub fn wire_content(&self) -> Option<&str> {
        self.content
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.output_text.as_deref().filter(|s| !s.is_empty()))
    }

    /// Structured memory payload, honoring the `memory_data` alias.
    pub fn wire_memory(&self) -> Option<&Value> {
        self.memory.as_ref().or(self.memory_data.as_ref())
    }

    /// Retrieval hits, honoring the `results_data` and `data` aliases.
    pub fn wire_results(&self) -> Option<&Value> {
        self.results
            .as_ref()
            .or(self.results_data.as_ref())
            .or(self.data.as_ref())
    }
}

/// Memory triple carried by `memory_retrieve`/`memory_extract` chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPayload {
    pub topic: String,
    pub question: String,
    pub answer: String,
}

/// Structured payload of a normalized message, keyed by what the chunk
/// actually carries rather than a bag of optional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Text,
    Memory { memory: MemoryPayload },
    Retrieval { hits: Vec<Value> },
    Tool {
        name: Option<String>,
        tool_call_id: Option<String>,
        tool_calls: Option<Value>,
    },
    Title { new_title: String },
}

/// A single normalized unit of conversation content.
///
/// Produced from a [`RawChunk`] by the normalizer; downstream reconciliation
/// assumes this uniform shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable identity; deltas sharing this id belong to one logical message.
    pub chunk_id: String,
    /// Owning conversation. Empty means legacy/unscoped.
    pub thread_id: String,
    pub role: Role,
    pub chunk_type: ChunkType,
    pub content: String,
    /// Once true, no further content may be appended under this id.
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    /// Unix seconds.
    pub created_at: f64,
    pub payload: Payload,
}

impl Message {
    /// Identity with any optimistic-insert prefix stripped.
    pub fn canonical_id(&self) -> &str {
        canonical_id(&self.chunk_id)
    }
}

/// A conversation container as returned by the thread CRUD endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub thread_id: String,
    #[serde(default)]
    pub title: String,
    pub created_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_chunk_accepts_sparse_objects() {
        let chunk: RawChunk =
            serde_json::from_value(json!({ "chunk_id": "c1", "content": "hi" })).unwrap();
        assert_eq!(chunk.wire_id(), Some("c1"));
        assert_eq!(chunk.wire_content(), Some("hi"));
        assert!(chunk.chunk_type.is_none());
    }

    #[test]
    fn raw_chunk_ignores_unknown_fields() {
        let chunk: RawChunk = serde_json::from_value(json!({
            "chunk_id": "c1",
            "some_future_field": { "nested": true }
        }))
        .unwrap();
        assert_eq!(chunk.wire_id(), Some("c1"));
    }

    #[test]
    fn wire_id_falls_back_to_dialogue_id() {
        let chunk: RawChunk =
            serde_json::from_value(json!({ "dialogue_id": "d7" })).unwrap();
        assert_eq!(chunk.wire_id(), Some("d7"));
    }

    #[test]
    fn wire_content_falls_back_to_output_text() {
        let chunk: RawChunk =
            serde_json::from_value(json!({ "output_text": "partial" })).unwrap();
        assert_eq!(chunk.wire_content(), Some("partial"));
        let empty: RawChunk =
            serde_json::from_value(json!({ "content": "", "output_text": "x" })).unwrap();
        assert_eq!(empty.wire_content(), Some("x"));
    }

    #[test]
    fn chunk_type_wire_names_round_trip() {
        for name in [
            "ai_delta",
            "ai_message",
            "memory_retrieve",
            "memory_extract",
            "kg_retrieve",
            "search_results",
            "tool_result",
            "title_update",
            "user_input",
        ] {
            let parsed = ChunkType::from_wire(name).unwrap();
            assert_eq!(serde_json::to_value(parsed).unwrap(), json!(name));
        }
        assert!(ChunkType::from_wire("telemetry").is_err());
    }

    #[test]
    fn retrieval_types_are_flagged() {
        assert!(ChunkType::MemoryRetrieve.is_retrieval());
        assert!(ChunkType::MemoryExtract.is_retrieval());
        assert!(ChunkType::KgRetrieve.is_retrieval());
        assert!(ChunkType::SearchResults.is_retrieval());
        assert!(!ChunkType::AiDelta.is_retrieval());
        assert!(!ChunkType::ToolResult.is_retrieval());
    }

    #[test]
    fn default_roles_follow_chunk_type() {
        assert_eq!(ChunkType::UserInput.default_role(), Role::User);
        assert_eq!(ChunkType::ToolResult.default_role(), Role::Tool);
        assert_eq!(ChunkType::AiDelta.default_role(), Role::Assistant);
        assert_eq!(ChunkType::MemoryRetrieve.default_role(), Role::Assistant);
    }

    #[test]
    fn canonical_id_strips_temp_prefix_only() {
        assert_eq!(canonical_id("temp-abc"), "abc");
        assert_eq!(canonical_id("abc"), "abc");
        assert_eq!(canonical_id("temporary"), "temporary");
    }

    #[test]
    fn message_round_trip() {
        let msg = Message {
            chunk_id: "c1".into(),
            thread_id: "t1".into(),
            role: Role::Assistant,
            chunk_type: ChunkType::AiMessage,
            content: "hello".into(),
            is_final: true,
            sequence: Some(4),
            created_at: 1_700_000_000.25,
            payload: Payload::Text,
        };
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn thread_record_defaults_title() {
        let rec: ThreadRecord =
            serde_json::from_value(json!({ "thread_id": "t1", "created_at": 1.0 })).unwrap();
        assert_eq!(rec.title, "");
        assert!(rec.dialogue_count.is_none());
    }
}
