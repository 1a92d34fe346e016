use mnemo_protocol::{
    now_unix, ChunkType, MemoryPayload, Message, Payload, RawChunk, Role,
};
use serde_json::Value;
use uuid::Uuid;

/// Normalize one raw server event into the uniform [`Message`] shape.
///
/// Fallback chain per field:
/// - `chunk_id` ← `dialogue_id` ← a synthesized uuid
/// - `thread_id` ← `current_thread_id`
/// - `content` ← `output_text`
/// - `role` ← implied by `chunk_type`
///
/// Retrieval chunks missing their structured payload get it parsed out of
/// `content` as JSON, with a placeholder on parse failure. Malformed input
/// never errors; chunks with an unknown type or nothing to show are dropped
/// (`None`) and the caller filters them out.
pub fn normalize(raw: &RawChunk, current_thread_id: &str) -> Option<Message> {
    let chunk_type = match raw.chunk_type.as_deref() {
        Some(name) => match ChunkType::from_wire(name) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(error = %e, "dropping chunk with unknown type");
                return None;
            }
        },
        None => {
            tracing::debug!("dropping chunk without a chunk_type");
            return None;
        }
    };

    let content = raw.wire_content().unwrap_or_default().to_string();
    let payload = build_payload(raw, chunk_type, &content);

    // Nothing to render and nothing structured to carry.
    if content.is_empty() && matches!(payload, Payload::Text) {
        tracing::debug!(chunk_type = ?chunk_type, "dropping empty chunk");
        return None;
    }

    let role = raw
        .role
        .as_deref()
        .and_then(|r| Role::from_wire(r).ok())
        .unwrap_or_else(|| chunk_type.default_role());

    let chunk_id = raw
        .wire_id()
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Some(Message {
        chunk_id,
        thread_id: raw
            .thread_id
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| current_thread_id.to_string()),
        role,
        chunk_type,
        content,
        is_final: raw.is_final.unwrap_or(false),
        sequence: raw.sequence,
        created_at: raw.created_at.unwrap_or_else(now_unix),
        payload,
    })
}

fn build_payload(raw: &RawChunk, chunk_type: ChunkType, content: &str) -> Payload {
    match chunk_type {
        ChunkType::MemoryRetrieve | ChunkType::MemoryExtract => {
            Payload::Memory { memory: memory_payload(raw, content) }
        }
        ChunkType::KgRetrieve | ChunkType::SearchResults => {
            Payload::Retrieval { hits: retrieval_hits(raw, content) }
        }
        ChunkType::ToolResult => Payload::Tool {
            name: raw.name.clone(),
            tool_call_id: raw.tool_call_id.clone(),
            tool_calls: raw.tool_calls.clone(),
        },
        ChunkType::TitleUpdate => Payload::Title {
            new_title: raw
                .new_title
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| content.to_string()),
        },
        _ => Payload::Text,
    }
}

fn memory_payload(raw: &RawChunk, content: &str) -> MemoryPayload {
    let structured = raw
        .wire_memory()
        .cloned()
        .or_else(|| serde_json::from_str::<Value>(content).ok());
    if let Some(value) = structured {
        if value.is_object() {
            if let Ok(memory) = serde_json::from_value::<MemoryPayload>(value) {
                return memory;
            }
        }
    }
    // Placeholder rather than failing the pipeline.
    MemoryPayload {
        topic: String::new(),
        question: String::new(),
        answer: content.to_string(),
    }
}

fn retrieval_hits(raw: &RawChunk, content: &str) -> Vec<Value> {
    let structured = raw
        .wire_results()
        .cloned()
        .or_else(|| serde_json::from_str::<Value>(content).ok());
    match structured {
        Some(Value::Array(hits)) => hits,
        Some(other) => vec![other],
        None => vec![serde_json::json!({ "text": content })],
    }
}

/// View-stage backfill for messages that still lack display text.
pub fn backfill(msg: &mut Message) {
    if msg.content.is_empty() {
        if let Payload::Memory { memory } = &msg.payload {
            msg.content = memory.answer.clone();
        }
    }
}
