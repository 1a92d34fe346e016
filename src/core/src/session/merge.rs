use std::collections::{HashMap, HashSet};

use mnemo_protocol::{ChunkType, Message, Role};

/// Collapse raw delta chunks sharing an id into single messages.
///
/// Groups are keyed by canonical chunk id in first-seen order. A group of
/// multiple deltas concatenates content in arrival order and becomes a
/// finalized assistant message; anything else passes through unchanged
/// (later dedup handles repeats of non-delta chunks). Ids already processed
/// by the tracker are skipped entirely, which makes the pass idempotent
/// when invoked repeatedly over overlapping input.
pub fn merge_chunks(chunks: &[Message], processed: &HashSet<String>) -> Vec<Message> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&Message>> = HashMap::new();
    for chunk in chunks {
        let id = chunk.canonical_id();
        if processed.contains(id) {
            continue;
        }
        if !groups.contains_key(id) {
            order.push(id);
        }
        groups.entry(id).or_default().push(chunk);
    }

    let mut merged = Vec::with_capacity(order.len());
    for id in order {
        let group = &groups[id];
        let all_deltas = group.iter().all(|m| m.chunk_type == ChunkType::AiDelta);
        if group.len() > 1 && all_deltas {
            let first = group[0];
            let last = group[group.len() - 1];
            let content: String = group.iter().map(|m| m.content.as_str()).collect();
            merged.push(Message {
                chunk_id: first.chunk_id.clone(),
                thread_id: first.thread_id.clone(),
                role: Role::Assistant,
                chunk_type: ChunkType::AiMessage,
                content,
                is_final: true,
                sequence: group.iter().find_map(|m| m.sequence),
                created_at: last.created_at,
                payload: first.payload.clone(),
            });
        } else {
            merged.extend(group.iter().map(|m| (*m).clone()));
        }
    }
    merged
}
