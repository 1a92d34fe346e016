use std::collections::{HashMap, HashSet};

use mnemo_protocol::{ChunkType, Message, Role};

/// Keyed table of in-flight (not-yet-finalized) assistant messages.
///
/// Deltas sharing a chunk id accumulate into one entry. Only one entry may
/// be open at a time: a delta for a new id force-finalizes whatever else is
/// open, so interleaved streams cannot corrupt each other's content. Once an
/// id has been finalized it stays closed; a late delta under that id is
/// dropped and a new id must be used for any logical continuation.
#[derive(Debug, Default)]
pub struct ActiveMessages {
    open: HashMap<String, Message>,
    open_order: Vec<String>,
    processed: HashSet<String>,
}

impl ActiveMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one delta. Returns any messages that were force-finalized to
    /// uphold the single-open-stream invariant.
    pub fn begin_or_append(&mut self, delta: &Message) -> Vec<Message> {
        let id = delta.canonical_id().to_string();
        if self.processed.contains(&id) {
            tracing::warn!(chunk_id = %id, "delta for a finalized id dropped");
            return Vec::new();
        }

        if let Some(entry) = self.open.get_mut(&id) {
            entry.content.push_str(&delta.content);
            entry.created_at = delta.created_at;
            if entry.sequence.is_none() {
                entry.sequence = delta.sequence;
            }
            return Vec::new();
        }

        let forced = self.finalize_all();
        self.open.insert(
            id.clone(),
            Message {
                chunk_id: delta.chunk_id.clone(),
                thread_id: delta.thread_id.clone(),
                role: Role::Assistant,
                chunk_type: ChunkType::AiMessage,
                content: delta.content.clone(),
                is_final: false,
                sequence: delta.sequence,
                created_at: delta.created_at,
                payload: delta.payload.clone(),
            },
        );
        self.open_order.push(id);
        forced
    }

    /// Mark every tracked entry final, clear the table, and return the
    /// finalized messages. Their ids are recorded as processed so the merger
    /// skips their raw deltas from then on.
    pub fn finalize_all(&mut self) -> Vec<Message> {
        let mut finalized = Vec::with_capacity(self.open_order.len());
        for id in std::mem::take(&mut self.open_order) {
            if let Some(mut msg) = self.open.remove(&id) {
                msg.is_final = true;
                self.processed.insert(id);
                finalized.push(msg);
            }
        }
        finalized
    }

    pub fn has_open(&self) -> bool {
        !self.open.is_empty()
    }

    /// Ids whose delta streams have been closed out.
    pub fn processed(&self) -> &HashSet<String> {
        &self.processed
    }

    /// Drop everything, including processed-id memory. Used on thread switch.
    pub fn clear(&mut self) {
        self.open.clear();
        self.open_order.clear();
        self.processed.clear();
    }
}
