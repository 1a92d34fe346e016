use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use mnemo_protocol::{ChunkType, Message};

use super::merge::merge_chunks;
use super::normalize::backfill;

type OrderKey = (Option<i64>, f64);

fn order_key(m: &Message) -> OrderKey {
    (m.sequence, m.created_at)
}

fn key_cmp(a: OrderKey, b: OrderKey) -> Ordering {
    match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.1.total_cmp(&b.1),
    }
}

/// Sort messages into a total order consistent with server-assigned
/// `sequence` wherever one is present.
///
/// A pairwise "sequence when both sides have one, else timestamp"
/// comparator is not transitive when timestamps disagree with sequence
/// order, so sequenced and unsequenced messages are ordered separately and
/// interleaved in one pass: each unsequenced message lands before the first
/// sequenced message with a later `created_at`, or at the end.
fn sort_view(messages: Vec<Message>) -> Vec<Message> {
    let mut sequenced: Vec<Message> = Vec::new();
    let mut timed: Vec<Message> = Vec::new();
    for msg in messages {
        if msg.sequence.is_some() {
            sequenced.push(msg);
        } else {
            timed.push(msg);
        }
    }
    sequenced.sort_by(|a, b| {
        a.sequence
            .cmp(&b.sequence)
            .then(a.created_at.total_cmp(&b.created_at))
    });
    timed.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));

    let mut out = Vec::with_capacity(sequenced.len() + timed.len());
    let mut timed = timed.into_iter().peekable();
    for msg in sequenced {
        while let Some(t) = timed.next_if(|t| t.created_at <= msg.created_at) {
            out.push(t);
        }
        out.push(msg);
    }
    out.extend(timed);
    out
}

/// Compute the ordered, deduplicated, thread-filtered transcript.
///
/// Steps: merge live delta groups, concatenate with archived history, drop
/// messages owned by other threads (unscoped legacy messages are kept), drop
/// `title_update` chunks, backfill missing display text, dedup by canonical
/// id keeping the freshest entry, and sort into a sequence-consistent total
/// order. The result is idempotent under recomputation and never contains
/// another thread's messages.
pub fn compute_view(
    archived: &[Message],
    live: &[Message],
    current_thread_id: &str,
    processed: &HashSet<String>,
) -> Vec<Message> {
    let mut all: Vec<Message> = archived.to_vec();
    all.extend(merge_chunks(live, processed));

    all.retain(|m| m.thread_id.is_empty() || m.thread_id == current_thread_id);
    all.retain(|m| m.chunk_type != ChunkType::TitleUpdate);
    for msg in &mut all {
        backfill(msg);
    }

    // Keep one entry per canonical id, preferring the greatest created_at;
    // on a tie the later arrival wins.
    let mut winner: HashMap<String, usize> = HashMap::new();
    let mut ids_in_order: Vec<String> = Vec::new();
    for (idx, msg) in all.iter().enumerate() {
        let id = msg.canonical_id().to_string();
        match winner.get(&id) {
            Some(&prev) if all[prev].created_at > msg.created_at => {}
            Some(_) => {
                winner.insert(id, idx);
            }
            None => {
                winner.insert(id.clone(), idx);
                ids_in_order.push(id);
            }
        }
    }
    let view: Vec<Message> = ids_in_order
        .iter()
        .map(|id| all[winner[id]].clone())
        .collect();

    sort_view(view)
}

/// One entry of the rendered transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptItem {
    Message(Message),
    Group(MemoryGroup),
}

/// A synthetic collapsible group of retrieval chunks of one type.
///
/// Constructed fresh on every recomputation; never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryGroup {
    pub chunk_type: ChunkType,
    pub items: Vec<Message>,
}

struct GroupBuf {
    chunk_type: ChunkType,
    items: Vec<Message>,
    seen: HashSet<String>,
    min_key: OrderKey,
}

/// Pull retrieval chunks out of an ordered transcript and re-insert each
/// type's buffer as a single group at its chronological position: right
/// before the first remaining message whose order key exceeds the group's
/// minimum. Buffers that never find an insertion point go at the end.
///
/// The position is a best-effort rendering convenience, not a faithful
/// chronological reconstruction.
pub fn group_retrievals(ordered: Vec<Message>) -> Vec<TranscriptItem> {
    let mut buffers: Vec<GroupBuf> = Vec::new();
    let mut plain: Vec<Message> = Vec::new();

    for msg in ordered {
        if !msg.chunk_type.is_retrieval() {
            plain.push(msg);
            continue;
        }
        let key = order_key(&msg);
        match buffers.iter_mut().find(|b| b.chunk_type == msg.chunk_type) {
            Some(buf) => {
                if buf.seen.insert(msg.canonical_id().to_string()) {
                    if key_cmp(key, buf.min_key) == Ordering::Less {
                        buf.min_key = key;
                    }
                    buf.items.push(msg);
                }
            }
            None => {
                let mut seen = HashSet::new();
                seen.insert(msg.canonical_id().to_string());
                buffers.push(GroupBuf {
                    chunk_type: msg.chunk_type,
                    items: vec![msg],
                    seen,
                    min_key: key,
                });
            }
        }
    }

    let mut out = Vec::with_capacity(plain.len() + buffers.len());
    for msg in plain {
        let msg_key = order_key(&msg);
        let mut due: Vec<GroupBuf> = Vec::new();
        let mut rest: Vec<GroupBuf> = Vec::new();
        for buf in buffers.drain(..) {
            if key_cmp(msg_key, buf.min_key) == Ordering::Greater {
                due.push(buf);
            } else {
                rest.push(buf);
            }
        }
        buffers = rest;
        due.sort_by(|a, b| key_cmp(a.min_key, b.min_key));
        for buf in due {
            out.push(TranscriptItem::Group(MemoryGroup {
                chunk_type: buf.chunk_type,
                items: buf.items,
            }));
        }
        out.push(TranscriptItem::Message(msg));
    }

    buffers.sort_by(|a, b| key_cmp(a.min_key, b.min_key));
    for buf in buffers {
        out.push(TranscriptItem::Group(MemoryGroup {
            chunk_type: buf.chunk_type,
            items: buf.items,
        }));
    }
    out
}
