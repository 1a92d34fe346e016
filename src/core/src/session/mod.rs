pub mod merge;
pub mod normalize;
pub mod tracker;
pub mod view;

use std::collections::HashMap;
use std::sync::Arc;

use mnemo_protocol::{
    now_unix, ChunkType, Message, Payload, RawChunk, Role, StreamEvent, TEMP_ID_PREFIX,
};
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use crate::client::BackendClient;
use crate::error::ClientError;
use crate::update::{emit, SessionUpdate};
use normalize::normalize;
use tracker::ActiveMessages;
use view::{compute_view, group_retrievals, TranscriptItem};

/// One conversation session: owns the message buffers, reconciles the
/// incoming event stream, and coordinates thread switches.
///
/// All buffers live behind one async mutex, so concurrent operations
/// interleave at await points only; the `thread_id` filter in the view is
/// what keeps a stale in-flight fetch from leaking into the wrong thread.
pub struct ChatSession {
    client: Arc<BackendClient>,
    state: Arc<Mutex<SessionState>>,
    updates: mpsc::Sender<SessionUpdate>,
    cancel_tx: watch::Sender<bool>,
}

struct SessionState {
    current_thread_id: String,
    /// Finalized history for the current thread.
    archived: Vec<Message>,
    /// Chunks from the live stream, including raw deltas.
    live: Vec<Message>,
    tracker: ActiveMessages,
    /// `Some(id)` while a switch to `id` has a history fetch in flight.
    switching: Option<String>,
    thread_titles: HashMap<String, String>,
}

impl SessionState {
    fn apply_chunk(&mut self, raw: &RawChunk, updates: &mpsc::Sender<SessionUpdate>) {
        let Some(msg) = normalize(raw, &self.current_thread_id) else {
            return;
        };
        match msg.chunk_type {
            // Title updates touch thread metadata only, never the transcript.
            ChunkType::TitleUpdate => {
                if let Payload::Title { new_title } = &msg.payload {
                    self.thread_titles
                        .insert(msg.thread_id.clone(), new_title.clone());
                    emit(
                        updates,
                        SessionUpdate::ThreadTitle {
                            thread_id: msg.thread_id,
                            title: new_title.clone(),
                        },
                    );
                }
            }
            ChunkType::AiDelta => {
                let forced = self.tracker.begin_or_append(&msg);
                self.archive(forced, updates);
                emit(
                    updates,
                    SessionUpdate::Delta {
                        chunk_id: msg.chunk_id.clone(),
                        text: msg.content.clone(),
                    },
                );
                self.live.push(msg);
            }
            _ => {
                // Any non-delta arrival closes an open delta accumulation.
                let forced = self.tracker.finalize_all();
                self.archive(forced, updates);
                emit(updates, SessionUpdate::Finalized(msg.clone()));
                self.live.push(msg);
            }
        }
    }

    fn finish_stream(&mut self, updates: &mpsc::Sender<SessionUpdate>) {
        let forced = self.tracker.finalize_all();
        self.archive(forced, updates);
        emit(
            updates,
            SessionUpdate::StreamEnded {
                thread_id: self.current_thread_id.clone(),
            },
        );
    }

    fn archive(&mut self, finalized: Vec<Message>, updates: &mpsc::Sender<SessionUpdate>) {
        for msg in finalized {
            emit(updates, SessionUpdate::Finalized(msg.clone()));
            self.archived.push(msg);
        }
    }
}

impl ChatSession {
    /// Create a session bound to `thread_id`. The returned receiver carries
    /// rendering updates (deltas, finalized messages, title changes).
    pub fn new(
        client: Arc<BackendClient>,
        thread_id: impl Into<String>,
        update_buffer: usize,
    ) -> (Self, mpsc::Receiver<SessionUpdate>) {
        let (updates, rx) = mpsc::channel(update_buffer);
        let (cancel_tx, _) = watch::channel(false);
        let session = Self {
            client,
            state: Arc::new(Mutex::new(SessionState {
                current_thread_id: thread_id.into(),
                archived: Vec::new(),
                live: Vec::new(),
                tracker: ActiveMessages::new(),
                switching: None,
                thread_titles: HashMap::new(),
            })),
            updates,
            cancel_tx,
        };
        (session, rx)
    }

    pub async fn current_thread(&self) -> String {
        self.state.lock().await.current_thread_id.clone()
    }

    pub async fn thread_title(&self, thread_id: &str) -> Option<String> {
        self.state.lock().await.thread_titles.get(thread_id).cloned()
    }

    /// The grouped transcript for the current thread.
    pub async fn messages(&self) -> Vec<TranscriptItem> {
        let state = self.state.lock().await;
        let ordered = compute_view(
            &state.archived,
            &state.live,
            &state.current_thread_id,
            state.tracker.processed(),
        );
        group_retrievals(ordered)
    }

    /// Feed one stream event through the reconciliation state machine.
    pub async fn apply_event(&self, event: &StreamEvent) {
        let mut state = self.state.lock().await;
        match event {
            StreamEvent::Chunk(raw) => state.apply_chunk(raw, &self.updates),
            StreamEvent::Done => state.finish_stream(&self.updates),
        }
    }

    /// Send one user message and consume the reply stream to completion.
    ///
    /// The user's text is inserted optimistically under a `temp-` id before
    /// the request goes out. Cancellation stops event consumption; content
    /// already appended stays in the transcript as a truncated message.
    pub async fn send_message(&self, text: &str) -> Result<(), ClientError> {
        let thread_id = {
            let mut state = self.state.lock().await;
            let user_msg = Message {
                chunk_id: format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4()),
                thread_id: state.current_thread_id.clone(),
                role: Role::User,
                chunk_type: ChunkType::UserInput,
                content: text.to_string(),
                is_final: true,
                sequence: None,
                created_at: now_unix(),
                payload: Payload::Text,
            };
            emit(&self.updates, SessionUpdate::Finalized(user_msg.clone()));
            state.live.push(user_msg);
            state.current_thread_id.clone()
        };

        self.cancel_tx.send_replace(false);
        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut stream = self.client.stream_chat(&thread_id, text).await?;

        loop {
            tokio::select! {
                // watch::Ref is not Send; it must not escape the branch
                // future or this future cannot be spawned.
                cancelled = async { cancel_rx.wait_for(|cancelled| *cancelled).await.is_ok() } => {
                    if cancelled {
                        tracing::debug!(%thread_id, "processing cancelled; abandoning stream");
                    }
                    break;
                }
                event = stream.next() => match event {
                    None => break,
                    Some(Ok(StreamEvent::Done)) => break,
                    Some(Ok(event)) => self.apply_event(&event).await,
                    Some(Err(e)) => {
                        let mut state = self.state.lock().await;
                        state.finish_stream(&self.updates);
                        return Err(e);
                    }
                },
            }
        }

        let mut state = self.state.lock().await;
        state.finish_stream(&self.updates);
        Ok(())
    }

    /// Stop consuming events from the current reply stream.
    pub fn cancel_processing(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Switch the session to another thread and load its history.
    ///
    /// A switch requested while a different switch is still in flight is
    /// ignored (logged, not an error): the newer UI action is assumed to
    /// supersede it. Switching to the id already in flight is a forced
    /// refresh. Buffers are cleared synchronously before the fetch; a fetch
    /// failure propagates after the in-flight flag resets, so a later retry
    /// is not blocked.
    pub async fn switch_thread(&self, thread_id: &str) -> Result<(), ClientError> {
        {
            let mut state = self.state.lock().await;
            if let Some(pending) = &state.switching {
                if pending != thread_id {
                    tracing::warn!(
                        requested = %thread_id,
                        pending = %pending,
                        "thread switch already in progress; ignoring"
                    );
                    return Ok(());
                }
            } else {
                state.switching = Some(thread_id.to_string());
            }
            state.archived.clear();
            state.live.clear();
            state.tracker.clear();
            state.current_thread_id = thread_id.to_string();
        }

        let result = self.client.fetch_history(thread_id).await;

        let mut state = self.state.lock().await;
        if state.switching.as_deref() == Some(thread_id) {
            state.switching = None;
        }
        let history = match result {
            Ok(history) => history,
            Err(e) => return Err(e),
        };
        if state.current_thread_id != thread_id {
            // Superseded while the fetch was in flight; the result is stale.
            tracing::debug!(%thread_id, "discarding stale history result");
            return Ok(());
        }

        let mut archived = Vec::with_capacity(history.len());
        for raw in &history {
            let Some(mut msg) = normalize(raw, thread_id) else {
                continue;
            };
            // Server rows occasionally carry inconsistent thread ids.
            msg.thread_id = thread_id.to_string();
            if msg.chunk_type == ChunkType::TitleUpdate {
                if let Payload::Title { new_title } = &msg.payload {
                    state
                        .thread_titles
                        .insert(thread_id.to_string(), new_title.clone());
                }
                continue;
            }
            archived.push(msg);
        }
        state.archived = archived;
        Ok(())
    }
}
