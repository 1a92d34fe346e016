use mnemo_protocol::Message;
use tokio::sync::mpsc;

/// Updates emitted by a session to the rendering layer.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// An incremental text fragment for an in-flight assistant message.
    Delta { chunk_id: String, text: String },
    /// A message reached its final form and was archived.
    Finalized(Message),
    /// A thread was renamed via a `title_update` chunk.
    ThreadTitle { thread_id: String, title: String },
    /// The current reply stream closed (sentinel, error, or cancellation).
    StreamEnded { thread_id: String },
}

pub(crate) fn emit(tx: &mpsc::Sender<SessionUpdate>, update: SessionUpdate) {
    match tx.try_send(update) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("backpressure: dropping session update");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}
