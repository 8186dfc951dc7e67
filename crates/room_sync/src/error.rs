use shared::error::ApiException;
use thiserror::Error;

/// Page-level failure: without a snapshot the room view has no baseline to
/// reconcile against, so this is distinct from transient mutation errors.
#[derive(Debug, Error)]
#[error("failed to load history for room {room_id}: {source}")]
pub struct SnapshotError {
    pub room_id: i64,
    #[source]
    pub source: anyhow::Error,
}

/// A send/edit/delete/react/pin call was rejected or never reached the
/// server. The optimistic local change has already been rolled back when
/// this surfaces; the message is dismissible, never fatal.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("{detail}")]
    Rejected { detail: String },
    #[error("message {message_id} is no longer in this room")]
    MissingMessage { message_id: i64 },
    #[error("request failed: {source}")]
    Transport {
        #[source]
        source: anyhow::Error,
    },
}

impl MutationError {
    pub fn from_backend(err: anyhow::Error) -> Self {
        match err.downcast::<ApiException>() {
            Ok(api) => Self::Rejected { detail: api.detail },
            Err(source) => Self::Transport { source },
        }
    }
}
