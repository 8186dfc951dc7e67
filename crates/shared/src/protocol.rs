use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{FileId, MessageId, RoomId, SenderRef, ViewerId};

/// One emoji reaction by one viewer. A message never carries two entries
/// with the same `viewer_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEntry {
    pub viewer_id: ViewerId,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub file_id: FileId,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A message as the server reports it, in snapshots, mutation responses and
/// push echoes alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub sender: SenderRef,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentRecord>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub reactions: Vec<ReactionEntry>,
    /// Correlation ref echoed back for messages this client sent
    /// optimistically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub messages: Vec<MessageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageBody {
    pub room_id: RoomId,
    pub body: String,
    /// Client-generated correlation id; the server echoes it in the created
    /// record and in the push echo so the optimistic placeholder can be
    /// resolved without timing heuristics.
    pub client_ref: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditMessageBody {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactBody {
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinBody {
    pub pinned: bool,
}

/// Frames the server pushes down the persistent channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PushFrame {
    MessageCreated {
        message: MessageRecord,
    },
    MessageUpdated {
        room_id: RoomId,
        message_id: MessageId,
        body: String,
        is_edited: bool,
    },
    MessageDeleted {
        room_id: RoomId,
        message_id: MessageId,
    },
    ReactionUpdated {
        room_id: RoomId,
        message_id: MessageId,
        reactions: Vec<ReactionEntry>,
    },
    Typing {
        room_id: RoomId,
        display_name: String,
    },
}

/// Frames the client sends up the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    Typing { room_id: RoomId },
}
