//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization. `ClientFrame` is what
//! this client sends; `ServerFrame` is what it receives.

use serde::{Deserialize, Serialize};

use crate::types::RoomId;

/// A single chat log entry
///
/// Appended to the session log strictly in arrival order and never
/// mutated afterwards. System messages (join/leave announcements) flow
/// through the same stream with `is_system` set and no real sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender nickname (None for bare system messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Message body
    pub body: String,
    /// Server-generated announcement rather than a participant message
    #[serde(default)]
    pub is_system: bool,
    /// Sender avatar as a data URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl ChatMessage {
    /// Convenience constructor for a participant message
    pub fn from_user(nickname: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            nickname: Some(nickname.into()),
            body: body.into(),
            is_system: false,
            icon: None,
        }
    }
}

/// Client → Server frame
///
/// All frames this client sends. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Request a new room
    CreateRoom {
        nickname: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
    },
    /// Join an existing room by id
    JoinRoom {
        nickname: String,
        room_id: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
    },
    /// Send a chat message to the current room
    Chat { body: String },
    /// Typing-presence signal (true = started, false = stopped)
    SetTyping { typing: bool },
}

/// Server → Client frame
///
/// All frames this client receives. Handshake responses (`RoomCreated`,
/// `RoomJoined`, `Error`) complete a pending create/join; stream frames
/// (`Chat`, `TypingPresence`) mutate the session log and typing set.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Room created; follow up with a join to obtain history
    RoomCreated { room_id: RoomId },
    /// Room joined; history supersedes any locally buffered messages
    RoomJoined {
        room_id: RoomId,
        history: Vec<ChatMessage>,
    },
    /// Chat message (participant or system) in arrival order
    Chat(ChatMessage),
    /// A participant started or stopped typing
    TypingPresence { nickname: String, typing: bool },
    /// The server denied the last request
    Error { code: RejectCode, message: String },
}

/// Reject codes carried inside `ServerFrame::Error`
///
/// Unknown codes map to `Internal` so new server-side codes never break
/// deserialization of the whole frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    /// Non-existent room id
    RoomNotFound,
    /// Room is at capacity
    RoomFull,
    /// Request the server could not parse
    InvalidMessage,
    /// Anything else
    #[serde(other)]
    Internal,
}
