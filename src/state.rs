//! Session state and inbound stream dispatch
//!
//! All session fields live in one struct mutated from one place (the
//! session actor); observers get immutable snapshots through a watch
//! channel rather than shared references.

use std::collections::BTreeSet;

use crate::message::{ChatMessage, ServerFrame};
use crate::types::{ConnectionStatus, Identity, PendingOperation, RoomId};

/// The authoritative record of one chat session
///
/// Ordering guarantee: `messages` holds arrival order, append-only, no
/// deduplication. Local sends are not inserted optimistically; every
/// message, including the sender's own, enters via the inbound stream so
/// every participant sees the same order.
#[derive(Debug, Default)]
pub struct SessionState {
    pub connection_status: ConnectionStatus,
    pub room_id: Option<RoomId>,
    pub messages: Vec<ChatMessage>,
    pub typing_users: BTreeSet<String>,
    pub pending: PendingOperation,
    /// Remembered after a successful create/join, reused by reconnect
    pub identity: Option<Identity>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a stream frame (chat or typing presence)
    ///
    /// Handshake frames are consumed by the session actor's pending
    /// operation instead and must not reach this function; they are
    /// ignored here so a stray one cannot corrupt state.
    pub fn apply_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Chat(msg) => {
                self.messages.push(msg);
            }
            ServerFrame::TypingPresence { nickname, typing } => {
                // Set semantics: duplicates and absent removals are no-ops
                if typing {
                    self.typing_users.insert(nickname);
                } else {
                    self.typing_users.remove(&nickname);
                }
            }
            ServerFrame::RoomCreated { .. }
            | ServerFrame::RoomJoined { .. }
            | ServerFrame::Error { .. } => {}
        }
    }

    /// Commit a successful join: history replaces the log wholesale
    pub fn enter_room(&mut self, room_id: RoomId, history: Vec<ChatMessage>, identity: Identity) {
        self.room_id = Some(room_id);
        self.messages = history;
        self.typing_users.clear();
        self.identity = Some(identity);
    }

    /// Clear all room-scoped state (leave, or the start of a rejoin)
    pub fn reset_room(&mut self) {
        self.room_id = None;
        self.messages.clear();
        self.typing_users.clear();
    }

    /// A disconnect is recoverable: room id, log and typing set survive
    /// so the caller can decide to reconnect
    pub fn connection_lost(&mut self) {
        self.connection_status = ConnectionStatus::Disconnected;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection_status: self.connection_status,
            room_id: self.room_id.clone(),
            messages: self.messages.clone(),
            typing_users: self.typing_users.clone(),
            pending: self.pending,
        }
    }
}

/// Read-only projection of the session state, published after every
/// mutation. This is the whole read surface exposed to the UI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub connection_status: ConnectionStatus,
    pub room_id: Option<RoomId>,
    pub messages: Vec<ChatMessage>,
    pub typing_users: BTreeSet<String>,
    pub pending: PendingOperation,
}
