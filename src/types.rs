//! Basic type definitions for the chat session client
//!
//! Provides the session vocabulary:
//! - `RoomId`: opaque server-issued room identifier
//! - `Identity`: nickname plus optional avatar, remembered for rejoin
//! - `ConnectionStatus` / `PendingOperation`: the two session state enums

use serde::{Deserialize, Serialize};

/// Opaque room identifier (newtype pattern)
///
/// Issued by the server on room creation; the client never mints one.
/// Whitespace is trimmed on construction since identifiers are usually
/// pasted by hand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Create a RoomId from user input (trims surrounding whitespace)
    pub fn from_input(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who this session presents itself as
///
/// Remembered by the session after a successful create/join so that
/// `reconnect` can rejoin the same room with the same identity.
/// The avatar travels as a data-URI string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub nickname: String,
    pub icon: Option<String>,
}

impl Identity {
    pub fn new(nickname: impl Into<String>, icon: Option<String>) -> Self {
        Self {
            nickname: nickname.into(),
            icon,
        }
    }
}

/// Transport connectivity as observed by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// The one create/join operation that may be in flight
///
/// Acts as a mutex over lifecycle transitions: only
/// `None -> Creating -> None` and `None -> Joining -> None` are legal,
/// and a second operation started while one is pending is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingOperation {
    #[default]
    None,
    Creating,
    Joining,
}

impl PendingOperation {
    pub fn is_pending(&self) -> bool {
        !matches!(self, PendingOperation::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_trims_input() {
        let id = RoomId::from_input("  R42 \n");
        assert_eq!(id.as_str(), "R42");
    }

    #[test]
    fn test_room_id_empty() {
        assert!(RoomId::from_input("   ").is_empty());
        assert!(!RoomId::from_input("abc").is_empty());
    }

    #[test]
    fn test_pending_operation_default_is_none() {
        assert_eq!(PendingOperation::default(), PendingOperation::None);
        assert!(!PendingOperation::default().is_pending());
        assert!(PendingOperation::Creating.is_pending());
        assert!(PendingOperation::Joining.is_pending());
    }

    #[test]
    fn test_connection_status_default() {
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
    }
}
