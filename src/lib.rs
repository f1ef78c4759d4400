//! Room-based WebSocket Chat Session Client Library
//!
//! A chat session client built with tokio-tungstenite using the Actor
//! pattern for state management. Owns the full lifecycle of one logical
//! chat session: connection, room create/join handshakes, the inbound
//! message stream, debounced typing presence, and reconnect/rejoin
//! recovery.
//!
//! # Features
//! - WebSocket connection handling with explicit teardown
//! - Room creation (create-then-join for authoritative history)
//! - Room joining with wholesale history replacement
//! - Real-time chat messaging (best-effort sends)
//! - Debounced typing indicators
//! - Reconnect with automatic rejoin of the remembered room
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Session` is the actor owning all state and the transport handle
//! - `SessionHandle` is the cloneable UI-facing surface; lifecycle calls
//!   resolve over oneshot channels when the handshake frames arrive
//! - State is observed through `watch` snapshots, never shared mutably
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use chat_client_v1::{Session, WsConnector};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = Session::spawn(WsConnector::new("ws://127.0.0.1:8080"))
//!         .await
//!         .unwrap();
//!
//!     let room_id = handle.create_room("Alice", None).await.unwrap();
//!     println!("Share this id: {}", room_id);
//!
//!     handle.notify_typing().await;
//!     handle.send_message("hello!").await;
//!
//!     let mut watch = handle.watch();
//!     while watch.changed().await.is_ok() {
//!         for msg in &watch.borrow().messages {
//!             println!("{:?}", msg);
//!         }
//!     }
//! }
//! ```

pub mod error;
pub mod message;
pub mod session;
pub mod state;
pub mod transport;
pub mod typing;
pub mod types;

// Re-export main types for convenience
pub use error::{SendError, SessionError};
pub use message::{ChatMessage, ClientFrame, RejectCode, ServerFrame};
pub use session::{Session, SessionCommand, SessionHandle};
pub use state::{SessionSnapshot, SessionState};
pub use transport::{Connector, TransportEvent, TransportHandle, WsConnector};
pub use typing::{TypingDebouncer, TypingSignal, TYPING_DEBOUNCE};
pub use types::{ConnectionStatus, Identity, PendingOperation, RoomId};
