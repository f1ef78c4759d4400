//! Error types for the chat session client
//!
//! Defines the session-level error taxonomy plus passthrough variants for
//! transport and serialization failures. Uses thiserror for ergonomic
//! error definitions.

use thiserror::Error;

use crate::message::RejectCode;

/// Session-level errors
///
/// Argument and readiness errors surface synchronously to the caller;
/// transport rejections surface as the failed result of the create/join
/// call. Unsolicited disconnects never raise an error, they only flip
/// the connection status.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation attempted before the transport reported connected
    #[error("Transport not connected")]
    NotReady,

    /// Missing or empty nickname / room id
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A create/join is already pending; operations never queue
    #[error("Another room operation is in progress")]
    OperationInProgress,

    /// The server denied the create/join request
    #[error("Server rejected request ({code:?}): {message}")]
    TransportRejected { code: RejectCode, message: String },

    /// The connection dropped while an operation was pending,
    /// or the initial connect failed
    #[error("Transport lost")]
    TransportLost,

    /// WebSocket protocol error (connect path)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session actor is gone (command channel closed)
    #[error("Session closed")]
    SessionClosed,
}

/// Frame send errors
///
/// Occurs when attempting to queue an outbound frame on an unavailable
/// transport. Chat and typing call sites treat these as best-effort and
/// drop the frame; room handshake requests propagate them instead.
#[derive(Debug, Error)]
pub enum SendError {
    /// The outbound channel has been closed or the handle torn down
    #[error("Channel closed")]
    ChannelClosed,
    /// The outbound channel buffer is full
    #[error("Channel full")]
    ChannelFull,
}
