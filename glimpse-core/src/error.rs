//! Domain-specific error types for the mirroring engine.
//!
//! All fallible operations return `Result<T, GlimpseError>`.
//! No panics on invalid input — every error is typed and recoverable.

use thiserror::Error;

/// The canonical error type for the mirroring engine.
#[derive(Debug, Error)]
pub enum GlimpseError {
    // ── Bootstrap Errors ─────────────────────────────────────────
    /// The agent payload could not be fetched.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The agent payload could not be pushed to the device.
    #[error("push failed: {0}")]
    Push(String),

    /// The device-side agent could not be started.
    #[error("agent start failed: {0}")]
    AgentStart(String),

    /// The attempt was superseded or cancelled while an earlier step
    /// was in flight. Never surfaced to the user.
    #[error("session attempt is stale")]
    StaleAttempt,

    // ── Stream Errors ────────────────────────────────────────────
    /// The video elementary stream violated the framing rules.
    #[error("invalid video stream: {0}")]
    InvalidStream(&'static str),

    /// A video packet exceeded the codec limit.
    #[error("video packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// The decoder rejected a packet.
    #[error("decode error: {0}")]
    Decode(String),

    // ── Channel Errors ───────────────────────────────────────────
    /// The I/O layer reported an error.
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    /// The control channel (or an internal channel) was closed.
    #[error("channel closed")]
    ChannelClosed,

    // ── State Errors ─────────────────────────────────────────────
    /// A session phase transition violated the state machine.
    #[error("invalid session transition: {0}")]
    InvalidTransition(&'static str),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for GlimpseError {
    fn from(s: String) -> Self {
        GlimpseError::Other(s)
    }
}

impl From<&str> for GlimpseError {
    fn from(s: &str) -> Self {
        GlimpseError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GlimpseError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GlimpseError::ChannelClosed
    }
}

impl From<tokio_util::codec::LinesCodecError> for GlimpseError {
    fn from(e: tokio_util::codec::LinesCodecError) -> Self {
        match e {
            tokio_util::codec::LinesCodecError::Io(io) => GlimpseError::Io(io),
            other => GlimpseError::Other(other.to_string()),
        }
    }
}
