use std::path::PathBuf;

use harpio_frame::{FrameError, MessageType};
use harpio_transport::TransportError;

/// Errors that can occur in device operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The session has no open link.
    #[error("device not connected")]
    NotConnected,

    /// The link may hold stray bytes from a failed exchange.
    #[error("protocol desynchronised: {reason} (resync or reconnect first)")]
    ProtocolDesync { reason: String },

    /// The device answered with ReadError/WriteError.
    #[error("device rejected {message_type} of register {address}")]
    ErrorReply {
        address: u8,
        message_type: MessageType,
    },

    /// A well-formed frame arrived that does not answer the request.
    #[error("unexpected reply: sent {request}, received {reply}")]
    UnexpectedReply { request: String, reply: String },

    /// WHO_AM_I does not match the configured identity.
    #[error("device identity mismatch (expected WHO_AM_I {expected}, got {actual})")]
    IdentityMismatch { expected: u16, actual: u16 },

    /// A register name or address is not in the register map.
    #[error("unknown register: {0}")]
    UnknownRegister(String),

    /// The register map failed validation.
    #[error("invalid register map: {0}")]
    RegisterMap(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The communication log could not be opened.
    #[error("cannot open communication log {path}: {source}")]
    CommLog {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeviceError {
    /// Failures a bounded retry (after resync) may clear.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeviceError::Transport(err) => err.is_timeout(),
            DeviceError::Frame(err) => err.is_checksum() || err.is_format(),
            DeviceError::ProtocolDesync { .. } | DeviceError::UnexpectedReply { .. } => true,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DeviceError::Transport(err) if err.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
