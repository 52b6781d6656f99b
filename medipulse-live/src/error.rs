//! Error types for live voice sessions.

use thiserror::Error;

/// Result type for live session operations.
pub type Result<T> = std::result::Result<T, LiveError>;

/// Errors that can occur while running a live voice session.
#[derive(Error, Debug)]
pub enum LiveError {
    /// Microphone access was refused by the user or the OS.
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// An audio device could not be acquired or failed while running.
    #[error("Audio device error: {0}")]
    DeviceError(String),

    /// The network session failed to open or dropped.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// An inbound audio payload could not be decoded.
    #[error("Audio decode error: {0}")]
    DecodeError(String),

    /// A host tool handler failed.
    #[error("Tool execution error: {0}")]
    ToolExecutionError(String),

    /// The remote side sent something we could not interpret.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The operation is not legal in the current session state.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Session not connected.
    #[error("Session not connected")]
    NotConnected,

    /// Session already closed.
    #[error("Session already closed")]
    SessionClosed,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl LiveError {
    /// Create a new permission error.
    pub fn permission<S: Into<String>>(msg: S) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a new device error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceError(msg.into())
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a new decode error.
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::DecodeError(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new invalid state error.
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Whether this error means the user refused microphone access.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

impl From<base64::DecodeError> for LiveError {
    fn from(err: base64::DecodeError) -> Self {
        Self::DecodeError(err.to_string())
    }
}
