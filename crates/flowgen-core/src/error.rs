//! Bridge error types
//!
//! Every pending operation settles with either its outcome or a `BridgeError`.
//! The enum is `Clone` because one transport failure rejects many waiters.

use serde_json::Value;
use thiserror::Error;

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced by the worker bridge
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    /// Spawn failure, unexpected exit, or a write to a closed channel
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        context: Option<String>,
    },

    /// A line that could not be understood
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        context: Option<String>,
    },

    /// The worker never announced readiness
    #[error("Worker did not become ready within {millis} ms")]
    HandshakeTimeout { millis: u64 },

    /// A run is already in flight
    #[error("A generation run is already in progress")]
    Busy,

    /// A liveness probe went unanswered
    #[error("Worker did not answer the liveness probe within {millis} ms")]
    LivenessTimeout { millis: u64 },

    /// The worker reported a failure for an operation
    #[error("{message}")]
    WorkerReported {
        message: String,
        code: Option<String>,
        details: Option<Value>,
    },

    /// The worker asked for human input, which this protocol cannot answer
    #[error("Worker requested interactive input: {question}")]
    UnsupportedInteraction {
        question: String,
        fields: Vec<Value>,
    },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        context: Option<String>,
    },
}

impl BridgeError {
    /// Create a new Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            context: None,
        }
    }

    /// Create a new Protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            context: None,
        }
    }

    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            context: None,
        }
    }

    /// Create a Config error with context
    pub fn config_with_context(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Create a WorkerReported error
    pub fn worker_reported(
        message: impl Into<String>,
        code: Option<String>,
        details: Option<Value>,
    ) -> Self {
        Self::WorkerReported {
            message: message.into(),
            code,
            details,
        }
    }

    /// Attach context to errors that carry it
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = Some(context.into());
        match &mut self {
            Self::Transport { context: c, .. } => *c = ctx,
            Self::Protocol { context: c, .. } => *c = ctx,
            Self::Config { context: c, .. } => *c = ctx,
            Self::HandshakeTimeout { .. }
            | Self::Busy
            | Self::LivenessTimeout { .. }
            | Self::WorkerReported { .. }
            | Self::UnsupportedInteraction { .. } => {}
        }
        self
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "FLOWGEN_TRANSPORT",
            Self::Protocol { .. } => "FLOWGEN_PROTOCOL",
            Self::HandshakeTimeout { .. } => "FLOWGEN_HANDSHAKE_TIMEOUT",
            Self::Busy => "FLOWGEN_BUSY",
            Self::LivenessTimeout { .. } => "FLOWGEN_LIVENESS_TIMEOUT",
            Self::WorkerReported { .. } => "FLOWGEN_WORKER_REPORTED",
            Self::UnsupportedInteraction { .. } => "FLOWGEN_UNSUPPORTED_INTERACTION",
            Self::Config { .. } => "FLOWGEN_CONFIG",
        }
    }

    /// Context attached to the error, if any
    pub fn context(&self) -> Option<&str> {
        match self {
            Self::Transport { context, .. }
            | Self::Protocol { context, .. }
            | Self::Config { context, .. } => context.as_deref(),
            _ => None,
        }
    }

    /// Whether the error ends the worker session it occurred on.
    ///
    /// Terminal errors reject every pending operation; a new bridge is
    /// required to talk to the worker again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::HandshakeTimeout { .. })
    }

    /// Text suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport { .. } | Self::HandshakeTimeout { .. } => {
                "The code generation worker is unavailable. Restart the session and try again."
                    .to_string()
            }
            Self::Busy => self.to_string(),
            Self::WorkerReported { message, .. } => message.clone(),
            Self::LivenessTimeout { .. } => "The code generation worker is not responding.".to_string(),
            Self::UnsupportedInteraction { question, .. } => format!(
                "The worker asked a question that cannot be answered here: {question}"
            ),
            Self::Protocol { message, .. } | Self::Config { message, .. } => message.clone(),
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::protocol(err.to_string())
    }
}
