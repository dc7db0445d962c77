//! DBGP error types.

use thiserror::Error;

/// Errors from DBGP client operations.
#[derive(Debug, Error)]
pub enum DbgpError {
    /// Inbound bytes did not form a valid length-prefixed frame.
    #[error("framing error: {0}")]
    Framing(String),

    /// An outbound command was malformed and was not sent.
    #[error("invalid command: {0}")]
    Validation(String),

    /// An inbound message was not well-formed XML, or a path expression
    /// could not be parsed.
    #[error("invalid XML message: {0}")]
    Parse(String),

    /// The engine violated the protocol. The session cannot be reused.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The engine rejected or could not perform a command.
    #[error("engine error{}: {message}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
    Engine {
        /// DBGP error code, when the engine supplied one.
        code: Option<u32>,
        /// Description of the failure.
        message: String,
    },

    /// Transport-level communication error.
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No response arrived before the command deadline.
    #[error("command timed out: {command} (transaction {transaction_id})")]
    Timeout {
        /// The command that timed out.
        command: String,
        /// Its transaction id.
        transaction_id: u32,
    },

    /// The session ended while the command was still pending.
    #[error("session closed")]
    SessionClosed,
}

impl DbgpError {
    /// Build an [`Engine`](DbgpError::Engine) error without a code.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            code: None,
            message: message.into(),
        }
    }

    /// Whether this error ends the session.
    ///
    /// Framing and parse failures only drop the offending message; engine,
    /// validation and timeout errors belong to a single command.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Transport(_) | Self::Io(_))
    }
}

impl Clone for DbgpError {
    fn clone(&self) -> Self {
        match self {
            Self::Framing(m) => Self::Framing(m.clone()),
            Self::Validation(m) => Self::Validation(m.clone()),
            Self::Parse(m) => Self::Parse(m.clone()),
            Self::Protocol(m) => Self::Protocol(m.clone()),
            Self::Engine { code, message } => Self::Engine {
                code: *code,
                message: message.clone(),
            },
            Self::Transport(m) => Self::Transport(m.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Timeout {
                command,
                transaction_id,
            } => Self::Timeout {
                command: command.clone(),
                transaction_id: *transaction_id,
            },
            Self::SessionClosed => Self::SessionClosed,
        }
    }
}
