// src/core/errors.rs

//! Defines the primary error type for the coordination layer.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The main error enum, representing every failure the coordination layer reports.
///
/// Business outcomes of engine commands are never errors: they travel as normal
/// reply payloads. Only configuration, transport and protocol failures end up here.
#[derive(Error, Debug)]
pub enum MoonshipError {
    /// A configuration problem detected before any network attempt.
    #[error("Start-up error: {0}")]
    StartUp(String),

    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// Connection loss, handshake failure or a network timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A malformed frame or payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Any other error reply sent back by the store.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// No reply arrived on the response channel before the deadline.
    #[error("No response on channel '{channel}' within {timeout:?}")]
    Timeout { channel: String, timeout: Duration },

    #[error("Connection to the shared store is not open")]
    NotOpen,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MoonshipError {
    /// Returns true for the "no backend responded" case of a request/reply call.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MoonshipError::Timeout { .. })
    }

    /// Maps an error reply from the store onto the matching variant.
    pub fn from_store_reply(message: &str) -> Self {
        if message.starts_with("WRONGTYPE") {
            MoonshipError::WrongType
        } else if message.starts_with("EXECABORT") {
            MoonshipError::TransactionAborted(message.to_string())
        } else {
            MoonshipError::Store(message.to_string())
        }
    }
}

// `std::io::Error` is not cloneable, so it is kept behind an Arc.
impl Clone for MoonshipError {
    fn clone(&self) -> Self {
        match self {
            MoonshipError::StartUp(s) => MoonshipError::StartUp(s.clone()),
            MoonshipError::Io(e) => MoonshipError::Io(Arc::clone(e)),
            MoonshipError::Transport(s) => MoonshipError::Transport(s.clone()),
            MoonshipError::Protocol(s) => MoonshipError::Protocol(s.clone()),
            MoonshipError::IncompleteData => MoonshipError::IncompleteData,
            MoonshipError::WrongType => MoonshipError::WrongType,
            MoonshipError::Store(s) => MoonshipError::Store(s.clone()),
            MoonshipError::TransactionAborted(s) => MoonshipError::TransactionAborted(s.clone()),
            MoonshipError::Timeout { channel, timeout } => MoonshipError::Timeout {
                channel: channel.clone(),
                timeout: *timeout,
            },
            MoonshipError::NotOpen => MoonshipError::NotOpen,
            MoonshipError::InvalidState(s) => MoonshipError::InvalidState(s.clone()),
            MoonshipError::Serialization(s) => MoonshipError::Serialization(s.clone()),
        }
    }
}

impl PartialEq for MoonshipError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MoonshipError::StartUp(s1), MoonshipError::StartUp(s2)) => s1 == s2,
            (MoonshipError::Io(e1), MoonshipError::Io(e2)) => e1.to_string() == e2.to_string(),
            (MoonshipError::Transport(s1), MoonshipError::Transport(s2)) => s1 == s2,
            (MoonshipError::Protocol(s1), MoonshipError::Protocol(s2)) => s1 == s2,
            (MoonshipError::Store(s1), MoonshipError::Store(s2)) => s1 == s2,
            (MoonshipError::TransactionAborted(s1), MoonshipError::TransactionAborted(s2)) => {
                s1 == s2
            }
            (
                MoonshipError::Timeout {
                    channel: c1,
                    timeout: t1,
                },
                MoonshipError::Timeout {
                    channel: c2,
                    timeout: t2,
                },
            ) => c1 == c2 && t1 == t2,
            (MoonshipError::InvalidState(s1), MoonshipError::InvalidState(s2)) => s1 == s2,
            (MoonshipError::Serialization(s1), MoonshipError::Serialization(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for MoonshipError {
    fn from(e: std::io::Error) -> Self {
        MoonshipError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for MoonshipError {
    fn from(e: serde_json::Error) -> Self {
        MoonshipError::Serialization(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for MoonshipError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        MoonshipError::Transport("operation timed out".to_string())
    }
}

impl From<std::string::FromUtf8Error> for MoonshipError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        MoonshipError::Protocol(format!("reply is not valid UTF-8: {e}"))
    }
}
