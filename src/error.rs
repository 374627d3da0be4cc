//! Error types for replay runs.
//!
//! A run fails as a whole: the first error raised by any session is the error
//! reported to the user, and no partial statistics are produced.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while decoding the inbound frame stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Command byte does not map to a known command.
    #[error("unknown command code 0x{0:02x}")]
    UnknownCommand(u8),
    /// Reserved flag bits are set.
    #[error("invalid header flags 0b{0:08b}")]
    InvalidFlags(u8),
    /// Stream ended in the middle of a header.
    #[error("connection closed inside a frame header ({buffered} bytes buffered)")]
    TruncatedHeader { buffered: usize },
    /// Stream ended before the declared blob was delivered.
    #[error("connection closed with {remaining} blob bytes outstanding")]
    TruncatedBlob { remaining: u64 },
}

/// Top-level error for a replay run.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Invalid or missing configuration, including the source file.
    #[error("configuration error: {0}")]
    Config(String),

    /// Source file could not be read.
    #[error("failed to read source '{}': {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed or unresolvable server address.
    #[error("invalid address '{input}': {reason}")]
    Address { input: String, reason: String },

    /// Transport failure (connect, read, write, reset).
    #[error("network error with {peer}: {source}")]
    Network {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Inbound bytes could not be framed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ReplayError {
    pub(crate) fn network(peer: SocketAddr) -> impl FnOnce(std::io::Error) -> ReplayError {
        move |source| ReplayError::Network { peer, source }
    }

    pub(crate) fn address(input: &str, reason: impl Into<String>) -> ReplayError {
        ReplayError::Address {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
