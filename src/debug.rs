//! Human-readable protocol dumps.
//!
//! Outbound frames are observed by [`DebugTap`], which never touches the
//! bytes it sees. Inbound frames are rendered by [`ProtocolDump`] as they are
//! decoded, with a running SHA-256 over each blob.

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Write;
use tracing::warn;
use uuid::Uuid;

use crate::protocol::header::CHECKSUM_LEN;
use crate::protocol::{Command, FrameDecoder, FrameEvent, ProtocolHeader};

/// Frame direction marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// One printable token of a debug line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugToken {
    Direction(Direction),
    Command(Command),
    Size(u64),
    Session(Uuid),
    Checksum([u8; CHECKSUM_LEN]),
    Digest([u8; 32]),
}

impl fmt::Display for DebugToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugToken::Direction(Direction::Outbound) => f.write_str(">>"),
            DebugToken::Direction(Direction::Inbound) => f.write_str("<<"),
            DebugToken::Command(command) => write!(f, "{command}"),
            DebugToken::Size(size) => write!(f, "size={size}"),
            DebugToken::Session(id) => write!(f, "session={}", id.hyphenated()),
            DebugToken::Checksum(sum) => write!(f, "checksum={}", hex::encode(sum)),
            DebugToken::Digest(digest) => write!(f, "sha256={}", hex::encode(digest)),
        }
    }
}

/// Render a token sequence as a single space-separated line.
pub fn render(tokens: &[DebugToken]) -> String {
    tokens
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tokens describing a header.
pub fn header_tokens(direction: Direction, header: &ProtocolHeader) -> Vec<DebugToken> {
    let mut tokens = Vec::with_capacity(5);
    tokens.push(DebugToken::Direction(direction));
    tokens.push(DebugToken::Command(header.command));
    if let Some(size) = header.size {
        tokens.push(DebugToken::Size(size));
    }
    tokens.push(DebugToken::Session(header.session_id));
    tokens.push(DebugToken::Checksum(header.checksum));
    tokens
}

/// Pass-through observer for outbound bytes.
///
/// Runs its own decoder over the encoded stream and yields one token line per
/// frame header seen. Blob bytes are skipped without inspection.
#[derive(Debug, Default)]
pub struct DebugTap {
    decoder: FrameDecoder,
}

impl DebugTap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a slice of the outbound stream.
    ///
    /// Outbound bytes come from our own encoder, so a decode failure here is
    /// a local bug: it is logged and the tap stops producing lines for the
    /// rest of the slice.
    pub fn observe(&mut self, bytes: &[u8]) -> Vec<Vec<DebugToken>> {
        self.decoder.feed(bytes);
        let mut lines = Vec::new();
        loop {
            match self.decoder.next_event() {
                Ok(Some(FrameEvent::Header(header))) => {
                    lines.push(header_tokens(Direction::Outbound, &header));
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Debug tap could not decode outbound bytes");
                    self.decoder = FrameDecoder::new();
                    break;
                }
            }
        }
        lines
    }
}

/// Writes protocol dump lines to `out`.
///
/// Inbound headers are printed as they arrive; each inbound blob is hashed
/// and its digest printed once the blob ends.
pub struct ProtocolDump<W: Write> {
    out: W,
    hasher: Option<Sha256>,
}

impl<W: Write> ProtocolDump<W> {
    pub fn new(out: W) -> Self {
        ProtocolDump { out, hasher: None }
    }

    /// Render one decoded event.
    pub fn inbound(&mut self, event: &FrameEvent) {
        match event {
            FrameEvent::Header(header) => {
                let line = render(&header_tokens(Direction::Inbound, header));
                self.write_line(&line);
                self.hasher = header.size.map(|_| Sha256::new());
            }
            FrameEvent::Data(bytes) => {
                if let Some(hasher) = self.hasher.as_mut() {
                    hasher.update(bytes);
                }
            }
            FrameEvent::DataEnd => {
                if let Some(hasher) = self.hasher.take() {
                    let digest: [u8; 32] = hasher.finalize().into();
                    let line = render(&[
                        DebugToken::Direction(Direction::Inbound),
                        DebugToken::Digest(digest),
                    ]);
                    self.write_line(&line);
                }
            }
        }
    }

    /// Print outbound token lines produced by a [`DebugTap`].
    pub fn outbound(&mut self, lines: &[Vec<DebugToken>]) {
        for tokens in lines {
            let line = render(tokens);
            self.write_line(&line);
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{line}").and_then(|_| self.out.flush()) {
            warn!(error = %e, "Failed to write protocol dump");
        }
    }
}
