//! Frame header layout.
//!
//! ```text
//! offset  len  field
//! 0       1    command code
//! 1       1    flags (bit 0: size present)
//! 2       16   session id
//! 18      16   checksum
//! 34      8    size, big-endian (only when bit 0 is set)
//! ```

use bytes::{BufMut, BytesMut};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::error::ProtocolError;

/// Length of the session identifier field.
pub const SESSION_ID_LEN: usize = 16;

/// Length of the checksum field.
pub const CHECKSUM_LEN: usize = 16;

/// Header length when no blob follows.
pub const BASE_HEADER_LEN: usize = 2 + SESSION_ID_LEN + CHECKSUM_LEN;

/// Header length when a blob follows.
pub const SIZED_HEADER_LEN: usize = BASE_HEADER_LEN + 8;

const FLAG_HAS_SIZE: u8 = 0x01;
const KNOWN_FLAGS: u8 = FLAG_HAS_SIZE;

/// Protocol command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Hello,
    Data,
    Ack,
    Ping,
    Bye,
}

impl Command {
    pub fn code(self) -> u8 {
        match self {
            Command::Hello => 0x01,
            Command::Data => 0x02,
            Command::Ack => 0x03,
            Command::Ping => 0x04,
            Command::Bye => 0x05,
        }
    }

    pub fn from_code(code: u8) -> Result<Command, ProtocolError> {
        match code {
            0x01 => Ok(Command::Hello),
            0x02 => Ok(Command::Data),
            0x03 => Ok(Command::Ack),
            0x04 => Ok(Command::Ping),
            0x05 => Ok(Command::Bye),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Hello => "HELLO",
            Command::Data => "DATA",
            Command::Ack => "ACK",
            Command::Ping => "PING",
            Command::Bye => "BYE",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded frame header.
///
/// `size` is `Some` if and only if a data blob follows the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolHeader {
    pub command: Command,
    pub size: Option<u64>,
    pub session_id: Uuid,
    pub checksum: [u8; CHECKSUM_LEN],
}

impl ProtocolHeader {
    /// Header for a frame carrying `blob`, checksummed with truncated SHA-256.
    pub fn for_blob(command: Command, session_id: Uuid, blob: &[u8]) -> Self {
        ProtocolHeader {
            command,
            size: Some(blob.len() as u64),
            session_id,
            checksum: checksum(blob),
        }
    }

    /// Header for a frame with no blob.
    #[allow(dead_code)]
    pub fn bare(command: Command, session_id: Uuid) -> Self {
        ProtocolHeader {
            command,
            size: None,
            session_id,
            checksum: checksum(&[]),
        }
    }

    /// Encoded length of this header.
    pub fn encoded_len(&self) -> usize {
        if self.size.is_some() {
            SIZED_HEADER_LEN
        } else {
            BASE_HEADER_LEN
        }
    }

    /// Append the wire form of this header to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.command.code());
        dst.put_u8(if self.size.is_some() { FLAG_HAS_SIZE } else { 0 });
        dst.put_slice(self.session_id.as_bytes());
        dst.put_slice(&self.checksum);
        if let Some(size) = self.size {
            dst.put_u64(size);
        }
    }

    /// Parse a header from the front of `input`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, otherwise the header and
    /// the number of bytes it occupied.
    pub fn parse(input: &[u8]) -> Result<Option<(ProtocolHeader, usize)>, ProtocolError> {
        if input.len() < 2 {
            return Ok(None);
        }

        // Validate the fixed prefix as soon as it is available so garbage is
        // rejected without waiting for a full header.
        let command = Command::from_code(input[0])?;
        let flags = input[1];
        if flags & !KNOWN_FLAGS != 0 {
            return Err(ProtocolError::InvalidFlags(flags));
        }

        let has_size = flags & FLAG_HAS_SIZE != 0;
        let needed = if has_size {
            SIZED_HEADER_LEN
        } else {
            BASE_HEADER_LEN
        };
        if input.len() < needed {
            return Ok(None);
        }

        let mut session = [0u8; SESSION_ID_LEN];
        session.copy_from_slice(&input[2..2 + SESSION_ID_LEN]);
        let mut checksum = [0u8; CHECKSUM_LEN];
        checksum.copy_from_slice(&input[2 + SESSION_ID_LEN..BASE_HEADER_LEN]);

        let size = if has_size {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&input[BASE_HEADER_LEN..SIZED_HEADER_LEN]);
            Some(u64::from_be_bytes(raw))
        } else {
            None
        };

        Ok(Some((
            ProtocolHeader {
                command,
                size,
                session_id: Uuid::from_bytes(session),
                checksum,
            },
            needed,
        )))
    }
}

/// Truncated SHA-256 used for the header checksum field.
pub fn checksum(blob: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(blob);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        for command in [
            Command::Hello,
            Command::Data,
            Command::Ack,
            Command::Ping,
            Command::Bye,
        ] {
            assert_eq!(Command::from_code(command.code()), Ok(command));
        }
        assert_eq!(
            Command::from_code(0x00),
            Err(ProtocolError::UnknownCommand(0x00))
        );
    }

    #[test]
    fn test_encode_sized_header() {
        let id = Uuid::from_bytes([7u8; 16]);
        let header = ProtocolHeader::for_blob(Command::Data, id, b"abc");
        let mut buf = BytesMut::new();
        header.encode_into(&mut buf);

        assert_eq!(buf.len(), SIZED_HEADER_LEN);
        assert_eq!(buf[0], 0x02);
        assert_eq!(buf[1], 0x01);
        assert_eq!(&buf[2..18], &[7u8; 16]);
        assert_eq!(&buf[34..42], &3u64.to_be_bytes());

        let (parsed, consumed) = ProtocolHeader::parse(&buf).unwrap().unwrap();
        assert_eq!(parsed, header);
        assert_eq!(consumed, SIZED_HEADER_LEN);
    }

    #[test]
    fn test_parse_bare_header() {
        let header = ProtocolHeader::bare(Command::Ping, Uuid::nil());
        let mut buf = BytesMut::new();
        header.encode_into(&mut buf);
        assert_eq!(buf.len(), BASE_HEADER_LEN);

        let (parsed, consumed) = ProtocolHeader::parse(&buf).unwrap().unwrap();
        assert_eq!(parsed.size, None);
        assert_eq!(consumed, BASE_HEADER_LEN);
    }

    #[test]
    fn test_parse_incomplete() {
        let header = ProtocolHeader::for_blob(Command::Data, Uuid::nil(), b"x");
        let mut buf = BytesMut::new();
        header.encode_into(&mut buf);

        assert_eq!(ProtocolHeader::parse(&buf[..1]), Ok(None));
        assert_eq!(ProtocolHeader::parse(&buf[..BASE_HEADER_LEN]), Ok(None));
        assert_eq!(ProtocolHeader::parse(&buf[..SIZED_HEADER_LEN - 1]), Ok(None));
    }

    #[test]
    fn test_parse_rejects_garbage_early() {
        assert_eq!(
            ProtocolHeader::parse(b"\xffx"),
            Err(ProtocolError::UnknownCommand(0xff))
        );
        assert_eq!(
            ProtocolHeader::parse(b"\x02\x06"),
            Err(ProtocolError::InvalidFlags(0x06))
        );
    }

    #[test]
    fn test_checksum_is_truncated_sha256() {
        let full = Sha256::digest(b"helloworld");
        assert_eq!(&checksum(b"helloworld")[..], &full[..CHECKSUM_LEN]);
    }
}
