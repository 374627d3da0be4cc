//! Incremental frame decoder.
//!
//! Bytes may arrive split at any point: a read can hold part of a header, a
//! header plus part of its blob, or several whole frames. Undelivered bytes
//! stay buffered and parsing resumes on the next call.

use bytes::{Buf, Bytes, BytesMut};

use super::header::ProtocolHeader;
use crate::error::ProtocolError;

/// Initial capacity of the receive buffer.
const INITIAL_BUFFER_SIZE: usize = 16 * 1024;

/// One decoded event, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete header.
    Header(ProtocolHeader),
    /// A slice of the current blob.
    Data(Bytes),
    /// The current blob has been fully delivered.
    DataEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingHeader,
    /// Blob bytes still to be delivered for the current frame.
    AwaitingData { remaining: u64 },
}

/// Streaming decoder for the inbound side of a connection.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    state: State,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            state: State::AwaitingHeader,
        }
    }

    /// Receive buffer, for reading socket bytes directly into the decoder.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Append bytes to the receive buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next event from the buffered bytes, or `None` if more input is needed.
    pub fn next_event(&mut self) -> Result<Option<FrameEvent>, ProtocolError> {
        match self.state {
            State::AwaitingHeader => {
                let Some((header, consumed)) = ProtocolHeader::parse(&self.buffer)? else {
                    return Ok(None);
                };
                self.buffer.advance(consumed);
                if let Some(size) = header.size {
                    self.state = State::AwaitingData { remaining: size };
                }
                Ok(Some(FrameEvent::Header(header)))
            }
            State::AwaitingData { remaining: 0 } => {
                self.state = State::AwaitingHeader;
                Ok(Some(FrameEvent::DataEnd))
            }
            State::AwaitingData { remaining } => {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let take = remaining.min(self.buffer.len() as u64) as usize;
                let chunk = self.buffer.split_to(take).freeze();
                self.state = State::AwaitingData {
                    remaining: remaining - take as u64,
                };
                Ok(Some(FrameEvent::Data(chunk)))
            }
        }
    }

    /// Check the decoder state at end of stream.
    ///
    /// Closing between frames is clean; closing inside a header or blob is not.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        match self.state {
            State::AwaitingHeader if self.buffer.is_empty() => Ok(()),
            State::AwaitingHeader => Err(ProtocolError::TruncatedHeader {
                buffered: self.buffer.len(),
            }),
            // A zero-remaining blob only lacks its DataEnd event, which
            // `next_event` yields without further input.
            State::AwaitingData { remaining: 0 } => Ok(()),
            State::AwaitingData { remaining } => Err(ProtocolError::TruncatedBlob { remaining }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::{Command, SIZED_HEADER_LEN};
    use crate::protocol::FrameEncoder;
    use uuid::Uuid;

    fn drain(decoder: &mut FrameDecoder, out: &mut Vec<FrameEvent>) {
        while let Some(event) = decoder.next_event().unwrap() {
            out.push(event);
        }
    }

    /// Merge adjacent `Data` events; their boundaries follow read boundaries.
    fn coalesce(events: Vec<FrameEvent>) -> Vec<FrameEvent> {
        let mut out: Vec<FrameEvent> = Vec::new();
        for event in events {
            match (out.last_mut(), event) {
                (Some(FrameEvent::Data(prev)), FrameEvent::Data(next)) => {
                    let mut joined = BytesMut::from(&prev[..]);
                    joined.extend_from_slice(&next);
                    *prev = joined.freeze();
                }
                (_, event) => out.push(event),
            }
        }
        out
    }

    fn decode_in_chunks(wire: &[u8], sizes: &[usize]) -> Vec<FrameEvent> {
        let mut decoder = FrameDecoder::new();
        let mut events = Vec::new();
        let mut offset = 0;
        let mut i = 0;
        while offset < wire.len() {
            let size = sizes[i % sizes.len()].max(1);
            let end = (offset + size).min(wire.len());
            decoder.feed(&wire[offset..end]);
            drain(&mut decoder, &mut events);
            offset = end;
            i += 1;
        }
        decoder.finish().unwrap();
        events
    }

    fn sample_wire() -> Vec<u8> {
        let id = Uuid::from_bytes([3u8; 16]);
        let mut wire = BytesMut::new();
        ProtocolHeader::bare(Command::Hello, id).encode_into(&mut wire);
        FrameEncoder::new(id, 5).encode(b"helloworld!", &mut wire);
        ProtocolHeader::for_blob(Command::Ack, id, b"").encode_into(&mut wire);
        ProtocolHeader::bare(Command::Bye, id).encode_into(&mut wire);
        wire.to_vec()
    }

    #[test]
    fn test_single_frame() {
        let id = Uuid::nil();
        let mut wire = BytesMut::new();
        ProtocolHeader::for_blob(Command::Data, id, b"helloworld").encode_into(&mut wire);
        wire.extend_from_slice(b"helloworld");

        let mut decoder = FrameDecoder::new();
        decoder.feed(&wire);
        let mut events = Vec::new();
        drain(&mut decoder, &mut events);

        assert_eq!(events.len(), 3);
        match &events[0] {
            FrameEvent::Header(h) => assert_eq!(h.size, Some(10)),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(events[1], FrameEvent::Data(Bytes::from_static(b"helloworld")));
        assert_eq!(events[2], FrameEvent::DataEnd);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_chunking_equivalence() {
        let wire = sample_wire();
        let whole = coalesce(decode_in_chunks(&wire, &[wire.len()]));

        assert_eq!(coalesce(decode_in_chunks(&wire, &[1])), whole);
        assert_eq!(coalesce(decode_in_chunks(&wire, &[7, 1, 33, 2])), whole);
        assert_eq!(coalesce(decode_in_chunks(&wire, &[SIZED_HEADER_LEN + 3])), whole);
    }

    #[test]
    fn test_blob_boundaries_preserved() {
        let events = coalesce(decode_in_chunks(&sample_wire(), &[1]));
        let blobs: Vec<&[u8]> = events
            .iter()
            .filter_map(|e| match e {
                FrameEvent::Data(b) => Some(&b[..]),
                _ => None,
            })
            .collect();
        assert_eq!(blobs, vec![&b"hello"[..], b"world", b"!"]);
    }

    #[test]
    fn test_zero_size_blob() {
        let mut wire = BytesMut::new();
        ProtocolHeader::for_blob(Command::Ack, Uuid::nil(), b"").encode_into(&mut wire);

        let mut decoder = FrameDecoder::new();
        decoder.feed(&wire);
        let mut events = Vec::new();
        drain(&mut decoder, &mut events);

        assert!(matches!(events[0], FrameEvent::Header(_)));
        assert_eq!(events[1], FrameEvent::DataEnd);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_truncated_header_on_eof() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0x02, 0x01, 0, 0]);
        assert_eq!(decoder.next_event(), Ok(None));
        assert_eq!(
            decoder.finish(),
            Err(ProtocolError::TruncatedHeader { buffered: 4 })
        );
    }

    #[test]
    fn test_truncated_blob_on_eof() {
        let mut wire = BytesMut::new();
        ProtocolHeader::for_blob(Command::Data, Uuid::nil(), b"helloworld").encode_into(&mut wire);
        wire.extend_from_slice(b"hello");

        let mut decoder = FrameDecoder::new();
        decoder.feed(&wire);
        let mut events = Vec::new();
        drain(&mut decoder, &mut events);

        assert_eq!(
            decoder.finish(),
            Err(ProtocolError::TruncatedBlob { remaining: 5 })
        );
    }

    #[test]
    fn test_malformed_header() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"GET / HTTP/1.1\r\n");
        assert_eq!(
            decoder.next_event(),
            Err(ProtocolError::UnknownCommand(b'G'))
        );
    }
}
