//! Outbound framing.
//!
//! Source bytes are re-framed as `DATA` frames as they arrive. Nothing is held
//! back between calls: each chunk is framed and handed to the writer, so the
//! writer's pace is the encoder's pace.

use bytes::BytesMut;
use uuid::Uuid;

use super::header::{Command, ProtocolHeader};

/// Default maximum blob size of one outbound frame.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// Frames raw source bytes for one session.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    session_id: Uuid,
    max_payload: usize,
}

impl FrameEncoder {
    /// Create an encoder stamping `session_id` on every frame.
    ///
    /// A `max_payload` of zero is treated as one byte.
    pub fn new(session_id: Uuid, max_payload: usize) -> Self {
        FrameEncoder {
            session_id,
            max_payload: max_payload.max(1),
        }
    }

    /// Frame `chunk` into `dst`, returning the number of frames written.
    pub fn encode(&self, chunk: &[u8], dst: &mut BytesMut) -> usize {
        let mut frames = 0;
        for blob in chunk.chunks(self.max_payload) {
            let header = ProtocolHeader::for_blob(Command::Data, self.session_id, blob);
            dst.reserve(header.encoded_len() + blob.len());
            header.encode_into(dst);
            dst.extend_from_slice(blob);
            frames += 1;
        }
        frames
    }
}
