//! Framed wire protocol.
//!
//! A frame is a header followed by an optional data blob. The protocol has no
//! end-of-response marker; callers decide when a peer has finished.

pub mod decoder;
pub mod encoder;
pub mod header;

pub use decoder::{FrameDecoder, FrameEvent};
pub use encoder::{FrameEncoder, DEFAULT_MAX_PAYLOAD};
pub use header::{Command, ProtocolHeader};
