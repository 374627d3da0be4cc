//! One replay session over one connection.
//!
//! The session runs two sides at once on its own task:
//!
//! ```text
//! source file -> [bounded queue] -> FrameEncoder -> DebugTap -> socket
//! socket -> FrameDecoder -> receive instrumentation
//! ```
//!
//! The protocol has no end-of-response marker. An idle timer decides when the
//! peer is done: it starts at connect, a received header cancels it and the
//! end of a received blob re-arms it. When it fires the write side is flushed
//! and shut down.

mod idle;

pub use idle::{IdleTimer, DEFAULT_IDLE_TIMEOUT};

use bytes::{Bytes, BytesMut};
use std::io::Stdout;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::debug::{DebugTap, ProtocolDump};
use crate::error::ReplayError;
use crate::protocol::{FrameDecoder, FrameEncoder, FrameEvent, DEFAULT_MAX_PAYLOAD};
use crate::stats::JobResult;

/// Source chunks queued between the file reader and the socket writer.
const SOURCE_QUEUE_DEPTH: usize = 4;

/// Default size of one source read.
pub const DEFAULT_READ_CHUNK: usize = 64 * 1024;

/// Per-session tunables.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub idle_timeout: Duration,
    pub max_payload: usize,
    pub read_chunk: usize,
    pub debug_protocol: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
            read_chunk: DEFAULT_READ_CHUNK,
            debug_protocol: false,
        }
    }
}

/// Replays one source file against one address.
#[derive(Debug, Clone)]
pub struct SessionPlayer {
    source: PathBuf,
    address: SocketAddr,
    options: SessionOptions,
}

impl SessionPlayer {
    pub fn new(source: impl Into<PathBuf>, address: SocketAddr, options: SessionOptions) -> Self {
        SessionPlayer {
            source: source.into(),
            address,
            options,
        }
    }

    /// Connect, replay the source and wait for the peer to go quiet.
    pub async fn play(&self) -> Result<JobResult, ReplayError> {
        let file = File::open(&self.source)
            .await
            .map_err(|e| source_error(&self.source, e))?;

        let stream = TcpStream::connect(self.address)
            .await
            .map_err(ReplayError::network(self.address))?;
        stream
            .set_nodelay(true)
            .map_err(ReplayError::network(self.address))?;

        let (reader, writer) = stream.into_split();
        drive(file, &self.source, reader, writer, self.address, &self.options).await
    }
}

fn source_error(path: &Path, source: std::io::Error) -> ReplayError {
    ReplayError::Source {
        path: path.to_path_buf(),
        source,
    }
}

/// How the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closure {
    /// Idle timer fired; we closed.
    Idle,
    /// Peer closed first.
    Remote,
}

/// What a received event does to the idle timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    Keep,
    Cancel,
    Rearm,
}

/// Send-side timing, measured at the source.
#[derive(Debug, Clone, Copy)]
struct SendTiming {
    bytes: u64,
    started: Instant,
    finished: Instant,
}

/// Receive-side accounting.
struct ReceiveStats {
    bytes: u64,
    first_header: Option<Instant>,
    last_data_end: Option<Instant>,
    dump: Option<ProtocolDump<Stdout>>,
}

impl ReceiveStats {
    fn new(debug_protocol: bool) -> Self {
        ReceiveStats {
            bytes: 0,
            first_header: None,
            last_data_end: None,
            dump: debug_protocol.then(|| ProtocolDump::new(std::io::stdout())),
        }
    }

    fn on_event(&mut self, event: &FrameEvent) -> TimerAction {
        if let Some(dump) = self.dump.as_mut() {
            dump.inbound(event);
        }

        match event {
            FrameEvent::Header(header) => {
                self.first_header.get_or_insert_with(Instant::now);
                // A header without a blob has no DataEnd to re-arm the timer.
                if header.size.is_some() {
                    TimerAction::Cancel
                } else {
                    TimerAction::Rearm
                }
            }
            FrameEvent::Data(bytes) => {
                self.bytes += bytes.len() as u64;
                TimerAction::Keep
            }
            FrameEvent::DataEnd => {
                self.last_data_end = Some(Instant::now());
                TimerAction::Rearm
            }
        }
    }

    fn duration(&self) -> Duration {
        match (self.first_header, self.last_data_end) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }
}

/// Run a session over an already-connected stream pair.
pub(crate) async fn drive<R, W>(
    file: File,
    path: &Path,
    mut reader: R,
    writer: W,
    peer: SocketAddr,
    options: &SessionOptions,
) -> Result<JobResult, ReplayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let session_id = Uuid::new_v4();
    debug!(session = %session_id, %peer, "Session started");

    let (tx, rx) = mpsc::channel(SOURCE_QUEUE_DEPTH);
    let encoder = FrameEncoder::new(session_id, options.max_payload);
    let tap = options
        .debug_protocol
        .then(|| (DebugTap::new(), ProtocolDump::new(std::io::stdout())));

    let sending = async move {
        tokio::try_join!(
            read_source(file, path, tx, options.read_chunk, peer),
            write_frames(rx, writer, encoder, tap, peer),
        )
    };
    tokio::pin!(sending);

    let mut sent: Option<(SendTiming, W)> = None;
    let mut decoder = FrameDecoder::new();
    let mut received = ReceiveStats::new(options.debug_protocol);
    let mut idle = IdleTimer::new(options.idle_timeout);
    idle.arm();

    let closure = loop {
        tokio::select! {
            joined = &mut sending, if sent.is_none() => {
                sent = Some(joined?);
            }
            _ = idle.expired(), if idle.is_armed() => break Closure::Idle,
            read = reader.read_buf(decoder.buffer_mut()) => {
                let n = read.map_err(ReplayError::network(peer))?;
                if n == 0 {
                    decoder.finish()?;
                    break Closure::Remote;
                }
                while let Some(event) = decoder.next_event()? {
                    match received.on_event(&event) {
                        TimerAction::Keep => {}
                        TimerAction::Cancel => idle.cancel(),
                        TimerAction::Rearm => idle.arm(),
                    }
                }
            }
        }
    };

    // The source may still be draining when the timer fires. Keep reading
    // meanwhile, or a peer that answers late fills our receive window, stops
    // reading in turn and both writers block.
    let mut open = closure == Closure::Idle;
    let (timing, mut writer) = loop {
        if let Some(sent) = sent.take() {
            break sent;
        }
        tokio::select! {
            joined = &mut sending => break joined?,
            read = reader.read_buf(decoder.buffer_mut()), if open => {
                let n = read.map_err(ReplayError::network(peer))?;
                if n == 0 {
                    decoder.finish()?;
                    open = false;
                    continue;
                }
                while let Some(event) = decoder.next_event()? {
                    received.on_event(&event);
                }
            }
        }
    };

    if closure == Closure::Idle {
        writer
            .write_all(&[])
            .await
            .map_err(ReplayError::network(peer))?;
        writer.flush().await.map_err(ReplayError::network(peer))?;
        writer
            .shutdown()
            .await
            .map_err(ReplayError::network(peer))?;
    }

    let result = JobResult {
        bytes_sent: timing.bytes,
        bytes_received: received.bytes,
        send_duration_ms: millis(timing.finished.saturating_duration_since(timing.started)),
        receive_duration_ms: millis(received.duration()),
    };
    debug!(
        session = %session_id,
        %peer,
        closed_by = ?closure,
        bytes_sent = result.bytes_sent,
        bytes_received = result.bytes_received,
        "Session finished"
    );
    Ok(result)
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Source stage: read the file in chunks and queue them for the writer.
async fn read_source(
    mut file: File,
    path: &Path,
    tx: mpsc::Sender<Bytes>,
    chunk_size: usize,
    peer: SocketAddr,
) -> Result<SendTiming, ReplayError> {
    let chunk_size = chunk_size.max(1);
    let started = Instant::now();
    let mut bytes = 0u64;

    loop {
        let mut chunk = BytesMut::with_capacity(chunk_size);
        let n = file
            .read_buf(&mut chunk)
            .await
            .map_err(|e| source_error(path, e))?;
        if n == 0 {
            break;
        }
        bytes += n as u64;
        if tx.send(chunk.freeze()).await.is_err() {
            return Err(ReplayError::Network {
                peer,
                source: std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "frame writer stopped before the source was sent",
                ),
            });
        }
    }

    trace!(bytes, "Source exhausted");
    Ok(SendTiming {
        bytes,
        started,
        finished: Instant::now(),
    })
}

/// Writer stage: frame queued chunks and write them to the socket.
async fn write_frames<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    encoder: FrameEncoder,
    mut tap: Option<(DebugTap, ProtocolDump<Stdout>)>,
    peer: SocketAddr,
) -> Result<W, ReplayError>
where
    W: AsyncWrite + Unpin,
{
    let mut frames = BytesMut::new();

    while let Some(chunk) = rx.recv().await {
        frames.clear();
        encoder.encode(&chunk, &mut frames);

        if let Some((tap, dump)) = tap.as_mut() {
            let lines = tap.observe(&frames);
            dump.outbound(&lines);
        }

        writer
            .write_all(&frames)
            .await
            .map_err(ReplayError::network(peer))?;
    }

    writer.flush().await.map_err(ReplayError::network(peer))?;
    Ok(writer)
}
