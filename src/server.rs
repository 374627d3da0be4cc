//! Local discard server.
//!
//! Used when no server address is given: accepts connections on an ephemeral
//! port, reads every byte and throws it away. Measures loopback throughput
//! only; nothing is ever written back.

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Maximum number of concurrent connections
const MAX_CONNECTIONS: usize = 10000;

/// Read buffer size
const BUFFER_SIZE: usize = 64 * 1024;

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Running discard server. Stop it with [`DiscardServer::stop`].
pub struct DiscardServer {
    local_addr: SocketAddr,
    accepted: Arc<AtomicU64>,
    shutdown: watch::Sender<bool>,
    accept_loop: JoinHandle<()>,
}

impl DiscardServer {
    /// Bind to all interfaces on an OS-assigned port and start accepting.
    pub async fn start() -> std::io::Result<DiscardServer> {
        let listener = bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Discard server listening");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let connection_limit = Arc::new(Semaphore::new(MAX_CONNECTIONS));
        let accepted = Arc::new(AtomicU64::new(0));
        let accept_loop = tokio::spawn(accept_loop(
            listener,
            connection_limit,
            accepted.clone(),
            shutdown_rx,
        ));

        Ok(DiscardServer {
            local_addr,
            accepted,
            shutdown,
            accept_loop,
        })
    }

    /// Bound address (unspecified host).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Loopback address clients should connect to.
    pub fn connect_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.local_addr().port()))
    }

    /// Connections accepted so far.
    pub fn connections_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Stop accepting, close open connections and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.accept_loop.await {
            error!(error = %e, "Discard server task failed");
        }
        info!(address = %self.local_addr, "Discard server stopped");
    }
}

fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    TcpListener::from_std(socket.into())
}

async fn accept_loop(
    listener: TcpListener,
    connection_limit: Arc<Semaphore>,
    accepted: Arc<AtomicU64>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        // Wait for a connection slot
        let permit = tokio::select! {
            permit = connection_limit.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = shutdown.changed() => return,
        };

        let accept_result = tokio::select! {
            accept_result = listener.accept() => accept_result,
            _ = shutdown.changed() => return,
        };

        match accept_result {
            Ok((stream, addr)) => {
                accepted.fetch_add(1, Ordering::Relaxed);
                debug!(peer = %addr, "New connection");
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    match handle_connection(stream, shutdown).await {
                        Ok(discarded) => debug!(peer = %addr, discarded, "Connection closed"),
                        Err(e) => debug!(peer = %addr, error = %e, "Connection error"),
                    }
                    drop(permit);
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Read until EOF (or shutdown), returning the number of bytes discarded.
async fn handle_connection(
    mut stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<u64> {
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    let mut discarded = 0u64;

    loop {
        tokio::select! {
            read = stream.read_buf(&mut buffer) => {
                let n = read?;
                if n == 0 {
                    trace!("Connection closed by client");
                    return Ok(discarded);
                }
                discarded += n as u64;
                buffer.clear();
            }
            _ = shutdown.changed() => return Ok(discarded),
        }
    }
}
