// ABOUTME: Per-socket I/O: a two-phase async read loop plus a serialized write queue
// ABOUTME: At most one write is ever outstanding on the socket; closing is one-way

use crate::error::HubError;
use crate::frame::{decode_header, Frame, HEADER_SIZE};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

/// Something a connection hands every successfully-read frame to. The two real
/// implementations are the hub's `deliver` path (for the uplink) and its
/// `distribute` path (for an accepted subscriber session) - see `hub.rs`.
pub(crate) trait RouteSink: Send + Sync {
    fn route(&self, frame: Frame);

    /// Called once the read loop exits, for any bookkeeping keyed on liveness
    /// (the hub has no such bookkeeping today, but sessions self-evict lazily
    /// via the weak-reference tables rather than on this callback).
    fn closed(&self) {}
}

enum WriteCmd {
    Data(Bytes),
    Shutdown,
}

/// One TCP socket, split into a queued-write half and a read-loop half.
///
/// Mirrors `hubconnection` from the original design: `init`/`connect` establish
/// the socket, `enqueue` and `write_blocking` are the two write paths described
/// in §4.2, and `close` is idempotent. The per-connection "strand" is realized
/// here as a single writer task draining an unbounded mpsc channel - only that
/// task ever touches the socket's write half, which is exactly the "at most one
/// outstanding write" invariant.
pub(crate) struct PeerConnection {
    write_tx: mpsc::UnboundedSender<WriteCmd>,
    write_half: Arc<AsyncMutex<OwnedWriteHalf>>,
    closing: Arc<AtomicBool>,
    peer_addr: Option<SocketAddr>,
}

impl PeerConnection {
    /// Split `stream` into read/write halves and start the writer task. The
    /// read loop is *not* started here - callers construct whatever owns this
    /// connection first (a `SubscriberSession`, or the hub's uplink slot) and
    /// then call [`PeerConnection::start_read_loop`], matching §4.3's "construct
    /// then start its read loop" acceptor sequencing and avoiding a window where
    /// a frame could arrive before the owning session's weak self-reference is
    /// usable.
    #[tracing::instrument]
    pub(crate) fn new(stream: TcpStream) -> (Arc<PeerConnection>, OwnedReadHalf) {
        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let write_half = Arc::new(AsyncMutex::new(write_half));
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));

        spawn_writer(Arc::clone(&write_half), write_rx, Arc::clone(&closing));

        let conn = Arc::new(PeerConnection {
            write_tx,
            write_half,
            closing,
            peer_addr,
        });
        (conn, read_half)
    }

    /// Resolve `host:port` and perform a direct (awaited, not backgrounded) TCP
    /// connect, per §4.2's "blocking connect" - in async Rust that means the
    /// caller's future doesn't resolve until the connect completes, rather than
    /// handing it to a detached task.
    #[tracing::instrument]
    pub(crate) async fn connect(
        host: &str,
        port: u16,
    ) -> Result<(Arc<PeerConnection>, OwnedReadHalf), HubError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(HubError::ConnectFailed)?;
        Ok(PeerConnection::new(stream))
    }

    /// Start the read loop on `read_half`, handing every successfully decoded
    /// frame to `route`. Exits (and force-closes the connection) on protocol
    /// error, I/O error, or a clean EOF.
    pub(crate) fn start_read_loop(
        self: &Arc<Self>,
        mut read_half: OwnedReadHalf,
        route: Arc<dyn RouteSink>,
    ) {
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(Some(frame)) => route.route(frame),
                    Ok(None) => {
                        tracing::debug!(peer = ?conn.peer_addr, "peer closed connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(peer = ?conn.peer_addr, error = %e, "closing connection after read error");
                        break;
                    }
                }
            }
            conn.close(true);
            route.closed();
        });
    }

    /// Non-blocking enqueue used by `publish`: hand the frame to the writer
    /// task and return immediately. Fails if the connection is already closing.
    pub(crate) fn enqueue(&self, frame: &Frame) -> Result<(), HubError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(HubError::Closed);
        }
        self.write_tx
            .send(WriteCmd::Data(frame.to_bytes()))
            .map_err(|_| HubError::Closed)
    }

    /// Direct awaited write bypassing the queue, used only by subscribe/unsubscribe
    /// per §4.2 - callers must not race this against queued publishes on the same
    /// connection (see §9's "blocking vs asynchronous" note).
    pub(crate) async fn write_blocking(&self, frame: &Frame) -> Result<(), HubError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(HubError::Closed);
        }
        let bytes = frame.to_bytes();
        let mut half = self.write_half.lock().await;
        half.write_all(&bytes).await?;
        Ok(())
    }

    /// Set the closing flag (idempotent, one-way) and either shut the socket
    /// down immediately (`forced`) or enqueue a shutdown marker that runs once
    /// the write queue drains.
    pub(crate) fn close(&self, forced: bool) {
        let already_closing = self.closing.swap(true, Ordering::AcqRel);
        if forced {
            let half = Arc::clone(&self.write_half);
            tokio::spawn(async move {
                let mut half = half.lock().await;
                let _ = half.shutdown().await;
            });
        } else if !already_closing {
            // Queue a shutdown so it only runs after frames already in flight.
            let _ = self.write_tx.send(WriteCmd::Shutdown);
        }
    }
}

fn spawn_writer(
    write_half: Arc<AsyncMutex<OwnedWriteHalf>>,
    mut rx: mpsc::UnboundedReceiver<WriteCmd>,
    closing: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WriteCmd::Data(bytes) => {
                    let mut half = write_half.lock().await;
                    if let Err(e) = half.write_all(&bytes).await {
                        tracing::warn!(error = %e, "write failed; forcing close");
                        closing.store(true, Ordering::Release);
                        let _ = half.shutdown().await;
                        break;
                    }
                }
                WriteCmd::Shutdown => {
                    let mut half = write_half.lock().await;
                    let _ = half.shutdown().await;
                    break;
                }
            }
        }
    });
}

/// Read one frame: a fixed 7-byte header, then its variable-length payload.
/// Returns `Ok(None)` on a clean EOF before any header bytes arrive.
async fn read_frame(read_half: &mut OwnedReadHalf) -> Result<Option<Frame>, HubError> {
    let mut header_buf = [0u8; HEADER_SIZE];
    let n = read_exact_or_eof(read_half, &mut header_buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < HEADER_SIZE {
        return Err(HubError::ProtocolError("connection reset mid-header".into()));
    }

    let header = decode_header(&header_buf)?;
    let payload_len = header.topic_length as usize + header.body_length as usize;
    let mut payload = vec![0u8; payload_len];
    read_half.read_exact(&mut payload).await?;

    let mut full = Vec::with_capacity(HEADER_SIZE + payload_len);
    full.extend_from_slice(&header_buf);
    full.extend_from_slice(&payload);
    Frame::parse(Bytes::from(full)).map(Some)
}

/// Like `read_exact`, but treats a zero-byte read at the very start as a clean
/// EOF instead of an error. Returns the number of bytes actually read.
async fn read_exact_or_eof(
    read_half: &mut OwnedReadHalf,
    buf: &mut [u8],
) -> Result<usize, HubError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = read_half.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
