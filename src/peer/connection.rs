use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::message::Message;
use super::peer_id::PeerId;
use super::piece::BlockRequest;
use super::transport::PeerTransport;
use crate::constants::BLOCK_SIZE;
use crate::swarm::{PieceProgress, Torrent};

/// Point-in-time counters for one peer connection.
#[derive(Debug, Clone)]
pub struct PeerStats {
    pub addr: SocketAddr,
    pub peer_id: PeerId,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connected_for: Duration,
}

/// A handshaken peer connection with its own read and write activity.
///
/// The read task decodes inbound messages, forwarding piece requests into
/// the owning torrent's event loop and filling the assigned
/// [`PieceProgress`] from inbound blocks. The write task drains the
/// outbound queue. Both are aborted by [`close`](Self::close).
pub struct PeerConnection {
    addr: SocketAddr,
    peer_id: PeerId,
    outbound: mpsc::UnboundedSender<Message>,
    closed: AtomicBool,
    peer_choking: AtomicBool,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    connected_at: Instant,
    /// The piece this connection is responsible for downloading, if any.
    assigned: Mutex<Option<Arc<PieceProgress>>>,
    requests_in_flight: AtomicUsize,
    pipeline: usize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerConnection {
    /// Promotes a handshaken transport into a managed connection and starts
    /// its read and write tasks.
    pub(crate) fn spawn(
        transport: PeerTransport,
        torrent: Arc<Torrent>,
        peer_id: PeerId,
        addr: SocketAddr,
    ) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let conn = Arc::new(Self {
            addr,
            peer_id,
            outbound,
            closed: AtomicBool::new(false),
            peer_choking: AtomicBool::new(true),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            connected_at: Instant::now(),
            assigned: Mutex::new(None),
            requests_in_flight: AtomicUsize::new(0),
            pipeline: torrent.config().request_pipeline,
            tasks: Mutex::new(Vec::new()),
        });

        let (mut reader, mut writer) = transport.into_split();

        let write_conn = conn.clone();
        let write_task = tokio::spawn(async move {
            let mut outbound_rx = outbound_rx;
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = writer.send(&message).await {
                    debug!("write to {} failed: {}", write_conn.addr, e);
                    write_conn.close();
                    return;
                }
            }
        });

        // the read task must not keep a dropped torrent alive
        let torrent = Arc::downgrade(&torrent);
        let read_conn = conn.clone();
        let read_task = tokio::spawn(async move {
            loop {
                match reader.receive().await {
                    Ok(message) => {
                        let Some(torrent) = torrent.upgrade() else { break };
                        read_conn.handle_message(&torrent, message).await;
                    }
                    Err(e) => {
                        debug!("read from {} ended: {}", read_conn.addr, e);
                        break;
                    }
                }
                if read_conn.is_closed() {
                    break;
                }
            }
            // abandon whatever this peer was responsible for
            if let Some(progress) = read_conn.assigned.lock().take() {
                if let Some(torrent) = torrent.upgrade() {
                    torrent.cancel_piece(progress.index());
                }
            }
            read_conn.close();
        });

        conn.tasks.lock().extend([write_task, read_task]);
        // a task that died before registration already flipped `closed`;
        // its abort would otherwise be missed
        if conn.is_closed() {
            for task in conn.tasks.lock().drain(..) {
                task.abort();
            }
        }
        conn
    }

    async fn handle_message(self: &Arc<Self>, torrent: &Arc<Torrent>, message: Message) {
        match message {
            Message::Request {
                index,
                begin,
                length,
            } => {
                torrent.on_piece_request(self.clone(), BlockRequest::new(index, begin, length));
            }
            Message::Piece { index, begin, data } => {
                self.bytes_received
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                // unsolicited blocks must not underflow the window
                if self.requests_in_flight.load(Ordering::Relaxed) > 0 {
                    self.requests_in_flight.fetch_sub(1, Ordering::Relaxed);
                }
                self.on_block(torrent, index, begin, &data).await;
            }
            Message::Choke => {
                self.peer_choking.store(true, Ordering::Relaxed);
                // outstanding requests are dropped by a choking peer
                self.requests_in_flight.store(0, Ordering::Relaxed);
            }
            Message::Unchoke => {
                self.peer_choking.store(false, Ordering::Relaxed);
                self.fill_pipeline();
            }
            Message::Interested => {
                // choking is not implemented, every interested peer runs unchoked
                self.send(Message::Unchoke);
            }
            Message::KeepAlive
            | Message::NotInterested
            | Message::Have { .. }
            | Message::Bitfield(_)
            | Message::Cancel { .. } => {
                trace!("{}: ignoring {:?}", self.addr, message);
            }
        }
    }

    async fn on_block(self: &Arc<Self>, torrent: &Arc<Torrent>, index: u32, begin: u32, data: &[u8]) {
        let progress = match &*self.assigned.lock() {
            Some(p) if p.index() == index => p.clone(),
            _ => {
                trace!("{}: unexpected block for piece {}", self.addr, index);
                return;
            }
        };

        progress.put(begin, data);

        if progress.is_complete() {
            self.assigned.lock().take();
            if let Some(piece) = progress.take_data() {
                torrent.store_piece(piece).await;
            }
        } else {
            self.fill_pipeline();
        }
    }

    /// Makes this connection responsible for downloading `progress`,
    /// expressing interest and pipelining block requests once unchoked.
    pub fn assign_piece(&self, progress: Arc<PieceProgress>) {
        *self.assigned.lock() = Some(progress);
        self.send(Message::Interested);
        if !self.peer_choking.load(Ordering::Relaxed) {
            self.fill_pipeline();
        }
    }

    /// Tops the in-flight request window back up to the pipeline depth.
    fn fill_pipeline(&self) {
        let progress = match &*self.assigned.lock() {
            Some(p) => p.clone(),
            None => return,
        };

        while self.requests_in_flight.load(Ordering::Relaxed) < self.pipeline {
            let offset = match progress.next_offset() {
                Some(offset) => offset,
                None => return,
            };
            let length = BLOCK_SIZE.min(progress.length() - offset);
            self.requests_in_flight.fetch_add(1, Ordering::Relaxed);
            self.send(Message::Request {
                index: progress.index(),
                begin: offset,
                length,
            });
        }
    }

    /// Queues a message for the write task. Messages sent after close are
    /// silently dropped.
    pub fn send(&self, message: Message) {
        if let Message::Piece { ref data, .. } = message {
            self.bytes_sent
                .fetch_add(data.len() as u64, Ordering::Relaxed);
        }
        let _ = self.outbound.send(message);
    }

    /// Closes the connection and stops both tasks. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn stats(&self) -> PeerStats {
        PeerStats {
            addr: self.addr,
            peer_id: self.peer_id,
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            connected_for: self.connected_at.elapsed(),
        }
    }
}
