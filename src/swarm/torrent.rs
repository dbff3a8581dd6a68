use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::SwarmError;
use super::progress::PieceProgress;
use crate::constants::{
    DEFAULT_CONNECT_ATTEMPTS, DEFAULT_NUM_WANT, DEFAULT_PORT, DEFAULT_REQUEST_PIPELINE,
};
use crate::metainfo::Metainfo;
use crate::net::Network;
use crate::peer::{
    Bitfield, BlockRequest, Handshake, Message, PeerConnection, PeerError, PeerId, PeerStats,
    PeerTransport, PieceData,
};
use crate::storage::Storage;
use crate::tracker::Announcer;

/// Per-torrent policy knobs. The defaults mirror the constants module.
#[derive(Debug, Clone)]
pub struct TorrentConfig {
    /// Port reported to trackers for inbound connections.
    pub port: u16,
    /// How many peers each announce asks for.
    pub num_want: u32,
    /// Connection attempts per discovered address before giving up.
    pub max_connect_attempts: u32,
    /// Outstanding block requests per assigned piece.
    pub request_pipeline: usize,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            num_want: DEFAULT_NUM_WANT,
            max_connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            request_pipeline: DEFAULT_REQUEST_PIPELINE,
        }
    }
}

/// An inbound piece request paired with the connection that sent it.
///
/// Produced by peer read loops, consumed exactly once by [`Torrent::run`].
pub(crate) struct PieceRequestEvent {
    pub conn: Arc<PeerConnection>,
    pub request: BlockRequest,
}

/// Snapshot of swarm state for monitoring.
#[derive(Debug, Clone)]
pub struct TorrentStatus {
    pub peers: Vec<PeerStats>,
}

/// Swarm coordinator for a single torrent.
///
/// Owns peer-connection admission, tracker-driven discovery, the pending
/// piece set, and the serialized piece-request event loop. All request
/// servicing flows through one channel drained by [`run`](Self::run), so
/// storage reads for peers are serialized by construction.
pub struct Torrent {
    network: Arc<dyn Network>,
    pub(super) trackers: Vec<Arc<dyn Announcer>>,
    peer_id: PeerId,
    storage: Arc<dyn Storage>,
    config: TorrentConfig,
    /// Pending incomplete pieces and who is fetching them.
    pending: RwLock<HashMap<u32, Arc<PeerConnection>>>,
    /// Known peer addresses: false = attempt in flight, true = active.
    pub(super) conns: RwLock<HashMap<SocketAddr, bool>>,
    /// Producer side of the request event channel; taken on close so a
    /// racing send observes shutdown instead of a closed channel.
    requests: Mutex<Option<mpsc::UnboundedSender<PieceRequestEvent>>>,
    /// Consumer side, taken once by `run`.
    events: Mutex<Option<mpsc::UnboundedReceiver<PieceRequestEvent>>>,
    /// The periodic announce ticker, when announcing.
    pub(super) announcer: Mutex<Option<JoinHandle<()>>>,
    /// Supervised short-lived tasks (announces, connection attempts).
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Weak self-handle for spawning tasks from `&self` methods.
    this: Weak<Torrent>,
}

impl Torrent {
    pub fn new(
        network: Arc<dyn Network>,
        trackers: Vec<Arc<dyn Announcer>>,
        storage: Arc<dyn Storage>,
        config: TorrentConfig,
    ) -> Arc<Self> {
        let (requests_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|this| Self {
            network,
            trackers,
            peer_id: PeerId::generate(),
            storage,
            config,
            pending: RwLock::new(HashMap::new()),
            conns: RwLock::new(HashMap::new()),
            requests: Mutex::new(Some(requests_tx)),
            events: Mutex::new(Some(events_rx)),
            announcer: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            this: this.clone(),
        })
    }

    /// Strong self-handle. `None` only while the torrent is being dropped.
    pub(super) fn this(&self) -> Option<Arc<Torrent>> {
        self.this.upgrade()
    }

    pub fn name(&self) -> String {
        self.storage.metainfo().name
    }

    pub fn metainfo(&self) -> Metainfo {
        self.storage.metainfo()
    }

    pub fn bitfield(&self) -> Bitfield {
        self.storage.bitfield()
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub(crate) fn config(&self) -> &TorrentConfig {
        &self.config
    }

    pub(super) fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub(super) fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// True once every piece is stored.
    pub fn done(&self) -> bool {
        self.bitfield().is_complete()
    }

    /// Choking decision for the given peer. Choking is not implemented;
    /// every peer stays unchoked.
    pub fn choke(&self, _peer_id: PeerId) -> bool {
        false
    }

    pub fn get_status(&self) -> TorrentStatus {
        let pending = self.pending.read();
        TorrentStatus {
            peers: pending.values().map(|conn| conn.stats()).collect(),
        }
    }

    /// Whether `addr` is already known, either connecting or active.
    pub fn has_conn(&self, addr: SocketAddr) -> bool {
        self.conns.read().contains_key(&addr)
    }

    /// Connects to a peer and performs the handshake exchange; blocks until
    /// admission succeeds or fails.
    ///
    /// The remote infohash matching ours is the sole admission check; the
    /// remote peer id is recorded but not enforced. On success the
    /// connection starts its own read/write activity and the address is
    /// marked active. On any failure the raw connection is dropped and the
    /// error returned; retry bookkeeping stays with the caller.
    pub async fn add_peer(
        &self,
        addr: SocketAddr,
        _expected_peer_id: Option<PeerId>,
    ) -> Result<(), SwarmError> {
        let this = self.this().ok_or(SwarmError::Closed)?;
        let stream = self.network.dial(addr).await?;

        let info_hash = *self.storage.info_hash().as_bytes();
        let mut transport = PeerTransport::new(stream);

        let handshake = Handshake::new(info_hash, *self.peer_id.as_bytes());
        transport.send_handshake(&handshake).await?;
        let theirs = transport.receive_handshake().await?;

        if theirs.info_hash != info_hash {
            warn!("infohash mismatch from {}", addr);
            return Err(PeerError::InfoHashMismatch.into());
        }

        let peer_id = PeerId(theirs.peer_id);
        let conn = PeerConnection::spawn(transport, this, peer_id, addr);
        self.on_new_peer(&conn);
        self.conns.write().insert(addr, true);
        Ok(())
    }

    /// Callback for a freshly admitted peer: ship it our bitfield.
    fn on_new_peer(&self, conn: &Arc<PeerConnection>) {
        info!(
            "new peer ({}) for {}",
            conn.peer_id(),
            self.storage.info_hash()
        );
        conn.send(self.bitfield().to_message());
    }

    /// Assigns `index` to `conn` for download and starts requesting its
    /// blocks. The piece-selection policy choosing `index` lives outside
    /// this crate.
    pub fn download_piece(&self, index: u32, conn: &Arc<PeerConnection>) -> Arc<PieceProgress> {
        let length = self.storage.metainfo().length_of_piece(index);
        let progress = Arc::new(PieceProgress::new(index, length));
        self.mark_piece_in_progress(index, conn.clone());
        conn.assign_piece(progress.clone());
        progress
    }

    pub fn mark_piece_in_progress(&self, index: u32, conn: Arc<PeerConnection>) {
        self.pending.write().insert(index, conn);
    }

    pub fn piece_requested(&self, index: u32) -> bool {
        self.pending.read().contains_key(&index)
    }

    pub fn cancel_piece(&self, index: u32) {
        self.pending.write().remove(&index);
    }

    /// Entry point for peer read loops. Requests arriving after close are
    /// dropped silently.
    pub(crate) fn on_piece_request(&self, conn: Arc<PeerConnection>, request: BlockRequest) {
        if let Some(requests) = &*self.requests.lock() {
            let _ = requests.send(PieceRequestEvent { conn, request });
        }
    }

    /// Serialized request-servicing loop; the single consumer of the event
    /// channel and therefore the only storage reader for peer requests.
    /// Runs until [`close`](Self::close) drops the producer.
    pub async fn run(&self) {
        let mut events = match self.events.lock().take() {
            Some(events) => events,
            None => {
                warn!("{} request loop already started", self.name());
                return;
            }
        };

        info!("{} running", self.name());
        while let Some(event) = events.recv().await {
            let request = &event.request;

            if request.length == 0 {
                info!("{} asked for a zero length block", event.conn.peer_id());
                event.conn.close();
                continue;
            }

            debug!(
                "{} asked for piece {} {}-{}",
                event.conn.peer_id(),
                request.piece,
                request.offset,
                request.offset.saturating_add(request.length)
            );

            match self.storage.read_block(request).await {
                Some(piece) => {
                    event.conn.send(Message::Piece {
                        index: piece.piece,
                        begin: piece.offset,
                        data: piece.data,
                    });
                }
                None => {
                    info!(
                        "{} asked for a piece we don't have for {}",
                        event.conn.peer_id(),
                        self.name()
                    );
                    event.conn.close();
                }
            }
        }
        info!("{} request loop exit", self.name());
    }

    /// Persists a fully assembled piece and releases its pending slot.
    ///
    /// A storage failure is logged but the piece still leaves the pending
    /// set; retrying a piece already assembled in memory is not worth a
    /// stalled slot.
    pub async fn store_piece(&self, piece: PieceData) {
        let index = piece.piece;
        info!(
            "storing piece {} of {} for {}",
            index,
            self.storage.metainfo().piece_count(),
            self.storage.info_hash()
        );

        if let Err(e) = self.storage.write_piece(piece).await {
            error!("failed to store piece {} for {}: {}", index, self.name(), e);
        }
        self.cancel_piece(index);

        if let Err(e) = self.storage.flush().await {
            error!("failed to flush {}: {}", self.name(), e);
        }
    }

    /// Spawns a task owned by this torrent's lifecycle; aborted on close.
    pub(super) fn spawn_task(
        &self,
        future: impl std::future::Future<Output = ()> + Send + 'static,
    ) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(tokio::spawn(future));
    }

    /// Gracefully shuts the torrent down: stops the request loop, aborts
    /// announce and connection tasks, closes peers, flushes storage.
    /// Safe to call concurrently with inbound requests, and idempotent.
    pub async fn close(&self) {
        // dropping the sender ends `run` once the queue drains; a racing
        // on_piece_request sees None and drops the event
        drop(self.requests.lock().take());

        if let Some(ticker) = self.announcer.lock().take() {
            ticker.abort();
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for (_, conn) in self.pending.write().drain() {
            conn.close();
        }

        if let Err(e) = self.storage.flush().await {
            error!("failed to flush {}: {}", self.name(), e);
        }
    }
}
