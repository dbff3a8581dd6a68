use super::*;
use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

use crate::constants::BLOCK_SIZE;
use crate::metainfo::{InfoHash, Metainfo};
use crate::net::Network;
use crate::peer::{
    BlockRequest, Handshake, Message, PeerConnection, PeerId, PeerTransport,
};
use crate::storage::MemoryStorage;
use crate::tracker::{
    AnnounceRequest, AnnounceResponse, Announcer, PeerCandidate, TrackerError, TrackerEvent,
};

// ============================================================================
// Fixtures
// ============================================================================

struct FakeNetwork {
    local: SocketAddr,
    refuse: bool,
    dials: AtomicU32,
}

impl FakeNetwork {
    fn new(local: &str, refuse: bool) -> Arc<Self> {
        Arc::new(Self {
            local: local.parse().unwrap(),
            refuse,
            dials: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Network for FakeNetwork {
    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        TcpStream::connect(addr).await
    }
}

struct StaticTracker {
    peers: Vec<PeerCandidate>,
    announces: AtomicU32,
    last_event: Mutex<Option<TrackerEvent>>,
}

impl StaticTracker {
    fn new(peers: Vec<PeerCandidate>) -> Arc<Self> {
        Arc::new(Self {
            peers,
            announces: AtomicU32::new(0),
            last_event: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Announcer for StaticTracker {
    async fn announce(&self, request: &AnnounceRequest) -> Result<AnnounceResponse, TrackerError> {
        self.announces.fetch_add(1, Ordering::SeqCst);
        *self.last_event.lock() = Some(request.event);
        Ok(AnnounceResponse {
            peers: self.peers.clone(),
            ..Default::default()
        })
    }

    fn should_announce(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "static"
    }
}

fn candidate(addr: &str) -> PeerCandidate {
    PeerCandidate {
        addr: addr.parse().unwrap(),
        peer_id: None,
    }
}

/// Torrent over four 4-byte pieces, no piece hashes.
fn test_torrent(
    network: Arc<dyn Network>,
    trackers: Vec<Arc<dyn Announcer>>,
) -> (Arc<Torrent>, Arc<MemoryStorage>) {
    let metainfo = Metainfo::new("test", 4, 16);
    let storage = Arc::new(MemoryStorage::new(InfoHash([9u8; 20]), metainfo));
    let torrent = Torrent::new(
        network,
        trackers,
        storage.clone(),
        TorrentConfig::default(),
    );
    (torrent, storage)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// A managed connection wired to a raw remote transport over loopback.
async fn peer_pair(torrent: &Arc<Torrent>) -> (Arc<PeerConnection>, PeerTransport) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();

    let conn = PeerConnection::spawn(
        PeerTransport::new(client),
        torrent.clone(),
        PeerId::generate(),
        addr,
    );
    (conn, PeerTransport::new(server))
}

// ============================================================================
// Piece progress
// ============================================================================

#[test]
fn test_next_offset_claims_strides_in_order() {
    let progress = PieceProgress::new(0, BLOCK_SIZE * 2 + 100);

    assert_eq!(progress.next_offset(), Some(0));
    assert_eq!(progress.next_offset(), Some(BLOCK_SIZE));
    assert_eq!(progress.next_offset(), Some(BLOCK_SIZE * 2));
    assert_eq!(progress.next_offset(), None);
}

#[test]
fn test_next_offset_concurrent_claims_are_disjoint() {
    let progress = Arc::new(PieceProgress::new(0, BLOCK_SIZE * 8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let progress = progress.clone();
            std::thread::spawn(move || progress.next_offset())
        })
        .collect();

    let offsets: HashSet<u32> = handles
        .into_iter()
        .map(|h| h.join().unwrap().expect("stride available"))
        .collect();

    assert_eq!(offsets.len(), 8);
    assert_eq!(progress.next_offset(), None);
}

#[test]
fn test_put_until_complete() {
    let progress = PieceProgress::new(2, 20);
    assert!(!progress.is_complete());

    assert!(progress.put(0, &[1u8; 10]));
    assert!(!progress.is_complete());

    assert!(progress.put(10, &[2u8; 10]));
    assert!(progress.is_complete());

    let piece = progress.take_data().unwrap();
    assert_eq!(piece.piece, 2);
    assert_eq!(piece.offset, 0);
    assert_eq!(&piece.data[..10], &[1u8; 10]);
    assert_eq!(&piece.data[10..], &[2u8; 10]);

    // the buffer can only be taken once
    assert!(progress.take_data().is_none());
}

#[test]
fn test_put_out_of_range_is_a_no_op() {
    let progress = PieceProgress::new(0, 10);

    assert!(!progress.put(8, &[0u8; 4]));
    assert!(!progress.put(u32::MAX, &[0u8; 4]));

    // status untouched: the first stride is still claimable
    assert_eq!(progress.next_offset(), Some(0));
}

#[test]
fn test_cancel_allows_reclaim() {
    let progress = PieceProgress::new(0, BLOCK_SIZE * 2);

    assert_eq!(progress.next_offset(), Some(0));
    assert_eq!(progress.next_offset(), Some(BLOCK_SIZE));
    assert_eq!(progress.next_offset(), None);

    progress.cancel(0, BLOCK_SIZE);
    assert_eq!(progress.next_offset(), Some(0));

    // out-of-range cancel changes nothing
    progress.cancel(BLOCK_SIZE, BLOCK_SIZE + 1);
    assert_eq!(progress.next_offset(), None);
}

#[test]
fn test_take_data_requires_completion() {
    let progress = PieceProgress::new(0, 10);
    progress.put(0, &[1u8; 5]);
    assert!(progress.take_data().is_none());
}

// ============================================================================
// Candidate admission
// ============================================================================

#[test]
fn test_admit_candidate_rejects_self_and_duplicates() {
    let network = FakeNetwork::new("127.0.0.1:6881", true);
    let (torrent, _) = test_torrent(network, Vec::new());

    // never dial ourselves
    assert!(!torrent.admit_candidate("127.0.0.1:6881".parse().unwrap()));

    let other: SocketAddr = "10.0.0.2:6881".parse().unwrap();
    assert!(torrent.admit_candidate(other));
    assert!(torrent.has_conn(other));

    // second candidate resolving to the same address is not attempted
    assert!(!torrent.admit_candidate(other));
}

#[tokio::test(start_paused = true)]
async fn test_announce_dedups_candidates() {
    let network = FakeNetwork::new("127.0.0.1:6881", true);
    let tracker = StaticTracker::new(vec![
        candidate("10.0.0.2:6881"),
        candidate("10.0.0.2:6881"),
        candidate("127.0.0.1:6881"),
    ]);
    let (torrent, _) = test_torrent(
        network.clone(),
        vec![tracker.clone() as Arc<dyn Announcer>],
    );

    torrent
        .announce(tracker.clone(), TrackerEvent::Started)
        .await;

    assert_eq!(tracker.announces.load(Ordering::SeqCst), 1);
    assert!(torrent.has_conn("10.0.0.2:6881".parse().unwrap()));

    // one bounded-retry attempt chain for the deduplicated address, none
    // for ourselves
    wait_until(|| network.dials.load(Ordering::SeqCst) >= 10).await;
    sleep(Duration::from_secs(5)).await;
    assert_eq!(network.dials.load(Ordering::SeqCst), 10);

    torrent.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_persist_peer_gives_up_after_attempt_budget() {
    let network = FakeNetwork::new("127.0.0.1:6881", true);
    let (torrent, _) = test_torrent(network.clone(), Vec::new());

    torrent
        .persist_peer("10.0.0.2:6881".parse().unwrap(), None)
        .await;

    assert_eq!(network.dials.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_persist_peer_skips_completed_torrent() {
    let network = FakeNetwork::new("127.0.0.1:6881", true);
    let (torrent, storage) = test_torrent(network.clone(), Vec::new());
    for index in 0..4 {
        storage.insert_piece(index, Bytes::from(vec![0u8; 4]));
    }
    assert!(torrent.done());

    torrent
        .persist_peer("10.0.0.2:6881".parse().unwrap(), None)
        .await;

    assert_eq!(network.dials.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Announce lifecycle
// ============================================================================

#[tokio::test]
async fn test_stop_announcing_without_start() {
    let network = FakeNetwork::new("127.0.0.1:6881", true);
    let tracker = StaticTracker::new(Vec::new());
    let (torrent, _) = test_torrent(network, vec![tracker.clone() as Arc<dyn Announcer>]);

    // no ticker exists yet; this must not panic
    torrent.stop_announcing().await;

    assert_eq!(*tracker.last_event.lock(), Some(TrackerEvent::Stopped));
}

#[tokio::test]
async fn test_announce_lifecycle_events() {
    let network = FakeNetwork::new("127.0.0.1:6881", true);
    let tracker = StaticTracker::new(Vec::new());
    let (torrent, _) = test_torrent(network, vec![tracker.clone() as Arc<dyn Announcer>]);

    torrent.start_announcing().await;
    assert_eq!(*tracker.last_event.lock(), Some(TrackerEvent::Started));

    // starting twice must not spawn a second ticker
    torrent.start_announcing().await;

    torrent.stop_announcing().await;
    assert_eq!(*tracker.last_event.lock(), Some(TrackerEvent::Stopped));
    assert_eq!(tracker.announces.load(Ordering::SeqCst), 3);

    torrent.close().await;
}

// ============================================================================
// Request servicing
// ============================================================================

#[tokio::test]
async fn test_zero_length_request_closes_connection() {
    let network = FakeNetwork::new("127.0.0.1:6881", true);
    let (torrent, _) = test_torrent(network, Vec::new());
    let (conn, _remote) = peer_pair(&torrent).await;

    let run_torrent = torrent.clone();
    tokio::spawn(async move { run_torrent.run().await });

    torrent.on_piece_request(conn.clone(), BlockRequest::new(0, 0, 0));

    wait_until(|| conn.is_closed()).await;
    torrent.close().await;
}

#[tokio::test]
async fn test_request_for_absent_piece_closes_connection() {
    let network = FakeNetwork::new("127.0.0.1:6881", true);
    let (torrent, _) = test_torrent(network, Vec::new());
    let (conn, _remote) = peer_pair(&torrent).await;

    let run_torrent = torrent.clone();
    tokio::spawn(async move { run_torrent.run().await });

    torrent.on_piece_request(conn.clone(), BlockRequest::new(1, 0, 4));

    wait_until(|| conn.is_closed()).await;
    torrent.close().await;
}

#[tokio::test]
async fn test_request_served_from_storage() {
    let network = FakeNetwork::new("127.0.0.1:6881", true);
    let (torrent, storage) = test_torrent(network, Vec::new());
    storage.insert_piece(3, Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]));

    let (conn, remote) = peer_pair(&torrent).await;
    let (mut remote_reader, _remote_writer) = remote.into_split();

    let run_torrent = torrent.clone();
    tokio::spawn(async move { run_torrent.run().await });

    torrent.on_piece_request(conn.clone(), BlockRequest::new(3, 0, 4));

    match remote_reader.receive().await.unwrap() {
        Message::Piece { index, begin, data } => {
            assert_eq!(index, 3);
            assert_eq!(begin, 0);
            assert_eq!(data.as_ref(), &[0x01, 0x02, 0x03, 0x04]);
        }
        other => panic!("unexpected message {:?}", other),
    }

    assert!(!conn.is_closed());
    torrent.close().await;
}

#[tokio::test]
async fn test_close_stops_run_and_drops_late_requests() {
    let network = FakeNetwork::new("127.0.0.1:6881", true);
    let (torrent, _) = test_torrent(network, Vec::new());
    let (conn, _remote) = peer_pair(&torrent).await;

    let run_torrent = torrent.clone();
    let run_task = tokio::spawn(async move { run_torrent.run().await });

    torrent.close().await;
    tokio::time::timeout(Duration::from_secs(1), run_task)
        .await
        .expect("run loop exits on close")
        .unwrap();

    // a request racing the close is dropped, not a fault
    torrent.on_piece_request(conn.clone(), BlockRequest::new(0, 0, 4));
    assert!(torrent.get_status().peers.is_empty());

    // close is idempotent
    torrent.close().await;
}

// ============================================================================
// Peer admission
// ============================================================================

#[tokio::test]
async fn test_add_peer_handshake_and_bitfield() {
    let network = FakeNetwork::new("127.0.0.1:1", false);
    let (torrent, storage) = test_torrent(network, Vec::new());
    storage.insert_piece(0, Bytes::from(vec![0u8; 4]));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let remote = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut transport = PeerTransport::new(stream);

        let theirs = transport.receive_handshake().await.unwrap();
        let reply = Handshake::new(theirs.info_hash, *PeerId::generate().as_bytes());
        transport.send_handshake(&reply).await.unwrap();

        // the local bitfield arrives immediately after admission
        let (mut reader, _writer) = transport.into_split();
        match reader.receive().await.unwrap() {
            Message::Bitfield(bits) => assert_eq!(bits.as_ref(), &[0x80]),
            other => panic!("unexpected message {:?}", other),
        }
    });

    torrent.add_peer(addr, None).await.unwrap();
    assert!(torrent.has_conn(addr));

    remote.await.unwrap();
    torrent.close().await;
}

#[tokio::test]
async fn test_add_peer_rejects_infohash_mismatch() {
    let network = FakeNetwork::new("127.0.0.1:1", false);
    let (torrent, _) = test_torrent(network, Vec::new());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut transport = PeerTransport::new(stream);

        let _ = transport.receive_handshake().await.unwrap();
        let reply = Handshake::new([0xFF; 20], *PeerId::generate().as_bytes());
        transport.send_handshake(&reply).await.unwrap();
    });

    let err = torrent.add_peer(addr, None).await.unwrap_err();
    assert!(matches!(err, SwarmError::Peer(_)));
    assert!(!torrent.has_conn(addr));
}

// ============================================================================
// Download flow
// ============================================================================

#[tokio::test]
async fn test_download_piece_end_to_end() {
    let network = FakeNetwork::new("127.0.0.1:1", true);
    let (torrent, _) = test_torrent(network, Vec::new());
    let (conn, remote) = peer_pair(&torrent).await;
    let (mut remote_reader, mut remote_writer) = remote.into_split();

    let remote_task = tokio::spawn(async move {
        match remote_reader.receive().await.unwrap() {
            Message::Interested => {}
            other => panic!("expected interested, got {:?}", other),
        }

        remote_writer.send(&Message::Unchoke).await.unwrap();

        match remote_reader.receive().await.unwrap() {
            Message::Request {
                index,
                begin,
                length,
            } => assert_eq!((index, begin, length), (3, 0, 4)),
            other => panic!("expected request, got {:?}", other),
        }

        remote_writer
            .send(&Message::Piece {
                index: 3,
                begin: 0,
                data: Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]),
            })
            .await
            .unwrap();
    });

    torrent.download_piece(3, &conn);
    assert!(torrent.piece_requested(3));

    wait_until(|| torrent.bitfield().has(3)).await;
    assert!(!torrent.piece_requested(3));

    remote_task.await.unwrap();
    torrent.close().await;
}

#[tokio::test]
async fn test_status_tracks_pending_peers() {
    let network = FakeNetwork::new("127.0.0.1:1", true);
    let (torrent, _) = test_torrent(network, Vec::new());
    let (conn, _remote) = peer_pair(&torrent).await;

    torrent.mark_piece_in_progress(0, conn.clone());
    let status = torrent.get_status();
    assert_eq!(status.peers.len(), 1);
    assert_eq!(status.peers[0].addr, conn.addr());

    torrent.cancel_piece(0);
    assert!(torrent.get_status().peers.is_empty());

    assert!(!torrent.choke(conn.peer_id()));
    torrent.close().await;
}
