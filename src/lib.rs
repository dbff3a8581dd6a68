//! rswarm - BitTorrent swarm coordination
//!
//! This library implements the swarm-coordination core of a BitTorrent
//! client: tracker-driven peer discovery, handshake-validated peer
//! admission, byte-granularity piece download tracking, and a serialized
//! piece-request event loop answering peers from local storage.
//!
//! # Modules
//!
//! - [`swarm`] - The per-torrent coordinator and piece progress tracking
//! - [`peer`] - Peer wire protocol, framed transport, managed connections
//! - [`tracker`] - Tracker announce protocol and scheduling
//! - [`storage`] - Piece storage abstraction and the in-memory backend
//! - [`metainfo`] - Torrent identity and descriptor types
//! - [`net`] - Network dialing abstraction
//! - [`constants`] - Protocol constants and tuning defaults

pub mod constants;
pub mod metainfo;
pub mod net;
pub mod peer;
pub mod storage;
pub mod swarm;
pub mod tracker;

pub use metainfo::{InfoHash, Metainfo};
pub use net::{Network, TcpNetwork};
pub use peer::{
    Bitfield, BlockRequest, Handshake, Message, PeerConnection, PeerError, PeerId, PeerStats,
    PieceData,
};
pub use storage::{MemoryStorage, Storage, StorageError};
pub use swarm::{BlockStatus, PieceProgress, SwarmError, Torrent, TorrentConfig, TorrentStatus};
pub use tracker::{
    AnnounceRequest, AnnounceResponse, Announcer, HttpTracker, PeerCandidate, TrackerError,
    TrackerEvent,
};
