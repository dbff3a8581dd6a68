use thiserror::Error;

use crate::peer::PeerError;
use crate::storage::StorageError;
use crate::tracker::TrackerError;

/// Errors surfaced by the swarm coordinator.
///
/// Every variant is recovered at the task boundary where it occurs; none
/// of them take the torrent down.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("torrent closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),
}
