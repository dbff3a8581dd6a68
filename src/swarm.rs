//! Swarm coordination for a single torrent.
//!
//! The [`Torrent`] coordinator owns peer admission, tracker-driven peer
//! discovery with bounded-retry connection attempts, the pending-piece
//! bookkeeping, and the single event loop that serializes every piece
//! request against storage. [`PieceProgress`] tracks the byte-granularity
//! download state of one in-flight piece.

mod announce;
mod error;
mod progress;
mod torrent;

pub use error::SwarmError;
pub use progress::{BlockStatus, PieceProgress};
pub use torrent::{Torrent, TorrentConfig, TorrentStatus};

#[cfg(test)]
mod tests;
