//! Tracker announce protocol.
//!
//! Peer discovery goes through the [`Announcer`] capability trait; the
//! swarm coordinator polls each announcer's own scheduling predicate and
//! never cares what protocol sits behind it. [`HttpTracker`] is the bundled
//! HTTP/HTTPS implementation.

mod error;
mod http;
mod response;

use async_trait::async_trait;

pub use error::TrackerError;
pub use http::HttpTracker;
pub use response::{AnnounceRequest, AnnounceResponse, PeerCandidate, TrackerEvent};

/// Capability interface over one tracker.
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Sends one announce and returns the tracker's peer list.
    async fn announce(&self, request: &AnnounceRequest) -> Result<AnnounceResponse, TrackerError>;

    /// Whether this tracker is due for a periodic reannounce.
    fn should_announce(&self) -> bool;

    /// Identifier for logging.
    fn name(&self) -> &str;
}
