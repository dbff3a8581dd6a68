//! Protocol constants and tuning defaults.
//!
//! Values the swarm coordinator and its collaborators share: block and
//! message sizing, connection and announce timing, and the retry bounds
//! peer discovery works with. Policy values (retry count, numwant) are
//! defaults, not protocol requirements; `TorrentConfig` can override them.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &str = "-RS0001-";

// ============================================================================
// Ports
// ============================================================================

/// Default BitTorrent listen port
pub const DEFAULT_PORT: u16 = 6881;

// ============================================================================
// Block and piece sizes
// ============================================================================

/// Block size, the unit of request/response over the wire (16KB)
pub const BLOCK_SIZE: u32 = 16384;

/// Maximum message size accepted from a peer (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16777216;

// ============================================================================
// Timeouts - Connection
// ============================================================================

/// TCP connection timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Peer read timeout
pub const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Peer write timeout
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Timeouts - Tracker
// ============================================================================

/// HTTP tracker request timeout
pub const HTTP_TRACKER_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Intervals - Announce
// ============================================================================

/// Base tick of the announce poll loop; each tick asks every tracker
/// whether it is due
pub const ANNOUNCE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Announce interval used until a tracker reports its own
pub const TRACKER_DEFAULT_INTERVAL: Duration = Duration::from_secs(1800);

// ============================================================================
// Peer discovery defaults
// ============================================================================

/// How many peers to ask a tracker for
pub const DEFAULT_NUM_WANT: u32 = 10;

/// Connection attempts per discovered address before giving up on it
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;

/// Sleep between failed connection attempts to the same address
pub const CONNECT_RETRY_SLEEP: Duration = Duration::from_millis(250);

/// Outstanding block requests kept in flight per assigned piece
pub const DEFAULT_REQUEST_PIPELINE: usize = 5;
