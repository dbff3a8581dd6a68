//! Torrent identity and descriptor types.
//!
//! The swarm coordinator only needs the content identity (infohash) and the
//! piece geometry of a torrent; full metainfo parsing lives outside this
//! crate. [`Metainfo`] is the parsed descriptor storage hands back.

use std::fmt;

/// The 20-byte content identity of a torrent.
///
/// Peers must present the same infohash during the handshake to be admitted
/// to the swarm.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    /// Creates an infohash from a 20-byte slice.
    ///
    /// Returns `None` if the slice is not exactly 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 20 {
            return None;
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(bytes);
        Some(Self(arr))
    }

    /// Returns the raw 20 bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex rendering, for logs and tracker URLs.
    pub fn to_hex(&self) -> String {
        self.0
            .iter()
            .fold(String::with_capacity(40), |mut s, b| {
                use std::fmt::Write;
                let _ = write!(s, "{:02x}", b);
                s
            })
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Parsed torrent descriptor: name and piece geometry.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// Torrent name (top-level directory or file name).
    pub name: String,
    /// Length of every piece except possibly the last.
    pub piece_length: u32,
    /// Total content length in bytes.
    pub total_length: u64,
    /// Per-piece SHA-1 hashes, when known. Empty means verification is
    /// skipped on write.
    pub piece_hashes: Vec<[u8; 20]>,
}

impl Metainfo {
    pub fn new(name: impl Into<String>, piece_length: u32, total_length: u64) -> Self {
        Self {
            name: name.into(),
            piece_length,
            total_length,
            piece_hashes: Vec::new(),
        }
    }

    pub fn with_piece_hashes(mut self, hashes: Vec<[u8; 20]>) -> Self {
        self.piece_hashes = hashes;
        self
    }

    /// Number of pieces in the torrent.
    pub fn piece_count(&self) -> u32 {
        if self.piece_length == 0 {
            return 0;
        }
        self.total_length.div_ceil(self.piece_length as u64) as u32
    }

    /// Length of the piece at `index`, accounting for a short final piece.
    pub fn length_of_piece(&self, index: u32) -> u32 {
        let offset = index as u64 * self.piece_length as u64;
        let remaining = self.total_length.saturating_sub(offset);
        remaining.min(self.piece_length as u64) as u32
    }
}
