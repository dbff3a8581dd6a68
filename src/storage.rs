//! Piece storage abstraction.
//!
//! The swarm coordinator reads and writes pieces through the [`Storage`]
//! trait and never touches a backend directly; the authoritative completion
//! bitfield lives behind the same handle. [`MemoryStorage`] is the bundled
//! backend: an in-memory piece map with SHA-1 verification, enough for
//! seeding small content and for exercising the coordinator in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::metainfo::{InfoHash, Metainfo};
use crate::peer::{Bitfield, BlockRequest, PieceData};

/// Errors from the storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error from the underlying medium.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Piece index outside the torrent.
    #[error("piece {0} out of range")]
    PieceOutOfRange(u32),

    /// Written piece has the wrong length.
    #[error("piece {0} has invalid length {1}")]
    InvalidLength(u32, usize),

    /// Written piece failed hash verification.
    #[error("piece {0} failed hash verification")]
    HashMismatch(u32),
}

/// Capability interface over durable piece storage.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Content identity of the stored torrent.
    fn info_hash(&self) -> InfoHash;

    /// Snapshot of the completion bitmap.
    fn bitfield(&self) -> Bitfield;

    /// Bytes still missing from the content.
    fn download_remaining(&self) -> u64;

    /// Parsed torrent descriptor.
    fn metainfo(&self) -> Metainfo;

    /// Reads the requested sub-range of a piece, or `None` when the piece
    /// (or range) is not held.
    async fn read_block(&self, request: &BlockRequest) -> Option<PieceData>;

    /// Persists a fully assembled piece.
    async fn write_piece(&self, piece: PieceData) -> Result<(), StorageError>;

    /// Flushes buffered writes to the medium.
    async fn flush(&self) -> Result<(), StorageError>;
}

struct MemoryInner {
    pieces: HashMap<u32, Bytes>,
    bitfield: Bitfield,
}

/// In-memory [`Storage`] backend.
pub struct MemoryStorage {
    info_hash: InfoHash,
    metainfo: Metainfo,
    inner: RwLock<MemoryInner>,
}

impl MemoryStorage {
    pub fn new(info_hash: InfoHash, metainfo: Metainfo) -> Self {
        let piece_count = metainfo.piece_count() as usize;
        Self {
            info_hash,
            metainfo,
            inner: RwLock::new(MemoryInner {
                pieces: HashMap::new(),
                bitfield: Bitfield::new(piece_count),
            }),
        }
    }

    /// Seeds the backend with an already-held piece, bypassing hash checks.
    pub fn insert_piece(&self, index: u32, data: Bytes) {
        let mut inner = self.inner.write();
        inner.pieces.insert(index, data);
        inner.bitfield.set(index);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn bitfield(&self) -> Bitfield {
        self.inner.read().bitfield.clone()
    }

    fn download_remaining(&self) -> u64 {
        let inner = self.inner.read();
        (0..self.metainfo.piece_count())
            .filter(|&i| !inner.bitfield.has(i))
            .map(|i| self.metainfo.length_of_piece(i) as u64)
            .sum()
    }

    fn metainfo(&self) -> Metainfo {
        self.metainfo.clone()
    }

    async fn read_block(&self, request: &BlockRequest) -> Option<PieceData> {
        let inner = self.inner.read();
        let data = inner.pieces.get(&request.piece)?;

        let start = request.offset as usize;
        let end = start.checked_add(request.length as usize)?;
        if end > data.len() {
            return None;
        }

        Some(PieceData::new(
            request.piece,
            request.offset,
            data.slice(start..end),
        ))
    }

    async fn write_piece(&self, piece: PieceData) -> Result<(), StorageError> {
        if piece.piece >= self.metainfo.piece_count() {
            return Err(StorageError::PieceOutOfRange(piece.piece));
        }
        let expected = self.metainfo.length_of_piece(piece.piece) as usize;
        if piece.data.len() != expected {
            return Err(StorageError::InvalidLength(piece.piece, piece.data.len()));
        }

        if let Some(expected_hash) = self.metainfo.piece_hashes.get(piece.piece as usize) {
            let digest: [u8; 20] = Sha1::digest(&piece.data).into();
            if digest != *expected_hash {
                return Err(StorageError::HashMismatch(piece.piece));
            }
        }

        let mut inner = self.inner.write();
        inner.pieces.insert(piece.piece, piece.data);
        inner.bitfield.set(piece.piece);
        Ok(())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
