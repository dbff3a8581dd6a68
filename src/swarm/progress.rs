use bytes::Bytes;
use parking_lot::Mutex;
use tracing::warn;

use crate::constants::BLOCK_SIZE;
use crate::peer::PieceData;

/// Download state of one byte of a piece buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Not yet requested from anyone.
    Missing,
    /// Claimed by an outstanding block request.
    Pending,
    /// Received and written into the buffer.
    Obtained,
}

/// Byte-granularity progress tracker for one in-flight piece.
///
/// Tracks Missing/Pending/Obtained per byte of the piece buffer, claimed
/// and filled in block-aligned strides. One lock covers the buffer and the
/// status array, so concurrent claimers never observe the same stride as
/// available and writes never race a claim scan.
pub struct PieceProgress {
    index: u32,
    length: u32,
    inner: Mutex<ProgressInner>,
}

struct ProgressInner {
    data: Vec<u8>,
    status: Vec<BlockStatus>,
    taken: bool,
}

impl PieceProgress {
    /// Creates a tracker for piece `index` of `length` bytes, all Missing.
    pub fn new(index: u32, length: u32) -> Self {
        Self {
            index,
            length,
            inner: Mutex::new(ProgressInner {
                data: vec![0; length as usize],
                status: vec![BlockStatus::Missing; length as usize],
                taken: false,
            }),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Claims the next unclaimed block-aligned stride.
    ///
    /// Returns the offset of the first stride whose first byte is Missing,
    /// marking the whole stride Pending before returning so no two callers
    /// can claim it. `None` once every stride is claimed or obtained.
    pub fn next_offset(&self) -> Option<u32> {
        let mut inner = self.inner.lock();
        let len = inner.status.len() as u32;

        let mut offset = 0u32;
        while offset < len {
            if inner.status[offset as usize] == BlockStatus::Missing {
                let end = offset.saturating_add(BLOCK_SIZE).min(len);
                for s in &mut inner.status[offset as usize..end as usize] {
                    *s = BlockStatus::Pending;
                }
                return Some(offset);
            }
            offset += BLOCK_SIZE;
        }
        None
    }

    /// Writes received block data at `offset`, marking the range Obtained.
    ///
    /// An out-of-range write is a logged no-op returning `false`: a
    /// malformed peer must not crash the coordinator or corrupt state.
    pub fn put(&self, offset: u32, data: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        let start = offset as usize;
        let Some(end) = start.checked_add(data.len()) else {
            warn!("block out of range {}", offset);
            return false;
        };
        if end > inner.status.len() {
            warn!("block out of range {}", offset);
            return false;
        }

        inner.data[start..end].copy_from_slice(data);
        for s in &mut inner.status[start..end] {
            *s = BlockStatus::Obtained;
        }
        true
    }

    /// Returns the range `[offset, offset + length)` to Missing so the
    /// blocks can be reassigned after a stall or peer loss. Out-of-range
    /// ranges are ignored.
    pub fn cancel(&self, offset: u32, length: u32) {
        let mut inner = self.inner.lock();
        let start = offset as usize;
        let Some(end) = start.checked_add(length as usize) else {
            return;
        };
        if end > inner.status.len() {
            return;
        }

        for s in &mut inner.status[start..end] {
            *s = BlockStatus::Missing;
        }
    }

    /// True once every byte has been obtained.
    pub fn is_complete(&self) -> bool {
        let inner = self.inner.lock();
        inner
            .status
            .iter()
            .all(|s| *s == BlockStatus::Obtained)
    }

    /// Consumes the assembled piece once complete. Returns `None` while
    /// bytes are outstanding or after the buffer was already taken.
    pub fn take_data(&self) -> Option<PieceData> {
        let mut inner = self.inner.lock();
        if inner.taken || inner.status.iter().any(|s| *s != BlockStatus::Obtained) {
            return None;
        }
        inner.taken = true;
        let data = std::mem::take(&mut inner.data);
        Some(PieceData::new(self.index, 0, Bytes::from(data)))
    }
}
