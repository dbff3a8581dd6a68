use bytes::Bytes;

/// A peer's request for a sub-range of a piece.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece: u32,
    pub offset: u32,
    pub length: u32,
}

impl BlockRequest {
    pub fn new(piece: u32, offset: u32, length: u32) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }
}

/// Piece bytes travelling to or from storage and the wire.
///
/// `offset` is relative to the start of the piece; a full piece has
/// `offset == 0` and `data.len()` equal to the piece length.
#[derive(Debug, Clone)]
pub struct PieceData {
    pub piece: u32,
    pub offset: u32,
    pub data: Bytes,
}

impl PieceData {
    pub fn new(piece: u32, offset: u32, data: Bytes) -> Self {
        Self {
            piece,
            offset,
            data,
        }
    }

    /// The request this data answers.
    pub fn request(&self) -> BlockRequest {
        BlockRequest {
            piece: self.piece,
            offset: self.offset,
            length: self.data.len() as u32,
        }
    }
}
