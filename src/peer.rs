//! Peer wire protocol and managed peer connections.
//!
//! The base BitTorrent peer protocol: the 68-byte handshake, length-prefixed
//! wire messages, the framed transport, and the managed connection whose
//! read loop feeds the swarm coordinator.

mod bitfield;
mod connection;
mod error;
mod message;
mod peer_id;
mod piece;
mod transport;

pub use bitfield::Bitfield;
pub use connection::{PeerConnection, PeerStats};
pub use error::PeerError;
pub use message::{Handshake, Message, MessageId};
pub use peer_id::PeerId;
pub use piece::{BlockRequest, PieceData};
pub use transport::{MessageReader, MessageWriter, PeerTransport};
