use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use super::error::TrackerError;
use crate::metainfo::InfoHash;
use crate::peer::PeerId;

/// What a periodic announce reports to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Periodic reannounce, no event parameter on the wire.
    None,
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }
}

/// One announce call's parameters.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    /// Local address, reported to the tracker.
    pub ip: SocketAddr,
    /// Port peers should connect back to.
    pub port: u16,
    pub event: TrackerEvent,
    /// How many peers to ask for.
    pub num_want: u32,
    /// Bytes left to download.
    pub left: u64,
    /// Prefer the compact peer-list encoding.
    pub compact: bool,
}

/// A peer address learned from a tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCandidate {
    pub addr: SocketAddr,
    /// Only present in non-compact responses.
    pub peer_id: Option<PeerId>,
}

/// Parsed tracker reply.
#[derive(Debug, Clone, Default)]
pub struct AnnounceResponse {
    pub interval: Option<Duration>,
    pub min_interval: Option<Duration>,
    pub complete: Option<u32>,
    pub incomplete: Option<u32>,
    pub peers: Vec<PeerCandidate>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(rename = "failure reason", default)]
    failure_reason: Option<String>,
    #[serde(default)]
    interval: Option<u32>,
    #[serde(rename = "min interval", default)]
    min_interval: Option<u32>,
    #[serde(default)]
    complete: Option<u32>,
    #[serde(default)]
    incomplete: Option<u32>,
    #[serde(default)]
    peers: Option<RawPeers>,
    #[serde(default)]
    peers6: Option<serde_bytes::ByteBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPeers {
    Compact(#[serde(with = "serde_bytes")] Vec<u8>),
    List(Vec<RawPeer>),
}

#[derive(Debug, Deserialize)]
struct RawPeer {
    #[serde(rename = "peer id", default)]
    peer_id: Option<serde_bytes::ByteBuf>,
    ip: String,
    port: u16,
}

/// Decodes a bencoded announce reply, surfacing tracker-reported failures.
pub(super) fn parse_announce_response(data: &[u8]) -> Result<AnnounceResponse, TrackerError> {
    let raw: RawResponse = serde_bencode::from_bytes(data)?;

    if let Some(reason) = raw.failure_reason {
        return Err(TrackerError::Failure(reason));
    }

    let mut response = AnnounceResponse {
        interval: raw.interval.map(|s| Duration::from_secs(s as u64)),
        min_interval: raw.min_interval.map(|s| Duration::from_secs(s as u64)),
        complete: raw.complete,
        incomplete: raw.incomplete,
        peers: Vec::new(),
    };

    match raw.peers {
        Some(RawPeers::Compact(bytes)) => {
            response.peers = parse_compact_peers(&bytes);
        }
        Some(RawPeers::List(list)) => {
            for peer in list {
                match peer.ip.parse::<IpAddr>() {
                    Ok(ip) => response.peers.push(PeerCandidate {
                        addr: SocketAddr::new(ip, peer.port),
                        peer_id: peer.peer_id.and_then(|id| PeerId::from_bytes(&id)),
                    }),
                    Err(_) => warn!("failed to resolve peer {}", peer.ip),
                }
            }
        }
        None => {}
    }

    if let Some(bytes) = raw.peers6 {
        response.peers.extend(parse_compact_peers6(&bytes));
    }

    Ok(response)
}

/// Parses the compact IPv4 peer list: 4 bytes IP + 2 bytes port each.
pub fn parse_compact_peers(data: &[u8]) -> Vec<PeerCandidate> {
    data.chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            PeerCandidate {
                addr: SocketAddr::new(IpAddr::V4(ip), port),
                peer_id: None,
            }
        })
        .collect()
}

/// Parses the compact IPv6 peer list: 16 bytes IP + 2 bytes port each.
pub fn parse_compact_peers6(data: &[u8]) -> Vec<PeerCandidate> {
    data.chunks_exact(18)
        .map(|chunk| {
            let mut ip_bytes = [0u8; 16];
            ip_bytes.copy_from_slice(&chunk[..16]);
            let port = u16::from_be_bytes([chunk[16], chunk[17]]);
            PeerCandidate {
                addr: SocketAddr::new(IpAddr::V6(Ipv6Addr::from(ip_bytes)), port),
                peer_id: None,
            }
        })
        .collect()
}
