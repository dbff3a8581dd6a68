use std::net::SocketAddr;
use std::sync::Arc;

use tokio::time::{interval, sleep};
use tracing::{debug, warn};

use super::torrent::Torrent;
use crate::constants::{ANNOUNCE_POLL_INTERVAL, CONNECT_RETRY_SLEEP};
use crate::peer::PeerId;
use crate::tracker::{AnnounceRequest, Announcer, TrackerEvent};

impl Torrent {
    /// Announces `Started` to every tracker, then launches the periodic
    /// poll ticker. A second call while announcing changes nothing.
    pub async fn start_announcing(&self) {
        for tracker in self.trackers.clone() {
            self.announce(tracker, TrackerEvent::Started).await;
        }

        let Some(this) = self.this() else { return };
        let mut announcer = self.announcer.lock();
        if announcer.is_none() {
            *announcer = Some(tokio::spawn(this.poll_announce()));
        }
    }

    /// Halts the poll ticker and announces `Stopped` to every tracker.
    /// Callable before any start; a missing ticker is not an error.
    pub async fn stop_announcing(&self) {
        if let Some(ticker) = self.announcer.lock().take() {
            ticker.abort();
        }
        for tracker in self.trackers.clone() {
            self.announce(tracker, TrackerEvent::Stopped).await;
        }
    }

    /// Ticks once a second, firing an asynchronous reannounce for every
    /// tracker whose own schedule says it is due.
    async fn poll_announce(self: Arc<Self>) {
        let mut ticker = interval(ANNOUNCE_POLL_INTERVAL);
        loop {
            ticker.tick().await;
            for tracker in &self.trackers {
                if tracker.should_announce() {
                    let torrent = self.clone();
                    let tracker = tracker.clone();
                    self.spawn_task(async move {
                        torrent.announce(tracker, TrackerEvent::None).await;
                    });
                }
            }
        }
    }

    /// Sends one announce and starts a bounded-retry connection attempt for
    /// every new candidate the tracker returns. Tracker failures are logged
    /// and swallowed; one failing tracker never blocks the others.
    pub async fn announce(&self, tracker: Arc<dyn Announcer>, event: TrackerEvent) {
        let request = AnnounceRequest {
            info_hash: self.storage().info_hash(),
            peer_id: self.peer_id(),
            ip: self.network().local_addr(),
            port: self.config().port,
            event,
            num_want: self.config().num_want,
            left: self.storage().download_remaining(),
            compact: true,
        };

        match tracker.announce(&request).await {
            Ok(response) => {
                let Some(this) = self.this() else { return };
                for candidate in response.peers {
                    if !self.admit_candidate(candidate.addr) {
                        continue;
                    }
                    let torrent = this.clone();
                    self.spawn_task(async move {
                        torrent.persist_peer(candidate.addr, candidate.peer_id).await;
                    });
                }
            }
            Err(e) => warn!("failed to announce to {}: {}", tracker.name(), e),
        }
    }

    /// Gate for a discovered address: rejects ourselves and duplicates,
    /// reserving the address for a connection attempt otherwise.
    pub(super) fn admit_candidate(&self, addr: SocketAddr) -> bool {
        if addr == self.network().local_addr() {
            return false;
        }
        let mut conns = self.conns.write();
        if conns.contains_key(&addr) {
            return false;
        }
        conns.insert(addr, false);
        true
    }

    /// Retries [`add_peer`](Self::add_peer) until a connection sticks, the
    /// torrent completes, or the attempt budget runs out. Exhaustion is
    /// silent: discovered peers are abundant and individually expendable.
    pub async fn persist_peer(&self, addr: SocketAddr, peer_id: Option<PeerId>) {
        let mut tries_left = self.config().max_connect_attempts;
        while !self.done() {
            match self.add_peer(addr, peer_id).await {
                Ok(()) => return,
                Err(e) => {
                    debug!("didn't connect to {}: {}", addr, e);
                    tries_left = tries_left.saturating_sub(1);
                }
            }
            if tries_left == 0 {
                return;
            }
            sleep(CONNECT_RETRY_SLEEP).await;
        }
    }
}
