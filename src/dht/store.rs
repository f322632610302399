use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Announcements expire after the Mainline-standard half hour.
const ANNOUNCE_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Cap on stored endpoints per info hash.
const MAX_PEERS_PER_INFO_HASH: usize = 1000;

struct AnnouncedPeer {
    addr: SocketAddr,
    announced_at: Instant,
}

/// Endpoints announced via `announce_peer`, keyed by info hash.
///
/// A re-announce from the same endpoint restarts its lifetime rather
/// than duplicating the entry; expired entries are pruned on access.
#[derive(Default)]
pub(crate) struct PeerStore {
    swarms: HashMap<[u8; 20], Vec<AnnouncedPeer>>,
}

impl PeerStore {
    pub(crate) fn insert(&mut self, info_hash: [u8; 20], addr: SocketAddr) {
        let peers = self.swarms.entry(info_hash).or_default();
        let now = Instant::now();

        peers.retain(|p| now.duration_since(p.announced_at) < ANNOUNCE_LIFETIME && p.addr != addr);

        if peers.len() < MAX_PEERS_PER_INFO_HASH {
            peers.push(AnnouncedPeer {
                addr,
                announced_at: now,
            });
        }
    }

    pub(crate) fn lookup(&mut self, info_hash: &[u8; 20]) -> Vec<SocketAddr> {
        let Some(peers) = self.swarms.get_mut(info_hash) else {
            return Vec::new();
        };

        let now = Instant::now();
        peers.retain(|p| now.duration_since(p.announced_at) < ANNOUNCE_LIFETIME);
        peers.iter().map(|p| p.addr).collect()
    }
}
