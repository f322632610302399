use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use rand::Rng as _;

use super::error::DhtError;

/// Consecutive failed queries before a node is dropped from its bucket.
const MAX_FAILURES: u8 = 3;

/// A node has to be heard from this recently to count as fresh.
const FRESH_WINDOW: Duration = Duration::from_secs(15 * 60);

/// A 160-bit DHT node identifier.
///
/// Distances are XOR, compared byte-by-byte most-significant first, so
/// the derived `Ord` on the distance array is the numeric order of the
/// 160-bit distance.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    /// Generates a uniformly random node ID.
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        rand::rng().fill(&mut id[..]);
        Self(id)
    }

    /// Builds an ID from a 20-byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        let id: [u8; 20] = bytes.try_into().map_err(|_| DhtError::InvalidNodeId)?;
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// XOR distance to another ID.
    pub fn distance(&self, other: &NodeId) -> [u8; 20] {
        let mut dist = [0u8; 20];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        dist
    }

    /// Routing-table bucket index for `other` relative to this ID: the
    /// position of the highest set bit of the XOR distance, counted from
    /// the least-significant end. 0 for the nearest neighbours through
    /// 159 for the far half of the ID space.
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        for (i, &byte) in self.distance(other).iter().enumerate() {
            if byte != 0 {
                return 159 - (i * 8 + byte.leading_zeros() as usize);
            }
        }

        // Zero distance: only our own ID, which the table refuses anyway.
        0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A known remote DHT node: identity, endpoint, and liveness bookkeeping.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    pub failures: u8,
}

impl Node {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            failures: 0,
        }
    }

    /// Records a fresh sighting and clears the failure streak.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.failures = 0;
    }

    pub fn fail(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn is_stale(&self) -> bool {
        self.last_seen.elapsed() > FRESH_WINDOW
    }

    pub fn is_bad(&self) -> bool {
        self.failures >= MAX_FAILURES
    }

    /// Parses one 26-byte compact record: 20 bytes ID, 4 bytes IPv4,
    /// 2 bytes port, addresses in network byte order.
    pub fn from_compact(record: &[u8]) -> Option<Self> {
        if record.len() != 26 {
            return None;
        }

        let id = NodeId::from_bytes(&record[..20]).ok()?;
        let ip = Ipv4Addr::new(record[20], record[21], record[22], record[23]);
        let port = u16::from_be_bytes([record[24], record[25]]);

        Some(Self::new(id, SocketAddr::new(IpAddr::V4(ip), port)))
    }

    /// Compact form of this node, or `None` for an IPv6 endpoint (the
    /// compact node encoding is IPv4-only).
    pub fn to_compact(&self) -> Option<[u8; 26]> {
        let SocketAddr::V4(v4) = self.addr else {
            return None;
        };

        let mut record = [0u8; 26];
        record[..20].copy_from_slice(&self.id.0);
        record[20..24].copy_from_slice(&v4.ip().octets());
        record[24..26].copy_from_slice(&v4.port().to_be_bytes());
        Some(record)
    }
}
