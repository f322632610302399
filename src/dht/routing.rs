use std::collections::VecDeque;

use parking_lot::RwLock;

use super::node::{Node, NodeId};

pub(crate) const K: usize = 8;
const NUM_BUCKETS: usize = 160;

/// Outcome of offering a node to the routing table.
///
/// A full bucket is not resolved by the table itself: deciding between
/// the long-lived head entry and the newcomer requires pinging the head,
/// and that is the engine's job. The caller gets the oldest entry back
/// and settles the eviction with [`RoutingTable::confirm_oldest`] or
/// [`RoutingTable::replace_oldest`].
#[derive(Debug, Clone)]
pub enum Insertion {
    /// Appended to a bucket with spare capacity.
    Added,
    /// Already known; moved to the most-recently-seen position and its
    /// endpoint updated.
    Refreshed,
    /// The bucket is at capacity. `oldest` is its least-recently-seen
    /// entry, pending a liveness check.
    Full { oldest: Node },
    /// The local ID is never tracked.
    Ignored,
}

#[derive(Debug, Default)]
struct Bucket {
    nodes: VecDeque<Node>,
}

impl Bucket {
    fn offer(&mut self, node: Node) -> Insertion {
        if let Some(pos) = self.nodes.iter().position(|n| n.id == node.id) {
            let mut known = self.nodes.remove(pos).unwrap();
            known.addr = node.addr;
            known.touch();
            self.nodes.push_back(known);
            return Insertion::Refreshed;
        }

        if self.nodes.len() < K {
            self.nodes.push_back(node);
            return Insertion::Added;
        }

        let oldest = self.nodes.front().cloned().unwrap();
        Insertion::Full { oldest }
    }

    fn confirm_oldest(&mut self, id: &NodeId) {
        if self.nodes.front().is_some_and(|n| &n.id == id) {
            let mut survivor = self.nodes.pop_front().unwrap();
            survivor.touch();
            self.nodes.push_back(survivor);
        }
    }

    fn replace_oldest(&mut self, stale: &NodeId, candidate: Node) {
        if self.nodes.front().is_some_and(|n| &n.id == stale) {
            self.nodes.pop_front();
            self.nodes.push_back(candidate);
        } else {
            // The head changed while the liveness check was in flight;
            // offer the candidate normally and drop it if still full.
            self.offer(candidate);
        }
    }

    fn remove(&mut self, id: &NodeId) {
        if let Some(pos) = self.nodes.iter().position(|n| &n.id == id) {
            self.nodes.remove(pos);
        }
    }
}

/// Kademlia routing table: 160 buckets of up to [`K`] nodes, bucket `i`
/// holding nodes whose XOR distance from the local ID has its highest
/// set bit at bit position `i`.
///
/// Buckets keep insertion order, least-recently-seen at the head. All
/// mutations take a per-bucket write lock, so inserts and closest-k
/// scans are atomic with respect to each other.
pub struct RoutingTable {
    our_id: NodeId,
    buckets: Vec<RwLock<Bucket>>,
}

impl RoutingTable {
    pub fn new(our_id: NodeId) -> Self {
        let buckets = (0..NUM_BUCKETS).map(|_| RwLock::default()).collect();
        Self { our_id, buckets }
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    fn bucket(&self, id: &NodeId) -> &RwLock<Bucket> {
        &self.buckets[self.our_id.bucket_index(id)]
    }

    /// Offers a node to its bucket. See [`Insertion`] for the contract on
    /// the `Full` outcome.
    pub fn insert(&self, node: Node) -> Insertion {
        if node.id == self.our_id {
            return Insertion::Ignored;
        }
        self.bucket(&node.id).write().offer(node)
    }

    /// Settles a `Full` outcome in favour of the incumbent: the oldest
    /// entry answered its ping and rotates to the tail.
    pub fn confirm_oldest(&self, id: &NodeId) {
        self.bucket(id).write().confirm_oldest(id);
    }

    /// Settles a `Full` outcome against the incumbent: the oldest entry
    /// went unanswered and the candidate takes its slot.
    pub fn replace_oldest(&self, stale: &NodeId, candidate: Node) {
        self.bucket(stale).write().replace_oldest(stale, candidate);
    }

    /// Records a failed query against a node, dropping it after three
    /// consecutive failures.
    pub fn mark_failed(&self, id: &NodeId) {
        let mut bucket = self.bucket(id).write();
        if let Some(node) = bucket.nodes.iter_mut().find(|n| &n.id == id) {
            node.fail();
            if node.is_bad() {
                bucket.remove(id);
            }
        }
    }

    /// Up to `k` known nodes sorted ascending by XOR distance to
    /// `target`, ties broken by node ID bytes.
    pub fn find_closest(&self, target: &NodeId, k: usize) -> Vec<Node> {
        let mut found: Vec<(Node, [u8; 20])> = Vec::new();

        for bucket in &self.buckets {
            let bucket = bucket.read();
            found.extend(bucket.nodes.iter().map(|n| (n.clone(), n.id.distance(target))));
        }

        found.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.id.0.cmp(&b.0.id.0)));
        found.truncate(k);
        found.into_iter().map(|(node, _)| node).collect()
    }

    pub fn node_count(&self) -> usize {
        self.buckets.iter().map(|b| b.read().nodes.len()).sum()
    }

    /// Indices of buckets whose least-recently-seen entry has gone quiet,
    /// candidates for a refresh lookup.
    pub(crate) fn stale_buckets(&self) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| b.read().nodes.front().is_some_and(Node::is_stale))
            .map(|(i, _)| i)
            .collect()
    }
}
