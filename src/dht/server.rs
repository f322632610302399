use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::DhtError;
use super::message::{Message, Query, Reply, TransactionId};
use super::node::{Node, NodeId};
use super::routing::{Insertion, RoutingTable, K};
use super::store::PeerStore;

/// Deadline for a single outbound RPC.
const RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// Cap on concurrently outstanding outbound queries.
const MAX_PENDING_QUERIES: usize = 100;

/// Parallelism of one lookup round.
const ALPHA: usize = 3;

/// Bound on lookup rounds before giving up on improvement.
const MAX_LOOKUP_ROUNDS: usize = 10;

/// A lookup stops early once it has collected this many peers.
const LOOKUP_TARGET_PEERS: usize = 50;

/// Inbound datagram buffer. Core queries and replies fit well under 1 KiB;
/// some headroom for peers that pack larger replies.
const MAX_DATAGRAM: usize = 2048;

const BUCKET_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);
const TOKEN_ROTATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Well-known seed nodes, used when none are configured.
pub const BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "router.utorrent.com:6881",
];

/// Rotating secrets behind `get_peers` tokens. A token stays valid across
/// one rotation so announces racing a rotation still land.
struct TokenSecrets {
    current: [u8; 16],
    previous: [u8; 16],
}

impl TokenSecrets {
    fn new() -> Self {
        Self {
            current: rand::random(),
            previous: rand::random(),
        }
    }

    fn rotate(&mut self) {
        self.previous = self.current;
        self.current = rand::random();
    }
}

/// A Mainline DHT node: one UDP endpoint, a routing table, and a store of
/// announced peers.
///
/// The serve loop ([`run`](DhtServer::run)) answers the four standard
/// queries and demultiplexes replies to this node's own outstanding
/// requests by transaction ID, so it must be running for
/// [`bootstrap`](DhtServer::bootstrap), [`find_node`](DhtServer::find_node)
/// and [`get_peers`](DhtServer::get_peers) to see their replies.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use mdht::dht::DhtServer;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let dht = Arc::new(DhtServer::bind(6881).await?);
///
/// let server = dht.clone();
/// tokio::spawn(async move { server.run().await });
///
/// dht.bootstrap().await?;
/// let peers = dht.get_peers([0u8; 20]).await?;
/// # Ok(())
/// # }
/// ```
pub struct DhtServer {
    socket: Arc<UdpSocket>,
    our_id: NodeId,
    routing_table: Arc<RoutingTable>,
    pending: RwLock<HashMap<TransactionId, mpsc::Sender<Message>>>,
    seeds: RwLock<Vec<SocketAddr>>,
    token_secrets: RwLock<TokenSecrets>,
    peer_store: RwLock<PeerStore>,
    port: u16,
}

impl DhtServer {
    /// Binds the node to `port` on all interfaces with a freshly
    /// generated node ID. Port `0` picks an ephemeral port.
    pub async fn bind(port: u16) -> Result<Self, DhtError> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        let local_addr = socket.local_addr()?;
        let our_id = NodeId::generate();

        info!("dht node bound to {} with id {}", local_addr, our_id);

        Ok(Self {
            socket: Arc::new(socket),
            our_id,
            routing_table: Arc::new(RoutingTable::new(our_id)),
            pending: RwLock::new(HashMap::new()),
            seeds: RwLock::new(Vec::new()),
            token_secrets: RwLock::new(TokenSecrets::new()),
            peer_store: RwLock::new(PeerStore::default()),
            port: local_addr.port(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Records a bootstrap endpoint. Seeds are contacted by address only;
    /// nothing enters the routing table until a real node ID is learned
    /// from a reply.
    pub fn add_seed(&self, addr: SocketAddr) {
        self.seeds.write().push(addr);
    }

    fn seed_addrs(&self) -> Vec<SocketAddr> {
        self.seeds.read().clone()
    }

    /// Joins the network: queries every configured seed (or the built-in
    /// well-known list) with `find_node` for our own ID and inserts every
    /// node learned from the replies.
    pub async fn bootstrap(&self) -> Result<(), DhtError> {
        let mut seeds = self.seed_addrs();
        if seeds.is_empty() {
            seeds = resolve_bootstrap_nodes().await;
        }

        info!("bootstrapping from {} seed(s)", seeds.len());

        for addr in seeds {
            match self.query_find_node(addr, self.our_id).await {
                Ok(nodes) => {
                    debug!("seed {} returned {} nodes", addr, nodes.len());
                    for node in nodes {
                        self.insert_contact(node);
                    }
                }
                Err(e) => warn!("seed {} unreachable: {}", addr, e),
            }
        }

        info!(
            "bootstrap complete, {} nodes in routing table",
            self.routing_table.node_count()
        );
        Ok(())
    }

    /// Pings a node directly.
    pub async fn ping(&self, addr: SocketAddr) -> Result<Reply, DhtError> {
        let tid = fresh_transaction_id();
        self.send_query(addr, Message::ping(tid.clone(), self.our_id), tid)
            .await
    }

    /// Queries the closest known nodes for `target` in parallel and
    /// returns every node they report, after feeding them to the routing
    /// table. Timeouts and error replies yield an empty contribution.
    pub async fn find_node(&self, target: NodeId) -> Result<Vec<Node>, DhtError> {
        let closest = self.routing_table.find_closest(&target, K);

        let queries: Vec<_> = closest
            .iter()
            .take(ALPHA)
            .map(|node| {
                let addr = node.addr;
                let id = node.id;
                async move { (id, self.query_find_node(addr, target).await) }
            })
            .collect();

        let mut learned = Vec::new();
        for (id, result) in futures::future::join_all(queries).await {
            match result {
                Ok(nodes) => {
                    for node in nodes {
                        self.insert_contact(node.clone());
                        learned.push(node);
                    }
                }
                Err(e) => {
                    debug!("find_node query failed: {}", e);
                    self.routing_table.mark_failed(&id);
                }
            }
        }

        Ok(learned)
    }

    /// Iterative `get_peers` lookup for an info hash.
    ///
    /// Maintains the set of known-but-unqueried candidates and queries
    /// the closest `ALPHA` of them per round, until every candidate has
    /// been queried, a bounded round count is hit, or enough peers have
    /// been collected. Falls back to the seed list when the routing
    /// table is still empty.
    pub async fn get_peers(&self, info_hash: [u8; 20]) -> Result<Vec<SocketAddr>, DhtError> {
        let target = NodeId(info_hash);

        let mut peers = Vec::new();
        let mut queried: HashSet<NodeId> = HashSet::new();
        let mut candidates = self.routing_table.find_closest(&target, K);

        if candidates.is_empty() {
            for addr in self.seed_addrs() {
                match self.query_get_peers(addr, info_hash).await {
                    Ok(reply) => {
                        if let Some(values) = reply.values {
                            peers.extend(values);
                        }
                        for node in reply.nodes.unwrap_or_default() {
                            self.insert_contact(node.clone());
                            candidates.push(node);
                        }
                    }
                    Err(e) => warn!("seed {} unreachable: {}", addr, e),
                }
            }
        }

        for _ in 0..MAX_LOOKUP_ROUNDS {
            if candidates.is_empty() || peers.len() >= LOOKUP_TARGET_PEERS {
                break;
            }

            candidates.sort_by(|a, b| a.id.distance(&target).cmp(&b.id.distance(&target)));

            let round: Vec<Node> = candidates
                .iter()
                .filter(|n| !queried.contains(&n.id))
                .take(ALPHA)
                .cloned()
                .collect();
            if round.is_empty() {
                break;
            }
            queried.extend(round.iter().map(|n| n.id));

            let queries: Vec<_> = round
                .iter()
                .map(|node| self.query_get_peers(node.addr, info_hash))
                .collect();

            let mut next_round = Vec::new();
            for (node, result) in round.iter().zip(futures::future::join_all(queries).await) {
                match result {
                    Ok(reply) => {
                        if let Some(values) = reply.values {
                            peers.extend(values);
                        }
                        for found in reply.nodes.unwrap_or_default() {
                            if !queried.contains(&found.id) {
                                self.insert_contact(found.clone());
                                next_round.push(found);
                            }
                        }
                    }
                    Err(e) => {
                        debug!("get_peers query to {} failed: {}", node.addr, e);
                        self.routing_table.mark_failed(&node.id);
                    }
                }
            }

            // Keep the still-unqueried survivors: a round whose replies
            // bring no fresh nodes must not drop known closer candidates.
            candidates.retain(|n| !queried.contains(&n.id));
            candidates.extend(next_round);
        }

        info!(
            "get_peers found {} peers after querying {} nodes",
            peers.len(),
            queried.len()
        );
        Ok(peers)
    }

    async fn query_find_node(
        &self,
        addr: SocketAddr,
        target: NodeId,
    ) -> Result<Vec<Node>, DhtError> {
        let tid = fresh_transaction_id();
        let reply = self
            .send_query(addr, Message::find_node(tid.clone(), self.our_id, target), tid)
            .await?;
        Ok(reply.nodes.unwrap_or_default())
    }

    async fn query_get_peers(
        &self,
        addr: SocketAddr,
        info_hash: [u8; 20],
    ) -> Result<Reply, DhtError> {
        let tid = fresh_transaction_id();
        self.send_query(addr, Message::get_peers(tid.clone(), self.our_id, info_hash), tid)
            .await
    }

    /// Sends one query over the listening socket and waits for its reply,
    /// correlated by transaction ID. Timeout, socket failure, and an
    /// `e`-class reply all surface as errors; the pending entry is
    /// removed on every exit path.
    async fn send_query(
        &self,
        addr: SocketAddr,
        msg: Message,
        tid: TransactionId,
    ) -> Result<Reply, DhtError> {
        let (tx, mut rx) = mpsc::channel(1);

        {
            let mut pending = self.pending.write();
            if pending.len() >= MAX_PENDING_QUERIES {
                return Err(DhtError::PendingLimit);
            }
            pending.insert(tid.clone(), tx);
        }

        let result = async {
            self.socket.send_to(&msg.encode(), addr).await?;
            match timeout(RPC_TIMEOUT, rx.recv()).await {
                Ok(Some(Message::Response { reply, .. })) => Ok(reply),
                Ok(Some(Message::Error { code, message, .. })) => {
                    Err(DhtError::Remote { code, message })
                }
                _ => Err(DhtError::Timeout),
            }
        }
        .await;

        self.pending.write().remove(&tid);
        result
    }

    /// The serve loop: receive, decode, dispatch, forever. Malformed
    /// datagrams and transient socket errors are logged and skipped; no
    /// inbound traffic terminates the loop.
    ///
    /// Refresh lookups run as separate tasks: their replies come back
    /// through this very loop, so awaiting them here would stall the
    /// demultiplexer they depend on.
    pub async fn run(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut refresh = tokio::time::interval(BUCKET_REFRESH_INTERVAL);
        let mut rotation = tokio::time::interval(TOKEN_ROTATION_INTERVAL);

        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        rotation.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // The first tick of a tokio interval fires immediately.
        refresh.tick().await;
        rotation.tick().await;

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, addr) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("recv_from failed: {}", e);
                            continue;
                        }
                    };
                    match Message::parse(&buf[..len]) {
                        Ok(msg) => self.handle_message(msg, addr).await,
                        Err(e) => debug!("dropping datagram from {}: {}", addr, e),
                    }
                }
                _ = refresh.tick() => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.refresh_stale_buckets().await });
                }
                _ = rotation.tick() => self.rotate_token_secret(),
            }
        }
    }

    async fn handle_message(&self, msg: Message, addr: SocketAddr) {
        // Every valid message is a liveness signal for its sender.
        if let Some(id) = msg.sender_id() {
            self.insert_contact(Node::new(id, addr));
        }

        match msg {
            Message::Query {
                transaction_id,
                query,
            } => self.handle_query(transaction_id, addr, query).await,
            other => {
                let tx = self.pending.read().get(other.transaction_id()).cloned();
                match tx {
                    Some(tx) => {
                        let _ = tx.try_send(other);
                    }
                    None => debug!(
                        "uncorrelated {} from {}, discarding",
                        match other {
                            Message::Error { .. } => "error",
                            _ => "response",
                        },
                        addr
                    ),
                }
            }
        }
    }

    async fn handle_query(&self, tid: TransactionId, addr: SocketAddr, query: Query) {
        debug!("{} query from {}", query.name(), addr);

        let response = match query {
            Query::Ping { .. } => Message::response(tid, Reply::new(self.our_id)),
            Query::FindNode { target, .. } => {
                let mut reply = Reply::new(self.our_id);
                reply.nodes = Some(self.routing_table.find_closest(&target, K));
                Message::response(tid, reply)
            }
            Query::GetPeers { info_hash, .. } => {
                let mut reply = Reply::new(self.our_id);
                reply.token = Some(self.issue_token(&addr));

                let stored = self.peer_store.write().lookup(&info_hash);
                if stored.is_empty() {
                    reply.nodes =
                        Some(self.routing_table.find_closest(&NodeId(info_hash), K));
                } else {
                    reply.values = Some(stored);
                }
                Message::response(tid, reply)
            }
            Query::AnnouncePeer {
                info_hash,
                port,
                implied_port,
                token,
                ..
            } => {
                if !self.validate_token(&addr, &token) {
                    debug!("rejecting announce_peer from {}: invalid token", addr);
                    Message::error(tid, 203, "Invalid token")
                } else {
                    let swarm_port = if implied_port {
                        addr.port()
                    } else {
                        port.unwrap_or_else(|| addr.port())
                    };
                    let peer_addr = SocketAddr::new(addr.ip(), swarm_port);
                    self.peer_store.write().insert(info_hash, peer_addr);
                    debug!("stored announced peer {} for {}", peer_addr, NodeId(info_hash));
                    Message::response(tid, Reply::new(self.our_id))
                }
            }
        };

        if let Err(e) = self.socket.send_to(&response.encode(), addr).await {
            warn!("failed to send response to {}: {}", addr, e);
        }
    }

    /// Feeds a contact to the routing table. A full bucket hands back its
    /// least-recently-seen entry; the liveness check and the resulting
    /// keep-or-replace decision run in a background task so the serve
    /// loop, which is also the reply demultiplexer, never waits on it.
    fn insert_contact(&self, node: Node) {
        if let Insertion::Full { oldest } = self.routing_table.insert(node.clone()) {
            let our_id = self.our_id;
            let table = Arc::clone(&self.routing_table);
            tokio::spawn(async move {
                settle_eviction(our_id, table, oldest, node).await;
            });
        }
    }

    async fn refresh_stale_buckets(&self) {
        let stale = self.routing_table.stale_buckets();
        if stale.is_empty() {
            return;
        }

        debug!("refreshing {} stale buckets", stale.len());
        for index in stale {
            let target = self.random_id_in_bucket(index);
            let _ = self.find_node(target).await;
        }
    }

    /// A random ID whose distance from ours has its highest set bit at
    /// `bucket`: keep the prefix, flip the bucket bit, randomize
    /// everything below it.
    fn random_id_in_bucket(&self, bucket: usize) -> NodeId {
        if bucket >= 160 {
            return NodeId::generate();
        }

        let mut id = self.our_id.0;
        let byte = 19 - bucket / 8;
        let bit = bucket % 8;

        id[byte] ^= 1 << bit;

        let below = (1u8 << bit) - 1;
        id[byte] = (id[byte] & !below) | (rand::random::<u8>() & below);
        for b in &mut id[byte + 1..] {
            *b = rand::random();
        }

        NodeId(id)
    }

    pub(crate) fn issue_token(&self, addr: &SocketAddr) -> Bytes {
        token_for(&self.token_secrets.read().current, addr)
    }

    pub(crate) fn validate_token(&self, addr: &SocketAddr, token: &Bytes) -> bool {
        let secrets = self.token_secrets.read();
        token == &token_for(&secrets.current, addr) || token == &token_for(&secrets.previous, addr)
    }

    pub(crate) fn rotate_token_secret(&self) {
        self.token_secrets.write().rotate();
        debug!("token secret rotated");
    }
}

/// Token bound to the querier's IP: truncated SHA-1 over a secret and the
/// address.
fn token_for(secret: &[u8; 16], addr: &SocketAddr) -> Bytes {
    let mut hasher = Sha1::new();
    hasher.update(secret);
    hasher.update(addr.ip().to_string().as_bytes());
    Bytes::copy_from_slice(&hasher.finalize()[..8])
}

fn fresh_transaction_id() -> TransactionId {
    Bytes::copy_from_slice(&rand::random::<[u8; 2]>())
}

async fn resolve_bootstrap_nodes() -> Vec<SocketAddr> {
    let mut seeds = Vec::new();
    for host in BOOTSTRAP_NODES {
        match tokio::net::lookup_host(host).await {
            Ok(addrs) => seeds.extend(addrs.filter(|a| a.is_ipv4()).take(1)),
            Err(e) => warn!("failed to resolve {}: {}", host, e),
        }
    }
    seeds
}

/// Resolves a full bucket: ping the least-recently-seen entry on a
/// short-lived socket; an answer keeps it, silence hands its slot to the
/// candidate.
async fn settle_eviction(our_id: NodeId, table: Arc<RoutingTable>, oldest: Node, candidate: Node) {
    if probe_ping(our_id, oldest.addr).await {
        table.confirm_oldest(&oldest.id);
    } else {
        debug!("evicting unresponsive {} for {}", oldest.id, candidate.id);
        table.replace_oldest(&oldest.id, candidate);
    }
}

/// One-shot liveness ping, independent of the serve loop's socket so the
/// pong does not have to travel through our own demultiplexer.
async fn probe_ping(our_id: NodeId, addr: SocketAddr) -> bool {
    let Ok(socket) = UdpSocket::bind(("0.0.0.0", 0)).await else {
        return false;
    };

    let tid = fresh_transaction_id();
    if socket
        .send_to(&Message::ping(tid.clone(), our_id).encode(), addr)
        .await
        .is_err()
    {
        return false;
    }

    let mut buf = [0u8; MAX_DATAGRAM];
    match timeout(RPC_TIMEOUT, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => matches!(
            Message::parse(&buf[..len]),
            Ok(Message::Response { transaction_id, .. }) if transaction_id == tid
        ),
        _ => false,
    }
}
