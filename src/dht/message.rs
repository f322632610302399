use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Bytes;

use crate::bencode::{decode, encode, Value};

use super::error::DhtError;
use super::node::{Node, NodeId};

/// Sender-chosen opaque identifier echoed by the responder.
pub type TransactionId = Bytes;

/// One of the four KRPC queries, with the sender's node ID.
#[derive(Debug, Clone)]
pub enum Query {
    Ping {
        id: NodeId,
    },
    FindNode {
        id: NodeId,
        target: NodeId,
    },
    GetPeers {
        id: NodeId,
        info_hash: [u8; 20],
    },
    AnnouncePeer {
        id: NodeId,
        info_hash: [u8; 20],
        /// Swarm port. Absent or overridden by `implied_port`, the
        /// responder falls back to the datagram source port.
        port: Option<u16>,
        implied_port: bool,
        /// Token previously issued by the responder's `get_peers` reply.
        /// Empty when the querier sent none.
        token: Bytes,
    },
}

impl Query {
    pub fn name(&self) -> &'static str {
        match self {
            Query::Ping { .. } => "ping",
            Query::FindNode { .. } => "find_node",
            Query::GetPeers { .. } => "get_peers",
            Query::AnnouncePeer { .. } => "announce_peer",
        }
    }

    pub fn sender_id(&self) -> NodeId {
        match self {
            Query::Ping { id }
            | Query::FindNode { id, .. }
            | Query::GetPeers { id, .. }
            | Query::AnnouncePeer { id, .. } => *id,
        }
    }
}

/// The payload of an `r`-class message.
///
/// Which query a reply answers is known only from transaction
/// correlation, so the reply is kept as the flat field set the wire
/// carries rather than guessed into a per-query shape.
#[derive(Debug, Clone)]
pub struct Reply {
    pub id: NodeId,
    pub nodes: Option<Vec<Node>>,
    pub values: Option<Vec<SocketAddr>>,
    pub token: Option<Bytes>,
}

impl Reply {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            nodes: None,
            values: None,
            token: None,
        }
    }
}

/// A KRPC message: a bencoded dictionary with a transaction ID and one
/// of three payload classes.
#[derive(Debug, Clone)]
pub enum Message {
    Query {
        transaction_id: TransactionId,
        query: Query,
    },
    Response {
        transaction_id: TransactionId,
        reply: Reply,
    },
    Error {
        transaction_id: TransactionId,
        code: i64,
        message: String,
    },
}

fn key(k: &'static [u8]) -> Bytes {
    Bytes::from_static(k)
}

fn missing(what: &str) -> DhtError {
    DhtError::InvalidMessage(format!("missing {what}"))
}

fn hash20(args: &BTreeMap<Bytes, Value>, field: &'static str) -> Result<[u8; 20], DhtError> {
    args.get(field.as_bytes())
        .and_then(|v| v.as_bytes())
        .and_then(|b| <[u8; 20]>::try_from(b.as_ref()).ok())
        .ok_or_else(|| missing(field))
}

impl Message {
    pub fn ping(transaction_id: TransactionId, our_id: NodeId) -> Self {
        Message::Query {
            transaction_id,
            query: Query::Ping { id: our_id },
        }
    }

    pub fn find_node(transaction_id: TransactionId, our_id: NodeId, target: NodeId) -> Self {
        Message::Query {
            transaction_id,
            query: Query::FindNode { id: our_id, target },
        }
    }

    pub fn get_peers(transaction_id: TransactionId, our_id: NodeId, info_hash: [u8; 20]) -> Self {
        Message::Query {
            transaction_id,
            query: Query::GetPeers {
                id: our_id,
                info_hash,
            },
        }
    }

    pub fn announce_peer(
        transaction_id: TransactionId,
        our_id: NodeId,
        info_hash: [u8; 20],
        port: u16,
        token: Bytes,
    ) -> Self {
        Message::Query {
            transaction_id,
            query: Query::AnnouncePeer {
                id: our_id,
                info_hash,
                port: Some(port),
                implied_port: false,
                token,
            },
        }
    }

    pub fn response(transaction_id: TransactionId, reply: Reply) -> Self {
        Message::Response {
            transaction_id,
            reply,
        }
    }

    pub fn error(transaction_id: TransactionId, code: i64, message: impl Into<String>) -> Self {
        Message::Error {
            transaction_id,
            code,
            message: message.into(),
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            Message::Query { transaction_id, .. }
            | Message::Response { transaction_id, .. }
            | Message::Error { transaction_id, .. } => transaction_id,
        }
    }

    /// The node ID the message carries for its sender, when it carries
    /// one (`e`-class messages do not).
    pub fn sender_id(&self) -> Option<NodeId> {
        match self {
            Message::Query { query, .. } => Some(query.sender_id()),
            Message::Response { reply, .. } => Some(reply.id),
            Message::Error { .. } => None,
        }
    }

    /// Parses one datagram.
    ///
    /// Required fields that are absent or of the wrong shape fail the
    /// whole message; the engine drops such datagrams.
    pub fn parse(data: &[u8]) -> Result<Self, DhtError> {
        let value = decode(data)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| DhtError::InvalidMessage("expected dictionary".into()))?;

        let transaction_id = dict
            .get(b"t".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned()
            .ok_or_else(|| missing("transaction id"))?;

        match dict
            .get(b"y".as_slice())
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing("message class"))?
        {
            "q" => Self::parse_query(transaction_id, dict),
            "r" => Self::parse_reply(transaction_id, dict),
            "e" => Self::parse_error(transaction_id, dict),
            other => Err(DhtError::InvalidMessage(format!(
                "unknown message class: {other}"
            ))),
        }
    }

    fn parse_query(
        transaction_id: TransactionId,
        dict: &BTreeMap<Bytes, Value>,
    ) -> Result<Self, DhtError> {
        let name = dict
            .get(b"q".as_slice())
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing("query name"))?;

        let args = dict
            .get(b"a".as_slice())
            .and_then(|v| v.as_dict())
            .ok_or_else(|| missing("query arguments"))?;

        let id = NodeId(hash20(args, "id")?);

        let query = match name {
            "ping" => Query::Ping { id },
            "find_node" => Query::FindNode {
                id,
                target: NodeId(hash20(args, "target")?),
            },
            "get_peers" => Query::GetPeers {
                id,
                info_hash: hash20(args, "info_hash")?,
            },
            "announce_peer" => {
                let port = match args.get(b"port".as_slice()) {
                    None => None,
                    Some(v) => Some(
                        v.as_integer()
                            .and_then(|p| u16::try_from(p).ok())
                            .ok_or_else(|| missing("valid port"))?,
                    ),
                };

                let implied_port = args
                    .get(b"implied_port".as_slice())
                    .and_then(|v| v.as_integer())
                    .is_some_and(|v| v != 0);

                let token = args
                    .get(b"token".as_slice())
                    .and_then(|v| v.as_bytes())
                    .cloned()
                    .unwrap_or_default();

                Query::AnnouncePeer {
                    id,
                    info_hash: hash20(args, "info_hash")?,
                    port,
                    implied_port,
                    token,
                }
            }
            other => {
                return Err(DhtError::InvalidMessage(format!("unknown query: {other}")));
            }
        };

        Ok(Message::Query {
            transaction_id,
            query,
        })
    }

    fn parse_reply(
        transaction_id: TransactionId,
        dict: &BTreeMap<Bytes, Value>,
    ) -> Result<Self, DhtError> {
        let fields = dict
            .get(b"r".as_slice())
            .and_then(|v| v.as_dict())
            .ok_or_else(|| missing("response dictionary"))?;

        let id = NodeId(hash20(fields, "id")?);

        let nodes = fields
            .get(b"nodes".as_slice())
            .and_then(|v| v.as_bytes())
            .map(|data| data.chunks_exact(26).filter_map(Node::from_compact).collect());

        let values = fields
            .get(b"values".as_slice())
            .and_then(|v| v.as_list())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_bytes())
                    .filter_map(|b| peer_from_compact(b))
                    .collect()
            });

        let token = fields
            .get(b"token".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned();

        Ok(Message::Response {
            transaction_id,
            reply: Reply {
                id,
                nodes,
                values,
                token,
            },
        })
    }

    fn parse_error(
        transaction_id: TransactionId,
        dict: &BTreeMap<Bytes, Value>,
    ) -> Result<Self, DhtError> {
        let detail = dict
            .get(b"e".as_slice())
            .and_then(|v| v.as_list())
            .ok_or_else(|| missing("error list"))?;

        Ok(Message::Error {
            transaction_id,
            code: detail.first().and_then(|v| v.as_integer()).unwrap_or(0),
            message: detail
                .get(1)
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        })
    }

    /// Encodes the message into its datagram form.
    pub fn encode(&self) -> Vec<u8> {
        let mut dict = BTreeMap::new();
        dict.insert(key(b"t"), Value::Bytes(self.transaction_id().clone()));

        match self {
            Message::Query { query, .. } => {
                dict.insert(key(b"y"), Value::string("q"));
                dict.insert(key(b"q"), Value::string(query.name()));
                dict.insert(key(b"a"), Value::Dict(query_args(query)));
            }
            Message::Response { reply, .. } => {
                dict.insert(key(b"y"), Value::string("r"));
                dict.insert(key(b"r"), Value::Dict(reply_fields(reply)));
            }
            Message::Error { code, message, .. } => {
                dict.insert(key(b"y"), Value::string("e"));
                dict.insert(
                    key(b"e"),
                    Value::List(vec![Value::Integer(*code), Value::string(message)]),
                );
            }
        }

        encode(&Value::Dict(dict))
    }
}

fn query_args(query: &Query) -> BTreeMap<Bytes, Value> {
    let mut args = BTreeMap::new();
    args.insert(key(b"id"), Value::bytes(query.sender_id().as_bytes()));

    match query {
        Query::Ping { .. } => {}
        Query::FindNode { target, .. } => {
            args.insert(key(b"target"), Value::bytes(target.as_bytes()));
        }
        Query::GetPeers { info_hash, .. } => {
            args.insert(key(b"info_hash"), Value::bytes(info_hash));
        }
        Query::AnnouncePeer {
            info_hash,
            port,
            implied_port,
            token,
            ..
        } => {
            args.insert(key(b"info_hash"), Value::bytes(info_hash));
            if let Some(port) = port {
                args.insert(key(b"port"), Value::Integer(i64::from(*port)));
            }
            if *implied_port {
                args.insert(key(b"implied_port"), Value::Integer(1));
            }
            args.insert(key(b"token"), Value::Bytes(token.clone()));
        }
    }

    args
}

fn reply_fields(reply: &Reply) -> BTreeMap<Bytes, Value> {
    let mut fields = BTreeMap::new();
    fields.insert(key(b"id"), Value::bytes(reply.id.as_bytes()));

    if let Some(nodes) = &reply.nodes {
        let compact: Vec<u8> = nodes.iter().filter_map(Node::to_compact).flatten().collect();
        fields.insert(key(b"nodes"), Value::Bytes(Bytes::from(compact)));
    }

    if let Some(values) = &reply.values {
        let records = values
            .iter()
            .filter_map(peer_to_compact)
            .map(|record| Value::bytes(&record))
            .collect();
        fields.insert(key(b"values"), Value::List(records));
    }

    if let Some(token) = &reply.token {
        fields.insert(key(b"token"), Value::Bytes(token.clone()));
    }

    fields
}

/// Parses one 6-byte compact peer record: 4 bytes IPv4, 2 bytes port,
/// network byte order.
pub(super) fn peer_from_compact(record: &[u8]) -> Option<SocketAddr> {
    if record.len() != 6 {
        return None;
    }

    let ip = Ipv4Addr::new(record[0], record[1], record[2], record[3]);
    let port = u16::from_be_bytes([record[4], record[5]]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

pub(super) fn peer_to_compact(addr: &SocketAddr) -> Option<[u8; 6]> {
    let SocketAddr::V4(v4) = addr else {
        return None;
    };

    let mut record = [0u8; 6];
    record[..4].copy_from_slice(&v4.ip().octets());
    record[4..6].copy_from_slice(&v4.port().to_be_bytes());
    Some(record)
}
