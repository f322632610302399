//! mdht - A Mainline DHT node
//!
//! This library implements a participating node of the BitTorrent
//! Mainline DHT ([BEP-5]): the bencode codec, the Kademlia routing table,
//! and the UDP query engine used for trackerless peer discovery.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 Bencode encoding/decoding
//! - [`dht`] - BEP-5 Distributed Hash Table node
//!
//! [BEP-5]: http://bittorrent.org/beps/bep_0005.html

pub mod bencode;
pub mod dht;

pub use bencode::{decode, decode_prefix, encode, BencodeError, Value};
pub use dht::{
    DhtError, DhtServer, Insertion, Message, Node, NodeId, Query, Reply, RoutingTable,
    TransactionId,
};
