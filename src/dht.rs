//! Distributed Hash Table node ([BEP-5]).
//!
//! A participating node of the Kademlia-based DHT that BitTorrent swarms
//! use for trackerless peer discovery. Nodes are identified by 160-bit
//! IDs, torrents by their 20-byte info hash, and closeness is the XOR
//! metric over both.
//!
//! # Getting Started
//!
//! ```no_run
//! use mdht::dht::DhtServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dht = std::sync::Arc::new(DhtServer::bind(6881).await?);
//!
//! // The serve loop answers queries and demultiplexes our own replies.
//! let server = dht.clone();
//! tokio::spawn(async move { server.run().await });
//!
//! dht.bootstrap().await?;
//!
//! let info_hash = [0u8; 20];
//! for peer in dht.get_peers(info_hash).await? {
//!     println!("found peer {peer}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - [`DhtServer`] - UDP endpoint, query engine, and inbound dispatch
//! - [`RoutingTable`] - 160 k-buckets of up to 8 nodes each
//! - [`Message`] - the bencoded query/response/error wire model
//! - [`NodeId`] / [`Node`] - node identity and addressing
//!
//! [BEP-5]: http://bittorrent.org/beps/bep_0005.html

mod error;
mod message;
mod node;
mod routing;
mod server;
mod store;

pub use error::DhtError;
pub use message::{Message, Query, Reply, TransactionId};
pub use node::{Node, NodeId};
pub use routing::{Insertion, RoutingTable};
pub use server::DhtServer;
