//! Bencode encoding and decoding (BEP-3)
//!
//! The byte-oriented encoding BitTorrent uses for protocol messages and
//! torrent metadata. Four constructs: integers, byte strings, lists, and
//! dictionaries, each self-delimiting.

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_prefix};
pub use encode::encode;
pub use error::BencodeError;
pub use value::Value;

#[cfg(test)]
mod tests;
