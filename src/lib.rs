#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;

#[cfg(feature = "async")]
pub mod async_dht;
mod dht;
pub mod routing_table;
pub mod rpc;
pub mod testnet;

pub use crate::common::{
    hash_immutable, target_from_key, DecodeIdError, Distance, Id, InvalidIdSize, LookupRequest,
    LookupResponse, Node, PeerRecord, PeerRecordError, RequestKind, ResponsePayload, SignedValue,
    TransactionId, Value, ValueError, ID_SIZE, NONCE_SIZE,
};
pub use bytes::Bytes;
pub use dht::{Dht, DhtBuilder, DhtWasShutdown};
pub use testnet::Testnet;

pub use ed25519_dalek::SigningKey;
