//! The seam between the lookup engine and the wire.

use std::fmt::Debug;
use std::net::SocketAddr;

use crate::common::{LookupRequest, LookupResponse, Node, TransactionId};

/// Sends requests and surfaces already decoded responses.
///
/// Implementations own sockets, wire encoding and encryption. They issue
/// the transaction ids that match responses back to requests, unique
/// among their live requests.
pub trait Transport: Send + Debug {
    /// Send a request to a node, returning the transaction id assigned
    /// to it.
    ///
    /// An error means the request never left, the engine treats it like
    /// an immediate timeout.
    fn send(&mut self, to: &Node, request: LookupRequest) -> Result<TransactionId, SendError>;

    /// The next decoded response, if one arrived. Never blocks.
    fn recv(&mut self) -> Option<(TransactionId, LookupResponse)>;
}

#[derive(thiserror::Error, Debug)]
/// Failure to hand a request to the wire.
pub enum SendError {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    Io(#[from] std::io::Error),

    /// The transport can not route to this address at all.
    #[error("No route to {0}")]
    NoRoute(SocketAddr),
}
