//! Typed lookup messages exchanged with the transport.
//!
//! The engine never touches the wire. A [Transport](crate::rpc::Transport)
//! encodes [LookupRequest]s and hands back already decoded
//! [LookupResponse]s, matched to their request by transaction id.

use crate::common::{Id, Node, PeerRecord, Value};

/// Identifies one in flight request. Issued by the transport on send,
/// unique among that transport's live requests.
pub type TransactionId = u16;

#[derive(Debug, PartialEq, Clone)]
pub struct LookupRequest {
    pub requester_id: Id,
    pub kind: RequestKind,
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestKind {
    /// Ask for the closest nodes to a target.
    FindNode { target: Id },
    /// Ask for peers announced under a target, plus closer nodes.
    FindPeers { target: Id },
    /// Ask for the value stored under a target, plus closer nodes.
    ///
    /// `seq` requests only values more recent than a sequence number
    /// already held by the requester.
    FindValue { target: Id, seq: Option<i64> },
}

impl RequestKind {
    pub fn target(&self) -> &Id {
        match self {
            RequestKind::FindNode { target } => target,
            RequestKind::FindPeers { target } => target,
            RequestKind::FindValue { target, .. } => target,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct LookupResponse {
    pub responder_id: Id,

    /// Opaque write token proving reachability to the responder,
    /// required by store requests outside this crate.
    pub token: Option<Vec<u8>>,

    /// Nodes closer to the target, from the responder's routing table.
    pub nodes: Vec<Node>,

    pub payload: ResponsePayload,
}

#[derive(Debug, PartialEq, Clone, Default)]
pub enum ResponsePayload {
    /// Closer nodes only.
    #[default]
    None,
    Peers(Vec<PeerRecord>),
    Value(Value),
}

impl LookupResponse {
    /// A response carrying closer nodes and nothing else.
    pub fn nodes(responder_id: Id, nodes: Vec<Node>) -> Self {
        Self {
            responder_id,
            token: None,
            nodes,
            payload: ResponsePayload::None,
        }
    }
}
