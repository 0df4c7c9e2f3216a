//! Per kind behavior of iterative lookups.

use std::fmt::Debug;

use crate::common::{
    Id, LookupRequest, LookupResponse, Node, PeerRecordError, RequestKind, ResponsePayload,
    ValueError,
};
use crate::rpc::LookupResult;

/// What distinguishes one kind of lookup from another.
///
/// The engine owns candidate selection, concurrency and timeouts. A
/// variant decides what gets asked, which responses are acceptable and
/// which parts of them count as results.
pub trait LookupVariant: Send + Debug {
    /// The request to send to every queried candidate.
    fn build_request(&self, requester_id: Id, target: Id) -> LookupRequest;

    /// Nodes to fold back into the candidate set.
    fn extract_candidates(&self, response: &LookupResponse) -> Vec<Node> {
        response.nodes.clone()
    }

    /// Reject a response whose payload does not belong under `target`.
    /// The responding candidate is marked failed.
    fn validate(&self, target: &Id, response: &LookupResponse) -> Result<(), InvalidResponse>;

    /// The result carried by a validated response, if any.
    fn extract_result(&self, target: &Id, response: &LookupResponse) -> Option<LookupResult>;

    /// Whether `result` completes the lookup. New requests stop, in
    /// flight ones drain.
    fn is_terminal(&self, result: &LookupResult) -> bool {
        let _ = result;
        false
    }
}

#[derive(thiserror::Error, Debug)]
/// Why a response was rejected by a [LookupVariant].
pub enum InvalidResponse {
    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Peer(#[from] PeerRecordError),

    #[error("Record belongs to a different target")]
    ForeignRecord,

    #[error("Unexpected payload for this kind of lookup")]
    UnexpectedPayload,
}

#[derive(Debug, Clone, Default)]
/// Find the closest nodes to a target. Completes by exhaustion only.
pub struct NodeLookup;

impl LookupVariant for NodeLookup {
    fn build_request(&self, requester_id: Id, target: Id) -> LookupRequest {
        LookupRequest {
            requester_id,
            kind: RequestKind::FindNode { target },
        }
    }

    fn validate(&self, _target: &Id, _response: &LookupResponse) -> Result<(), InvalidResponse> {
        // Only the nodes matter, anything else is ignored.
        Ok(())
    }

    fn extract_result(&self, _target: &Id, _response: &LookupResponse) -> Option<LookupResult> {
        None
    }
}

#[derive(Debug, Clone, Default)]
/// Find announcements of the peer whose public key is the target.
///
/// Peers are streamed as they are found, the lookup still runs to
/// exhaustion to find as many announcements as possible.
pub struct PeerLookup;

impl LookupVariant for PeerLookup {
    fn build_request(&self, requester_id: Id, target: Id) -> LookupRequest {
        LookupRequest {
            requester_id,
            kind: RequestKind::FindPeers { target },
        }
    }

    fn validate(&self, target: &Id, response: &LookupResponse) -> Result<(), InvalidResponse> {
        match &response.payload {
            ResponsePayload::None => Ok(()),
            ResponsePayload::Peers(records) => {
                if records.is_empty() {
                    return Ok(());
                }

                // At least one record has to belong here and verify,
                // otherwise the responder is making things up.
                let mut error = None;

                for record in records {
                    if record.peer_id() != *target {
                        error.get_or_insert(InvalidResponse::ForeignRecord);
                        continue;
                    }

                    match record.verify() {
                        Ok(()) => return Ok(()),
                        Err(e) => {
                            error.get_or_insert(e.into());
                        }
                    }
                }

                Err(error.unwrap_or(InvalidResponse::ForeignRecord))
            }
            ResponsePayload::Value(_) => Err(InvalidResponse::UnexpectedPayload),
        }
    }

    fn extract_result(&self, target: &Id, response: &LookupResponse) -> Option<LookupResult> {
        if let ResponsePayload::Peers(records) = &response.payload {
            if records.is_empty() {
                return None;
            }

            // A single bad record discards the whole batch. The responder
            // still counts as replied.
            if records
                .iter()
                .all(|record| record.peer_id() == *target && record.verify().is_ok())
            {
                return Some(LookupResult::Peers(records.clone()));
            }
        }

        None
    }
}

#[derive(Debug, Clone, Default)]
/// Find the value stored under a target. The first validated value
/// completes the lookup.
pub struct ValueLookup {
    /// Only consider values with a newer sequence number than this,
    /// for callers refreshing a signed value they already hold.
    pub min_seq: Option<i64>,
}

impl ValueLookup {
    pub fn new(min_seq: Option<i64>) -> Self {
        Self { min_seq }
    }
}

impl LookupVariant for ValueLookup {
    fn build_request(&self, requester_id: Id, target: Id) -> LookupRequest {
        LookupRequest {
            requester_id,
            kind: RequestKind::FindValue {
                target,
                seq: self.min_seq,
            },
        }
    }

    fn validate(&self, target: &Id, response: &LookupResponse) -> Result<(), InvalidResponse> {
        match &response.payload {
            ResponsePayload::None => Ok(()),
            ResponsePayload::Value(value) => Ok(value.validate(target)?),
            ResponsePayload::Peers(_) => Err(InvalidResponse::UnexpectedPayload),
        }
    }

    fn extract_result(&self, _target: &Id, response: &LookupResponse) -> Option<LookupResult> {
        if let ResponsePayload::Value(value) = &response.payload {
            // A stale sequence number is not a result, only the absence
            // of anything newer.
            if let (Some(min_seq), Some(seq)) = (self.min_seq, value.seq()) {
                if seq <= min_seq {
                    return None;
                }
            }

            return Some(LookupResult::Value(value.clone()));
        }

        None
    }

    fn is_terminal(&self, _result: &LookupResult) -> bool {
        true
    }
}
