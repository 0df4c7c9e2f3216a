//! Streams of results for an ongoing lookup.

use flume::Sender;

use crate::common::{PeerRecord, Value};
use crate::rpc::CandidateNode;

#[derive(Clone, Debug, PartialEq)]
/// A result extracted from one response.
pub enum LookupResult {
    /// Verified announcements of the peer the lookup is after.
    Peers(Vec<PeerRecord>),
    /// A validated value stored under the target.
    Value(Value),
}

#[derive(Clone, Debug)]
/// Channels results back to a caller.
///
/// Receivers learn that a lookup ended when the engine drops its senders
/// and the channel disconnects.
pub enum ResponseSender {
    /// Receives the closest responding candidates, with their tokens and
    /// round trip times, once when the lookup completes.
    ClosestNodes(Sender<Vec<CandidateNode>>),
    /// Receives every verified peer record as it is found.
    Peers(Sender<PeerRecord>),
    /// Receives every validated value as it is found.
    Value(Sender<Value>),
}
