//! Bookkeeping of the in flight requests of one lookup.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::common::{Id, TransactionId};

#[derive(Debug, Clone)]
/// One request in flight to a candidate.
pub struct RpcCall {
    pub transaction_id: TransactionId,
    /// Id of the candidate this request went to.
    pub candidate_id: Id,
    pub to: SocketAddr,
    pub sent_at: Instant,
    pub deadline: Instant,
}

#[derive(Debug, Default)]
/// Tracks in flight requests by transaction id.
///
/// A call is resolved exactly once, by its response or by its deadline,
/// whichever comes first. The loser of that race finds nothing here and
/// causes no further transitions.
pub struct CallTracker {
    calls: HashMap<TransactionId, RpcCall>,
    /// Deadlines in a min heap. Deleted lazily: entries whose call was
    /// resolved before its deadline are skipped when popped.
    deadlines: BinaryHeap<Reverse<(Instant, TransactionId)>>,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // === Getters ===

    /// How many requests are in flight.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn contains(&self, transaction_id: TransactionId) -> bool {
        self.calls.contains_key(&transaction_id)
    }

    // === Public Methods ===

    /// Track a request sent to a candidate, due `timeout` from now.
    pub fn add(
        &mut self,
        transaction_id: TransactionId,
        candidate_id: Id,
        to: SocketAddr,
        timeout: Duration,
    ) {
        if self.calls.contains_key(&transaction_id) {
            // The transport reissued a live transaction id. The old call
            // can no longer be resolved, so drop it to keep one entry
            // per id.
            debug_assert!(false, "transaction id {} reissued", transaction_id);
            warn!(transaction_id, "transaction id reissued while still in flight");
        }

        let sent_at = Instant::now();
        let deadline = sent_at + timeout;

        self.calls.insert(
            transaction_id,
            RpcCall {
                transaction_id,
                candidate_id,
                to,
                sent_at,
                deadline,
            },
        );
        self.deadlines.push(Reverse((deadline, transaction_id)));
    }

    /// Resolve a call by its transaction id.
    ///
    /// Returns `None` for unknown ids and for calls already resolved.
    pub fn resolve(&mut self, transaction_id: TransactionId) -> Option<RpcCall> {
        self.calls.remove(&transaction_id)
    }

    /// Remove and return every call whose deadline has passed.
    pub fn expired(&mut self) -> Vec<RpcCall> {
        let now = Instant::now();
        let mut expired = Vec::new();

        while let Some(Reverse((deadline, transaction_id))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }

            self.deadlines.pop();

            // Skip stale heap entries, either the call was resolved or
            // its id was reissued with a fresh deadline.
            if let Some(call) = self.calls.remove(&transaction_id) {
                if call.deadline == deadline {
                    expired.push(call);
                } else {
                    self.calls.insert(transaction_id, call);
                }
            }
        }

        expired
    }

    /// Drop every in flight call, used on cancellation.
    pub fn clear(&mut self) {
        self.calls.clear();
        self.deadlines.clear();
    }
}
