//! The bounded set of closest candidates of an ongoing lookup.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use crate::common::{Distance, Id, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Lifecycle of a candidate within one lookup.
pub enum CandidateState {
    /// Known but not queried yet.
    Pending,
    /// A request is in flight.
    Sent,
    /// Sent a valid matching response. Terminal.
    Replied,
    /// Missed its deadline, or the send itself failed. Terminal.
    TimedOut,
    /// Sent a malformed or unverifiable response. Terminal.
    Failed,
}

impl CandidateState {
    /// Terminal states never transition again, candidates are not
    /// retried within a lookup.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CandidateState::Replied | CandidateState::TimedOut | CandidateState::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A [Node] and everything one lookup learned about it.
pub struct CandidateNode {
    node: Node,
    /// Distance to the lookup target, computed once at insertion.
    distance: Distance,
    state: CandidateState,
    sent_at: Option<Instant>,
    /// Round trip time, measured if this candidate replied.
    rtt: Option<Duration>,
    /// Write token issued by the responder, for store requests outside
    /// this crate.
    token: Option<Vec<u8>>,
}

impl CandidateNode {
    fn new(node: Node, distance: Distance) -> Self {
        Self {
            node,
            distance,
            state: CandidateState::Pending,
            sent_at: None,
            rtt: None,
            token: None,
        }
    }

    // === Getters ===

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn id(&self) -> Id {
        self.node.id
    }

    pub fn distance(&self) -> Distance {
        self.distance
    }

    pub fn state(&self) -> CandidateState {
        self.state
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    pub fn token(&self) -> Option<&[u8]> {
        self.token.as_deref()
    }

    // === Private Methods ===

    pub(crate) fn mark_sent(&mut self) {
        self.state = CandidateState::Sent;
        self.sent_at = Some(Instant::now());
    }

    /// Mark this candidate as replied, recording its round trip time
    /// and the write token it issued.
    pub(crate) fn mark_replied(&mut self, token: Option<Vec<u8>>) -> Option<Duration> {
        self.state = CandidateState::Replied;
        self.token = token;
        self.rtt = self.sent_at.map(|sent_at| sent_at.elapsed());

        self.rtt
    }

    pub(crate) fn mark_timed_out(&mut self) {
        self.state = CandidateState::TimedOut;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.state = CandidateState::Failed;
    }
}

#[derive(Debug, Clone)]
/// Candidates of an ongoing lookup, ordered by distance to its target,
/// holding at most `capacity` entries.
///
/// The first sighting of an id wins; adding the same id again is a no op
/// even from a different address. Once full, a new candidate is only
/// admitted if it is strictly closer than the current tail, which gets
/// evicted.
pub struct ClosestCandidates {
    target: Id,
    capacity: usize,
    candidates: Vec<CandidateNode>,
}

impl ClosestCandidates {
    pub fn new(target: Id, capacity: usize) -> Self {
        Self {
            target,
            capacity,
            candidates: Vec::with_capacity(capacity),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// The id of the closest candidate seen so far.
    pub fn head(&self) -> Option<Id> {
        self.candidates.first().map(|candidate| candidate.id())
    }

    /// The id of the farthest candidate still held.
    pub fn tail(&self) -> Option<Id> {
        self.candidates.last().map(|candidate| candidate.id())
    }

    pub fn get(&self, id: &Id) -> Option<&CandidateNode> {
        self.position(id)
            .map(|pos| &self.candidates[pos])
    }

    pub(crate) fn get_mut(&mut self, id: &Id) -> Option<&mut CandidateNode> {
        self.position(id)
            .map(move |pos| &mut self.candidates[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateNode> {
        self.candidates.iter()
    }

    /// How many candidates were not queried yet.
    pub fn pending(&self) -> usize {
        self.candidates
            .iter()
            .filter(|candidate| candidate.state == CandidateState::Pending)
            .count()
    }

    // === Public Methods ===

    /// Add a candidate, preserving order and the capacity bound.
    pub fn add(&mut self, node: Node) {
        let distance = self.target.xor(&node.id);

        match self.candidates.binary_search_by(|probe| {
            if probe.node.id == node.id {
                Ordering::Equal
            } else {
                probe.distance.cmp(&distance)
            }
        }) {
            // Already known, the first sighting wins.
            Ok(_) => {}
            Err(pos) => {
                if self.candidates.len() < self.capacity {
                    self.candidates.insert(pos, CandidateNode::new(node, distance));
                } else if pos < self.candidates.len() {
                    // Strictly closer than the tail, which makes room.
                    self.candidates.insert(pos, CandidateNode::new(node, distance));
                    self.candidates.pop();
                }
            }
        }
    }

    /// The closest candidate that was not queried yet.
    pub fn next_unqueried(&self) -> Option<&CandidateNode> {
        self.candidates
            .iter()
            .find(|candidate| candidate.state == CandidateState::Pending)
    }

    pub(crate) fn clear(&mut self) {
        self.candidates.clear();
    }

    fn position(&self, id: &Id) -> Option<usize> {
        let distance = self.target.xor(id);

        self.candidates
            .binary_search_by(|probe| {
                if probe.node.id == *id {
                    Ordering::Equal
                } else {
                    probe.distance.cmp(&distance)
                }
            })
            .ok()
    }
}
