//! Manage one iterative lookup and its corresponding requests and
//! responses.

use std::time::Instant;

use tracing::{debug, trace};

use crate::common::{Id, LookupResponse, Node, TransactionId};
use crate::routing_table::RoutingTable;

use super::call::{CallTracker, RpcCall};
use super::candidates::{CandidateNode, CandidateState, ClosestCandidates};
use super::config::Config;
use super::ewma::RttEstimator;
use super::response::{LookupResult, ResponseSender};
use super::transport::Transport;
use super::variant::LookupVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStatus {
    /// Created but not seeded yet.
    Initialized,
    /// Querying candidates.
    Running,
    /// No new requests, in flight ones are draining.
    Completing,
    /// Finished and results delivered. Terminal.
    Done,
    /// Cancelled by the caller. Terminal.
    Cancelled,
}

/// An iterative process of concurrently sending a request to the closest
/// known nodes to the target, folding closer nodes discovered in the
/// responses back in, and repeating until no unqueried candidate remains
/// and nothing is in flight.
#[derive(Debug)]
pub(crate) struct LookupTask {
    variant: Box<dyn LookupVariant>,
    requester_id: Id,
    status: LookupStatus,
    config: Config,

    candidates: ClosestCandidates,
    calls: CallTracker,
    rtt: RttEstimator,

    /// Closest candidate at the last round boundary.
    round_head: Option<Id>,
    /// Requests dispatched since the last round boundary.
    round_sent: usize,
    converged: bool,

    senders: Vec<ResponseSender>,
    results: Vec<LookupResult>,

    started_at: Instant,
}

impl LookupTask {
    pub fn new(requester_id: Id, target: Id, variant: Box<dyn LookupVariant>, config: Config) -> Self {
        trace!(?target, ?variant, "New lookup");

        Self {
            candidates: ClosestCandidates::new(target, config.max_candidates),
            calls: CallTracker::new(),
            rtt: RttEstimator::new(config.rtt_weight),

            variant,
            requester_id,
            status: LookupStatus::Initialized,
            config,

            round_head: None,
            round_sent: 0,
            converged: false,

            senders: Vec::new(),
            results: Vec::new(),

            started_at: Instant::now(),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.candidates.target()
    }

    pub fn status(&self) -> LookupStatus {
        self.status
    }

    pub fn is_done(&self) -> bool {
        matches!(self.status, LookupStatus::Done | LookupStatus::Cancelled)
    }

    /// True once a full round of requests found nothing closer than the
    /// head of the candidate set.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Return true if a response (by transaction id) is expected by this
    /// lookup.
    pub fn inflight(&self, transaction_id: TransactionId) -> bool {
        self.calls.contains(transaction_id)
    }

    /// Candidates that responded, closest first, with their tokens and
    /// round trip times.
    pub fn closest_responding(&self) -> Vec<CandidateNode> {
        self.candidates
            .iter()
            .filter(|candidate| candidate.state() == CandidateState::Replied)
            .cloned()
            .collect()
    }

    // === Public Methods ===

    /// Seed the candidate set and start running. Only the first call
    /// does anything.
    pub fn prepare(&mut self, seeds: &[Node]) {
        if self.status != LookupStatus::Initialized {
            return;
        }

        for node in seeds {
            if node.id == self.requester_id {
                continue;
            }

            self.candidates.add(node.clone());
        }

        debug!(target = ?self.target(), seeds = self.candidates.len(), "Starting lookup");

        self.status = LookupStatus::Running;
    }

    /// Add a sender to the lookup and send all results found so far to it.
    pub fn add_sender(&mut self, sender: ResponseSender) {
        for result in &self.results {
            Self::send_result(&sender, result);
        }

        self.senders.push(sender);
    }

    /// Expire overdue requests and keep the closest candidates queried.
    ///
    /// Returns true if the lookup is done.
    pub fn tick(&mut self, transport: &mut dyn Transport, routing: &mut dyn RoutingTable) -> bool {
        if self.is_done() {
            return true;
        }

        for call in self.calls.expired() {
            self.on_timeout(routing, call);
        }

        self.update(transport, routing);

        self.is_done()
    }

    /// Handle a response routed to this lookup by its transaction id.
    pub fn on_response(
        &mut self,
        transport: &mut dyn Transport,
        routing: &mut dyn RoutingTable,
        transaction_id: TransactionId,
        response: LookupResponse,
    ) {
        let call = match self.calls.resolve(transaction_id) {
            Some(call) => call,
            // Lost the race against its own deadline, or a duplicate.
            None => return,
        };

        let target = self.target();

        if response.responder_id != call.candidate_id {
            // The endpoint is alive but belongs to a different id now.
            // Keep the measurement, learn the new node, trust nothing
            // else in the response.
            trace!(
                ?target,
                expected = ?call.candidate_id,
                responded = ?response.responder_id,
                "Responder id changed, ignoring payload"
            );

            let rtt = call.sent_at.elapsed();
            self.rtt.update(rtt);

            if let Some(candidate) = self.candidates.get_mut(&call.candidate_id) {
                candidate.mark_replied(None);
            }
            routing.report_reachable(&Node::new(response.responder_id, call.to), rtt);

            self.update(transport, routing);
            return;
        }

        if let Err(error) = self.variant.validate(&target, &response) {
            debug!(?target, %error, from = ?call.to, "Invalid response");

            if let Some(candidate) = self.candidates.get_mut(&call.candidate_id) {
                candidate.mark_failed();
                let node = candidate.node().clone();
                routing.report_unreachable(&node);
            }

            self.update(transport, routing);
            return;
        }

        trace!(
            ?target,
            from = ?response.responder_id,
            nodes = response.nodes.len(),
            "Got response"
        );

        // The candidate may have been evicted while its request was in
        // flight, the response still counts.
        let (node, rtt) = match self.candidates.get_mut(&call.candidate_id) {
            Some(candidate) => {
                let rtt = candidate.mark_replied(response.token.clone());

                (
                    candidate.node().clone(),
                    rtt.unwrap_or_else(|| call.sent_at.elapsed()),
                )
            }
            None => (
                Node::new(call.candidate_id, call.to),
                call.sent_at.elapsed(),
            ),
        };

        self.rtt.update(rtt);
        routing.report_reachable(&node, rtt);

        for found in self.variant.extract_candidates(&response) {
            if found.id == self.requester_id {
                continue;
            }

            self.candidates.add(found);
        }

        if let Some(result) = self.variant.extract_result(&target, &response) {
            self.deliver(&result);

            let terminal = self.variant.is_terminal(&result);
            self.results.push(result);

            if terminal && self.status == LookupStatus::Running {
                debug!(?target, "Found result, completing lookup");
                self.status = LookupStatus::Completing;
            }
        }

        self.update(transport, routing);
    }

    /// Stop the lookup. In flight requests are forgotten, their late
    /// responses will find nothing to resolve.
    pub fn cancel(&mut self) {
        if self.is_done() {
            return;
        }

        debug!(target = ?self.target(), "Cancelled lookup");

        self.calls.clear();
        self.candidates.clear();
        // Dropping the senders disconnects the receivers.
        self.senders.clear();

        self.status = LookupStatus::Cancelled;
    }

    // === Private Methods ===

    /// A request missed its deadline.
    fn on_timeout(&mut self, routing: &mut dyn RoutingTable, call: RpcCall) {
        trace!(target = ?self.target(), candidate = ?call.candidate_id, "Request timed out");

        if let Some(candidate) = self.candidates.get_mut(&call.candidate_id) {
            candidate.mark_timed_out();
            let node = candidate.node().clone();
            routing.report_unreachable(&node);
        } else {
            routing.report_unreachable(&Node::new(call.candidate_id, call.to));
        }
    }

    /// Dispatch up to the parallelism limit, then settle the status.
    fn update(&mut self, transport: &mut dyn Transport, routing: &mut dyn RoutingTable) {
        if self.status == LookupStatus::Running {
            // Everything sent so far got resolved, a round boundary.
            if self.calls.is_empty() {
                if self.round_sent > 0 {
                    let head = self.candidates.head();

                    if head.is_some() && self.round_head == head && !self.converged {
                        self.converged = true;
                        debug!(target = ?self.target(), "Frontier stopped improving");
                    }

                    self.round_sent = 0;
                }

                self.round_head = self.candidates.head();
            }

            while self.calls.len() < self.config.parallelism {
                if !self.dispatch_next(transport, routing) {
                    break;
                }
            }

            if self.candidates.pending() == 0 && self.calls.is_empty() {
                self.status = LookupStatus::Completing;
            }
        }

        if self.status == LookupStatus::Completing && self.calls.is_empty() {
            self.finish();
        }
    }

    /// Send a request to the closest unqueried candidate.
    ///
    /// Returns false when no unqueried candidate remains.
    fn dispatch_next(&mut self, transport: &mut dyn Transport, routing: &mut dyn RoutingTable) -> bool {
        let node = match self.candidates.next_unqueried() {
            Some(candidate) => candidate.node().clone(),
            None => return false,
        };

        let request = self.variant.build_request(self.requester_id, self.target());
        let timeout = self.rtt.timeout(
            self.config.base_timeout,
            self.config.max_timeout,
            self.config.timeout_multiplier,
        );

        match transport.send(&node, request) {
            Ok(transaction_id) => {
                trace!(
                    target = ?self.target(),
                    to = ?node.id,
                    transaction_id,
                    ?timeout,
                    "Sent request"
                );

                self.calls.add(transaction_id, node.id, node.address, timeout);
                self.round_sent += 1;

                if let Some(candidate) = self.candidates.get_mut(&node.id) {
                    candidate.mark_sent();
                }
            }
            Err(error) => {
                // A failed send is an immediate timeout.
                debug!(target = ?self.target(), to = ?node.id, %error, "Failed to send request");

                if let Some(candidate) = self.candidates.get_mut(&node.id) {
                    candidate.mark_timed_out();
                }
                routing.report_unreachable(&node);
            }
        }

        true
    }

    fn deliver(&self, result: &LookupResult) {
        for sender in &self.senders {
            Self::send_result(sender, result);
        }
    }

    fn send_result(sender: &ResponseSender, result: &LookupResult) {
        match (sender, result) {
            (ResponseSender::Peers(sender), LookupResult::Peers(records)) => {
                for record in records {
                    let _ = sender.send(record.clone());
                }
            }
            (ResponseSender::Value(sender), LookupResult::Value(value)) => {
                let _ = sender.send(value.clone());
            }
            _ => {}
        }
    }

    fn finish(&mut self) {
        self.status = LookupStatus::Done;

        let closest = self.closest_responding();

        debug!(
            target = ?self.target(),
            candidates = self.candidates.len(),
            responding = closest.len(),
            converged = self.converged,
            elapsed = ?self.started_at.elapsed(),
            "Done lookup"
        );

        for sender in &self.senders {
            if let ResponseSender::ClosestNodes(sender) = sender {
                let _ = sender.send(closest.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::common::{LookupRequest, ResponsePayload, Value};
    use crate::routing_table::StaticRoutingTable;
    use crate::rpc::transport::SendError;
    use crate::rpc::variant::{NodeLookup, ValueLookup};

    /// Records outgoing requests, responses are fed back by the test.
    #[derive(Debug, Default)]
    struct MockTransport {
        sent: Vec<(Node, LookupRequest)>,
        next_tid: TransactionId,
        unroutable: HashSet<SocketAddr>,
    }

    impl Transport for MockTransport {
        fn send(
            &mut self,
            to: &Node,
            request: LookupRequest,
        ) -> Result<TransactionId, SendError> {
            if self.unroutable.contains(&to.address) {
                return Err(SendError::NoRoute(to.address));
            }

            let tid = self.next_tid;
            self.next_tid = self.next_tid.wrapping_add(1);
            self.sent.push((to.clone(), request));

            Ok(tid)
        }

        fn recv(&mut self) -> Option<(TransactionId, LookupResponse)> {
            None
        }
    }

    fn config() -> Config {
        Config {
            parallelism: 3,
            ..Default::default()
        }
    }

    fn seeds(count: usize) -> Vec<Node> {
        (0..count).map(|_| Node::random()).collect()
    }

    fn node_lookup(target: Id) -> LookupTask {
        LookupTask::new(Id::random(), target, Box::new(NodeLookup), config())
    }

    #[test]
    fn zero_seeds_is_immediately_done() {
        let mut transport = MockTransport::default();
        let mut routing = StaticRoutingTable::default();

        let (sender, receiver) = flume::unbounded();

        let mut task = node_lookup(Id::random());
        task.add_sender(ResponseSender::ClosestNodes(sender));

        task.prepare(&[]);

        assert!(task.tick(&mut transport, &mut routing));
        assert_eq!(task.status(), LookupStatus::Done);
        assert!(receiver.try_recv().unwrap().is_empty());
    }

    #[test]
    fn dispatches_up_to_parallelism() {
        let mut transport = MockTransport::default();
        let mut routing = StaticRoutingTable::default();

        let target = Id::random();
        let mut task = node_lookup(target);

        task.prepare(&seeds(10));
        task.tick(&mut transport, &mut routing);

        assert_eq!(transport.sent.len(), 3);

        // The closest candidates go first.
        let sent_ids = transport
            .sent
            .iter()
            .map(|(node, _)| node.id)
            .collect::<Vec<_>>();
        let closest = task
            .candidates
            .iter()
            .take(3)
            .map(|candidate| candidate.id())
            .collect::<Vec<_>>();

        assert_eq!(sent_ids, closest);

        // Nothing new until something resolves.
        task.tick(&mut transport, &mut routing);
        assert_eq!(transport.sent.len(), 3);
    }

    #[test]
    fn responses_fold_closer_candidates_back_in() {
        let mut transport = MockTransport::default();
        let mut routing = StaticRoutingTable::default();

        let target = Id::random();
        let mut task = node_lookup(target);

        task.prepare(&seeds(3));
        task.tick(&mut transport, &mut routing);

        let (first, _) = transport.sent[0].clone();

        // Another hop of nodes comes back.
        let closer = seeds(4);
        task.on_response(
            &mut transport,
            &mut routing,
            0,
            LookupResponse::nodes(first.id, closer.clone()),
        );

        for node in &closer {
            assert!(task.candidates.get(&node.id).is_some());
        }

        // The resolved slot was refilled.
        assert_eq!(transport.sent.len(), 4);
        assert_eq!(
            task.candidates.get(&first.id).unwrap().state(),
            CandidateState::Replied
        );
    }

    #[test]
    fn duplicate_response_is_a_noop() {
        let mut transport = MockTransport::default();
        let mut routing = StaticRoutingTable::default();

        let mut task = node_lookup(Id::random());

        task.prepare(&seeds(3));
        task.tick(&mut transport, &mut routing);

        let (first, _) = transport.sent[0].clone();

        task.on_response(
            &mut transport,
            &mut routing,
            0,
            LookupResponse::nodes(first.id, vec![]),
        );

        let sent_after_first = transport.sent.len();

        // Same transaction id again, nothing changes.
        task.on_response(
            &mut transport,
            &mut routing,
            0,
            LookupResponse::nodes(first.id, seeds(4)),
        );

        assert_eq!(transport.sent.len(), sent_after_first);
        assert_eq!(task.candidates.len(), 3);
    }

    #[test]
    fn send_failure_is_an_immediate_timeout() {
        let mut transport = MockTransport::default();
        let mut routing = StaticRoutingTable::default();

        let seeds = seeds(3);
        for node in &seeds {
            routing.add(node.clone());
        }

        transport.unroutable.insert(seeds[0].address);

        let mut task = node_lookup(Id::random());
        task.prepare(&seeds);
        task.tick(&mut transport, &mut routing);

        // The two routable seeds were queried, the unroutable one is
        // timed out and dropped from the routing table.
        assert_eq!(transport.sent.len(), 2);
        assert_eq!(
            task.candidates.get(&seeds[0].id).unwrap().state(),
            CandidateState::TimedOut
        );
        assert!(routing.nodes().iter().all(|node| node.id != seeds[0].id));
    }

    #[test]
    fn changed_responder_id_keeps_liveness_but_ignores_payload() {
        let mut transport = MockTransport::default();
        let mut routing = StaticRoutingTable::default();

        let mut task = node_lookup(Id::random());

        task.prepare(&seeds(3));
        task.tick(&mut transport, &mut routing);

        let (first, _) = transport.sent[0].clone();
        let new_id = Id::random();

        task.on_response(
            &mut transport,
            &mut routing,
            0,
            LookupResponse::nodes(new_id, seeds(4)),
        );

        // The old candidate is resolved but none of the nodes it sent
        // were trusted.
        assert_eq!(
            task.candidates.get(&first.id).unwrap().state(),
            CandidateState::Replied
        );
        assert_eq!(task.candidates.len(), 3);

        // The node that actually answered is now known to the routing
        // table under its real id.
        assert!(routing.nodes().iter().any(|node| node.id == new_id));
    }

    #[test]
    fn invalid_response_marks_the_candidate_failed() {
        let mut transport = MockTransport::default();
        let mut routing = StaticRoutingTable::default();

        let target = Id::random();
        let mut task = LookupTask::new(
            Id::random(),
            target,
            Box::new(ValueLookup::default()),
            config(),
        );

        task.prepare(&seeds(3));
        task.tick(&mut transport, &mut routing);

        let (first, _) = transport.sent[0].clone();

        // A value that does not hash to the target.
        let response = LookupResponse {
            responder_id: first.id,
            token: None,
            nodes: vec![],
            payload: ResponsePayload::Value(Value::immutable(Bytes::from_static(b"wrong"))),
        };

        task.on_response(&mut transport, &mut routing, 0, response);

        assert_eq!(
            task.candidates.get(&first.id).unwrap().state(),
            CandidateState::Failed
        );
    }

    #[test]
    fn first_valid_value_completes_while_inflight_drain() {
        let mut transport = MockTransport::default();
        let mut routing = StaticRoutingTable::default();

        let value = Value::immutable(Bytes::from_static(b"the value"));
        let target = value.target();

        let (sender, receiver) = flume::unbounded();

        let mut task = LookupTask::new(
            Id::random(),
            target,
            Box::new(ValueLookup::default()),
            config(),
        );
        task.add_sender(ResponseSender::Value(sender));

        task.prepare(&seeds(6));
        task.tick(&mut transport, &mut routing);

        assert_eq!(transport.sent.len(), 3);

        let (first, _) = transport.sent[0].clone();
        let response = LookupResponse {
            responder_id: first.id,
            token: Some(b"token".to_vec()),
            nodes: vec![],
            payload: ResponsePayload::Value(value.clone()),
        };

        task.on_response(&mut transport, &mut routing, 0, response);

        // Completing: the result is out, no new requests are sent, the
        // two other calls are still draining.
        assert_eq!(receiver.try_recv(), Ok(value));
        assert_eq!(task.status(), LookupStatus::Completing);
        assert_eq!(transport.sent.len(), 3);

        for (tid, (node, _)) in transport.sent.clone().iter().enumerate().skip(1) {
            task.on_response(
                &mut transport,
                &mut routing,
                tid as TransactionId,
                LookupResponse::nodes(node.id, vec![]),
            );
        }

        assert_eq!(task.status(), LookupStatus::Done);
        assert_eq!(transport.sent.len(), 3);

        // Late round trips still counted for the routing table.
        assert_eq!(routing.nodes().len(), 3);
    }

    #[test]
    fn cancel_clears_state_and_disconnects_receivers() {
        let mut transport = MockTransport::default();
        let mut routing = StaticRoutingTable::default();

        let (sender, receiver) = flume::unbounded();

        let mut task = node_lookup(Id::random());
        task.add_sender(ResponseSender::ClosestNodes(sender));

        task.prepare(&seeds(5));
        task.tick(&mut transport, &mut routing);

        task.cancel();

        assert_eq!(task.status(), LookupStatus::Cancelled);
        assert!(task.tick(&mut transport, &mut routing));
        assert!(receiver.try_recv().is_err());

        // A late response after cancellation changes nothing.
        let (first, _) = transport.sent[0].clone();
        task.on_response(
            &mut transport,
            &mut routing,
            0,
            LookupResponse::nodes(first.id, seeds(2)),
        );
        assert_eq!(task.candidates.len(), 0);
    }
}
