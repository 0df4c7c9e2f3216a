//! Iterative lookup engine over a pluggable transport.

mod call;
mod candidates;
mod config;
mod ewma;
mod lookup;
pub mod response;
pub mod transport;
pub mod variant;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, trace};

use crate::common::{Id, LookupResponse, Node, TransactionId};
use crate::routing_table::RoutingTable;

pub use candidates::{CandidateNode, CandidateState, ClosestCandidates};
pub use config::Config;
pub use ewma::RttEstimator;
pub use lookup::LookupStatus;
pub use response::{LookupResult, ResponseSender};
pub use transport::{SendError, Transport};
pub use variant::{InvalidResponse, LookupVariant, NodeLookup, PeerLookup, ValueLookup};

use lookup::LookupTask;

/// Default number of in flight requests per lookup.
pub const DEFAULT_PARALLELISM: usize = 8;
/// Default capacity of the closest candidates set of a lookup.
pub const DEFAULT_MAX_CANDIDATES: usize = 16;
/// Default number of nodes a lookup is seeded with.
pub const DEFAULT_SEED_COUNT: usize = 16;
/// Default request timeout before any round trip time was observed.
pub const DEFAULT_BASE_TIMEOUT: Duration = Duration::from_secs(2);
/// Default ceiling for adaptive request timeouts.
pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(10);
/// Default multiple of the average round trip time a request is given
/// before it times out.
pub const DEFAULT_TIMEOUT_MULTIPLIER: f64 = 3.0;
/// Default weight of the newest round trip sample in the moving average.
pub const DEFAULT_RTT_WEIGHT: f64 = 0.3;
/// Default number of completed lookups to remember as seeds.
pub const DEFAULT_CACHE_SIZE: usize = 256;
/// Default duration a completed lookup keeps seeding repeat lookups.
pub const DEFAULT_CACHE_EXPIRY: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
/// Nodes that responded to a finished lookup, kept to seed a repeat
/// lookup of the same target.
struct CachedLookup {
    nodes: Vec<Node>,
    cached_at: Instant,
}

#[derive(Debug)]
pub struct Rpc {
    requester_id: Id,
    config: Config,

    transport: Box<dyn Transport>,
    routing_table: Box<dyn RoutingTable>,

    lookups: HashMap<Id, LookupTask>,
    cache: LruCache<Id, CachedLookup>,
}

impl Rpc {
    pub fn new(
        config: Config,
        transport: Box<dyn Transport>,
        routing_table: Box<dyn RoutingTable>,
    ) -> Self {
        let cache_size = NonZeroUsize::new(config.cache_size).unwrap_or(NonZeroUsize::MIN);

        Rpc {
            requester_id: Id::random(),
            config,

            transport,
            routing_table,

            lookups: HashMap::new(),
            cache: LruCache::new(cache_size),
        }
    }

    // === Options ===

    pub fn with_id(mut self, id: Id) -> Self {
        self.requester_id = id;
        self
    }

    // === Getters ===

    pub fn id(&self) -> Id {
        self.requester_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn routing_table(&self) -> &dyn RoutingTable {
        &*self.routing_table
    }

    /// Number of lookups still running.
    pub fn active_lookups(&self) -> usize {
        self.lookups.len()
    }

    // === Public Methods ===

    /// Deliver received responses, expire overdue requests, and keep
    /// every lookup's closest candidates queried.
    ///
    /// Call this in a loop, it never blocks.
    pub fn tick(&mut self) {
        // Deliver responses first, while their transactions are live.
        while let Some((transaction_id, response)) = self.transport.recv() {
            self.handle_response(transaction_id, response);
        }

        for lookup in self.lookups.values_mut() {
            lookup.tick(&mut *self.transport, &mut *self.routing_table);
        }

        // Remove done lookups _after_ ticking them, otherwise response
        // receivers would disconnect before the final results are sent.
        let cache = &mut self.cache;
        self.lookups.retain(|target, lookup| {
            if !lookup.is_done() {
                return true;
            }

            if lookup.status() == LookupStatus::Done {
                let nodes = lookup
                    .closest_responding()
                    .iter()
                    .map(|candidate| candidate.node().clone())
                    .collect::<Vec<_>>();

                if !nodes.is_empty() {
                    cache.put(
                        *target,
                        CachedLookup {
                            nodes,
                            cached_at: Instant::now(),
                        },
                    );
                }
            }

            false
        });
    }

    /// Start a lookup for the closest nodes to a target.
    pub fn find_node(&mut self, target: Id, sender: ResponseSender) {
        self.lookup(target, Box::new(NodeLookup), Some(sender))
    }

    /// Start a lookup for peers announced under a target.
    pub fn find_peers(&mut self, target: Id, sender: ResponseSender) {
        self.lookup(target, Box::new(PeerLookup), Some(sender))
    }

    /// Start a lookup for a value stored under a target.
    ///
    /// If `min_seq` is set, signed values with an older sequence number
    /// are ignored.
    pub fn find_value(&mut self, target: Id, min_seq: Option<i64>, sender: ResponseSender) {
        self.lookup(target, Box::new(ValueLookup { min_seq }), Some(sender))
    }

    /// Cancel a lookup, disconnecting its response receivers.
    pub fn cancel(&mut self, target: &Id) {
        if let Some(mut lookup) = self.lookups.remove(target) {
            lookup.cancel();
        }
    }

    // === Private Methods ===

    /// Start a lookup, or join the one already running for this target.
    ///
    /// Lookups take a while to traverse the network. Until one is done,
    /// starting another for the same target just adds the sender to it,
    /// which receives all the results seen so far as well as subsequent
    /// ones. Effectively callers share one traversal.
    fn lookup(
        &mut self,
        target: Id,
        variant: Box<dyn LookupVariant>,
        sender: Option<ResponseSender>,
    ) {
        if let Some(lookup) = self.lookups.get_mut(&target) {
            if let Some(sender) = sender {
                lookup.add_sender(sender);
            }
            return;
        }

        let mut lookup = LookupTask::new(self.requester_id, target, variant, self.config.clone());

        if let Some(sender) = sender {
            lookup.add_sender(sender);
        }

        // Seed with the responders of a recent lookup for the same
        // target, falling back to the routing table.
        let mut seeds = self.cached_nodes(&target);
        if seeds.is_empty() {
            seeds = self.routing_table.seed(&target, self.config.seed_count);
        }
        if seeds.is_empty() {
            debug!(?target, "No seeds for lookup");
        }

        lookup.prepare(&seeds);
        // First requests go out now, the rest on subsequent ticks.
        lookup.tick(&mut *self.transport, &mut *self.routing_table);

        self.lookups.insert(target, lookup);
    }

    fn handle_response(&mut self, transaction_id: TransactionId, response: LookupResponse) {
        let lookup = self
            .lookups
            .values_mut()
            .find(|lookup| lookup.inflight(transaction_id));

        match lookup {
            Some(lookup) => lookup.on_response(
                &mut *self.transport,
                &mut *self.routing_table,
                transaction_id,
                response,
            ),
            None => trace!(transaction_id, "Response for an unknown transaction"),
        }
    }

    fn cached_nodes(&mut self, target: &Id) -> Vec<Node> {
        match self.cache.get(target) {
            Some(cached) if cached.cached_at.elapsed() < self.config.cache_expiry => {
                trace!(?target, nodes = cached.nodes.len(), "Seeding lookup from cache");

                cached.nodes.clone()
            }
            Some(_) => {
                self.cache.pop(target);

                Vec::new()
            }
            None => Vec::new(),
        }
    }
}
