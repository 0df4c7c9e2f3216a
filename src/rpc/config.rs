use std::time::Duration;

use super::{
    DEFAULT_BASE_TIMEOUT, DEFAULT_CACHE_EXPIRY, DEFAULT_CACHE_SIZE, DEFAULT_MAX_CANDIDATES,
    DEFAULT_MAX_TIMEOUT, DEFAULT_PARALLELISM, DEFAULT_RTT_WEIGHT, DEFAULT_SEED_COUNT,
    DEFAULT_TIMEOUT_MULTIPLIER,
};

#[derive(Debug, Clone)]
/// Lookup engine configurations
pub struct Config {
    /// Maximum number of in flight requests per lookup.
    ///
    /// The higher this is, the faster lookups resolve and the more load
    /// they put on the network.
    ///
    /// Defaults to [DEFAULT_PARALLELISM]
    pub parallelism: usize,
    /// Capacity of the closest candidates set of each lookup.
    ///
    /// Defaults to [DEFAULT_MAX_CANDIDATES]
    pub max_candidates: usize,
    /// How many nodes to request from the routing table when starting
    /// a lookup.
    ///
    /// Defaults to [DEFAULT_SEED_COUNT]
    pub seed_count: usize,
    /// Request timeout before any round trip samples were collected,
    /// and the floor below which adaptive timeouts never drop.
    ///
    /// The longer this duration is, the longer lookups take until they
    /// are deemed "done". The shorter it is, the more responses from
    /// busy nodes we miss out on, which affects the accuracy of lookups
    /// trying to find the closest nodes to a target.
    ///
    /// Defaults to [DEFAULT_BASE_TIMEOUT]
    pub base_timeout: Duration,
    /// Ceiling for adaptive request timeouts.
    ///
    /// Defaults to [DEFAULT_MAX_TIMEOUT]
    pub max_timeout: Duration,
    /// Adaptive timeouts are this multiple of the average observed
    /// round trip time, clamped between [Config::base_timeout] and
    /// [Config::max_timeout].
    ///
    /// Defaults to [DEFAULT_TIMEOUT_MULTIPLIER]
    pub timeout_multiplier: f64,
    /// Weight of the newest round trip sample in the moving average.
    ///
    /// Defaults to [DEFAULT_RTT_WEIGHT]
    pub rtt_weight: f64,
    /// How many completed lookups to remember for seeding repeat
    /// lookups of the same target.
    ///
    /// Defaults to [DEFAULT_CACHE_SIZE]
    pub cache_size: usize,
    /// How long cached lookup results remain usable as seeds.
    ///
    /// Defaults to [DEFAULT_CACHE_EXPIRY]
    pub cache_expiry: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            seed_count: DEFAULT_SEED_COUNT,
            base_timeout: DEFAULT_BASE_TIMEOUT,
            max_timeout: DEFAULT_MAX_TIMEOUT,
            timeout_multiplier: DEFAULT_TIMEOUT_MULTIPLIER,
            rtt_weight: DEFAULT_RTT_WEIGHT,
            cache_size: DEFAULT_CACHE_SIZE,
            cache_expiry: DEFAULT_CACHE_EXPIRY,
        }
    }
}
