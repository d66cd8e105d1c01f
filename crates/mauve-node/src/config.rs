use std::time::Duration;

/// Knobs for the analytics pipeline.
///
/// `Default` carries the conservative seed values; deployments typically
/// override `min_trusted_followers` (the public relay runs with 1000) and
/// the cycle interval via the CLI.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Smallest SCC worth reporting as a potential bot cluster.
    pub min_cluster_size: usize,
    /// Internal edge density threshold for a cluster to count as a ring.
    pub min_density: f64,
    /// Maximum outbound-to-internal edge ratio for a ring.
    pub max_external_ratio: f64,

    /// Communities smaller than this are dropped from the snapshot.
    pub min_community: usize,
    /// Snapshot keeps at most this many communities (largest first).
    pub max_communities: usize,
    /// Louvain pass limit.
    pub louvain_max_iterations: usize,
    /// Below this many graph nodes community detection is skipped entirely.
    pub louvain_min_nodes: usize,

    /// Trusted followers needed for promotion into the trusted set.
    pub min_trusted_followers: usize,
    /// Promotion rounds before giving up on reaching a fixpoint.
    pub trust_propagation_max_iterations: usize,

    /// Subscription-record queue size; overflow drops records.
    pub request_queue_capacity: usize,
    /// How often request counters are flushed to storage.
    pub flush_interval: Duration,
    /// Only this many leading authors of a filter contribute to pair
    /// co-occurrence counting, capping pairs per record at `n*(n-1)/2`.
    pub pair_author_prefix: usize,

    /// How often the full analytics cycle runs.
    pub cycle_interval: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 5,
            min_density: 0.7,
            max_external_ratio: 0.2,
            min_community: 10,
            max_communities: 50,
            louvain_max_iterations: 20,
            louvain_min_nodes: 100,
            min_trusted_followers: 10,
            trust_propagation_max_iterations: 100,
            request_queue_capacity: 10_000,
            flush_interval: Duration::from_secs(30),
            pair_author_prefix: 20,
            cycle_interval: Duration::from_secs(6 * 60 * 60),
        }
    }
}
