//! The relay node's analytics engine.
//!
//! [`Node`] owns the storage handle and the background pipeline: the
//! request tracker (continuous), and the periodic analytics cycle that
//! rebuilds the follow graph and runs cluster detection, community
//! detection, and trust analysis over it, in that order.
//!
//! Everything the relay front-end calls on a per-message basis
//! ([`Node::record_subscription`], [`Node::is_trusted`]) is non-blocking
//! and never surfaces an error; background failures degrade to stale or
//! empty answers.

pub mod cluster;
pub mod community;
pub mod config;
pub mod graph;
pub(crate) mod task;
pub mod tracker;
pub mod trust;

use std::sync::{Arc, Weak};

use mauve_core::{Filter, Pubkey};
use mauve_db::{
    BotClusterRecord, CommunityGraphRecord, Database, ReqAnalyticsRecord, SpamCandidateRecord,
    TopCooccurrence,
};
use mauve_util_error::FmtCompact as _;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use crate::cluster::{ClusterDetector, DetectedCluster};
pub use crate::community::CommunityDetector;
pub use crate::config::AnalyticsConfig;
pub use crate::graph::{FollowGraph, UndirectedGraph};
pub use crate::tracker::RequestTracker;
pub use crate::trust::TrustAnalyzer;

const LOG_TARGET: &str = "mauve::node";

/// Weak handle to [`Node`], for background tasks that must not keep the
/// node alive.
#[derive(Debug, Clone)]
pub struct NodeHandle(Weak<Node>);

impl NodeHandle {
    pub fn upgrade(&self) -> Option<Arc<Node>> {
        self.0.upgrade()
    }
}

pub struct Node {
    db: Arc<Database>,
    config: AnalyticsConfig,
    tracker: RequestTracker,
    trust: TrustAnalyzer,
    cluster: ClusterDetector,
    community: CommunityDetector,
}

#[bon::bon]
impl Node {
    #[builder(finish_fn(name = "build"))]
    pub async fn new(
        #[builder(start_fn)] db: Arc<Database>,
        config: Option<AnalyticsConfig>,
        /// When false, skips the flush and analytics-cycle timers. The
        /// request processor is always spawned. Useful for tests and
        /// one-shot runs.
        #[builder(default = true)]
        start_background_tasks: bool,
    ) -> Arc<Self> {
        let config = config.unwrap_or_default();
        debug!(target: LOG_TARGET, "Starting node");

        let (tracker, processor) = RequestTracker::new(db.clone(), &config);
        let trust = TrustAnalyzer::new(db.clone(), config.clone());
        let cluster = ClusterDetector::new(db.clone(), config.clone());
        let community = CommunityDetector::new(db.clone(), config.clone());

        let node = Arc::new(Self {
            db,
            config,
            tracker,
            trust,
            cluster,
            community,
        });

        // Serve trust queries from the last persisted set until the first
        // cycle replaces it.
        node.trust.load().await;

        tokio::spawn(processor.run());
        if start_background_tasks {
            node.start_flush_task();
            node.start_analytics_cycle();
        }

        node
    }

    fn handle(self: &Arc<Self>) -> NodeHandle {
        NodeHandle(Arc::downgrade(self))
    }

    fn start_flush_task(self: &Arc<Self>) {
        tokio::spawn(tracker::FlushTask::new(self.tracker.clone(), &self.config).run());
    }

    fn start_analytics_cycle(self: &Arc<Self>) {
        tokio::spawn(task::cycle::AnalyticsCycle::new(self.handle(), self.config.cycle_interval).run());
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// One full analytics pass: rebuild the follow graph, then run the
    /// detectors against it in dependency order.
    pub async fn run_analytics_cycle(&self) {
        let start = Instant::now();
        info!(target: LOG_TARGET, "Analytics cycle starting");

        let graph = FollowGraph::build(&self.db).await;

        let clusters = self.cluster.detect(&graph).await;
        let communities = self.community.detect(&graph).await;
        self.trust.analyze(&graph).await;

        let trusted = self.trust.trusted_count().await;
        info!(
            target: LOG_TARGET,
            elapsed_ms = %start.elapsed().as_millis(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            clusters = clusters.len(),
            communities = communities.map(|c| c.communities.len()).unwrap_or(0),
            trusted = trusted,
            "Analytics cycle finished"
        );
    }

    /// Final flush so counters observed since the last tick are not lost.
    pub async fn shutdown(&self) {
        info!(target: LOG_TARGET, "Shutting down; flushing request counters");
        self.tracker.flush().await;
    }

    // ------------------------------------------------------------------
    // Relay-facing reads. None of these error: storage trouble degrades
    // to empty answers and a warning in the log.
    // ------------------------------------------------------------------

    /// Feed one parsed subscription filter into request analytics.
    pub fn record_subscription(&self, filter: &Filter) {
        self.tracker.record_subscription(filter);
    }

    pub async fn is_trusted(&self, pubkey: &Pubkey) -> bool {
        self.trust.is_trusted(pubkey).await
    }

    pub async fn trusted_count(&self) -> usize {
        self.trust.trusted_count().await
    }

    pub async fn trusted_pubkeys(&self) -> Vec<Pubkey> {
        self.trust.trusted_pubkeys().await
    }

    pub async fn pubkey_stats(&self, pubkey: &Pubkey) -> Option<ReqAnalyticsRecord> {
        self.tracker.pubkey_stats(pubkey).await
    }

    pub async fn top_requested(&self, limit: usize) -> Vec<(Pubkey, ReqAnalyticsRecord)> {
        self.tracker.top_requested(limit).await
    }

    pub async fn top_cooccurring(&self, limit: usize) -> Vec<TopCooccurrence> {
        self.tracker.top_cooccurring(limit).await
    }

    pub async fn spam_candidates(&self, limit: usize) -> Vec<(Pubkey, SpamCandidateRecord)> {
        self.trust.spam_candidates(limit).await
    }

    pub async fn bot_clusters(&self, limit: usize) -> Vec<(u64, BotClusterRecord)> {
        self.db.get_bot_clusters(limit).await.unwrap_or_else(|err| {
            warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Bot cluster read failed");
            vec![]
        })
    }

    pub async fn communities(&self) -> Option<CommunityGraphRecord> {
        self.db.get_communities().await.unwrap_or_else(|err| {
            warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Community snapshot read failed");
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use mauve_core::{Event, EventKind, Tag};
    use mauve_util_error::BoxedErrorResult;

    use super::*;

    fn contact_list(pubkey: &str, targets: &[String]) -> Event {
        Event {
            id: format!("{pubkey}-3").into(),
            pubkey: pubkey.into(),
            created_at: 100.into(),
            kind: EventKind::CONTACT_LIST,
            tags: targets.iter().map(|t| Tag::new(["p", t.as_str()])).collect(),
            content: String::new(),
        }
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn full_cycle_end_to_end() -> BoxedErrorResult<()> {
        let dir = tempfile::tempdir()?;
        let db = Arc::new(Database::open(dir.path().join("db.redb")).await?);

        // Organic chain of 8 plus a 6-member follow-back ring.
        let organic: Vec<String> = (0..8).map(|i| format!("or{i:02}")).collect();
        for pair in organic.windows(2) {
            db.process_event(&contact_list(&pair[0], &pair[1..].to_vec()))
                .await?;
        }
        let ring: Vec<String> = (0..6).map(|i| format!("bot{i:02}")).collect();
        for name in &ring {
            let others: Vec<String> = ring.iter().filter(|o| *o != name).cloned().collect();
            db.process_event(&contact_list(name, &others)).await?;
        }

        let node = Node::builder(db.clone())
            .start_background_tasks(false)
            .build()
            .await;

        node.run_analytics_cycle().await;

        assert_eq!(node.trusted_count().await, 8);
        assert!(node.is_trusted(&Pubkey::new("or00")).await);
        assert!(!node.is_trusted(&Pubkey::new("bot00")).await);

        let clusters = node.bot_clusters(10).await;
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].1.members.len(), 6);

        // Graph of 14 nodes: too small for community detection.
        assert!(node.communities().await.is_none());

        let spam = node.spam_candidates(100).await;
        assert!(ring.iter().all(|name| {
            spam.iter().any(|(pk, _)| pk.as_str() == name.as_str())
        }));

        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn subscription_flow_through_shutdown_flush() -> BoxedErrorResult<()> {
        let dir = tempfile::tempdir()?;
        let db = Arc::new(Database::open(dir.path().join("db.redb")).await?);

        let node = Node::builder(db.clone())
            .start_background_tasks(false)
            .build()
            .await;

        node.record_subscription(&Filter {
            authors: vec![Pubkey::new("aa"), Pubkey::new("bb")],
            kinds: vec![EventKind::PROFILE],
        });
        node.record_subscription(&Filter {
            authors: vec![Pubkey::new("aa")],
            kinds: vec![],
        });

        // Give the spawned processor a chance to drain the queue.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        node.shutdown().await;

        let top = node.top_requested(10).await;
        assert_eq!(top[0].0, Pubkey::new("aa"));
        assert_eq!(top[0].1.total, 2);

        let pairs = node.top_cooccurring(10).await;
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].count, 1);

        Ok(())
    }
}
