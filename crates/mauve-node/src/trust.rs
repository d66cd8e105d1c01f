//! Trust propagation and spam classification.
//!
//! The trusted set starts as the largest connected component of the
//! undirected follow graph: the organic social web, which bot rings by
//! construction sit outside of. Trust then spreads along follow edges: an
//! account followed by enough already-trusted accounts becomes trusted too,
//! iterated to a fixpoint. Whatever stays outside and still has stored
//! events gets a second look as a spam candidate.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use mauve_core::Pubkey;
use mauve_db::{Database, SpamCandidateRecord, SpamReason};
use mauve_util_error::FmtCompact as _;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::LOG_TARGET;
use crate::config::AnalyticsConfig;
use crate::graph::FollowGraph;

/// Owns the current trusted set.
///
/// Reads come from the relay's per-message path and never touch storage;
/// writes happen once per analytics cycle. Each analyzer instance owns its
/// own set; nothing here is process-global.
pub struct TrustAnalyzer {
    db: Arc<Database>,
    config: AnalyticsConfig,
    trusted: RwLock<HashSet<Pubkey>>,
}

impl TrustAnalyzer {
    pub fn new(db: Arc<Database>, config: AnalyticsConfig) -> Self {
        Self {
            db,
            config,
            trusted: RwLock::new(HashSet::new()),
        }
    }

    /// Warm the in-memory set from storage, so the node serves trust
    /// queries before the first analytics cycle completes.
    pub async fn load(&self) {
        match self.db.get_trusted_pubkeys().await {
            Ok(stored) => {
                info!(target: LOG_TARGET, count = stored.len(), "Loaded trusted set from storage");
                *self.trusted.write().await = stored;
            }
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    err = %err.fmt_compact(),
                    "Failed to load trusted set; starting empty"
                );
            }
        }
    }

    pub async fn is_trusted(&self, pubkey: &Pubkey) -> bool {
        self.trusted.read().await.contains(pubkey)
    }

    pub async fn trusted_count(&self) -> usize {
        self.trusted.read().await.len()
    }

    pub async fn trusted_pubkeys(&self) -> Vec<Pubkey> {
        let mut ret: Vec<Pubkey> = self.trusted.read().await.iter().cloned().collect();
        ret.sort_unstable();
        ret
    }

    /// Read-through to stored spam candidates; errors degrade to empty.
    pub async fn spam_candidates(&self, limit: usize) -> Vec<(Pubkey, SpamCandidateRecord)> {
        self.db
            .get_spam_candidates(limit)
            .await
            .unwrap_or_else(|err| {
                warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Spam candidate read failed");
                vec![]
            })
    }

    /// Recompute the trusted set from the graph, persist it, then
    /// re-evaluate spam candidates against it.
    ///
    /// An empty graph leaves the previous (possibly storage-warmed) set
    /// untouched rather than wiping it.
    pub async fn analyze(&self, graph: &FollowGraph) {
        if graph.node_count() == 0 {
            debug!(target: LOG_TARGET, "Empty follow graph; keeping previous trusted set");
            return;
        }

        let trusted_mask = compute_trust(graph, &self.config);

        let trusted_set: HashSet<Pubkey> = trusted_mask
            .iter()
            .enumerate()
            .filter(|&(_, &trusted)| trusted)
            .map(|(id, _)| graph.pubkey(id as u32).clone())
            .collect();

        info!(
            target: LOG_TARGET,
            trusted = trusted_set.len(),
            nodes = graph.node_count(),
            "Trust propagation finished"
        );

        if let Err(err) = self.db.set_trusted_pubkeys(&trusted_set).await {
            warn!(
                target: LOG_TARGET,
                err = %err.fmt_compact(),
                "Failed to persist trusted set"
            );
        }

        *self.trusted.write().await = trusted_set.clone();

        self.classify_spam(graph, &trusted_set).await;
    }

    /// Flag graph members that have events but no trusted standing.
    ///
    /// Bot-cluster members come first; the `never_requested` pass then
    /// covers accounts nobody ever subscribed to. A pubkey keeps its first
    /// reason. Storage failures skip the entry and move on.
    async fn classify_spam(&self, graph: &FollowGraph, trusted: &HashSet<Pubkey>) {
        if let Err(err) = self.db.clear_spam_candidates().await {
            warn!(
                target: LOG_TARGET,
                err = %err.fmt_compact(),
                "Failed to clear spam candidates"
            );
        }

        let mut flagged: HashSet<Pubkey> = HashSet::new();

        let clusters = match self.db.get_bot_clusters(1000).await {
            Ok(clusters) => clusters,
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    err = %err.fmt_compact(),
                    "Bot cluster read failed; skipping isolated-cluster pass"
                );
                vec![]
            }
        };

        for (_, cluster) in clusters {
            for member in cluster.members {
                if trusted.contains(&member) || flagged.contains(&member) {
                    continue;
                }
                self.flag(&member, SpamReason::IsolatedCluster, &mut flagged)
                    .await;
            }
        }

        let requested = match self.db.get_all_requested_pubkeys().await {
            Ok(requested) => requested,
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    err = %err.fmt_compact(),
                    "Request analytics read failed; skipping never-requested pass"
                );
                return;
            }
        };

        for pubkey in graph.pubkeys() {
            if trusted.contains(pubkey) || flagged.contains(pubkey) {
                continue;
            }
            if requested.get(pubkey).copied().unwrap_or(0) != 0 {
                continue;
            }
            self.flag(pubkey, SpamReason::NeverRequested, &mut flagged)
                .await;
        }

        info!(
            target: LOG_TARGET,
            candidates = flagged.len(),
            "Spam classification finished"
        );
    }

    async fn flag(&self, pubkey: &Pubkey, reason: SpamReason, flagged: &mut HashSet<Pubkey>) {
        let event_count = match self.db.count_events_for_pubkey(pubkey).await {
            Ok(count) => count,
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    err = %err.fmt_compact(),
                    %pubkey,
                    "Event count failed; skipping spam candidate"
                );
                return;
            }
        };
        if event_count == 0 {
            return;
        }

        if let Err(err) = self
            .db
            .save_spam_candidate(pubkey, reason, event_count)
            .await
        {
            warn!(
                target: LOG_TARGET,
                err = %err.fmt_compact(),
                %pubkey,
                "Failed to save spam candidate"
            );
            return;
        }
        flagged.insert(pubkey.clone());
    }
}

/// Seed from the largest connected component, then promote accounts with
/// enough trusted followers until nothing changes.
///
/// Returns a per-node trusted flag. Promotion only ever adds: the result is
/// a fixpoint of the rule (or the state after the iteration cap).
pub(crate) fn compute_trust(graph: &FollowGraph, config: &AnalyticsConfig) -> Vec<bool> {
    let mut trusted = vec![false; graph.node_count()];

    for &seed in &largest_component(graph) {
        trusted[seed as usize] = true;
    }

    propagate_trust(graph, &mut trusted, config);
    trusted
}

/// Iterate the promotion rule over `trusted` until a fixpoint (or the
/// iteration cap): any untrusted account with at least
/// `min_trusted_followers` trusted followers becomes trusted.
///
/// Promotion only ever adds to the set.
pub(crate) fn propagate_trust(graph: &FollowGraph, trusted: &mut [bool], config: &AnalyticsConfig) {
    for iteration in 0..config.trust_propagation_max_iterations {
        let mut trusted_follower_count: HashMap<u32, usize> = HashMap::new();

        for (follower, followed) in graph.edges() {
            if trusted[follower as usize] && !trusted[followed as usize] {
                *trusted_follower_count.entry(followed).or_default() += 1;
            }
        }

        let mut promoted = 0usize;
        for (followed, count) in trusted_follower_count {
            if config.min_trusted_followers <= count {
                trusted[followed as usize] = true;
                promoted += 1;
            }
        }

        if promoted == 0 {
            break;
        }
        debug!(
            target: LOG_TARGET,
            iteration,
            promoted,
            "Trust propagation pass promoted accounts"
        );
    }
}

/// Largest weakly connected component of the follow graph, via BFS over the
/// symmetric closure.
fn largest_component(graph: &FollowGraph) -> Vec<u32> {
    let und = graph.undirected();
    let n = und.node_count();
    let mut visited = vec![false; n];
    let mut largest: Vec<u32> = vec![];

    for start in 0..n as u32 {
        if visited[start as usize] {
            continue;
        }

        let mut component = vec![];
        let mut queue = VecDeque::from([start]);
        visited[start as usize] = true;

        while let Some(node) = queue.pop_front() {
            component.push(node);
            for (&neighbor, _) in und.neighbors(node) {
                if !visited[neighbor as usize] {
                    visited[neighbor as usize] = true;
                    queue.push_back(neighbor);
                }
            }
        }

        if largest.len() < component.len() {
            largest = component;
        }
    }

    largest
}

#[cfg(test)]
mod tests {
    use mauve_core::{Event, EventKind, Tag};
    use mauve_util_error::BoxedErrorResult;

    use super::*;

    fn contact_list(pubkey: String, targets: Vec<String>) -> Event {
        Event {
            id: format!("{pubkey}-3").into(),
            pubkey: pubkey.into(),
            created_at: 100.into(),
            kind: EventKind::CONTACT_LIST,
            tags: targets.iter().map(|t| Tag::new(["p", t.as_str()])).collect(),
            content: String::new(),
        }
    }

    fn names(prefix: &str, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("{prefix}{i:02}")).collect()
    }

    /// A chain `p00 -> p01 -> ... -> p(n-1)`, one weak component.
    fn chain_events(members: &[String]) -> Vec<Event> {
        members
            .windows(2)
            .map(|w| contact_list(w[0].clone(), vec![w[1].clone()]))
            .collect()
    }

    #[test]
    fn seeds_from_largest_component() {
        let big = names("big", 5);
        let small = names("sm", 3);
        let mut events = chain_events(&big);
        events.extend(chain_events(&small));

        let graph = FollowGraph::from_contact_lists(events);
        let trusted = compute_trust(&graph, &AnalyticsConfig::default());

        for name in &big {
            let id = graph.node_id(&name.as_str().into()).unwrap();
            assert!(trusted[id as usize], "{name} in largest component");
        }
        for name in &small {
            let id = graph.node_id(&name.as_str().into()).unwrap();
            assert!(!trusted[id as usize], "{name} outside largest component");
        }
    }

    #[test]
    fn promotion_needs_enough_trusted_followers() {
        // A 50-member chain seeds the trusted set; an account followed by
        // exactly 3 members gets promoted on the next pass, one followed by
        // 2 never does.
        let component = names("co", 50);
        let mut events = vec![];
        for (i, member) in component.iter().enumerate() {
            let mut targets = vec![];
            if i + 1 < component.len() {
                targets.push(component[i + 1].clone());
            }
            if i < 3 {
                targets.push("promoted".to_owned());
            } else if i < 5 {
                targets.push("leftout".to_owned());
            }
            events.push(contact_list(member.clone(), targets));
        }

        let graph = FollowGraph::from_contact_lists(events);
        let config = AnalyticsConfig {
            min_trusted_followers: 3,
            ..Default::default()
        };

        let mut trusted = vec![false; graph.node_count()];
        for member in &component {
            let id = graph.node_id(&member.as_str().into()).unwrap();
            trusted[id as usize] = true;
        }
        let seed = trusted.clone();

        propagate_trust(&graph, &mut trusted, &config);

        let promoted = graph.node_id(&"promoted".into()).unwrap();
        let leftout = graph.node_id(&"leftout".into()).unwrap();
        assert!(trusted[promoted as usize], "3 trusted followers promote");
        assert!(!trusted[leftout as usize], "2 trusted followers do not");

        // Monotone: nothing seeded was dropped.
        for id in 0..graph.node_count() {
            assert!(!seed[id] || trusted[id]);
        }

        // Fixpoint: no untrusted node clears the threshold.
        for (_follower, followed) in graph.edges() {
            if trusted[followed as usize] {
                continue;
            }
            let count = graph
                .edges()
                .filter(|&(f, t)| t == followed && trusted[f as usize])
                .count();
            assert!(count < config.min_trusted_followers);
        }
    }

    #[test]
    fn promotion_cascades_through_newly_trusted() {
        // "relay" is promoted by 3 seeded accounts; its own follow then
        // gives "deep" a third trusted follower one iteration later.
        let seed_names = names("se", 3);
        let mut events = vec![];
        for name in &seed_names {
            events.push(contact_list(
                name.clone(),
                vec!["relay".to_owned(), "deep".to_owned()],
            ));
        }
        // Only two of the seeds follow deep directly.
        events[2] = contact_list(seed_names[2].clone(), vec!["relay".to_owned()]);
        events.push(contact_list("relay".to_owned(), vec!["deep".to_owned()]));

        let graph = FollowGraph::from_contact_lists(events);
        let config = AnalyticsConfig {
            min_trusted_followers: 3,
            ..Default::default()
        };

        let mut trusted = vec![false; graph.node_count()];
        for name in &seed_names {
            let id = graph.node_id(&name.as_str().into()).unwrap();
            trusted[id as usize] = true;
        }

        propagate_trust(&graph, &mut trusted, &config);

        let relay = graph.node_id(&"relay".into()).unwrap();
        let deep = graph.node_id(&"deep".into()).unwrap();
        assert!(trusted[relay as usize]);
        assert!(trusted[deep as usize], "second-wave promotion");
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn analyze_persists_trust_and_flags_spam() -> BoxedErrorResult<()> {
        let dir = tempfile::tempdir()?;
        let db = Arc::new(Database::open(dir.path().join("db.redb")).await?);

        // Organic component of 8 and a bot ring of 6.
        let organic = names("or", 8);
        for event in chain_events(&organic) {
            db.process_event(&event).await?;
        }
        let ring = names("bot", 6);
        for name in &ring {
            let others: Vec<String> = ring.iter().filter(|o| *o != name).cloned().collect();
            db.process_event(&contact_list(name.clone(), others)).await?;
        }

        let config = AnalyticsConfig {
            min_cluster_size: 5,
            ..Default::default()
        };
        let graph = FollowGraph::build(&db).await;

        // Cluster detection runs first in a cycle; trust consults its rows.
        let detector = crate::cluster::ClusterDetector::new(db.clone(), config.clone());
        assert_eq!(detector.detect(&graph).await.len(), 1);

        let analyzer = TrustAnalyzer::new(db.clone(), config);
        analyzer.analyze(&graph).await;

        assert_eq!(analyzer.trusted_count().await, organic.len());
        assert!(analyzer.is_trusted(&Pubkey::new("or00")).await);
        assert!(!analyzer.is_trusted(&Pubkey::new("bot00")).await);

        // Persisted for warm starts.
        let stored = db.get_trusted_pubkeys().await?;
        assert_eq!(stored.len(), organic.len());

        let fresh = TrustAnalyzer::new(db.clone(), AnalyticsConfig::default());
        fresh.load().await;
        assert!(fresh.is_trusted(&Pubkey::new("or07")).await);

        // All six ring members have events and no trust: flagged as
        // isolated-cluster spam.
        let spam = analyzer.spam_candidates(100).await;
        let cluster_flagged: Vec<_> = spam
            .iter()
            .filter(|(_, r)| r.reason == SpamReason::IsolatedCluster)
            .collect();
        assert_eq!(cluster_flagged.len(), 6);
        assert!(spam.iter().all(|(_, r)| 0 < r.event_count));

        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn never_requested_pass_spares_requested_pubkeys() -> BoxedErrorResult<()> {
        let dir = tempfile::tempdir()?;
        let db = Arc::new(Database::open(dir.path().join("db.redb")).await?);

        // Two isolated pairs outside the 5-node organic component; one of
        // each pair gets requested.
        let organic = names("or", 5);
        for event in chain_events(&organic) {
            db.process_event(&event).await?;
        }
        db.process_event(&contact_list("isl00".to_owned(), vec!["isl01".to_owned()]))
            .await?;
        db.process_event(&contact_list("isl01".to_owned(), vec!["isl00".to_owned()]))
            .await?;

        let per_pubkey = [(Pubkey::new("isl00"), 7u64)].into_iter().collect();
        db.flush_req_analytics(&per_pubkey, &HashMap::new(), &HashMap::new())
            .await?;

        let analyzer = TrustAnalyzer::new(db.clone(), AnalyticsConfig::default());
        let graph = FollowGraph::build(&db).await;
        analyzer.analyze(&graph).await;

        let spam = analyzer.spam_candidates(100).await;
        let reasons: HashMap<String, SpamReason> = spam
            .iter()
            .map(|(pk, r)| (pk.to_string(), r.reason))
            .collect();

        assert_eq!(reasons.get("isl01"), Some(&SpamReason::NeverRequested));
        assert!(!reasons.contains_key("isl00"), "requested pubkey spared");
        assert!(!reasons.contains_key("or00"), "trusted pubkey spared");

        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn empty_graph_keeps_warm_set() -> BoxedErrorResult<()> {
        let dir = tempfile::tempdir()?;
        let db = Arc::new(Database::open(dir.path().join("db.redb")).await?);

        let warm = [Pubkey::new("aa")].into_iter().collect();
        db.set_trusted_pubkeys(&warm).await?;

        let analyzer = TrustAnalyzer::new(db.clone(), AnalyticsConfig::default());
        analyzer.load().await;
        analyzer.analyze(&FollowGraph::new()).await;

        assert!(analyzer.is_trusted(&Pubkey::new("aa")).await);
        assert_eq!(db.get_trusted_pubkeys().await?, warm);

        Ok(())
    }
}
