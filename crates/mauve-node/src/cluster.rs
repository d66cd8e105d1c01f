//! Bot-cluster detection.
//!
//! A coordinated follow-back ring shows up in the follow graph as a strongly
//! connected component that is dense inside and sparse toward the rest of
//! the graph. Genuine participants follow plenty of accounts outside any
//! component they sit in, so the external-ratio cut separates the two.

use std::collections::HashSet;
use std::sync::Arc;

use mauve_core::Pubkey;
use mauve_db::Database;
use mauve_util_error::FmtCompact as _;
use tracing::{debug, info, warn};

use crate::LOG_TARGET;
use crate::config::AnalyticsConfig;
use crate::graph::FollowGraph;

/// A follow ring that passed the density and isolation cuts.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedCluster {
    pub members: Vec<Pubkey>,
    pub internal_density: f64,
    pub external_ratio: f64,
}

pub struct ClusterDetector {
    db: Arc<Database>,
    config: AnalyticsConfig,
}

impl ClusterDetector {
    pub fn new(db: Arc<Database>, config: AnalyticsConfig) -> Self {
        Self { db, config }
    }

    /// Run detection over the given graph and persist the results.
    ///
    /// Existing cluster rows are deactivated first so dashboards only see
    /// the current generation. Per-cluster persistence failures are logged
    /// and skipped; the next cycle recomputes everything anyway.
    pub async fn detect(&self, graph: &FollowGraph) -> Vec<DetectedCluster> {
        if graph.node_count() < self.config.min_cluster_size {
            debug!(
                target: LOG_TARGET,
                nodes = graph.node_count(),
                "Graph below minimum cluster size; skipping detection"
            );
            return vec![];
        }

        let clusters = find_bot_clusters(graph, &self.config);
        info!(
            target: LOG_TARGET,
            clusters = clusters.len(),
            "Bot cluster detection finished"
        );

        if let Err(err) = self.db.deactivate_bot_clusters().await {
            warn!(
                target: LOG_TARGET,
                err = %err.fmt_compact(),
                "Failed to deactivate previous cluster generation"
            );
        }

        for cluster in &clusters {
            if let Err(err) = self
                .db
                .save_bot_cluster(
                    &cluster.members,
                    cluster.internal_density,
                    cluster.external_ratio,
                )
                .await
            {
                warn!(
                    target: LOG_TARGET,
                    err = %err.fmt_compact(),
                    members = cluster.members.len(),
                    "Failed to persist bot cluster"
                );
            }
        }

        clusters
    }
}

/// SCCs of `graph` that look like follow-back rings under `config`.
pub(crate) fn find_bot_clusters(
    graph: &FollowGraph,
    config: &AnalyticsConfig,
) -> Vec<DetectedCluster> {
    let mut clusters = vec![];

    for scc in strongly_connected_components(graph) {
        if scc.len() < config.min_cluster_size {
            continue;
        }

        let n = scc.len();
        let member_set: HashSet<u32> = scc.iter().copied().collect();

        let mut internal = 0u64;
        let mut external = 0u64;
        for &member in &scc {
            for &target in graph.out_neighbors(member) {
                if member_set.contains(&target) {
                    internal += 1;
                } else {
                    external += 1;
                }
            }
        }

        let internal_density = internal as f64 / (n * (n - 1)) as f64;
        let external_ratio = if 0 < internal {
            external as f64 / internal as f64
        } else {
            0.0
        };

        if config.min_density <= internal_density && external_ratio <= config.max_external_ratio {
            let mut members: Vec<Pubkey> =
                scc.iter().map(|&id| graph.pubkey(id).clone()).collect();
            members.sort_unstable();
            clusters.push(DetectedCluster {
                members,
                internal_density,
                external_ratio,
            });
        }
    }

    clusters
}

/// Tarjan's algorithm with an explicit stack.
///
/// The recursion depth of the textbook formulation is bounded by the longest
/// path in the graph, which at relay scale overflows the thread stack, so
/// the DFS frames live on the heap.
pub(crate) fn strongly_connected_components(graph: &FollowGraph) -> Vec<Vec<u32>> {
    const UNVISITED: u32 = u32::MAX;

    let n = graph.node_count();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0u32; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<u32> = vec![];
    let mut next_index = 0u32;
    let mut sccs = vec![];

    // (node, next out-neighbor offset)
    let mut frames: Vec<(u32, usize)> = vec![];

    for start in 0..n as u32 {
        if index[start as usize] != UNVISITED {
            continue;
        }
        frames.push((start, 0));

        while let Some(frame) = frames.last_mut() {
            let v = frame.0;

            if index[v as usize] == UNVISITED {
                index[v as usize] = next_index;
                lowlink[v as usize] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v as usize] = true;
            }

            let neighbors = graph.out_neighbors(v);
            if frame.1 < neighbors.len() {
                let w = neighbors[frame.1];
                frame.1 += 1;

                if index[w as usize] == UNVISITED {
                    frames.push((w, 0));
                } else if on_stack[w as usize] {
                    lowlink[v as usize] = lowlink[v as usize].min(index[w as usize]);
                }
                continue;
            }

            frames.pop();
            if let Some(parent) = frames.last() {
                let p = parent.0 as usize;
                lowlink[p] = lowlink[p].min(lowlink[v as usize]);
            }

            if lowlink[v as usize] == index[v as usize] {
                let mut scc = vec![];
                loop {
                    let w = stack.pop().expect("Tarjan stack invariant");
                    on_stack[w as usize] = false;
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                sccs.push(scc);
            }
        }
    }

    sccs
}

#[cfg(test)]
mod tests {
    use mauve_core::{Event, EventKind, Tag};
    use mauve_util_error::BoxedErrorResult;

    use super::*;

    fn contact_list(pubkey: &str, targets: &[&str]) -> Event {
        Event {
            id: format!("{pubkey}-3").into(),
            pubkey: pubkey.into(),
            created_at: 100.into(),
            kind: EventKind::CONTACT_LIST,
            tags: targets.iter().map(|t| Tag::new(["p", *t])).collect(),
            content: String::new(),
        }
    }

    /// A ring where everyone follows everyone else.
    fn full_ring(names: &[&str]) -> Vec<Event> {
        names
            .iter()
            .map(|name| {
                let others: Vec<&str> = names.iter().filter(|o| *o != name).copied().collect();
                contact_list(name, &others)
            })
            .collect()
    }

    fn scc_of(graph: &FollowGraph, sccs: &[Vec<u32>], pubkey: &str) -> Vec<u32> {
        let id = graph.node_id(&pubkey.into()).expect("node exists");
        sccs.iter()
            .find(|scc| scc.contains(&id))
            .cloned()
            .expect("every node is in exactly one SCC")
    }

    #[test]
    fn three_cycle_is_one_scc() {
        let graph = FollowGraph::from_contact_lists([
            contact_list("aa", &["bb"]),
            contact_list("bb", &["cc"]),
            contact_list("cc", &["aa"]),
        ]);

        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 3);

        // Default minimum size is 5: the cycle never reaches the predicate
        // stage.
        assert!(find_bot_clusters(&graph, &AnalyticsConfig::default()).is_empty());
    }

    #[test]
    fn nodes_share_scc_iff_mutually_reachable() {
        // Two 2-cycles joined by a one-way bridge, plus a hanging target.
        let graph = FollowGraph::from_contact_lists([
            contact_list("aa", &["bb"]),
            contact_list("bb", &["aa", "cc"]),
            contact_list("cc", &["dd"]),
            contact_list("dd", &["cc", "ee"]),
        ]);

        let sccs = strongly_connected_components(&graph);
        assert_eq!(
            sccs.iter().map(|s| s.len()).sum::<usize>(),
            graph.node_count(),
            "every node in exactly one SCC"
        );

        assert_eq!(scc_of(&graph, &sccs, "aa"), scc_of(&graph, &sccs, "bb"));
        assert_eq!(scc_of(&graph, &sccs, "cc"), scc_of(&graph, &sccs, "dd"));
        assert_ne!(scc_of(&graph, &sccs, "aa"), scc_of(&graph, &sccs, "cc"));
        assert_eq!(scc_of(&graph, &sccs, "ee").len(), 1);
    }

    #[test]
    fn bot_ring_of_six_passes_predicates() {
        let graph =
            FollowGraph::from_contact_lists(full_ring(&["u1", "u2", "u3", "u4", "u5", "u6"]));

        let clusters = find_bot_clusters(&graph, &AnalyticsConfig::default());
        assert_eq!(clusters.len(), 1);

        let cluster = &clusters[0];
        assert_eq!(cluster.members.len(), 6);
        // 30 internal edges over 30 possible, nothing external.
        assert_eq!(cluster.internal_density, 1.0);
        assert_eq!(cluster.external_ratio, 0.0);
    }

    #[test]
    fn ring_with_external_follows_is_not_a_cluster() {
        // Same ring, but every member also follows 20 outsiders: the
        // external ratio blows past the threshold.
        let names = ["u1", "u2", "u3", "u4", "u5", "u6"];
        let outsiders: Vec<String> = (0..20).map(|i| format!("out{i:02}")).collect();

        let events: Vec<Event> = names
            .iter()
            .map(|name| {
                let mut targets: Vec<&str> =
                    names.iter().filter(|o| *o != name).copied().collect();
                targets.extend(outsiders.iter().map(String::as_str));
                contact_list(name, &targets)
            })
            .collect();

        let graph = FollowGraph::from_contact_lists(events);
        assert!(find_bot_clusters(&graph, &AnalyticsConfig::default()).is_empty());
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn detect_persists_and_supersedes() -> BoxedErrorResult<()> {
        let dir = tempfile::tempdir()?;
        let db = Arc::new(Database::open(dir.path().join("db.redb")).await?);

        for event in full_ring(&["u1", "u2", "u3", "u4", "u5", "u6"]) {
            db.process_event(&event).await?;
        }

        let detector = ClusterDetector::new(db.clone(), AnalyticsConfig::default());

        let graph = FollowGraph::build(&db).await;
        let detected = detector.detect(&graph).await;
        assert_eq!(detected.len(), 1);

        let stored = db.get_bot_clusters(10).await?;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].1.members.len(), 6);

        // Second cycle replaces the first generation.
        let detected = detector.detect(&graph).await;
        assert_eq!(detected.len(), 1);
        let stored = db.get_bot_clusters(10).await?;
        assert_eq!(stored.len(), 1);

        Ok(())
    }
}
