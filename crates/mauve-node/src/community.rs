//! Community detection: single-level Louvain modularity optimization.
//!
//! One level is deliberate. Local moves over a sparse social graph converge
//! in a handful of passes and the result is cheap enough to recompute every
//! cycle; multi-level coarsening would buy resolution this node's dashboards
//! do not need.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use mauve_core::{Pubkey, Timestamp};
use mauve_db::{
    CommunityEdgeRecord, CommunityGraphRecord, CommunityMemberRecord, CommunityRecord, Database,
};
use mauve_util_error::FmtCompact as _;
use tracing::{debug, info, warn};

use crate::LOG_TARGET;
use crate::config::AnalyticsConfig;
use crate::graph::{FollowGraph, UndirectedGraph};

pub struct CommunityDetector {
    db: Arc<Database>,
    config: AnalyticsConfig,
}

impl CommunityDetector {
    pub fn new(db: Arc<Database>, config: AnalyticsConfig) -> Self {
        Self { db, config }
    }

    /// Partition the graph, build the snapshot, persist it.
    ///
    /// Returns `None` when the graph is too small to say anything
    /// interesting. Storage hiccups during post-processing degrade the
    /// snapshot (missing names, zero follower counts) instead of failing
    /// the cycle.
    pub async fn detect(&self, graph: &FollowGraph) -> Option<CommunityGraphRecord> {
        let n = graph.node_count();
        if n < self.config.louvain_min_nodes {
            debug!(
                target: LOG_TARGET,
                nodes = n,
                min = self.config.louvain_min_nodes,
                "Graph below Louvain minimum; skipping community detection"
            );
            return None;
        }

        let und = graph.undirected();
        let assignment = louvain_partition(&und, self.config.louvain_max_iterations);

        // Group node ids by community, dropping the small ones.
        let mut groups: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for (node, &community) in assignment.iter().enumerate() {
            groups.entry(community).or_default().push(node as u32);
        }
        groups.retain(|_, members| self.config.min_community <= members.len());

        let all_members: Vec<Pubkey> = groups
            .values()
            .flatten()
            .map(|&id| graph.pubkey(id).clone())
            .collect();
        let follower_counts = match self.db.get_follower_counts_for(&all_members).await {
            Ok(counts) => counts,
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    err = %err.fmt_compact(),
                    "Follower count lookup failed; ordering members by pubkey"
                );
                HashMap::new()
            }
        };
        let count_of =
            |id: &u32| follower_counts.get(graph.pubkey(*id)).copied().unwrap_or(0);

        // Largest communities first, members by follower count within each.
        let mut ordered: Vec<Vec<u32>> = groups.into_values().collect();
        for members in &mut ordered {
            members.sort_by(|a, b| count_of(b).cmp(&count_of(a)).then(
                graph.pubkey(*a).cmp(graph.pubkey(*b)),
            ));
        }
        ordered.sort_by(|a, b| b.len().cmp(&a.len()));
        ordered.truncate(self.config.max_communities);

        // Final contiguous ids, and the reverse node -> community map the
        // edge pass needs.
        let mut final_community: Vec<Option<u32>> = vec![None; n];
        for (final_id, members) in ordered.iter().enumerate() {
            for &member in members {
                final_community[member as usize] = Some(final_id as u32);
            }
        }

        let top_pubkeys: Vec<Pubkey> = ordered
            .iter()
            .flat_map(|members| members.iter().take(5))
            .map(|&id| graph.pubkey(id).clone())
            .collect();
        let profile_info = match self.db.get_profile_info(&top_pubkeys).await {
            Ok(info) => info,
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    err = %err.fmt_compact(),
                    "Profile lookup failed; top members stay nameless"
                );
                HashMap::new()
            }
        };

        let mut communities = vec![];
        for (final_id, members) in ordered.iter().enumerate() {
            let member_set: std::collections::HashSet<u32> = members.iter().copied().collect();

            // Neighbor counts from the rebuilt graph, not Louvain scratch
            // state: internal entries are double-counted by symmetry.
            let mut internal_entries = 0u64;
            let mut external_edges = 0u64;
            for &member in members {
                for (&neighbor, _) in und.neighbors(member) {
                    if member_set.contains(&neighbor) {
                        internal_entries += 1;
                    } else {
                        external_edges += 1;
                    }
                }
            }
            let internal_edges = internal_entries / 2;
            let modularity = if 0 < internal_edges + external_edges {
                internal_edges as f64 / (internal_edges + external_edges) as f64
            } else {
                0.0
            };

            let top_members = members
                .iter()
                .take(5)
                .map(|&id| {
                    let pubkey = graph.pubkey(id).clone();
                    let profile = profile_info.get(&pubkey);
                    CommunityMemberRecord {
                        name: profile.map(|p| p.best_name().to_owned()).unwrap_or_default(),
                        picture: profile.map(|p| p.picture.clone()).unwrap_or_default(),
                        follower_count: follower_counts.get(&pubkey).copied().unwrap_or(0),
                        pubkey,
                    }
                })
                .collect();

            communities.push(CommunityRecord {
                id: final_id as u32,
                members: members.iter().map(|&id| graph.pubkey(id).clone()).collect(),
                size: members.len() as u64,
                top_members,
                internal_edges,
                external_edges,
                modularity,
            });
        }

        // Links between surviving communities, heaviest first.
        let mut edge_weights: BTreeMap<(u32, u32), u64> = BTreeMap::new();
        for (i, j, _) in und.edges() {
            let (Some(a), Some(b)) = (
                final_community[i as usize],
                final_community[j as usize],
            ) else {
                continue;
            };
            if a != b {
                *edge_weights.entry((a.min(b), a.max(b))).or_default() += 1;
            }
        }
        let mut edges: Vec<CommunityEdgeRecord> = edge_weights
            .into_iter()
            .map(|((a, b), weight)| CommunityEdgeRecord { a, b, weight })
            .collect();
        edges.sort_by(|x, y| y.weight.cmp(&x.weight).then((x.a, x.b).cmp(&(y.a, y.b))));
        edges.truncate(3 * communities.len());

        let record = CommunityGraphRecord {
            communities,
            edges,
            node_count: n as u64,
            computed_at: Timestamp::now(),
        };

        info!(
            target: LOG_TARGET,
            communities = record.communities.len(),
            edges = record.edges.len(),
            "Community detection finished"
        );

        if let Err(err) = self.db.save_communities(&record).await {
            warn!(
                target: LOG_TARGET,
                err = %err.fmt_compact(),
                "Failed to persist community snapshot"
            );
        }

        Some(record)
    }
}

/// One level of Louvain: sweep nodes in id order, moving each to the
/// neighboring community with the best modularity gain, until a sweep makes
/// no move or the pass limit is hit.
///
/// The bar for moving is the current community's own gain, clamped at
/// zero: a node moves only when another community offers a strictly
/// greater gain, so exact ties with the current community and
/// negative-or-zero gains keep it where it is. Combined with the
/// deterministic node enumeration this makes the partition reproducible
/// for a given event set.
///
/// Returns a community id per node, renumbered contiguously from 0.
pub(crate) fn louvain_partition(graph: &UndirectedGraph, max_iterations: usize) -> Vec<u32> {
    let n = graph.node_count();
    let two_m = (graph.edge_count() * 2) as f64;

    let mut community: Vec<u32> = (0..n as u32).collect();
    if two_m == 0.0 {
        return community;
    }

    let mut community_degree: Vec<u64> = (0..n as u32).map(|i| graph.degree(i)).collect();

    for _pass in 0..max_iterations {
        let mut moved = false;

        for i in 0..n as u32 {
            let k_i = graph.degree(i);
            if k_i == 0 {
                continue;
            }

            let mut neighbor_com: BTreeMap<u32, u64> = BTreeMap::new();
            for (&j, &w) in graph.neighbors(i) {
                *neighbor_com.entry(community[j as usize]).or_default() += w;
            }

            let current = community[i as usize];
            community_degree[current as usize] -= k_i;

            let gain_of = |candidate: u32, link: u64| {
                link as f64 / two_m
                    - 2.0 * community_degree[candidate as usize] as f64 * k_i as f64
                        / (two_m * two_m)
            };

            // The current community competes with its own gain, clamped at
            // zero: a candidate that merely ties it loses, and negative
            // gains never move the node.
            let current_gain = neighbor_com
                .get(&current)
                .map(|&link| gain_of(current, link))
                .unwrap_or(0.0);

            let mut best_com = current;
            let mut best_gain = current_gain.max(0.0);
            for (&candidate, &link) in &neighbor_com {
                if candidate == current {
                    continue;
                }
                let gain = gain_of(candidate, link);
                if best_gain < gain {
                    best_gain = gain;
                    best_com = candidate;
                }
            }

            community_degree[current as usize] += k_i;

            if best_com != current {
                community_degree[current as usize] -= k_i;
                community_degree[best_com as usize] += k_i;
                community[i as usize] = best_com;
                moved = true;
            }
        }

        if !moved {
            break;
        }
    }

    renumber(community)
}

/// Map arbitrary community labels to contiguous ids in order of first
/// appearance.
fn renumber(assignment: Vec<u32>) -> Vec<u32> {
    let mut mapping: HashMap<u32, u32> = HashMap::new();
    assignment
        .into_iter()
        .map(|label| {
            let next = mapping.len() as u32;
            *mapping.entry(label).or_insert(next)
        })
        .collect()
}
