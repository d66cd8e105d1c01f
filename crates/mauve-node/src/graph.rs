//! The in-memory follow graph the analytics cycle is built around.
//!
//! Rebuilt from scratch every cycle from the latest contact list per author;
//! no incremental maintenance. Node ids are dense `u32`s so the algorithms
//! can use flat vectors for their scratch state.

use std::collections::{BTreeMap, HashMap};

use mauve_core::{Event, EventKind, Filter, Pubkey};
use mauve_db::Database;
use mauve_util_error::FmtCompact as _;
use tracing::{debug, warn};

use crate::LOG_TARGET;

/// Directed follow graph: `u -> v` iff `u`'s latest contact list carries a
/// `"p"` tag for `v`. Self-loops are dropped at construction.
#[derive(Debug, Default)]
pub struct FollowGraph {
    nodes: Vec<Pubkey>,
    index: HashMap<Pubkey, u32>,
    /// Sorted, deduplicated out-neighbor lists, indexed by node id.
    follows: Vec<Vec<u32>>,
    edge_count: u64,
}

impl FollowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from storage: query all contact lists, keep the newest per
    /// author, derive the edge set.
    ///
    /// A failed query is logged and yields an empty graph; the cycle runs
    /// on whatever data is available.
    pub async fn build(db: &Database) -> Self {
        let events = match db
            .query_events(&Filter {
                authors: vec![],
                kinds: vec![EventKind::CONTACT_LIST],
            })
            .await
        {
            Ok(events) => events,
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    err = %err.fmt_compact(),
                    "Contact list query failed; building empty follow graph"
                );
                return Self::new();
            }
        };

        let graph = Self::from_contact_lists(events);
        debug!(
            target: LOG_TARGET,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Built follow graph"
        );
        graph
    }

    /// Latest-wins over the given contact lists, then edge derivation.
    ///
    /// The store already keeps only the newest version per author, but the
    /// graph does not depend on that: duplicates resolve to the greatest
    /// `created_at` here regardless (ties keep the first seen).
    pub fn from_contact_lists(events: impl IntoIterator<Item = Event>) -> Self {
        let mut latest: HashMap<Pubkey, Event> = HashMap::new();
        for event in events {
            match latest.get(&event.pubkey) {
                Some(existing) if event.created_at <= existing.created_at => {}
                _ => {
                    latest.insert(event.pubkey.clone(), event);
                }
            }
        }

        // Deterministic node enumeration: authors in pubkey order, then
        // their targets in tag order.
        let mut graph = Self::new();
        let latest: BTreeMap<Pubkey, Event> = latest.into_iter().collect();
        for (author, event) in latest {
            let author_id = graph.get_or_insert(author);
            for target in event.contact_targets() {
                if target == *graph.pubkey(author_id) {
                    continue;
                }
                let target_id = graph.get_or_insert(target);
                graph.follows[author_id as usize].push(target_id);
            }
        }

        for list in &mut graph.follows {
            list.sort_unstable();
            list.dedup();
        }
        graph.edge_count = graph.follows.iter().map(|l| l.len() as u64).sum();

        graph
    }

    fn get_or_insert(&mut self, pubkey: Pubkey) -> u32 {
        if let Some(&id) = self.index.get(&pubkey) {
            return id;
        }
        let id = self.nodes.len() as u32;
        self.nodes.push(pubkey.clone());
        self.follows.push(Vec::new());
        self.index.insert(pubkey, id);
        id
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> u64 {
        self.edge_count
    }

    pub fn pubkey(&self, id: u32) -> &Pubkey {
        &self.nodes[id as usize]
    }

    pub fn pubkeys(&self) -> &[Pubkey] {
        &self.nodes
    }

    pub fn node_id(&self, pubkey: &Pubkey) -> Option<u32> {
        self.index.get(pubkey).copied()
    }

    pub fn out_neighbors(&self, id: u32) -> &[u32] {
        &self.follows[id as usize]
    }

    pub fn contains_edge(&self, from: u32, to: u32) -> bool {
        self.follows[from as usize].binary_search(&to).is_ok()
    }

    /// All directed edges, in node-id order.
    pub fn edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.follows
            .iter()
            .enumerate()
            .flat_map(|(from, targets)| targets.iter().map(move |&to| (from as u32, to)))
    }

    /// The undirected weighted view used by Louvain and trust seeding.
    pub fn undirected(&self) -> UndirectedGraph {
        let n = self.node_count();
        let mut adj: Vec<BTreeMap<u32, u64>> = vec![BTreeMap::new(); n];

        for (from, to) in self.edges() {
            *adj[from as usize].entry(to).or_default() += 1;
            *adj[to as usize].entry(from).or_default() += 1;
        }

        let degree = adj
            .iter()
            .map(|neighbors| neighbors.values().sum())
            .collect();

        UndirectedGraph {
            adj,
            degree,
            edge_count: self.edge_count,
        }
    }
}

/// Symmetric closure of the follow graph with edge weights: a mutual follow
/// contributes weight 2, a one-way follow weight 1.
#[derive(Debug)]
pub struct UndirectedGraph {
    /// Neighbor id -> weight, per node. Ordered so iteration is
    /// deterministic for a fixed node enumeration.
    adj: Vec<BTreeMap<u32, u64>>,
    /// Sum of incident edge weights per node.
    degree: Vec<u64>,
    /// Number of *directed* edges that contributed, so `2m` for modularity
    /// purposes is `2 * edge_count`.
    edge_count: u64,
}

impl UndirectedGraph {
    pub fn node_count(&self) -> usize {
        self.adj.len()
    }

    pub fn edge_count(&self) -> u64 {
        self.edge_count
    }

    pub fn neighbors(&self, id: u32) -> &BTreeMap<u32, u64> {
        &self.adj[id as usize]
    }

    pub fn degree(&self, id: u32) -> u64 {
        self.degree[id as usize]
    }

    /// Undirected edges `(i, j)` with `i < j`, each reported once.
    pub fn edges(&self) -> impl Iterator<Item = (u32, u32, u64)> + '_ {
        self.adj.iter().enumerate().flat_map(|(i, neighbors)| {
            neighbors
                .iter()
                .filter(move |&(&j, _)| (i as u32) < j)
                .map(move |(&j, &w)| (i as u32, j, w))
        })
    }
}

#[cfg(test)]
mod tests {
    use mauve_core::Tag;

    use super::*;

    fn contact_list(pubkey: &str, created_at: u64, targets: &[&str]) -> Event {
        Event {
            id: format!("{pubkey}-{created_at}").into(),
            pubkey: pubkey.into(),
            created_at: created_at.into(),
            kind: EventKind::CONTACT_LIST,
            tags: targets.iter().map(|t| Tag::new(["p", *t])).collect(),
            content: String::new(),
        }
    }

    #[test]
    fn latest_contact_list_wins() {
        let graph = FollowGraph::from_contact_lists([
            contact_list("xx", 100, &["yy"]),
            contact_list("xx", 200, &["zz"]),
        ]);

        let xx = graph.node_id(&"xx".into()).expect("author present");
        let zz = graph.node_id(&"zz".into()).expect("target present");
        assert!(graph.contains_edge(xx, zz));
        assert!(graph.node_id(&"yy".into()).is_none());
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn self_loops_and_duplicates_dropped() {
        let graph = FollowGraph::from_contact_lists([contact_list(
            "aa",
            100,
            &["aa", "bb", "bb", "cc"],
        )]);

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        let aa = graph.node_id(&"aa".into()).unwrap();
        assert!(!graph.contains_edge(aa, aa));
    }

    #[test]
    fn targets_become_zero_outdegree_nodes() {
        let graph = FollowGraph::from_contact_lists([contact_list("aa", 100, &["bb"])]);
        let bb = graph.node_id(&"bb".into()).expect("target node exists");
        assert!(graph.out_neighbors(bb).is_empty());
    }

    #[test]
    fn undirected_view_weights_mutual_follows() {
        let graph = FollowGraph::from_contact_lists([
            contact_list("aa", 100, &["bb", "cc"]),
            contact_list("bb", 100, &["aa"]),
        ]);
        let und = graph.undirected();

        let aa = graph.node_id(&"aa".into()).unwrap();
        let bb = graph.node_id(&"bb".into()).unwrap();
        let cc = graph.node_id(&"cc".into()).unwrap();

        assert_eq!(und.edge_count(), 3);
        assert_eq!(und.neighbors(aa)[&bb], 2);
        assert_eq!(und.neighbors(bb)[&aa], 2);
        assert_eq!(und.neighbors(aa)[&cc], 1);
        assert_eq!(und.degree(aa), 3);
        assert_eq!(und.degree(cc), 1);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        /// (author, created_at, targets) triples over a tiny namespace so
        /// replacement collisions actually happen.
        fn contact_lists_strategy() -> impl Strategy<Value = Vec<Event>> {
            let pk = prop::sample::select(vec!["p0", "p1", "p2", "p3", "p4", "p5"]);
            prop::collection::vec(
                (
                    pk.clone(),
                    0u64..20,
                    prop::collection::vec(pk, 0..5),
                ),
                0..20,
            )
            .prop_map(|lists| {
                lists
                    .into_iter()
                    .map(|(author, created_at, targets)| {
                        contact_list(author, created_at, &targets)
                    })
                    .collect()
            })
        }

        proptest! {
            /// The graph only depends on each author's newest list.
            #[test]
            fn latest_wins(events in contact_lists_strategy()) {
                let mut newest: HashMap<Pubkey, Event> = HashMap::new();
                for event in &events {
                    match newest.get(&event.pubkey) {
                        Some(e) if event.created_at <= e.created_at => {}
                        _ => {
                            newest.insert(event.pubkey.clone(), event.clone());
                        }
                    }
                }

                let full = FollowGraph::from_contact_lists(events.clone());
                let reduced =
                    FollowGraph::from_contact_lists(newest.into_values().collect::<Vec<_>>());

                let edge_set = |g: &FollowGraph| {
                    g.edges()
                        .map(|(u, v)| (g.pubkey(u).clone(), g.pubkey(v).clone()))
                        .collect::<std::collections::BTreeSet<_>>()
                };
                prop_assert_eq!(edge_set(&full), edge_set(&reduced));
            }

            /// Undirected view: symmetric adjacency, consistent degrees,
            /// weights summing both directions.
            #[test]
            fn undirected_symmetry(events in contact_lists_strategy()) {
                let graph = FollowGraph::from_contact_lists(events);
                let und = graph.undirected();

                let mut total_weight = 0u64;
                for i in 0..und.node_count() as u32 {
                    for (&j, &w) in und.neighbors(i) {
                        prop_assert_eq!(und.neighbors(j).get(&i), Some(&w));
                        total_weight += w;
                    }
                    prop_assert_eq!(und.degree(i), und.neighbors(i).values().sum::<u64>());
                }
                prop_assert_eq!(total_weight, 2 * graph.edge_count());
            }
        }
    }

    #[test]
    fn undirected_symmetry_and_degree_sums() {
        let graph = FollowGraph::from_contact_lists([
            contact_list("aa", 1, &["bb", "cc", "dd"]),
            contact_list("bb", 1, &["cc"]),
            contact_list("cc", 1, &["aa"]),
        ]);
        let und = graph.undirected();

        for i in 0..und.node_count() as u32 {
            for (&j, &w) in und.neighbors(i) {
                assert_eq!(und.neighbors(j)[&i], w, "adj[{i}][{j}] symmetric");
            }
            assert_eq!(und.degree(i), und.neighbors(i).values().sum::<u64>());
        }
    }
}
