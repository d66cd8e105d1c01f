use std::collections::{HashMap, HashSet};

use mauve_core::{EventKind, Pubkey, Timestamp};
use serde::Serialize;
use tracing::debug;

use crate::{
    BotClusterRecord, CommunityGraphRecord, Database, DbResult, LOG_TARGET, ReqAnalyticsRecord,
    SpamCandidateRecord, SpamReason, bot_clusters, communities, req_analytics, req_pairs,
    spam_candidates, trusted_pubkeys,
};

/// One row of the pair-co-occurrence top list.
#[derive(Debug, Serialize, Clone)]
pub struct TopCooccurrence {
    pub pubkey_a: Pubkey,
    pub pubkey_b: Pubkey,
    pub count: u64,
}

impl Database {
    // ------------------------------------------------------------------
    // Bot clusters
    // ------------------------------------------------------------------

    /// Flip all existing cluster rows inactive.
    ///
    /// Runs before a detection cycle persists its new generation, so stale
    /// rows stay queryable but clearly superseded.
    pub async fn deactivate_bot_clusters(&self) -> DbResult<usize> {
        self.write_with(|tx| {
            let mut bot_clusters_table = tx.open_table(&bot_clusters::TABLE)?;

            let active: Vec<(u64, BotClusterRecord)> = bot_clusters_table
                .range(&0..)?
                .map(|entry| entry.map(|(k, v)| (k.value(), v.value())))
                .filter(|res| res.as_ref().map(|(_, v)| v.active).unwrap_or(true))
                .collect::<Result<_, _>>()?;

            let count = active.len();
            for (id, mut record) in active {
                record.active = false;
                bot_clusters_table.insert(&id, &record)?;
            }
            Ok(count)
        })
        .await
    }

    pub async fn save_bot_cluster(
        &self,
        members: &[Pubkey],
        internal_density: f64,
        external_ratio: f64,
    ) -> DbResult<u64> {
        let members = members.to_vec();
        self.write_with(|tx| {
            let mut bot_clusters_table = tx.open_table(&bot_clusters::TABLE)?;

            let next_id = bot_clusters_table
                .range(&0..)?
                .next_back()
                .transpose()?
                .map(|(k, _)| k.value() + 1)
                .unwrap_or_default();

            bot_clusters_table.insert(
                &next_id,
                &BotClusterRecord {
                    members,
                    internal_density,
                    external_ratio,
                    active: true,
                    created_at: Timestamp::now(),
                },
            )?;
            Ok(next_id)
        })
        .await
    }

    /// Active clusters, newest first.
    pub async fn get_bot_clusters(&self, limit: usize) -> DbResult<Vec<(u64, BotClusterRecord)>> {
        self.read_with(|tx| {
            let bot_clusters_table = tx.open_table(&bot_clusters::TABLE)?;

            let mut ret = vec![];
            for entry in bot_clusters_table.range(&0..)?.rev() {
                let (k, v) = entry?;
                let record = v.value();
                if record.active {
                    ret.push((k.value(), record));
                    if limit <= ret.len() {
                        break;
                    }
                }
            }
            Ok(ret)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Communities
    // ------------------------------------------------------------------

    /// Overwrite the community snapshot.
    pub async fn save_communities(&self, graph: &CommunityGraphRecord) -> DbResult<()> {
        let graph = graph.clone();
        self.write_with(|tx| {
            let mut communities_table = tx.open_table(&communities::TABLE)?;
            communities_table.insert(&(), &graph)?;
            Ok(())
        })
        .await
    }

    pub async fn get_communities(&self) -> DbResult<Option<CommunityGraphRecord>> {
        self.read_with(|tx| {
            let communities_table = tx.open_table(&communities::TABLE)?;
            Ok(communities_table.get(&())?.map(|g| g.value()))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Trusted set
    // ------------------------------------------------------------------

    pub async fn get_trusted_pubkeys(&self) -> DbResult<HashSet<Pubkey>> {
        self.read_with(|tx| {
            let trusted_table = tx.open_table(&trusted_pubkeys::TABLE)?;
            trusted_table
                .range::<Pubkey>(&Pubkey::default()..)?
                .map(|entry| entry.map(|(k, _)| k.value()))
                .collect::<Result<_, _>>()
                .map_err(Into::into)
        })
        .await
    }

    /// Replace the stored trusted set wholesale, in one transaction.
    pub async fn set_trusted_pubkeys(&self, trusted: &HashSet<Pubkey>) -> DbResult<()> {
        let trusted = trusted.clone();
        self.write_with(|tx| {
            let mut trusted_table = tx.open_table(&trusted_pubkeys::TABLE)?;

            let existing: Vec<Pubkey> = trusted_table
                .range::<Pubkey>(&Pubkey::default()..)?
                .map(|entry| entry.map(|(k, _)| k.value()))
                .collect::<Result<_, _>>()?;

            for pubkey in existing {
                if !trusted.contains(&pubkey) {
                    trusted_table.remove(&pubkey)?;
                }
            }
            for pubkey in &trusted {
                trusted_table.insert(pubkey, &())?;
            }
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Spam candidates
    // ------------------------------------------------------------------

    pub async fn clear_spam_candidates(&self) -> DbResult<()> {
        self.write_with(|tx| {
            let mut spam_table = tx.open_table(&spam_candidates::TABLE)?;

            let all: Vec<Pubkey> = spam_table
                .range::<Pubkey>(&Pubkey::default()..)?
                .map(|entry| entry.map(|(k, _)| k.value()))
                .collect::<Result<_, _>>()?;

            for pubkey in all {
                spam_table.remove(&pubkey)?;
            }
            Ok(())
        })
        .await
    }

    pub async fn save_spam_candidate(
        &self,
        pubkey: &Pubkey,
        reason: SpamReason,
        event_count: u64,
    ) -> DbResult<()> {
        let pubkey = pubkey.clone();
        self.write_with(|tx| {
            let mut spam_table = tx.open_table(&spam_candidates::TABLE)?;
            spam_table.insert(
                &pubkey,
                &SpamCandidateRecord {
                    reason,
                    event_count,
                    detected_at: Timestamp::now(),
                },
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_spam_candidates(
        &self,
        limit: usize,
    ) -> DbResult<Vec<(Pubkey, SpamCandidateRecord)>> {
        self.read_with(|tx| {
            let spam_table = tx.open_table(&spam_candidates::TABLE)?;

            let mut ret = vec![];
            for entry in spam_table.range::<Pubkey>(&Pubkey::default()..)? {
                let (k, v) = entry?;
                ret.push((k.value(), v.value()));
                if limit <= ret.len() {
                    break;
                }
            }
            Ok(ret)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Request analytics
    // ------------------------------------------------------------------

    /// Merge one flush interval's counters into the stored totals.
    ///
    /// Queue overflow may have dropped records before they were counted, so
    /// stored totals are lower bounds on actual traffic.
    pub async fn flush_req_analytics(
        &self,
        per_pubkey: &HashMap<Pubkey, u64>,
        per_pubkey_kind: &HashMap<Pubkey, HashMap<EventKind, u64>>,
        pairs: &HashMap<(Pubkey, Pubkey), u64>,
    ) -> DbResult<()> {
        let per_pubkey = per_pubkey.clone();
        let per_pubkey_kind = per_pubkey_kind.clone();
        let pairs = pairs.clone();
        self.write_with(|tx| {
            let mut req_analytics_table = tx.open_table(&req_analytics::TABLE)?;
            let mut req_pairs_table = tx.open_table(&req_pairs::TABLE)?;

            for (pubkey, count) in &per_pubkey {
                let mut record = req_analytics_table
                    .get(pubkey)?
                    .map(|g| g.value())
                    .unwrap_or_default();
                record.total = record.total.saturating_add(*count);

                if let Some(kinds) = per_pubkey_kind.get(pubkey) {
                    for (kind, kind_count) in kinds {
                        let entry = record.per_kind.entry(*kind).or_default();
                        *entry = entry.saturating_add(*kind_count);
                    }
                }

                req_analytics_table.insert(pubkey, &record)?;
            }

            for (pair, count) in &pairs {
                let total = req_pairs_table
                    .get(pair)?
                    .map(|g| g.value())
                    .unwrap_or_default()
                    .saturating_add(*count);
                req_pairs_table.insert(pair, &total)?;
            }

            debug!(
                target: LOG_TARGET,
                pubkeys = per_pubkey.len(),
                pairs = pairs.len(),
                "Flushed request analytics"
            );
            Ok(())
        })
        .await
    }

    /// Total request count per pubkey, for every pubkey ever requested.
    pub async fn get_all_requested_pubkeys(&self) -> DbResult<HashMap<Pubkey, u64>> {
        self.read_with(|tx| {
            let req_analytics_table = tx.open_table(&req_analytics::TABLE)?;
            req_analytics_table
                .range::<Pubkey>(&Pubkey::default()..)?
                .map(|entry| entry.map(|(k, v)| (k.value(), v.value().total)))
                .collect::<Result<_, _>>()
                .map_err(Into::into)
        })
        .await
    }

    pub async fn get_pubkey_analytics(
        &self,
        pubkey: &Pubkey,
    ) -> DbResult<Option<ReqAnalyticsRecord>> {
        let pubkey = pubkey.clone();
        self.read_with(|tx| {
            let req_analytics_table = tx.open_table(&req_analytics::TABLE)?;
            Ok(req_analytics_table.get(&pubkey)?.map(|g| g.value()))
        })
        .await
    }

    pub async fn get_top_requested(
        &self,
        limit: usize,
    ) -> DbResult<Vec<(Pubkey, ReqAnalyticsRecord)>> {
        self.read_with(|tx| {
            let req_analytics_table = tx.open_table(&req_analytics::TABLE)?;

            let mut all: Vec<(Pubkey, ReqAnalyticsRecord)> = req_analytics_table
                .range::<Pubkey>(&Pubkey::default()..)?
                .map(|entry| entry.map(|(k, v)| (k.value(), v.value())))
                .collect::<Result<_, _>>()?;

            all.sort_by(|a, b| b.1.total.cmp(&a.1.total));
            all.truncate(limit);
            Ok(all)
        })
        .await
    }

    pub async fn get_top_cooccurrences(&self, limit: usize) -> DbResult<Vec<TopCooccurrence>> {
        self.read_with(|tx| {
            let req_pairs_table = tx.open_table(&req_pairs::TABLE)?;

            let mut all: Vec<TopCooccurrence> = req_pairs_table
                .range(&(Pubkey::default(), Pubkey::default())..)?
                .map(|entry| {
                    entry.map(|(k, v)| {
                        let (pubkey_a, pubkey_b) = k.value();
                        TopCooccurrence {
                            pubkey_a,
                            pubkey_b,
                            count: v.value(),
                        }
                    })
                })
                .collect::<Result<_, _>>()?;

            all.sort_by(|a, b| b.count.cmp(&a.count));
            all.truncate(limit);
            Ok(all)
        })
        .await
    }
}
