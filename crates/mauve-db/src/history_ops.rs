use std::collections::{BTreeMap, HashSet};

use mauve_core::delta::{self, ListDiff};
use mauve_core::{Event, EventId, EventKind, Pubkey, Timestamp};
use serde::Serialize;

use crate::{
    Database, DbResult, event_history, event_history_by_time, events,
};

/// One entry of the global "what changed recently" feed.
#[derive(Debug, Serialize, Clone)]
pub struct RecentChange {
    pub pubkey: Pubkey,
    pub kind: EventKind,
    /// When the node archived the superseded version.
    pub archived_at: Timestamp,
    /// Author timestamp of the version that was replaced.
    pub superseded_created_at: Timestamp,
    pub diff: ListDiff,
}

/// Aggregate numbers about the history archive.
#[derive(Debug, Serialize, Clone, Default)]
pub struct EventHistoryStats {
    pub total_versions: u64,
    pub pubkeys_with_history: u64,
    pub per_kind: BTreeMap<EventKind, u64>,
}

impl Database {
    /// The global change feed, newest archival first.
    ///
    /// Each archived version is reported together with the diff against the
    /// version that replaced it.
    pub async fn recent_changes(&self, offset: usize, limit: usize) -> DbResult<Vec<RecentChange>> {
        self.read_with(|tx| {
            let history_by_time_table = tx.open_table(&event_history_by_time::TABLE)?;
            let event_history_table = tx.open_table(&event_history::TABLE)?;
            let events_table = tx.open_table(&events::TABLE)?;

            let mut ret = vec![];

            for entry in history_by_time_table
                .range(&(Timestamp::ZERO, 0)..)?
                .rev()
                .skip(offset)
            {
                let (k, v) = entry?;
                let (archived_at, _order) = k.value();
                let pointer = v.value();

                let Some(old) = event_history_table
                    .get(&(
                        pointer.pubkey.clone(),
                        pointer.kind,
                        pointer.created_at,
                        pointer.event_id.clone(),
                    ))?
                    .map(|g| g.value())
                else {
                    continue;
                };

                // The replacing version: the next-newer archived one, or the
                // current latest when nothing newer was archived since.
                let successor = Self::successor_version_tx(
                    &pointer.pubkey,
                    pointer.kind,
                    pointer.created_at,
                    &event_history_table,
                    &events_table,
                )?;
                let Some(successor) = successor else {
                    continue;
                };

                ret.push(RecentChange {
                    pubkey: pointer.pubkey,
                    kind: pointer.kind,
                    archived_at,
                    superseded_created_at: pointer.created_at,
                    diff: delta::summarize_change(old.event.kind, Some(&old.event), &successor),
                });

                if limit <= ret.len() {
                    break;
                }
            }

            Ok(ret)
        })
        .await
    }

    fn successor_version_tx(
        pubkey: &Pubkey,
        kind: EventKind,
        created_at: Timestamp,
        event_history_table: &impl event_history::ReadableTable,
        events_table: &impl events::ReadableTable,
    ) -> DbResult<Option<Event>> {
        let after = Timestamp::from(created_at.as_secs().saturating_add(1));
        for entry in
            event_history_table.range(&(pubkey.clone(), kind, after, EventId::default())..)?
        {
            let (k, v) = entry?;
            let (entry_pubkey, entry_kind, _, _) = k.value();
            if entry_pubkey != *pubkey || entry_kind != kind {
                break;
            }
            return Ok(Some(v.value().event));
        }

        Ok(events_table
            .get(&(pubkey.clone(), kind))?
            .map(|g| g.value().event))
    }

    /// All archived versions for one pubkey across kinds, newest first.
    pub async fn event_history(&self, pubkey: &Pubkey, limit: usize) -> DbResult<Vec<Event>> {
        let pubkey = pubkey.clone();
        self.read_with(|tx| {
            let event_history_table = tx.open_table(&event_history::TABLE)?;

            let mut versions = vec![];
            for entry in event_history_table.range(
                &(
                    pubkey.clone(),
                    EventKind::default(),
                    Timestamp::ZERO,
                    EventId::default(),
                )..,
            )? {
                let (k, v) = entry?;
                if k.value().0 != pubkey {
                    break;
                }
                versions.push(v.value().event);
            }

            versions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            versions.truncate(limit);
            Ok(versions)
        })
        .await
    }

    pub async fn event_history_stats(&self) -> DbResult<EventHistoryStats> {
        self.read_with(|tx| {
            let event_history_table = tx.open_table(&event_history::TABLE)?;

            let mut stats = EventHistoryStats::default();
            let mut seen_pubkeys = HashSet::new();

            for entry in event_history_table.range(
                &(
                    Pubkey::default(),
                    EventKind::default(),
                    Timestamp::ZERO,
                    EventId::default(),
                )..,
            )? {
                let (k, _) = entry?;
                let (pubkey, kind, _, _) = k.value();
                stats.total_versions += 1;
                *stats.per_kind.entry(kind).or_default() += 1;
                seen_pubkeys.insert(pubkey);
            }

            stats.pubkeys_with_history = seen_pubkeys.len() as u64;
            Ok(stats)
        })
        .await
    }
}
