use std::collections::BTreeSet;

use mauve_core::{Event, EventId, EventKind, Filter, Pubkey, Timestamp};
use tracing::debug;

use crate::{
    Database, DbResult, EventRecord, HistoryPointer, LOG_TARGET, ProfileRecord,
    event_history, event_history_by_time, events, events_by_kind,
    follower_counts, followers, profiles,
};

/// What happened to an incoming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertEventOutcome {
    /// Stored as the new latest version; `replaced` names the archived
    /// predecessor, if there was one.
    Inserted { replaced: Option<EventId> },
    /// Older than (or tied with) the stored version; nothing changed.
    Stale,
}

impl InsertEventOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }
}

impl Database {
    /// Store an incoming event with latest-wins semantics.
    ///
    /// The previous version (if any) moves to the history archive, and
    /// derived data (profile fields, follower indices) is updated in the
    /// same transaction.
    pub async fn process_event(&self, event: &Event) -> DbResult<InsertEventOutcome> {
        self.process_event_at(event, Timestamp::now()).await
    }

    /// Like [`Self::process_event`], with an explicit "now" for the archive
    /// time index. Split out so tests and backfills control the clock.
    pub async fn process_event_at(
        &self,
        event: &Event,
        now: Timestamp,
    ) -> DbResult<InsertEventOutcome> {
        let event = event.clone();
        self.write_with(|tx| self.insert_event_tx(&event, now, tx))
            .await
    }

    fn insert_event_tx(
        &self,
        event: &Event,
        now: Timestamp,
        tx: &redb_bincode::WriteTransaction,
    ) -> DbResult<InsertEventOutcome> {
        let mut events_table = tx.open_table(&events::TABLE)?;
        let mut events_by_kind_table = tx.open_table(&events_by_kind::TABLE)?;

        let key = (event.pubkey.clone(), event.kind);
        let existing = events_table.get(&key)?.map(|g| g.value());

        if let Some(existing) = existing.as_ref() {
            // Ties keep the stored version, so replays are no-ops.
            if event.created_at <= existing.event.created_at {
                debug!(
                    target: LOG_TARGET,
                    pubkey = %event.pubkey,
                    kind = %event.kind,
                    stored = %existing.event.created_at,
                    incoming = %event.created_at,
                    "Ignoring stale event version"
                );
                return Ok(InsertEventOutcome::Stale);
            }

            let mut event_history_table = tx.open_table(&event_history::TABLE)?;
            let mut history_by_time_table = tx.open_table(&event_history_by_time::TABLE)?;

            event_history_table.insert(
                &(
                    existing.event.pubkey.clone(),
                    existing.event.kind,
                    existing.event.created_at,
                    existing.event.id.clone(),
                ),
                existing,
            )?;
            history_by_time_table.insert(
                &(now, self.next_reception_order()),
                &HistoryPointer {
                    pubkey: existing.event.pubkey.clone(),
                    kind: existing.event.kind,
                    created_at: existing.event.created_at,
                    event_id: existing.event.id.clone(),
                },
            )?;
        }

        match event.kind {
            EventKind::PROFILE => {
                let mut profiles_table = tx.open_table(&profiles::TABLE)?;
                profiles_table.insert(
                    &event.pubkey,
                    &ProfileRecord {
                        event_id: event.id.clone(),
                        profile: event.profile(),
                        updated_at: event.created_at,
                    },
                )?;
            }
            EventKind::CONTACT_LIST => {
                Self::apply_contact_list_tx(
                    event,
                    existing.as_ref().map(|r| &r.event),
                    &mut tx.open_table(&followers::TABLE)?,
                    &mut tx.open_table(&follower_counts::TABLE)?,
                )?;
            }
            _ => {}
        }

        events_table.insert(
            &key,
            &EventRecord {
                event: event.clone(),
                received_at: now,
            },
        )?;
        events_by_kind_table.insert(&(event.kind, event.pubkey.clone()), &())?;

        Ok(InsertEventOutcome::Inserted {
            replaced: existing.map(|r| r.event.id),
        })
    }

    /// Diff the new contact list against the replaced one and update the
    /// reverse follower index plus the per-pubkey counts.
    fn apply_contact_list_tx(
        event: &Event,
        previous: Option<&Event>,
        followers_table: &mut followers::Table,
        follower_counts_table: &mut follower_counts::Table,
    ) -> DbResult<()> {
        let follower = &event.pubkey;

        let old_targets: BTreeSet<Pubkey> = previous
            .map(|e| e.contact_targets().filter(|t| t != follower).collect())
            .unwrap_or_default();
        let new_targets: BTreeSet<Pubkey> = event
            .contact_targets()
            .filter(|t| t != follower)
            .collect();

        for removed in old_targets.difference(&new_targets) {
            if followers_table
                .remove(&(removed.clone(), follower.clone()))?
                .is_some()
            {
                let count = follower_counts_table
                    .get(removed)?
                    .map(|g| g.value())
                    .unwrap_or_default()
                    .saturating_sub(1);
                if count == 0 {
                    follower_counts_table.remove(removed)?;
                } else {
                    follower_counts_table.insert(removed, &count)?;
                }
            }
        }

        for added in new_targets.difference(&old_targets) {
            if followers_table
                .insert(&(added.clone(), follower.clone()), &())?
                .is_none()
            {
                let count = follower_counts_table
                    .get(added)?
                    .map(|g| g.value())
                    .unwrap_or_default()
                    .saturating_add(1);
                follower_counts_table.insert(added, &count)?;
            }
        }

        Ok(())
    }

    /// Latest event versions matching the filter.
    ///
    /// Kind-scoped: an empty `kinds` list yields nothing. With authors the
    /// lookup is direct; without, it walks the kind index. No ordering
    /// guarantee.
    pub async fn query_events(&self, filter: &Filter) -> DbResult<Vec<Event>> {
        let filter = filter.clone();
        self.read_with(|tx| {
            let events_table = tx.open_table(&events::TABLE)?;
            let events_by_kind_table = tx.open_table(&events_by_kind::TABLE)?;

            let mut ret = vec![];

            for kind in &filter.kinds {
                if filter.authors.is_empty() {
                    for entry in
                        events_by_kind_table.range(&(*kind, Pubkey::default())..)?
                    {
                        let (k, _) = entry?;
                        let (entry_kind, pubkey) = k.value();
                        if entry_kind != *kind {
                            break;
                        }
                        if let Some(record) = events_table.get(&(pubkey, *kind))?.map(|g| g.value())
                        {
                            ret.push(record.event);
                        }
                    }
                } else {
                    for author in &filter.authors {
                        if let Some(record) = events_table
                            .get(&(author.clone(), *kind))?
                            .map(|g| g.value())
                        {
                            ret.push(record.event);
                        }
                    }
                }
            }

            Ok(ret)
        })
        .await
    }

    /// Latest stored version for one (author, kind), if any.
    pub async fn get_event(&self, pubkey: &Pubkey, kind: EventKind) -> DbResult<Option<Event>> {
        let pubkey = pubkey.clone();
        self.read_with(|tx| {
            let events_table = tx.open_table(&events::TABLE)?;
            Ok(events_table
                .get(&(pubkey, kind))?
                .map(|g| g.value().event))
        })
        .await
    }

    /// How many latest-version events this pubkey has in the store.
    pub async fn count_events_for_pubkey(&self, pubkey: &Pubkey) -> DbResult<u64> {
        let pubkey = pubkey.clone();
        self.read_with(|tx| {
            let events_table = tx.open_table(&events::TABLE)?;

            let mut count = 0;
            for entry in events_table.range(&(pubkey.clone(), EventKind::default())..)? {
                let (k, _) = entry?;
                if k.value().0 != pubkey {
                    break;
                }
                count += 1;
            }
            Ok(count)
        })
        .await
    }
}
