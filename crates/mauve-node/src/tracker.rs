//! Subscription-request analytics.
//!
//! The relay hot path calls [`RequestTracker::record_subscription`] for every
//! REQ filter it parses. Ingest is a non-blocking enqueue; a single processor
//! task folds records into in-memory counters, and a flush task periodically
//! swaps the counters out and writes them to storage. Overflow drops records
//! on the floor: this is telemetry, not a ledger.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mauve_core::{EventKind, Filter, Pubkey};
use mauve_db::{Database, ReqAnalyticsRecord, TopCooccurrence};
use mauve_util_error::FmtCompact as _;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::LOG_TARGET;
use crate::config::AnalyticsConfig;

/// The three counter maps accumulated between flushes.
#[derive(Debug, Default)]
struct Counters {
    per_pubkey: HashMap<Pubkey, u64>,
    per_pubkey_kind: HashMap<Pubkey, HashMap<EventKind, u64>>,
    pairs: HashMap<(Pubkey, Pubkey), u64>,
}

impl Counters {
    fn is_empty(&self) -> bool {
        self.per_pubkey.is_empty() && self.pairs.is_empty()
    }

    fn record(&mut self, filter: &Filter, pair_author_prefix: usize) {
        for author in &filter.authors {
            *self.per_pubkey.entry(author.clone()).or_default() += 1;

            if !filter.kinds.is_empty() {
                let kinds = self.per_pubkey_kind.entry(author.clone()).or_default();
                for kind in &filter.kinds {
                    *kinds.entry(*kind).or_default() += 1;
                }
            }
        }

        // Only the leading authors feed pair counting, capping the quadratic
        // blowup per record.
        let prefix = &filter.authors[..filter.authors.len().min(pair_author_prefix)];
        for (i, a) in prefix.iter().enumerate() {
            for b in &prefix[i + 1..] {
                let pair = Pubkey::ordered_pair(a.clone(), b.clone());
                *self.pairs.entry(pair).or_default() += 1;
            }
        }
    }
}

/// Shared ingest/read handle. Cheap to clone; the relay front-end holds one.
#[derive(Clone)]
pub struct RequestTracker {
    db: Arc<Database>,
    counters: Arc<Mutex<Counters>>,
    queue_tx: mpsc::Sender<Filter>,
}

impl RequestTracker {
    /// Returns the tracker handle and the processor task; the caller spawns
    /// the processor (the node does this on startup).
    pub fn new(db: Arc<Database>, config: &AnalyticsConfig) -> (Self, RequestProcessor) {
        let (queue_tx, queue_rx) = mpsc::channel(config.request_queue_capacity);
        let counters = Arc::new(Mutex::new(Counters::default()));

        let tracker = Self {
            db,
            counters: counters.clone(),
            queue_tx,
        };
        let processor = RequestProcessor {
            queue_rx,
            counters,
            pair_author_prefix: config.pair_author_prefix,
        };
        (tracker, processor)
    }

    /// Best-effort O(1) ingest from the relay hot path.
    ///
    /// Filters without authors carry no per-pubkey signal and are ignored.
    /// A full queue drops the record rather than blocking the caller.
    pub fn record_subscription(&self, filter: &Filter) {
        if filter.authors.is_empty() {
            return;
        }

        match self.queue_tx.try_send(filter.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(target: LOG_TARGET, "Subscription queue full; dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(target: LOG_TARGET, "Subscription queue closed; dropping record");
            }
        }
    }

    /// Swap in fresh counters and persist the old ones.
    ///
    /// The lock is released before storage is touched, so ingest never waits
    /// on I/O. Storage failure loses this interval's counts and is logged.
    pub async fn flush(&self) {
        let taken = {
            let mut counters = self.counters.lock().expect("Locking failed");
            std::mem::take(&mut *counters)
        };

        if taken.is_empty() {
            return;
        }

        debug!(
            target: LOG_TARGET,
            pubkeys = taken.per_pubkey.len(),
            pairs = taken.pairs.len(),
            "Flushing request counters"
        );

        if let Err(err) = self
            .db
            .flush_req_analytics(&taken.per_pubkey, &taken.per_pubkey_kind, &taken.pairs)
            .await
        {
            warn!(
                target: LOG_TARGET,
                err = %err.fmt_compact(),
                "Failed to flush request counters"
            );
        }
    }

    /// Stored totals for one pubkey. Read-through; errors degrade to `None`.
    pub async fn pubkey_stats(&self, pubkey: &Pubkey) -> Option<ReqAnalyticsRecord> {
        self.db
            .get_pubkey_analytics(pubkey)
            .await
            .unwrap_or_else(|err| {
                warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Pubkey analytics read failed");
                None
            })
    }

    pub async fn top_requested(&self, limit: usize) -> Vec<(Pubkey, ReqAnalyticsRecord)> {
        self.db.get_top_requested(limit).await.unwrap_or_else(|err| {
            warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Top-requested read failed");
            vec![]
        })
    }

    pub async fn top_cooccurring(&self, limit: usize) -> Vec<TopCooccurrence> {
        self.db
            .get_top_cooccurrences(limit)
            .await
            .unwrap_or_else(|err| {
                warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Co-occurrence read failed");
                vec![]
            })
    }

    #[cfg(test)]
    fn counters_snapshot(&self) -> (usize, usize) {
        let counters = self.counters.lock().expect("Locking failed");
        (counters.per_pubkey.len(), counters.pairs.len())
    }
}

/// Sole writer of the counters: drains the queue one record at a time.
pub struct RequestProcessor {
    queue_rx: mpsc::Receiver<Filter>,
    counters: Arc<Mutex<Counters>>,
    pair_author_prefix: usize,
}

impl RequestProcessor {
    pub async fn run(mut self) {
        debug!(target: LOG_TARGET, "Starting request processor task");
        while let Some(filter) = self.queue_rx.recv().await {
            self.counters
                .lock()
                .expect("Locking failed")
                .record(&filter, self.pair_author_prefix);
        }
        debug!(target: LOG_TARGET, "Request processor task finished");
    }

    /// Drain whatever is already queued, then return. Test-only stand-in for
    /// a spawned `run`.
    #[cfg(test)]
    fn drain_now(&mut self) {
        while let Ok(filter) = self.queue_rx.try_recv() {
            self.counters
                .lock()
                .expect("Locking failed")
                .record(&filter, self.pair_author_prefix);
        }
    }
}

/// Periodic flush driver.
pub struct FlushTask {
    tracker: RequestTracker,
    interval: std::time::Duration,
}

impl FlushTask {
    pub fn new(tracker: RequestTracker, config: &AnalyticsConfig) -> Self {
        Self {
            tracker,
            interval: config.flush_interval,
        }
    }

    pub async fn run(self) {
        debug!(target: LOG_TARGET, interval_secs = self.interval.as_secs(), "Starting flush task");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        interval.tick().await;

        loop {
            interval.tick().await;
            self.tracker.flush().await;
        }
    }
}
