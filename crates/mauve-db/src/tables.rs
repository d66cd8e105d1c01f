//! Database table definitions.
//!
//! # Data Model Overview
//!
//! The store keeps the *latest* version of every replaceable event per
//! (author, kind), plus an archive of every superseded version. Everything
//! else in here is either derived data extracted from events at insertion
//! time (profiles, follower indices) or analytics output written by the
//! background pipeline (bot clusters, communities, trust, spam, request
//! counters).
//!
//! ## Table Categories
//!
//! ### Event Tables (`events*`, `event_history*`)
//! Authoritative event storage and the superseded-version archive that backs
//! the per-user history ("time capsule") view.
//!
//! ### Derived Tables (`profiles`, `followers`, `follower_counts`)
//! Maintained incrementally as contact lists and profiles are replaced, so
//! the analytics pipeline never has to re-parse events for follower lookups.
//!
//! ### Analytics Tables (`bot_clusters`, `communities`, `trusted_pubkeys`,
//! `spam_candidates`, `req_analytics`, `req_pairs`)
//! Written by the analytics cycle and the request tracker flush; read by the
//! relay front-end and the CLI.

use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use mauve_core::{Event, EventId, EventKind, ProfileMetadata, Pubkey, Timestamp};
use serde::Serialize;

#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = redb_bincode::TableDefinition<'a, Key, Value>;
            pub trait ReadableTable: redb_bincode::ReadableTable<Key, Value> {}
            impl<RT> ReadableTable for RT where RT: redb_bincode::ReadableTable<Key, Value> {}
            pub type Table<'a> = redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

// ============================================================================
// SYSTEM TABLES
// ============================================================================

def_table! {
    /// Tracks database/schema version.
    db_version: () => u64
}

// ============================================================================
// EVENT TABLES
// ============================================================================

def_table! {
    /// Latest replaceable event per (author, kind).
    ///
    /// This is the authoritative store; older versions move to
    /// `event_history` when replaced.
    events: (Pubkey, EventKind) => EventRecord
}

def_table! {
    /// Kind-first index over `events`, for kind-scoped queries that do not
    /// name authors (e.g. the follow-graph rebuild over all contact lists).
    events_by_kind: (EventKind, Pubkey) => ()
}

def_table! {
    /// Superseded versions of replaceable events.
    ///
    /// Key: (author, kind, created_at, event_id). Retained forever; this is
    /// what the per-user history view is built from.
    event_history: (Pubkey, EventKind, Timestamp, EventId) => EventRecord
}

def_table! {
    /// Time-ordered index of archived versions.
    ///
    /// Key: (archival timestamp, reception_order). The `reception_order` is
    /// a monotonically increasing per-process counter so multiple archivals
    /// within one second keep a strict order.
    event_history_by_time: (Timestamp, u64) => HistoryPointer
}

// ============================================================================
// DERIVED TABLES
// Extracted from events at insertion time for efficient querying.
// ============================================================================

def_table! {
    /// Latest profile fields per author, extracted from kind-0 events.
    profiles: Pubkey => ProfileRecord
}

def_table! {
    /// Who follows each identity, derived from contact lists.
    ///
    /// Key: (followee, follower). Diffed against the previous contact list
    /// on every replacement, so rows disappear when follows are dropped.
    followers: (Pubkey, Pubkey) => ()
}

def_table! {
    /// Follower count per identity; kept in sync with `followers`.
    follower_counts: Pubkey => u64
}

// ============================================================================
// ANALYTICS TABLES
// Written by the analytics cycle and the request tracker.
// ============================================================================

def_table! {
    /// Detected bot clusters, one row per cluster per detection cycle.
    ///
    /// Earlier generations are kept but flipped inactive before a new cycle
    /// writes its rows.
    bot_clusters: u64 => BotClusterRecord
}

def_table! {
    /// Community-detection snapshot, a single document overwritten per cycle.
    communities: () => CommunityGraphRecord
}

def_table! {
    /// The trusted pubkey set; replaced wholesale by each trust cycle and
    /// loaded on startup so a restarted node is usable immediately.
    trusted_pubkeys: Pubkey => ()
}

def_table! {
    /// Pubkeys flagged as spam candidates, cleared at the start of each
    /// trust cycle.
    spam_candidates: Pubkey => SpamCandidateRecord
}

def_table! {
    /// Aggregated subscription-request counters per pubkey.
    req_analytics: Pubkey => ReqAnalyticsRecord
}

def_table! {
    /// How often two pubkeys appeared in the same subscription filter.
    ///
    /// Key invariant: first pubkey < second pubkey.
    req_pairs: (Pubkey, Pubkey) => u64
}

/// A stored event plus local bookkeeping.
#[derive(Debug, Encode, Decode, Serialize, Clone)]
pub struct EventRecord {
    pub event: Event,
    /// When this node first stored the event.
    pub received_at: Timestamp,
}

/// Locator for an archived version, stored in the time index.
#[derive(Debug, Encode, Decode, Serialize, Clone)]
pub struct HistoryPointer {
    pub pubkey: Pubkey,
    pub kind: EventKind,
    pub created_at: Timestamp,
    pub event_id: EventId,
}

/// Profile fields extracted from the latest kind-0 event.
#[derive(Debug, Encode, Decode, Serialize, Clone)]
pub struct ProfileRecord {
    /// The event this profile data came from.
    pub event_id: EventId,
    pub profile: ProfileMetadata,
    pub updated_at: Timestamp,
}

/// One detected follow-back ring.
#[derive(Debug, Encode, Decode, Serialize, Clone)]
pub struct BotClusterRecord {
    pub members: Vec<Pubkey>,
    /// Directed edges inside the cluster over `n * (n - 1)` possible.
    pub internal_density: f64,
    /// Outbound edges leaving the cluster over edges inside it.
    pub external_ratio: f64,
    /// Cleared when a newer detection cycle writes its own rows.
    pub active: bool,
    pub created_at: Timestamp,
}

/// Why a pubkey was flagged as a spam candidate.
#[derive(Debug, Encode, Decode, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum SpamReason {
    /// Member of a dense bot cluster with no trusted standing.
    IsolatedCluster,
    /// Has stored events but no client ever asked for them.
    NeverRequested,
}

impl SpamReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IsolatedCluster => "isolated_cluster",
            Self::NeverRequested => "never_requested",
        }
    }
}

impl std::fmt::Display for SpamReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Encode, Decode, Serialize, Clone)]
pub struct SpamCandidateRecord {
    pub reason: SpamReason,
    /// Stored events for this pubkey at detection time.
    pub event_count: u64,
    pub detected_at: Timestamp,
}

/// Aggregated request counters for one pubkey.
#[derive(Debug, Encode, Decode, Serialize, Clone, Default)]
pub struct ReqAnalyticsRecord {
    /// Subscription filters that named this pubkey.
    pub total: u64,
    /// Same, broken down by requested event kind.
    pub per_kind: BTreeMap<EventKind, u64>,
}

/// A member surfaced in a community's top-5 listing.
#[derive(Debug, Encode, Decode, Serialize, Clone)]
pub struct CommunityMemberRecord {
    pub pubkey: Pubkey,
    pub name: String,
    pub picture: String,
    pub follower_count: u64,
}

/// One detected community.
#[derive(Debug, Encode, Decode, Serialize, Clone)]
pub struct CommunityRecord {
    pub id: u32,
    /// All members, sorted by follower count descending.
    pub members: Vec<Pubkey>,
    pub size: u64,
    /// Up to five members with profile info attached.
    pub top_members: Vec<CommunityMemberRecord>,
    /// Undirected edge count inside the community.
    pub internal_edges: u64,
    /// Directed out-links from members to non-members.
    pub external_edges: u64,
    /// `internal / (internal + external)`; a UI ratio, not Newman-Girvan Q.
    pub modularity: f64,
}

/// Weighted link between two communities that survived truncation.
#[derive(Debug, Encode, Decode, Serialize, Clone)]
pub struct CommunityEdgeRecord {
    pub a: u32,
    pub b: u32,
    pub weight: u64,
}

/// The full community-detection snapshot.
#[derive(Debug, Encode, Decode, Serialize, Clone)]
pub struct CommunityGraphRecord {
    pub communities: Vec<CommunityRecord>,
    pub edges: Vec<CommunityEdgeRecord>,
    /// Node count of the follow graph the snapshot was computed from.
    pub node_count: u64,
    pub computed_at: Timestamp,
}
