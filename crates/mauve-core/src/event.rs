use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::{EventId, Pubkey, Timestamp};

/// Event type discriminator.
///
/// This node only serves the replaceable kinds below; everything else is
/// rejected at the relay boundary before reaching storage.
#[derive(Encode, Decode, Serialize, Deserialize)]
#[serde(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct EventKind(u32);

impl EventKind {
    /// Profile metadata; `content` is free-form JSON.
    pub const PROFILE: Self = Self(0);
    /// Contact list; follows are `["p", <pubkey>]` tags.
    pub const CONTACT_LIST: Self = Self(3);
    /// Relay list; entries are `["r", <url>, ...]` tags.
    pub const RELAY_LIST: Self = Self(10002);

    pub const fn new(kind: u32) -> Self {
        Self(kind)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Kinds where only the latest event per author is authoritative.
    pub fn is_replaceable(self) -> bool {
        matches!(self, Self::PROFILE | Self::CONTACT_LIST | Self::RELAY_LIST)
    }
}

impl From<u32> for EventKind {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One tag: an ordered sequence of strings, first element is the tag name.
#[derive(Encode, Decode, Serialize, Deserialize)]
#[serde(transparent)]
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Tag(pub Vec<String>);

impl Tag {
    pub fn new<S: Into<String>>(elements: impl IntoIterator<Item = S>) -> Self {
        Self(elements.into_iter().map(Into::into).collect())
    }

    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// A signed event as parsed off the wire.
///
/// Signature verification happens upstream in the relay front-end; by the
/// time an event reaches this crate it is assumed authentic and immutable.
#[derive(Encode, Decode, Serialize, Deserialize)]
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Event {
    pub id: EventId,
    pub pubkey: Pubkey,
    pub created_at: Timestamp,
    pub kind: EventKind,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub content: String,
}

impl Event {
    /// Follow targets of a contact list: second element of every `"p"` tag.
    ///
    /// Tags shorter than two elements are skipped. Target strings are *not*
    /// checked for pubkey well-formedness; whatever the author published is
    /// what the graph sees.
    pub fn contact_targets(&self) -> impl Iterator<Item = Pubkey> + '_ {
        self.tags
            .iter()
            .filter(|tag| tag.name() == Some("p"))
            .filter_map(|tag| tag.value())
            .map(Pubkey::from)
    }

    /// Relay URLs of a relay list: second element of every `"r"` tag.
    pub fn relay_urls(&self) -> impl Iterator<Item = &str> + '_ {
        self.tags
            .iter()
            .filter(|tag| tag.name() == Some("r"))
            .filter_map(|tag| tag.value())
    }

    /// Parse `content` as profile metadata. Never fails; see
    /// [`crate::ProfileMetadata::from_content`].
    pub fn profile(&self) -> crate::ProfileMetadata {
        crate::ProfileMetadata::from_content(&self.content)
    }
}

/// The parsed form of a subscription request, as handed over by the relay
/// front-end: which authors and which kinds the client asked for.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Default)]
pub struct Filter {
    #[serde(default)]
    pub authors: Vec<Pubkey>,
    #[serde(default)]
    pub kinds: Vec<EventKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_event(tags: Vec<Tag>) -> Event {
        Event {
            id: "ev1".into(),
            pubkey: "aa".into(),
            created_at: 100.into(),
            kind: EventKind::CONTACT_LIST,
            tags,
            content: String::new(),
        }
    }

    #[test]
    fn contact_targets_skips_malformed_tags() {
        let event = contact_event(vec![
            Tag::new(["p", "bb"]),
            Tag::new(["p"]),
            Tag::new(["e", "cc"]),
            Tag::new(["p", "dd", "wss://relay.example", "petname"]),
            Tag::new(Vec::<String>::new()),
        ]);

        let targets: Vec<_> = event.contact_targets().collect();
        assert_eq!(targets, vec![Pubkey::new("bb"), Pubkey::new("dd")]);
    }

    #[test]
    fn event_wire_roundtrip() {
        let json = r#"{
            "id": "abc",
            "pubkey": "def",
            "created_at": 1700000000,
            "kind": 3,
            "tags": [["p", "aaa"], ["p", "bbb"]],
            "content": ""
        }"#;
        let event: Event = serde_json::from_str(json).expect("valid event json");
        assert_eq!(event.kind, EventKind::CONTACT_LIST);
        assert_eq!(event.contact_targets().count(), 2);

        let encoded = serde_json::to_string(&event).expect("serializes");
        let decoded: Event = serde_json::from_str(&encoded).expect("roundtrips");
        assert_eq!(event, decoded);
    }

    #[test]
    fn filter_defaults_missing_fields() {
        let filter: Filter = serde_json::from_str(r#"{"kinds": [0, 3]}"#).expect("valid filter");
        assert!(filter.authors.is_empty());
        assert_eq!(filter.kinds, vec![EventKind::PROFILE, EventKind::CONTACT_LIST]);
    }
}
