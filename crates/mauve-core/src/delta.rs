//! Pure diff helpers for the event-history ("time capsule") view.
//!
//! Given two versions of a replaceable event, compute what actually changed:
//! profile fields, follows added/removed, relay entries added/removed.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::{Event, EventKind, Pubkey};

/// A single changed profile field.
#[derive(Serialize, Clone, PartialEq, Eq, Debug)]
pub struct FieldChange {
    pub field: &'static str,
    pub old: String,
    pub new: String,
}

/// Additions and removals between two versions of a list-shaped event.
#[derive(Serialize, Clone, PartialEq, Eq, Debug, Default)]
pub struct ListDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ListDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Changed profile fields between two kind-0 versions.
///
/// `old = None` means "first version we ever saw": every non-empty field
/// shows up as a change from empty.
pub fn profile_diff(old: Option<&Event>, new: &Event) -> Vec<FieldChange> {
    let old = old.map(Event::profile).unwrap_or_default();
    let new = new.profile();

    let fields = [
        ("name", &old.name, &new.name),
        ("display_name", &old.display_name, &new.display_name),
        ("about", &old.about, &new.about),
        ("picture", &old.picture, &new.picture),
        ("nip05", &old.nip05, &new.nip05),
    ];

    fields
        .into_iter()
        .filter(|(_, old, new)| old != new)
        .map(|(field, old, new)| FieldChange {
            field,
            old: old.clone(),
            new: new.clone(),
        })
        .collect()
}

/// Follows added and removed between two kind-3 versions.
pub fn contacts_diff(old: Option<&Event>, new: &Event) -> ListDiff {
    set_diff(
        old.map(|e| e.contact_targets().map(Pubkey::into_string).collect())
            .unwrap_or_default(),
        new.contact_targets().map(Pubkey::into_string).collect(),
    )
}

/// Relay entries added and removed between two kind-10002 versions.
pub fn relays_diff(old: Option<&Event>, new: &Event) -> ListDiff {
    set_diff(
        old.map(|e| e.relay_urls().map(str::to_owned).collect())
            .unwrap_or_default(),
        new.relay_urls().map(str::to_owned).collect(),
    )
}

/// Dispatch on kind: the diff that makes sense for this event type.
///
/// Profile changes are rendered as a `ListDiff` of `field: value` lines so
/// all three kinds share one summary shape in the history API.
pub fn summarize_change(kind: EventKind, old: Option<&Event>, new: &Event) -> ListDiff {
    match kind {
        EventKind::PROFILE => {
            let changes = profile_diff(old, new);
            ListDiff {
                added: changes
                    .iter()
                    .filter(|c| !c.new.is_empty())
                    .map(|c| format!("{}: {}", c.field, c.new))
                    .collect(),
                removed: changes
                    .iter()
                    .filter(|c| !c.old.is_empty())
                    .map(|c| format!("{}: {}", c.field, c.old))
                    .collect(),
            }
        }
        EventKind::CONTACT_LIST => contacts_diff(old, new),
        EventKind::RELAY_LIST => relays_diff(old, new),
        _ => ListDiff::default(),
    }
}

fn set_diff(old: BTreeSet<String>, new: BTreeSet<String>) -> ListDiff {
    ListDiff {
        added: new.difference(&old).cloned().collect(),
        removed: old.difference(&new).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tag;

    fn event(kind: EventKind, content: &str, tags: Vec<Tag>) -> Event {
        Event {
            id: "e".into(),
            pubkey: "pk".into(),
            created_at: 1.into(),
            kind,
            tags,
            content: content.to_owned(),
        }
    }

    #[test]
    fn profile_diff_reports_changed_fields_only() {
        let old = event(EventKind::PROFILE, r#"{"name":"a","about":"x"}"#, vec![]);
        let new = event(EventKind::PROFILE, r#"{"name":"b","about":"x"}"#, vec![]);

        let changes = profile_diff(Some(&old), &new);
        assert_eq!(
            changes,
            vec![FieldChange {
                field: "name",
                old: "a".into(),
                new: "b".into(),
            }]
        );
    }

    #[test]
    fn profile_diff_without_predecessor() {
        let new = event(EventKind::PROFILE, r#"{"name":"a"}"#, vec![]);
        let changes = profile_diff(None, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old, "");
    }

    #[test]
    fn contacts_diff_added_and_removed() {
        let old = event(
            EventKind::CONTACT_LIST,
            "",
            vec![Tag::new(["p", "a"]), Tag::new(["p", "b"])],
        );
        let new = event(
            EventKind::CONTACT_LIST,
            "",
            vec![Tag::new(["p", "b"]), Tag::new(["p", "c"])],
        );

        let diff = contacts_diff(Some(&old), &new);
        assert_eq!(diff.added, vec!["c".to_owned()]);
        assert_eq!(diff.removed, vec!["a".to_owned()]);
    }

    #[test]
    fn relays_diff_ignores_non_r_tags() {
        let old = event(EventKind::RELAY_LIST, "", vec![Tag::new(["r", "wss://a"])]);
        let new = event(
            EventKind::RELAY_LIST,
            "",
            vec![Tag::new(["r", "wss://a"]), Tag::new(["p", "zz"]), Tag::new(["r", "wss://b"])],
        );

        let diff = relays_diff(Some(&old), &new);
        assert_eq!(diff.added, vec!["wss://b".to_owned()]);
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn summarize_unknown_kind_is_empty() {
        let new = event(EventKind::new(7), "", vec![]);
        assert!(summarize_change(EventKind::new(7), None, &new).is_empty());
    }
}
