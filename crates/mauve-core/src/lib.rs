pub mod delta;
pub mod event;
pub mod profile;

use std::time::{SystemTime, UNIX_EPOCH};

pub use event::{Event, EventKind, Filter, Tag};
pub use profile::ProfileMetadata;

/// String-backed identifier newtype.
///
/// The relay deals in identifiers it did not mint (event ids, pubkeys), so
/// they stay opaque strings. No validation happens at this layer: a contact
/// list may point at a malformed target and the graph still has to carry it.
#[macro_export]
macro_rules! define_str_type {
    (
        $(#[$outer:meta])*
        struct $t:tt
    ) => {
        $(#[$outer])*
        #[derive(::bincode::Encode, ::bincode::Decode)]
        #[derive(::serde::Serialize, ::serde::Deserialize)]
        #[serde(transparent)]
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
        pub struct $t(String);

        impl $t {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $t {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl From<&str> for $t {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $t {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl std::borrow::Borrow<str> for $t {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_str_type!(
    /// A user identity: 64-character lowercase hex by convention.
    ///
    /// Deliberately unvalidated; see [`crate::event::Event::contact_targets`].
    struct Pubkey
);

define_str_type!(
    /// Opaque event identifier, as received on the wire.
    struct EventId
);

impl Pubkey {
    /// Canonical unordered pair: the lexicographically smaller pubkey first.
    ///
    /// Pair co-occurrence counters key on this, so `(a, b)` and `(b, a)`
    /// land on the same row.
    pub fn ordered_pair(a: Pubkey, b: Pubkey) -> (Pubkey, Pubkey) {
        if b < a { (b, a) } else { (a, b) }
    }
}

/// Unix seconds.
#[derive(::bincode::Encode, ::bincode::Decode)]
#[derive(::serde::Serialize, ::serde::Deserialize)]
#[serde(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    pub fn now() -> Self {
        Self(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        )
    }

    pub fn as_secs(self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn ordered_pair_canonical(a in "[a-f0-9]{8}", b in "[a-f0-9]{8}") {
            prop_assume!(a != b);
            let ab = Pubkey::ordered_pair(Pubkey::new(a.clone()), Pubkey::new(b.clone()));
            let ba = Pubkey::ordered_pair(Pubkey::new(b.clone()), Pubkey::new(a.clone()));
            prop_assert_eq!(&ab, &ba);
            prop_assert!(ab.0 < ab.1);
            let members = [ab.0.as_str(), ab.1.as_str()];
            prop_assert!(members.contains(&a.as_str()));
            prop_assert!(members.contains(&b.as_str()));
        }
    }
}
