use bincode::{Decode, Encode};
use serde::Serialize;

/// The profile fields this node cares about, out of the free-form JSON that
/// a kind-0 event carries in `content`.
#[derive(Encode, Decode, Serialize, Clone, PartialEq, Eq, Debug, Default)]
pub struct ProfileMetadata {
    pub name: String,
    pub display_name: String,
    pub about: String,
    pub picture: String,
    pub nip05: String,
}

impl ProfileMetadata {
    /// Extract known string fields from profile JSON.
    ///
    /// Profile content is whatever the author published: fields may be
    /// missing, null, or carry the wrong type, and none of that is an error.
    /// Anything that is not a string comes back as an empty string.
    pub fn from_content(content: &str) -> Self {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(content) else {
            return Self::default();
        };

        let field = |name: &str| {
            value
                .get(name)
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };

        Self {
            name: field("name"),
            display_name: field("display_name"),
            about: field("about"),
            picture: field("picture"),
            nip05: field("nip05"),
        }
    }

    /// Preferred human-readable name: `name`, falling back to
    /// `display_name`.
    pub fn best_name(&self) -> &str {
        if self.name.is_empty() {
            &self.display_name
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_fields() {
        let profile = ProfileMetadata::from_content(
            r#"{"name":"alice","about":"hi","picture":"https://example.com/a.png","lud16":"x@y"}"#,
        );
        assert_eq!(profile.name, "alice");
        assert_eq!(profile.about, "hi");
        assert_eq!(profile.picture, "https://example.com/a.png");
        assert_eq!(profile.display_name, "");
    }

    #[test]
    fn wrong_types_become_empty_strings() {
        let profile = ProfileMetadata::from_content(
            r#"{"name":42,"display_name":["not","a","string"],"about":null,"nip05":"a@b.c"}"#,
        );
        assert_eq!(profile.name, "");
        assert_eq!(profile.display_name, "");
        assert_eq!(profile.about, "");
        assert_eq!(profile.nip05, "a@b.c");
    }

    #[test]
    fn garbage_content_is_empty_profile() {
        assert_eq!(
            ProfileMetadata::from_content("not json at all"),
            ProfileMetadata::default()
        );
        assert_eq!(ProfileMetadata::from_content(""), ProfileMetadata::default());
        assert_eq!(
            ProfileMetadata::from_content("[1,2,3]"),
            ProfileMetadata::default()
        );
    }

    #[test]
    fn best_name_falls_back() {
        let profile = ProfileMetadata::from_content(r#"{"display_name":"Alice B"}"#);
        assert_eq!(profile.best_name(), "Alice B");
        let profile = ProfileMetadata::from_content(r#"{"name":"alice","display_name":"Alice B"}"#);
        assert_eq!(profile.best_name(), "alice");
    }
}
