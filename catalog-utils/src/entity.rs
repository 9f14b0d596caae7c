use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// version nibble 1-5, RFC 4122 variant nibble
static PERSISTED_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .unwrap()
});

/// Whether an entity exists in the remote store or only in locally synthesized demo data.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backing {
    Persisted,
    Demo,
}

impl Backing {
    fn classify(id: &str) -> Self {
        if PERSISTED_ID.is_match(id) {
            Backing::Persisted
        } else {
            Backing::Demo
        }
    }
}

/// Identity of a tool that can be liked, bookmarked or reviewed.
///
/// The backing is decided once, from the shape of the id, when the key is built.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EntityKey {
    id: String,
    backing: Backing,
}

impl EntityKey {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let backing = Backing::classify(&id);
        Self { id, backing }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn backing(&self) -> Backing {
        self.backing
    }
}

impl From<String> for EntityKey {
    fn from(id: String) -> Self {
        EntityKey::new(id)
    }
}

impl From<&str> for EntityKey {
    fn from(id: &str) -> Self {
        EntityKey::new(id)
    }
}

impl From<EntityKey> for String {
    fn from(key: EntityKey) -> Self {
        key.id
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// The signed-in user acting on an entity.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewerId(String);

impl ViewerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ViewerId {
    fn from(id: String) -> Self {
        ViewerId(id)
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_is_persisted() {
        let key = EntityKey::new("3f2b8c1e-9d4a-4e7b-8a21-5c6d7e8f9a0b");
        assert_eq!(key.backing(), Backing::Persisted);

        let upper = EntityKey::new("3F2B8C1E-9D4A-4E7B-8A21-5C6D7E8F9A0B");
        assert_eq!(upper.backing(), Backing::Persisted);
    }

    #[test]
    fn test_everything_else_is_demo() {
        for id in [
            "",
            "tool-42",
            "1",
            // no hyphens
            "3f2b8c1e9d4a4e7b8a215c6d7e8f9a0b",
            // braces
            "{3f2b8c1e-9d4a-4e7b-8a21-5c6d7e8f9a0b}",
            // version nibble out of range
            "3f2b8c1e-9d4a-7e7b-8a21-5c6d7e8f9a0b",
            // variant nibble out of range
            "3f2b8c1e-9d4a-4e7b-c a21-5c6d7e8f9a0b",
            "3f2b8c1e-9d4a-4e7b-ca21-5c6d7e8f9a0b",
            // surrounding whitespace
            " 3f2b8c1e-9d4a-4e7b-8a21-5c6d7e8f9a0b",
        ] {
            assert_eq!(EntityKey::new(id).backing(), Backing::Demo, "{id:?}");
        }
    }

    #[test]
    fn test_serializes_as_bare_string() {
        let key = EntityKey::new("tool-42");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"tool-42\"");

        let back: EntityKey =
            serde_json::from_str("\"3f2b8c1e-9d4a-4e7b-8a21-5c6d7e8f9a0b\"").unwrap();
        assert_eq!(back.backing(), Backing::Persisted);
    }
}
