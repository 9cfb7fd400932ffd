use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of the account that owns history entries. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OwnerId {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        OwnerId::new(value).ok_or("Owner id must not be empty")
    }
}

impl From<OwnerId> for String {
    fn from(value: OwnerId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub owner_id: OwnerId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ids_are_rejected() {
        assert!(OwnerId::new("").is_none());
        assert!(OwnerId::new("   ").is_none());
        assert_eq!(OwnerId::new("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn deserializing_empty_id_fails() {
        assert!(serde_json::from_str::<OwnerId>("\"\"").is_err());
        assert_eq!(serde_json::from_str::<OwnerId>("\"u1\"").unwrap(), OwnerId::new("u1").unwrap());
    }
}
