use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of a content unit.
///
/// A unit id doubles as a directory name under the content root and as the
/// catalog key, so it must be usable as a single path segment: non-empty, not
/// hidden, no separators, no control characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitId(String);

/// Reasons a string cannot name a unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitIdError {
    #[error("unit id must not be empty")]
    Empty,

    #[error("unit id `{0}` is reserved")]
    Reserved(String),

    #[error("unit id `{0}` names a hidden directory")]
    Hidden(String),

    #[error("unit id `{id}` contains forbidden character {ch:?}")]
    ForbiddenChar { id: String, ch: char },
}

impl UnitId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, UnitIdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(UnitIdError::Empty);
        }
        if raw == "." || raw == ".." {
            return Err(UnitIdError::Reserved(raw));
        }
        if raw.starts_with('.') {
            return Err(UnitIdError::Hidden(raw));
        }
        if let Some(ch) = raw
            .chars()
            .find(|c| matches!(c, '/' | '\\') || c.is_control())
        {
            return Err(UnitIdError::ForbiddenChar { id: raw, ch });
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UnitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for UnitId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for UnitId {
    type Err = UnitIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UnitId {
    type Error = UnitIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<UnitId> for String {
    fn from(id: UnitId) -> Self {
        id.0
    }
}

impl PartialEq<str> for UnitId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for UnitId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_directory_names() {
        for name in ["Alpha", "fade-in", "Button_v2", "Card 3D"] {
            assert_eq!(UnitId::parse(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn rejects_names_that_are_not_a_single_segment() {
        assert_eq!(UnitId::parse(""), Err(UnitIdError::Empty));
        assert!(matches!(UnitId::parse(".."), Err(UnitIdError::Reserved(_))));
        assert!(matches!(UnitId::parse(".git"), Err(UnitIdError::Hidden(_))));
        assert!(matches!(
            UnitId::parse("a/b"),
            Err(UnitIdError::ForbiddenChar { ch: '/', .. })
        ));
        assert!(matches!(
            UnitId::parse("a\\b"),
            Err(UnitIdError::ForbiddenChar { ch: '\\', .. })
        ));
    }

    #[test]
    fn deserialization_validates() {
        let ok: UnitId = serde_json::from_str("\"Alpha\"").unwrap();
        assert_eq!(ok, "Alpha");
        assert!(serde_json::from_str::<UnitId>("\"../etc\"").is_err());
    }
}
