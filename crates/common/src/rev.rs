//! Revision identifiers
//!
//! A revision id is `"<generation>-<hash>"`: the generation counts edits
//! from the document's first revision, the hash distinguishes siblings at
//! the same generation. Revisions serialize as the combined string form.

use crate::error::{Error, Result};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A parsed revision identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rev {
    /// Generation (1-based position in the edit history).
    pub pos: u64,
    /// Hash half of the identifier, lowercase hex.
    pub hash: String,
}

impl Rev {
    pub fn new(pos: u64, hash: impl Into<String>) -> Self {
        Rev {
            pos,
            hash: hash.into(),
        }
    }
}

impl fmt::Display for Rev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.pos, self.hash)
    }
}

impl FromStr for Rev {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (pos, hash) = s
            .split_once('-')
            .ok_or_else(|| Error::bad_request(format!("Invalid rev format: {s}")))?;
        let pos: u64 = pos
            .parse()
            .map_err(|_| Error::bad_request(format!("Invalid rev format: {s}")))?;
        if pos == 0 || hash.is_empty() {
            return Err(Error::bad_request(format!("Invalid rev format: {s}")));
        }
        Ok(Rev {
            pos,
            hash: hash.to_string(),
        })
    }
}

impl Serialize for Rev {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rev {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let rev: Rev = "3-deadbeef".parse().unwrap();
        assert_eq!(rev.pos, 3);
        assert_eq!(rev.hash, "deadbeef");
        assert_eq!(rev.to_string(), "3-deadbeef");
    }

    #[test]
    fn rejects_malformed() {
        assert!("".parse::<Rev>().is_err());
        assert!("3".parse::<Rev>().is_err());
        assert!("0-abc".parse::<Rev>().is_err());
        assert!("x-abc".parse::<Rev>().is_err());
        assert!("3-".parse::<Rev>().is_err());
    }

    #[test]
    fn hash_may_contain_dashes() {
        let rev: Rev = "2-ab-cd".parse().unwrap();
        assert_eq!(rev.pos, 2);
        assert_eq!(rev.hash, "ab-cd");
    }

    #[test]
    fn serde_as_string() {
        let rev = Rev::new(1, "aa");
        let json = serde_json::to_string(&rev).unwrap();
        assert_eq!(json, "\"1-aa\"");
        let back: Rev = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rev);
    }
}
