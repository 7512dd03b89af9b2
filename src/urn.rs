//! LinkedIn resource names.
//!
//! Urns look like `urn:li:fs_conversation:2-abc` or, for compound keys,
//! `urn:li:fs_event:(2-abc,5-def)`. For event and member urns the first id part
//! is the conversation the entity belongs to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Urn {
    prefix: String,
    id_parts: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid urn: {0:?}")]
pub struct UrnParseError(String);

impl Urn {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn id_parts(&self) -> &[String] {
        &self.id_parts
    }

    /// Returns the single id of a simple urn, `None` for compound keys.
    pub fn id(&self) -> Option<&str> {
        match self.id_parts.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Conversation id for conversation, event, and messaging member urns.
    pub fn conversation_id(&self) -> Option<&str> {
        self.id_parts.first().map(String::as_str)
    }

    pub fn last_id(&self) -> Option<&str> {
        self.id_parts.last().map(String::as_str)
    }
}

impl FromStr for Urn {
    type Err = UrnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.starts_with("urn:") {
            return Err(UrnParseError(s.to_string()));
        }

        // Compound ids contain commas and colons inside the parentheses, so
        // split at the opening parenthesis before falling back to the last colon.
        let (prefix, id) = match s.find(":(") {
            Some(open) if s.ends_with(')') => (&s[..open], &s[open + 2..s.len() - 1]),
            _ => s
                .rsplit_once(':')
                .ok_or_else(|| UrnParseError(s.to_string()))?,
        };

        let id_parts: Vec<String> = id.split(',').map(|part| part.to_string()).collect();
        if prefix.is_empty() || id_parts.iter().any(String::is_empty) {
            return Err(UrnParseError(s.to_string()));
        }

        Ok(Self {
            prefix: prefix.to_string(),
            id_parts,
        })
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id_parts.as_slice() {
            [only] => write!(f, "{}:{}", self.prefix, only),
            parts => write!(f, "{}:({})", self.prefix, parts.join(",")),
        }
    }
}

impl Serialize for Urn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Urn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
