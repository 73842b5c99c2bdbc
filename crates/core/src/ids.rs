//! Ledger entity identifiers
//!
//! Topics and accounts are both addressed as `shard.realm.num`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error parsing an entity id
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid entity id '{input}': {reason}")]
pub struct EntityIdError {
    pub input: String,
    pub reason: &'static str,
}

/// A `shard.realm.num` triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub shard: u64,
    pub realm: u64,
    pub num: u64,
}

impl EntityId {
    pub const fn new(shard: u64, realm: u64, num: u64) -> Self {
        Self { shard, realm, num }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| EntityIdError {
            input: s.to_string(),
            reason,
        };

        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u64, EntityIdError> {
            parts
                .next()
                .ok_or_else(|| err("expected shard.realm.num"))?
                .parse::<u64>()
                .map_err(|_| err("components must be unsigned integers"))
        };

        let id = EntityId::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(err("expected shard.realm.num"));
        }
        Ok(id)
    }
}

macro_rules! entity_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub EntityId);

        impl $name {
            pub const fn new(shard: u64, realm: u64, num: u64) -> Self {
                Self(EntityId::new(shard, realm, num))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = EntityIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

entity_newtype!(
    /// Consensus topic id (an append-only message log)
    TopicId
);

entity_newtype!(
    /// Account id
    AccountId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_topic_id() {
        let topic: TopicId = "0.0.12345".parse().unwrap();
        assert_eq!(topic, TopicId::new(0, 0, 12345));
        assert_eq!(topic.to_string(), "0.0.12345");
    }

    #[test]
    fn test_reject_malformed_ids() {
        assert!("0.0".parse::<TopicId>().is_err());
        assert!("0.0.1.2".parse::<TopicId>().is_err());
        assert!("0.0.abc".parse::<AccountId>().is_err());
        assert!("".parse::<AccountId>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let account = AccountId::new(0, 0, 42);
        let json = serde_json::to_string(&account).unwrap();
        assert_eq!(json, "\"0.0.42\"");

        let parsed: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, account);
        assert!(serde_json::from_str::<AccountId>("\"nope\"").is_err());
    }
}
