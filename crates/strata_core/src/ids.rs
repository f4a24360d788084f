use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{StrataError, StrataResult};

/// Entity id, allocated per entity-type by the store's counters.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Id(pub i64);

impl Id {
    pub fn as_i64(self) -> i64 {
        self.0
    }

    pub fn from_i64(value: i64) -> Self {
        Self(value)
    }

    pub fn parse(value: &str) -> StrataResult<Self> {
        value
            .trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|err| StrataError::invalid(format!("invalid id '{value}': {err}")))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Overlay identifier. Level 0 is the always-visible base.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LevelId(pub i64);

impl LevelId {
    pub const BASE: LevelId = LevelId(0);

    pub fn is_base(self) -> bool {
        self.0 == 0
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl Default for LevelId {
    fn default() -> Self {
        Self::BASE
    }
}

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level {}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionId(pub u64);

macro_rules! int_wrapper_serde {
    ($name:ident, $inner:ty) => {
        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                Ok(Self(<$inner>::deserialize(deserializer)?))
            }
        }
    };
}

int_wrapper_serde!(Id, i64);
int_wrapper_serde!(LevelId, i64);
int_wrapper_serde!(SubscriptionId, u64);
