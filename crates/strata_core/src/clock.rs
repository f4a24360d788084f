use std::fmt;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Milliseconds since the unix epoch. Dates, times and timestamps are all
/// stored in this unit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Timestamp(pub i64);

static LAST_ISSUED: Lazy<Mutex<i64>> = Lazy::new(|| Mutex::new(0));

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Wall-clock time, strictly increasing across calls within the process so
    /// that write times never tie.
    pub fn now() -> Self {
        let wall = Self::wall_clock().0;
        let mut last = LAST_ISSUED
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = if wall > *last { wall } else { *last + 1 };
        *last = next;
        Timestamp(next)
    }

    pub fn wall_clock() -> Self {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        Timestamp((nanos / 1_000_000) as i64)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn from_millis(value: i64) -> Self {
        Timestamp(value)
    }

    pub fn to_rfc3339(self) -> Option<String> {
        let nanos = i128::from(self.0) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .ok()
            .and_then(|value| value.format(&Rfc3339).ok())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_rfc3339() {
            Some(text) => write!(f, "{text}"),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = i64::deserialize(deserializer)?;
        Ok(Timestamp(value))
    }
}
