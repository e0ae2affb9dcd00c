use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::CoreError;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.0.to_string()[..8])
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(OpId);

/// Row identifier of a product or category. Always positive.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct RecordId(i64);

impl RecordId {
    pub fn new(value: i64) -> Result<Self, CoreError> {
        if value <= 0 {
            return Err(CoreError::InvalidData(format!(
                "record id must be positive, got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for RecordId {
    type Error = CoreError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RecordId> for i64 {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<u64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// Hands out ids for drafts before the backend has assigned one.
///
/// Ids start at the current wall-clock millisecond and never repeat, so they
/// sort after any serial id a database is likely to hand out.
pub struct LocalIdGenerator {
    last: i64,
}

impl LocalIdGenerator {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    pub fn next_id(&mut self) -> Result<RecordId, CoreError> {
        let now = i64::try_from(physical_now()?)
            .map_err(|_| CoreError::InvalidData("wall clock out of range".into()))?;
        self.last = if now > self.last { now } else { self.last + 1 };
        RecordId::new(self.last)
    }
}

impl Default for LocalIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
