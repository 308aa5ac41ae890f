//! Shared value types: camera identifiers and the status records written
//! into the dashboard's status cache.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque numeric camera identifier, the key of every per-camera map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub u64);

impl CameraId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CameraId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for CameraId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(CameraId)
    }
}

/// Camera availability as shown on the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Online,
    Offline,
}

impl CameraStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::Online => "online",
            CameraStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial record update written into the status cache.
///
/// Fields left as `None` keep whatever the cache already holds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CameraUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CameraStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<DateTime<Utc>>,
}

impl CameraUpdate {
    /// Status transition stamped with the current time
    pub fn status(status: CameraStatus) -> Self {
        Self {
            status: Some(status),
            changed_at: Some(Utc::now()),
        }
    }
}

/// Full cache record for one camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub status: CameraStatus,
    pub changed_at: Option<DateTime<Utc>>,
}

impl Default for CameraRecord {
    fn default() -> Self {
        Self {
            status: CameraStatus::Offline,
            changed_at: None,
        }
    }
}

impl CameraRecord {
    /// Merge a partial update into this record
    pub fn apply(&mut self, update: &CameraUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if update.changed_at.is_some() {
            self.changed_at = update.changed_at;
        }
    }
}
