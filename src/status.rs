//! Camera status projection into an external cache
//!
//! The dashboard keeps a per-camera record cache. The connection manager
//! only ever touches it through [`StatusProjector`], which turns lifecycle
//! transitions into partial [`CameraUpdate`] writes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::types::{CameraId, CameraRecord, CameraStatus, CameraUpdate};

/// Per-camera record store owned by the host application
pub trait StatusCache: Send + Sync {
    fn read(&self, camera_id: CameraId) -> Option<CameraRecord>;

    /// Merge a partial update into the camera's record
    fn write(&self, camera_id: CameraId, update: CameraUpdate);
}

/// Writes status transitions through to whichever cache is attached
#[derive(Default)]
pub struct StatusProjector {
    cache: RwLock<Option<Arc<dyn StatusCache>>>,
}

impl StatusProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, cache: Arc<dyn StatusCache>) {
        match self.cache.write() {
            Ok(mut slot) => *slot = Some(cache),
            Err(poisoned) => *poisoned.into_inner() = Some(cache),
        }
    }

    pub fn detach(&self) {
        match self.cache.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<dyn StatusCache>> {
        match self.cache.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Record a status transition. No-op without an attached cache.
    pub fn set_status(&self, camera_id: CameraId, status: CameraStatus) {
        let Some(cache) = self.current() else {
            log::trace!("Camera {}: no status cache attached, skipping {}", camera_id, status);
            return;
        };
        log::debug!("Camera {}: status -> {}", camera_id, status);
        cache.write(camera_id, CameraUpdate::status(status));
    }

    pub fn read(&self, camera_id: CameraId) -> Option<CameraRecord> {
        self.current().and_then(|cache| cache.read(camera_id))
    }
}

/// A write observed on an [`InMemoryStatusCache`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub camera_id: CameraId,
    pub record: CameraRecord,
}

/// Process-local status cache that broadcasts every write
pub struct InMemoryStatusCache {
    records: RwLock<HashMap<CameraId, CameraRecord>>,
    changes: broadcast::Sender<StatusChange>,
}

impl Default for InMemoryStatusCache {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            records: RwLock::new(HashMap::new()),
            changes,
        }
    }
}

impl InMemoryStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    pub fn snapshot(&self) -> HashMap<CameraId, CameraRecord> {
        match self.records.read() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl StatusCache for InMemoryStatusCache {
    fn read(&self, camera_id: CameraId) -> Option<CameraRecord> {
        match self.records.read() {
            Ok(records) => records.get(&camera_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&camera_id).cloned(),
        }
    }

    fn write(&self, camera_id: CameraId, update: CameraUpdate) {
        let record = {
            let mut records = match self.records.write() {
                Ok(records) => records,
                Err(poisoned) => poisoned.into_inner(),
            };
            let record = records.entry(camera_id).or_default();
            record.apply(&update);
            record.clone()
        };
        // No subscribers is fine
        let _ = self.changes.send(StatusChange { camera_id, record });
    }
}
