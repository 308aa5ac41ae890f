//! Bounded retry accounting per camera

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::CameraId;

/// Counts consecutive negotiation failures per camera
#[derive(Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    attempts: Mutex<HashMap<CameraId, u32>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn with_attempts<R>(&self, f: impl FnOnce(&mut HashMap<CameraId, u32>) -> R) -> R {
        match self.attempts.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn attempts(&self, camera_id: CameraId) -> u32 {
        self.with_attempts(|map| map.get(&camera_id).copied().unwrap_or(0))
    }

    pub fn should_attempt(&self, camera_id: CameraId) -> bool {
        self.attempts(camera_id) < self.max_attempts
    }

    /// Count a failure; returns the new count, which never exceeds the cap
    pub fn record_failure(&self, camera_id: CameraId) -> u32 {
        let max = self.max_attempts;
        let count = self.with_attempts(|map| {
            let count = map.entry(camera_id).or_insert(0);
            *count = count.saturating_add(1).min(max);
            *count
        });
        log::debug!("Camera {}: failure {}/{}", camera_id, count, max);
        count
    }

    pub fn record_success(&self, camera_id: CameraId) {
        self.with_attempts(|map| {
            map.remove(&camera_id);
        });
    }

    /// Clear the counter so the camera may be tried again
    pub fn reset(&self, camera_id: CameraId) {
        let previous = self.with_attempts(|map| map.remove(&camera_id));
        if previous.is_some() {
            log::info!("Camera {}: retry counter reset", camera_id);
        }
    }
}
