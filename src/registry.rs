//! Connection registry
//!
//! Maps each camera to its single negotiation session. The registry is the
//! only owner of sessions; removing an entry releases everything it held.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::{Result, StreamError};
use crate::session::NegotiationSession;
use crate::types::CameraId;

/// Result of [`ConnectionRegistry::claim`]
#[derive(Debug, Clone)]
pub enum Claim {
    /// A live session already exists for the camera
    Existing(Arc<NegotiationSession>),
    /// The supplied session was inserted and must be driven by the caller
    Created(Arc<NegotiationSession>),
}

impl Claim {
    pub fn session(&self) -> &Arc<NegotiationSession> {
        match self {
            Claim::Existing(session) | Claim::Created(session) => session,
        }
    }
}

/// CameraId -> session map; at most one session per camera
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: Mutex<HashMap<CameraId, Arc<NegotiationSession>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, camera_id: CameraId) -> Option<Arc<NegotiationSession>> {
        self.sessions.lock().await.get(&camera_id).cloned()
    }

    /// Insert a session unless a live one exists for its camera.
    ///
    /// A failed or closed leftover entry is replaced and closed.
    pub async fn put(&self, session: Arc<NegotiationSession>) -> Result<()> {
        let camera_id = session.camera_id();
        let replaced = {
            let mut sessions = self.sessions.lock().await;
            if let Some(existing) = sessions.get(&camera_id) {
                if existing.is_live() {
                    return Err(StreamError::AlreadyActive(camera_id));
                }
            }
            sessions.insert(camera_id, session)
        };

        if let Some(stale) = replaced {
            stale.close().await;
        }
        Ok(())
    }

    /// Return the live session for the camera, or insert the one `create` builds.
    ///
    /// Check and insert happen under one lock so concurrent claims for the same
    /// camera agree on a single session.
    pub async fn claim<F>(&self, camera_id: CameraId, create: F) -> Claim
    where
        F: FnOnce() -> Arc<NegotiationSession>,
    {
        let (claim, replaced) = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&camera_id) {
                Some(existing) if existing.is_live() => {
                    (Claim::Existing(Arc::clone(existing)), None)
                }
                _ => {
                    let session = create();
                    let replaced = sessions.insert(camera_id, Arc::clone(&session));
                    log::debug!("Camera {}: registered session {}", camera_id, session.id());
                    (Claim::Created(session), replaced)
                }
            }
        };

        if let Some(stale) = replaced {
            stale.close().await;
        }
        claim
    }

    /// Remove the camera's entry and release its resources. Idempotent.
    pub async fn remove(&self, camera_id: CameraId) -> bool {
        let removed = self.sessions.lock().await.remove(&camera_id);
        match removed {
            Some(session) => {
                session.close().await;
                log::debug!("Camera {}: removed session {}", camera_id, session.id());
                true
            }
            None => false,
        }
    }

    /// Remove the entry only if it is still `session_id`.
    ///
    /// Does not close the session; the caller already owns its teardown.
    pub async fn remove_session(&self, camera_id: CameraId, session_id: Uuid) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(&camera_id) {
            Some(current) if current.id() == session_id => {
                sessions.remove(&camera_id);
                true
            }
            _ => false,
        }
    }

    /// Remove every entry; returns how many were removed
    pub async fn remove_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.lock().await.drain().collect();
        let count = drained.len();
        for (_, session) in drained {
            session.close().await;
        }
        if count > 0 {
            log::info!("Released {} camera session(s)", count);
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Registered cameras in ascending order
    pub async fn camera_ids(&self) -> Vec<CameraId> {
        let mut ids: Vec<_> = self.sessions.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }
}
