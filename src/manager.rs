//! Connection manager facade
//!
//! [`ConnectionManager`] is the one entry point dashboard code uses. It
//! reuses live streams, joins in-flight negotiations, starts new ones subject
//! to the retry budget and keeps the status cache in step with every
//! lifecycle transition.

use std::sync::Arc;
use std::time::Duration;

use crate::config::CrabViewConfig;
use crate::errors::{Result, StreamError};
use crate::media::MediaStream;
use crate::peer::{PeerConnectionState, PeerLinkFactory, PeerLinkStats, WebRtcPeerFactory};
use crate::registry::{Claim, ConnectionRegistry};
use crate::retry::RetryPolicy;
use crate::session::{NegotiationSession, SessionState};
use crate::signaling::{SignalingTransport, WebSocketTransport};
use crate::status::StatusProjector;
use crate::types::{CameraId, CameraStatus};

struct ManagerInner {
    transport: Arc<dyn SignalingTransport>,
    peers: Arc<dyn PeerLinkFactory>,
    registry: ConnectionRegistry,
    retry: RetryPolicy,
    status: StatusProjector,
    timeout: Duration,
}

/// Per-camera stream lifecycle manager
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Build a manager over custom signaling and media stacks
    pub fn new(
        config: &CrabViewConfig,
        transport: Arc<dyn SignalingTransport>,
        peers: Arc<dyn PeerLinkFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                peers,
                registry: ConnectionRegistry::new(),
                retry: RetryPolicy::new(config.negotiation.max_attempts),
                status: StatusProjector::new(),
                timeout: config.negotiation.timeout(),
            }),
        }
    }

    /// WebSocket signaling and webrtc-rs peer connections
    pub fn with_defaults(config: &CrabViewConfig) -> Self {
        Self::new(
            config,
            Arc::new(WebSocketTransport::new(&config.signaling)),
            Arc::new(WebRtcPeerFactory::new(config.ice.clone())),
        )
    }

    /// Status projector, for attaching the dashboard's status cache
    pub fn status(&self) -> &StatusProjector {
        &self.inner.status
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// Get a live stream for the camera, negotiating one if needed.
    ///
    /// Never fails loudly: errors are logged and yield `None`.
    pub async fn get_stream(&self, camera_id: CameraId) -> Option<MediaStream> {
        match self.try_get_stream(camera_id).await {
            Ok(stream) => Some(stream),
            Err(e) if e.is_exhausted() => {
                log::warn!("Camera {}: {}", camera_id, e);
                None
            }
            Err(e) => {
                log::error!("Camera {}: stream unavailable: {}", camera_id, e);
                None
            }
        }
    }

    /// Like [`ConnectionManager::get_stream`], but reports why no stream is available
    pub async fn try_get_stream(&self, camera_id: CameraId) -> Result<MediaStream> {
        let inner = &self.inner;

        if let Some(session) = inner.registry.get(camera_id).await {
            let reused = session
                .while_open(|| {
                    let stream = session.live_stream()?;
                    inner.status.set_status(camera_id, CameraStatus::Online);
                    Some(stream)
                })
                .flatten();
            if let Some(stream) = reused {
                log::debug!("Camera {}: reusing live stream {}", camera_id, stream.id());
                return Ok(stream);
            }

            match session.state() {
                state if state.is_negotiating() => {
                    log::debug!("Camera {}: joining negotiation {}", camera_id, session.id());
                    return session.wait_outcome().await;
                }
                // Its driver evicts the entry and reports the error; wait for that
                // instead of closing it from here.
                SessionState::Failed if !session.is_closed() => {
                    let _ = session.wait_outcome().await;
                }
                _ => {
                    log::info!("Camera {}: cached stream is stale, renegotiating", camera_id);
                    self.release_stream(camera_id).await;
                }
            }
        }

        if !inner.retry.should_attempt(camera_id) {
            let attempts = inner.retry.attempts(camera_id);
            inner.status.set_status(camera_id, CameraStatus::Offline);
            return Err(StreamError::Exhausted {
                camera_id,
                attempts,
            });
        }

        let attempt = inner.retry.attempts(camera_id) + 1;
        let claim = inner
            .registry
            .claim(camera_id, || {
                Arc::new(NegotiationSession::new(camera_id, attempt))
            })
            .await;

        let session = match claim {
            Claim::Created(session) => {
                let driver = Arc::clone(inner);
                let driven = Arc::clone(&session);
                tokio::spawn(async move { driver.drive(driven).await });
                session
            }
            Claim::Existing(session) => session,
        };

        session.wait_outcome().await
    }

    /// Mark the camera offline, then tear down its session if it has one
    pub async fn release_stream(&self, camera_id: CameraId) {
        let inner = &self.inner;
        inner.mark_released(camera_id).await;
        if inner.registry.remove(camera_id).await {
            log::info!("Camera {}: stream released", camera_id);
        }
    }

    /// Tear down every session and the shared signaling resources
    pub async fn release_all_streams(&self) {
        let inner = &self.inner;
        for camera_id in inner.registry.camera_ids().await {
            inner.mark_released(camera_id).await;
        }
        inner.registry.remove_all().await;
        inner.transport.shutdown().await;
    }

    /// Whether a live, active stream is cached for the camera
    pub async fn has_stream(&self, camera_id: CameraId) -> bool {
        match self.inner.registry.get(camera_id).await {
            Some(session) => session.live_stream().is_some(),
            None => false,
        }
    }

    pub async fn get_connection_state(&self, camera_id: CameraId) -> Option<PeerConnectionState> {
        self.inner
            .registry
            .get(camera_id)
            .await
            .and_then(|session| session.connection_state())
    }

    /// Release, then negotiate afresh
    pub async fn reconnect_stream(&self, camera_id: CameraId) -> Option<MediaStream> {
        log::info!("Camera {}: reconnecting", camera_id);
        self.release_stream(camera_id).await;
        self.get_stream(camera_id).await
    }

    pub async fn get_connection_stats(&self, camera_id: CameraId) -> Option<PeerLinkStats> {
        let peer = self.inner.registry.get(camera_id).await?.peer()?;
        match peer.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                log::warn!("Camera {}: failed to read connection stats: {}", camera_id, e);
                None
            }
        }
    }

    /// Forget past failures so an exhausted camera can be tried again
    pub fn reset_retries(&self, camera_id: CameraId) {
        self.inner.retry.reset(camera_id);
    }

    /// Cameras that currently hold a session
    pub async fn active_cameras(&self) -> Vec<CameraId> {
        self.inner.registry.camera_ids().await
    }
}

impl ManagerInner {
    /// Write offline and stop the camera's session from publishing anything
    /// newer. Resources are freed when the entry is removed.
    async fn mark_released(&self, camera_id: CameraId) {
        let offline = || self.status.set_status(camera_id, CameraStatus::Offline);
        match self.registry.get(camera_id).await {
            Some(session) => session.close_with(offline),
            None => offline(),
        }
    }

    /// Session task: negotiate, publish the outcome, then supervise
    async fn drive(self: Arc<Self>, session: Arc<NegotiationSession>) {
        let camera_id = session.camera_id();

        let supervision = match session
            .negotiate(self.transport.as_ref(), self.peers.as_ref(), self.timeout)
            .await
        {
            Ok(supervision) => supervision,
            Err(e) => {
                self.handle_failure(&session, e).await;
                return;
            }
        };

        let Some(stream) = session.stream() else {
            self.handle_failure(
                &session,
                StreamError::Negotiation("Connected without a stream".to_string()),
            )
            .await;
            return;
        };

        let online = session.while_open(|| {
            self.retry.record_success(camera_id);
            self.status.set_status(camera_id, CameraStatus::Online);
            session.publish_ready(stream.clone());
        });
        if online.is_none() {
            self.handle_failure(&session, StreamError::Closed).await;
            return;
        }
        log::info!(
            "Camera {}: stream {} online ({} track(s))",
            camera_id,
            stream.id(),
            stream.tracks().len()
        );

        if let Err(e) = session.supervise(supervision).await {
            self.handle_failure(&session, e).await;
        }
    }

    async fn handle_failure(&self, session: &NegotiationSession, err: StreamError) {
        let camera_id = session.camera_id();

        if err == StreamError::Closed || session.is_closed() {
            log::debug!("Camera {}: session {} ended by release", camera_id, session.id());
            session.publish_failure(StreamError::Closed);
            return;
        }

        let recorded = session.while_open(|| {
            session.mark_failed();
            self.status.set_status(camera_id, CameraStatus::Offline);
            self.retry.record_failure(camera_id)
        });
        let Some(attempts) = recorded else {
            session.publish_failure(StreamError::Closed);
            return;
        };

        log::error!(
            "Camera {}: session {} failed on attempt {}: {}",
            camera_id,
            session.id(),
            session.attempt(),
            err
        );
        session.teardown().await;
        if attempts >= self.retry.max_attempts() {
            log::warn!(
                "Camera {}: retry budget spent after {} attempts",
                camera_id,
                attempts
            );
        }
        self.registry.remove_session(camera_id, session.id()).await;
        session.publish_failure(err);
    }
}
