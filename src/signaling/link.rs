//! Per-camera signaling channel
//!
//! [`SignalingLink::channel`] creates the two halves of one link: the
//! [`SignalingLink`] a session sends through and reads from, and the
//! [`LinkEndpoint`] a transport drives from the wire side.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::message::{InboundMessage, OutboundMessage};
use crate::config::SignalingConfig;
use crate::types::CameraId;

/// Connection state of a signaling link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closed,
    Failed(String),
}

impl LinkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Closed | LinkState::Failed(_))
    }
}

/// Buffering policy for sends issued while a link is still connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            max_wait: Duration::from_secs(5),
        }
    }
}

impl From<&SignalingConfig> for SendOptions {
    fn from(config: &SignalingConfig) -> Self {
        Self {
            poll_interval: config.send_poll_interval(),
            max_wait: config.send_max_wait(),
        }
    }
}

/// Session-facing half of a signaling channel
pub struct SignalingLink {
    camera_id: CameraId,
    state: Arc<watch::Sender<LinkState>>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    options: SendOptions,
    stop: CancellationToken,
}

/// Wire-facing half of a signaling channel
pub struct LinkEndpoint {
    camera_id: CameraId,
    state: Arc<watch::Sender<LinkState>>,
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    stop: CancellationToken,
}

impl SignalingLink {
    /// Create a connected pair in the `Connecting` state
    pub fn channel(camera_id: CameraId, options: SendOptions) -> (SignalingLink, LinkEndpoint) {
        Self::channel_with_token(camera_id, options, CancellationToken::new())
    }

    /// Like [`SignalingLink::channel`], stopping when `stop` is cancelled
    pub fn channel_with_token(
        camera_id: CameraId,
        options: SendOptions,
        stop: CancellationToken,
    ) -> (SignalingLink, LinkEndpoint) {
        let (state_tx, _) = watch::channel(LinkState::Connecting);
        let state = Arc::new(state_tx);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let link = SignalingLink {
            camera_id,
            state: Arc::clone(&state),
            outbound: outbound_tx,
            inbound: Mutex::new(Some(inbound_rx)),
            options,
            stop: stop.clone(),
        };
        let endpoint = LinkEndpoint {
            camera_id,
            state,
            outbound: outbound_rx,
            inbound: inbound_tx,
            stop,
        };
        (link, endpoint)
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    pub fn state(&self) -> LinkState {
        self.state.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        *self.state.borrow() == LinkState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Observe state transitions (open, failure, remote close)
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Take the inbound message stream. Only the first caller gets it.
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        match self.inbound.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Best-effort send.
    ///
    /// While the link is connecting the message waits, re-checking every
    /// `poll_interval` for at most `max_wait`, and is then dropped. Returns
    /// whether the message was handed to the wire side.
    pub async fn send(&self, message: OutboundMessage) -> bool {
        let deadline = Instant::now() + self.options.max_wait;

        loop {
            match self.state() {
                LinkState::Open => {
                    return self.outbound.send(message).is_ok();
                }
                LinkState::Connecting if Instant::now() < deadline => {
                    tokio::time::sleep(self.options.poll_interval).await;
                }
                LinkState::Connecting => {
                    log::warn!(
                        "Camera {}: signaling link not ready after {:?}, dropping message",
                        self.camera_id,
                        self.options.max_wait
                    );
                    return false;
                }
                state => {
                    log::debug!(
                        "Camera {}: dropping message on {:?} signaling link",
                        self.camera_id,
                        state
                    );
                    return false;
                }
            }
        }
    }

    /// Close the link. Idempotent.
    pub fn close(&self) {
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = LinkState::Closed;
                true
            }
        });
        self.stop.cancel();
        if changed {
            log::debug!("Camera {}: signaling link closed", self.camera_id);
        }
    }
}

impl Drop for SignalingLink {
    fn drop(&mut self) {
        self.close();
    }
}

impl LinkEndpoint {
    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    /// Token cancelled once the session side closes the link
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.stop.is_cancelled() || self.state.borrow().is_terminal()
    }

    /// Report the connection as established; ignored once terminal
    pub fn mark_open(&self) {
        self.state.send_if_modified(|state| {
            if *state == LinkState::Connecting {
                *state = LinkState::Open;
                true
            } else {
                false
            }
        });
    }

    /// Report a connection failure; ignored once terminal
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = LinkState::Failed(reason.clone());
                true
            }
        });
        if changed {
            log::warn!("Camera {}: signaling link failed: {}", self.camera_id, reason);
        }
    }

    /// Report that the remote side closed the connection
    pub fn mark_closed(&self) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = LinkState::Closed;
                true
            }
        });
    }

    /// Next message the session wants on the wire; `None` once the link stops
    pub async fn next_outbound(&mut self) -> Option<OutboundMessage> {
        tokio::select! {
            _ = self.stop.cancelled() => None,
            message = self.outbound.recv() => message,
        }
    }

    /// Hand a decoded message to the session
    pub fn deliver(&self, message: InboundMessage) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inbound.send(message).is_ok()
    }

    /// Decode a text frame and deliver it. Malformed payloads are dropped.
    pub fn deliver_text(&self, text: &str) -> bool {
        match InboundMessage::parse(text) {
            Some(message) => self.deliver(message),
            None => false,
        }
    }
}
