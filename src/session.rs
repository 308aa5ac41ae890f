//! Per-camera negotiation state machine
//!
//! A [`NegotiationSession`] drives one offer/answer/ICE exchange:
//!
//! ```text
//! Idle -> OfferCreated -> AwaitingAnswer -> Connected -> Closed
//!   \__________\________________\______________\-> Failed
//! ```
//!
//! The session owns its PeerLink and SignalingLink. Every caller waiting on
//! the same camera shares one outcome through [`NegotiationSession::wait_outcome`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::{Result, StreamError};
use crate::media::{MediaStream, MediaTrack};
use crate::peer::{PeerConnectionState, PeerEvent, PeerLink, PeerLinkFactory};
use crate::signaling::{
    answer_description, InboundMessage, LinkState, OutboundMessage, SignalingLink,
    SignalingTransport,
};
use crate::types::CameraId;

/// Negotiation progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    OfferCreated,
    AwaitingAnswer,
    Connected,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }

    pub fn is_negotiating(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::OfferCreated | SessionState::AwaitingAnswer
        )
    }
}

/// Result shared by everyone waiting on a session
#[derive(Debug, Clone)]
pub enum Outcome {
    Pending,
    Ready(MediaStream),
    Failed(StreamError),
}

/// Receivers a connected session keeps servicing until it ends
pub(crate) struct Supervision {
    peer: Arc<dyn PeerLink>,
    link: Arc<SignalingLink>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    inbound: Option<mpsc::UnboundedReceiver<InboundMessage>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn link_failure(state: &LinkState) -> Option<StreamError> {
    match state {
        LinkState::Failed(reason) => Some(StreamError::Transport(reason.clone())),
        LinkState::Closed => Some(StreamError::Transport(
            "Signaling link closed before the stream connected".to_string(),
        )),
        _ => None,
    }
}

async fn recv_inbound(
    inbound: &mut Option<mpsc::UnboundedReceiver<InboundMessage>>,
) -> Option<InboundMessage> {
    match inbound.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// One negotiation attempt for one camera
pub struct NegotiationSession {
    camera_id: CameraId,
    id: Uuid,
    attempt: u32,
    state: watch::Sender<SessionState>,
    peer: Mutex<Option<Arc<dyn PeerLink>>>,
    link: Mutex<Option<Arc<SignalingLink>>>,
    stream: Mutex<Option<MediaStream>>,
    cancel: CancellationToken,
    outcome: watch::Sender<Outcome>,
    // Serializes status-bearing transitions with close
    gate: Mutex<()>,
}

impl NegotiationSession {
    pub fn new(camera_id: CameraId, attempt: u32) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (outcome, _) = watch::channel(Outcome::Pending);
        Self {
            camera_id,
            id: Uuid::new_v4(),
            attempt,
            state,
            peer: Mutex::new(None),
            link: Mutex::new(None),
            stream: Mutex::new(None),
            cancel: CancellationToken::new(),
            outcome,
            gate: Mutex::new(()),
        }
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 1-based attempt number within the current retry window
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_negotiating(&self) -> bool {
        self.state().is_negotiating()
    }

    pub fn is_live(&self) -> bool {
        !self.state().is_terminal()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn peer(&self) -> Option<Arc<dyn PeerLink>> {
        lock(&self.peer).clone()
    }

    pub fn link(&self) -> Option<Arc<SignalingLink>> {
        lock(&self.link).clone()
    }

    pub fn connection_state(&self) -> Option<PeerConnectionState> {
        self.peer().map(|peer| peer.connection_state())
    }

    pub fn stream(&self) -> Option<MediaStream> {
        lock(&self.stream).clone()
    }

    /// The stream, if the session is connected and it still has live tracks
    pub fn live_stream(&self) -> Option<MediaStream> {
        if self.state() != SessionState::Connected {
            return None;
        }
        self.stream().filter(|stream| stream.is_active())
    }

    fn set_state(&self, next: SessionState) {
        let camera_id = self.camera_id;
        self.state.send_if_modified(|state| {
            if *state == next || *state == SessionState::Closed {
                return false;
            }
            log::debug!("Camera {}: session {:?} -> {:?}", camera_id, state, next);
            *state = next;
            true
        });
    }

    /// Wait for the session to connect or fail
    pub async fn wait_outcome(&self) -> Result<MediaStream> {
        let mut outcome = self.outcome.subscribe();
        let resolved = outcome
            .wait_for(|o| !matches!(o, Outcome::Pending))
            .await
            .map_err(|_| StreamError::Closed)?
            .clone();

        match resolved {
            Outcome::Ready(stream) => Ok(stream),
            Outcome::Failed(err) => Err(err),
            Outcome::Pending => Err(StreamError::Closed),
        }
    }

    fn publish(&self, resolved: Outcome) {
        self.outcome.send_if_modified(|outcome| {
            if matches!(outcome, Outcome::Pending) {
                *outcome = resolved;
                true
            } else {
                false
            }
        });
    }

    /// Run `f` only while the session is open.
    ///
    /// Serialized with [`NegotiationSession::close_with`]: `f` either finishes
    /// before a close starts or does not run at all.
    pub(crate) fn while_open<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _gate = lock(&self.gate);
        if self.is_closed() {
            return None;
        }
        Some(f())
    }

    /// Run `f`, then mark the session closed, as one step against
    /// [`NegotiationSession::while_open`]. Resources are freed by `close`.
    pub(crate) fn close_with(&self, f: impl FnOnce()) {
        let _gate = lock(&self.gate);
        f();
        self.set_state(SessionState::Closed);
        self.cancel.cancel();
    }

    pub(crate) fn mark_failed(&self) {
        self.set_state(SessionState::Failed);
    }

    pub(crate) fn publish_ready(&self, stream: MediaStream) {
        self.publish(Outcome::Ready(stream));
    }

    pub(crate) fn publish_failure(&self, err: StreamError) {
        self.publish(Outcome::Failed(err));
    }

    // Store first, then check: a close racing with the store either sees the
    // resource in its teardown or leaves it for us to close here.
    async fn attach_peer(&self, peer: Arc<dyn PeerLink>) -> Result<()> {
        *lock(&self.peer) = Some(Arc::clone(&peer));
        if self.is_closed() {
            lock(&self.peer).take();
            let _ = peer.close().await;
            return Err(StreamError::Closed);
        }
        Ok(())
    }

    fn attach_link(&self, link: Arc<SignalingLink>) -> Result<()> {
        *lock(&self.link) = Some(Arc::clone(&link));
        if self.is_closed() {
            lock(&self.link).take();
            link.close();
            return Err(StreamError::Closed);
        }
        Ok(())
    }

    /// Run the offer/answer exchange until the first track arrives.
    ///
    /// Fails with [`StreamError::Timeout`] past `timeout` and with
    /// [`StreamError::Closed`] if the session is closed meanwhile.
    pub(crate) async fn negotiate(
        &self,
        transport: &dyn SignalingTransport,
        peers: &dyn PeerLinkFactory,
        timeout: Duration,
    ) -> Result<Supervision> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StreamError::Closed),
            result = tokio::time::timeout(timeout, self.exchange(transport, peers)) => {
                result.unwrap_or(Err(StreamError::Timeout(timeout)))
            }
        }
    }

    async fn exchange(
        &self,
        transport: &dyn SignalingTransport,
        peers: &dyn PeerLinkFactory,
    ) -> Result<Supervision> {
        let camera_id = self.camera_id;
        log::info!(
            "Camera {}: starting negotiation (session {}, attempt {})",
            camera_id,
            self.id,
            self.attempt
        );

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let peer = peers.create(camera_id, events_tx).await?;
        self.attach_peer(Arc::clone(&peer)).await?;

        peer.add_video_receiver().await?;
        let offer = peer.create_offer().await?;
        self.set_state(SessionState::OfferCreated);

        let link = transport.open(camera_id).await?;
        self.attach_link(Arc::clone(&link))?;
        let mut inbound = link
            .take_inbound()
            .ok_or_else(|| StreamError::Transport("Signaling link already in use".to_string()))?;
        let mut link_state = link.watch_state();
        let current = link_state.borrow_and_update().clone();
        if let Some(err) = link_failure(&current) {
            return Err(err);
        }

        let sent = link
            .send(OutboundMessage::Offer {
                sdp: offer.sdp,
                camera_id,
            })
            .await;
        if !sent {
            log::warn!("Camera {}: offer was not delivered", camera_id);
        }
        self.set_state(SessionState::AwaitingAnswer);

        let mut answered = false;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(PeerEvent::LocalCandidate(candidate)) => {
                        link.send(OutboundMessage::IceCandidate {
                            data: candidate,
                            camera_id,
                        })
                        .await;
                    }
                    Some(PeerEvent::Track(track)) => {
                        log::info!(
                            "Camera {}: first {:?} track arrived, stream connected",
                            camera_id,
                            track.kind()
                        );
                        let stream = MediaStream::new(camera_id, vec![track]);
                        *lock(&self.stream) = Some(stream);
                        self.set_state(SessionState::Connected);
                        return Ok(Supervision {
                            peer,
                            link,
                            events,
                            inbound: Some(inbound),
                        });
                    }
                    Some(PeerEvent::StateChanged(state)) if state.is_failure() => {
                        return Err(StreamError::Negotiation(format!(
                            "Peer connection {:?} before the stream connected",
                            state
                        )));
                    }
                    Some(PeerEvent::StateChanged(_)) => {}
                    None => {
                        return Err(StreamError::Negotiation("Peer link went away".to_string()));
                    }
                },
                message = inbound.recv() => match message {
                    Some(message) => {
                        self.apply_inbound(peer.as_ref(), message, &mut answered).await?;
                    }
                    None => {
                        return Err(link_failure(&link.state()).unwrap_or_else(|| {
                            StreamError::Transport("Signaling link dropped".to_string())
                        }));
                    }
                },
                changed = link_state.changed() => {
                    if changed.is_err() {
                        return Err(StreamError::Transport("Signaling link dropped".to_string()));
                    }
                    let current = link_state.borrow_and_update().clone();
                    if let Some(err) = link_failure(&current) {
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn apply_inbound(
        &self,
        peer: &dyn PeerLink,
        message: InboundMessage,
        answered: &mut bool,
    ) -> Result<()> {
        match message {
            InboundMessage::Answer { data, sdp, sdp_type } => {
                if *answered {
                    log::debug!("Camera {}: ignoring duplicate answer", self.camera_id);
                    return Ok(());
                }
                let desc = answer_description(data, sdp, sdp_type)?;
                peer.set_remote_description(desc).await?;
                *answered = true;
                log::info!("Camera {}: answer applied", self.camera_id);
            }
            InboundMessage::IceCandidate { data } => {
                log::debug!("Camera {}: remote ICE candidate {}", self.camera_id, data.candidate);
                peer.add_ice_candidate(data).await?;
            }
            InboundMessage::Unknown => {}
        }
        Ok(())
    }

    /// Keep servicing trickle ICE, late tracks and peer state after connecting.
    ///
    /// Returns `Ok` once the session or its peer connection is closed, or the
    /// error that ended it.
    pub(crate) async fn supervise(&self, mut supervision: Supervision) -> Result<()> {
        let camera_id = self.camera_id;
        let mut answered = true;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                event = supervision.events.recv() => match event {
                    Some(PeerEvent::LocalCandidate(candidate)) => {
                        supervision
                            .link
                            .send(OutboundMessage::IceCandidate {
                                data: candidate,
                                camera_id,
                            })
                            .await;
                    }
                    Some(PeerEvent::Track(track)) => {
                        if let Some(stream) = self.stream() {
                            log::debug!("Camera {}: additional track {}", camera_id, track.id());
                            stream.add_track(track);
                        }
                    }
                    Some(PeerEvent::StateChanged(state)) if state.is_failure() => {
                        return Err(StreamError::Negotiation(format!(
                            "Peer connection {:?}",
                            state
                        )));
                    }
                    Some(PeerEvent::StateChanged(PeerConnectionState::Closed)) => {
                        // Closed under us: end the media so the next request renegotiates
                        log::info!("Camera {}: peer connection closed, ending stream", camera_id);
                        if let Some(stream) = self.stream() {
                            stream.tracks().iter().for_each(MediaTrack::end);
                        }
                        return Ok(());
                    }
                    Some(PeerEvent::StateChanged(_)) => {}
                    None => {
                        return Err(StreamError::Negotiation("Peer link went away".to_string()));
                    }
                },
                message = recv_inbound(&mut supervision.inbound) => match message {
                    Some(message) => {
                        self.apply_inbound(supervision.peer.as_ref(), message, &mut answered)
                            .await?;
                    }
                    None => {
                        log::debug!(
                            "Camera {}: signaling link ended, media stays up",
                            camera_id
                        );
                        supervision.inbound = None;
                    }
                },
            }
        }
    }

    /// Release the peer, the link and the stream's tracks
    pub(crate) async fn teardown(&self) {
        let link = lock(&self.link).take();
        let peer = lock(&self.peer).take();
        let stream = lock(&self.stream).clone();

        if let Some(stream) = stream {
            stream.stop();
        }
        if let Some(link) = link {
            link.close();
        }
        if let Some(peer) = peer {
            if let Err(e) = peer.close().await {
                log::warn!("Camera {}: error closing peer link: {}", self.camera_id, e);
            }
        }
    }

    /// Close the session. Idempotent; pending waiters see [`StreamError::Closed`].
    pub async fn close(&self) {
        let was_closed = self.cancel.is_cancelled();
        self.close_with(|| {});
        self.teardown().await;
        self.publish_failure(StreamError::Closed);

        if !was_closed {
            log::info!("Camera {}: session {} closed", self.camera_id, self.id);
        }
    }
}

impl std::fmt::Debug for NegotiationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationSession")
            .field("camera_id", &self.camera_id)
            .field("id", &self.id)
            .field("attempt", &self.attempt)
            .field("state", &self.state())
            .finish()
    }
}
