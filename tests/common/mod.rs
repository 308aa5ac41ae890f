//! Shared harness for connection manager tests
//!
//! `MockPeerFactory` stands in for the media stack, `MockTransport` plays the
//! signaling server, and `RecordingStatusCache` records every status write.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use crabview::errors::{Result, StreamError};
use crabview::peer::{
    IceCandidateInit, PeerConnectionState, PeerEvent, PeerLink, PeerLinkFactory, PeerLinkStats,
    SessionDescription,
};
use crabview::signaling::{
    InboundMessage, LinkEndpoint, OutboundMessage, SendOptions, SignalingLink, SignalingTransport,
};
use crabview::{
    CameraId, CameraRecord, CameraStatus, CameraUpdate, ConnectionManager, CrabViewConfig,
    InMemoryStatusCache, MediaTrack, StatusCache, TrackKind,
};
use tokio::sync::mpsc;

pub const ANSWER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 10.0.0.9\r\ns=camera\r\n";
pub const REMOTE_CANDIDATE: &str = "candidate:1 1 UDP 2122260223 10.0.0.9 50000 typ host";
pub const LOCAL_CANDIDATE: &str = "candidate:2 1 UDP 2122260223 192.168.1.5 40000 typ host";

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

// ─── Media stack ────────────────────────────────────────────────────────────

/// How mock peers react to the remote description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerScript {
    /// Accept the answer, then deliver one video track after `delay`
    TrackAfter(Duration),
    /// Accept the answer but never deliver media
    NoTrack,
    /// Reject the answer
    RejectAnswer,
}

pub struct MockPeerLink {
    pub camera_id: CameraId,
    events: mpsc::UnboundedSender<PeerEvent>,
    script: PeerScript,
    state: Mutex<PeerConnectionState>,
    remote: Mutex<Option<SessionDescription>>,
    remote_candidates: Mutex<Vec<IceCandidateInit>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl MockPeerLink {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.remote).clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidateInit> {
        lock(&self.remote_candidates).clone()
    }

    /// Simulate a connection state callback from the media stack
    pub fn emit_state(&self, state: PeerConnectionState) {
        *lock(&self.state) = state;
        let _ = self.events.send(PeerEvent::StateChanged(state));
    }

    /// Simulate the media stack delivering a remote video track
    pub fn emit_track(&self) {
        let track = MediaTrack::new(format!("video-{}", self.camera_id), TrackKind::Video);
        let _ = self.events.send(PeerEvent::Track(track));
    }
}

#[async_trait]
impl PeerLink for MockPeerLink {
    async fn add_video_receiver(&self) -> Result<()> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let _ = self.events.send(PeerEvent::LocalCandidate(IceCandidateInit {
            candidate: LOCAL_CANDIDATE.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }));
        Ok(SessionDescription::offer(format!(
            "v=0\r\ns=offer-for-{}\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=recvonly\r\n",
            self.camera_id
        )))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.script == PeerScript::RejectAnswer {
            return Err(StreamError::Negotiation("Failed to set remote description".to_string()));
        }
        *lock(&self.remote) = Some(desc);
        *lock(&self.state) = match self.script {
            PeerScript::TrackAfter(_) => PeerConnectionState::Connected,
            _ => PeerConnectionState::Connecting,
        };

        if let PeerScript::TrackAfter(delay) = self.script {
            let events = self.events.clone();
            let track_id = format!("video-{}", self.camera_id);
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let _ = events.send(PeerEvent::Track(MediaTrack::new(track_id, TrackKind::Video)));
            });
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        lock(&self.remote_candidates).push(candidate);
        Ok(())
    }

    fn connection_state(&self) -> PeerConnectionState {
        *lock(&self.state)
    }

    async fn stats(&self) -> Result<PeerLinkStats> {
        Ok(PeerLinkStats {
            camera_id: self.camera_id,
            state: self.connection_state(),
            has_local_description: true,
            has_remote_description: self.remote_description().is_some(),
            packets_received: 120,
            bytes_received: 96_000,
            round_trip_time_ms: Some(12.5),
        })
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        *lock(&self.state) = PeerConnectionState::Closed;
        Ok(())
    }
}

pub struct MockPeerFactory {
    script: Mutex<PeerScript>,
    created: Mutex<Vec<Arc<MockPeerLink>>>,
}

impl MockPeerFactory {
    pub fn new(script: PeerScript) -> Self {
        Self {
            script: Mutex::new(script),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn set_script(&self, script: PeerScript) {
        *lock(&self.script) = script;
    }

    pub fn created(&self) -> usize {
        lock(&self.created).len()
    }

    pub fn peers(&self) -> Vec<Arc<MockPeerLink>> {
        lock(&self.created).clone()
    }

    pub fn last(&self) -> Arc<MockPeerLink> {
        lock(&self.created).last().cloned().expect("no peer created")
    }
}

#[async_trait]
impl PeerLinkFactory for MockPeerFactory {
    async fn create(
        &self,
        camera_id: CameraId,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerLink>> {
        let peer = Arc::new(MockPeerLink {
            camera_id,
            events,
            script: *lock(&self.script),
            state: Mutex::new(PeerConnectionState::New),
            remote: Mutex::new(None),
            remote_candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        });
        lock(&self.created).push(Arc::clone(&peer));
        Ok(peer)
    }
}

// ─── Signaling server ───────────────────────────────────────────────────────

/// Shape of the answer the mock server sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerForm {
    Nested,
    Flat,
}

/// How the mock signaling server behaves on each link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerScript {
    /// Answer every offer, then trickle one candidate. With `noise`, junk
    /// payloads are sent first.
    Answer { form: AnswerForm, noise: bool },
    /// Trickle one candidate before answering each offer
    CandidateFirst,
    /// Refuse the connection
    Refuse,
    /// Accept the connection and never answer
    Silent,
}

impl ServerScript {
    pub fn nested() -> Self {
        ServerScript::Answer {
            form: AnswerForm::Nested,
            noise: false,
        }
    }
}

pub struct MockTransport {
    base_url: String,
    script: Mutex<ServerScript>,
    urls: Mutex<Vec<String>>,
    links: Mutex<Vec<Arc<SignalingLink>>>,
    received: Arc<Mutex<Vec<OutboundMessage>>>,
    shutdowns: AtomicUsize,
}

impl MockTransport {
    pub fn new(base_url: &str, script: ServerScript) -> Self {
        Self {
            base_url: base_url.to_string(),
            script: Mutex::new(script),
            urls: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            received: Arc::new(Mutex::new(Vec::new())),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn set_script(&self, script: ServerScript) {
        *lock(&self.script) = script;
    }

    pub fn opened(&self) -> usize {
        lock(&self.links).len()
    }

    pub fn urls(&self) -> Vec<String> {
        lock(&self.urls).clone()
    }

    pub fn links(&self) -> Vec<Arc<SignalingLink>> {
        lock(&self.links).clone()
    }

    pub fn received(&self) -> Vec<OutboundMessage> {
        lock(&self.received).clone()
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingTransport for MockTransport {
    async fn open(&self, camera_id: CameraId) -> Result<Arc<SignalingLink>> {
        let (link, endpoint) = SignalingLink::channel(camera_id, SendOptions::default());
        let link = Arc::new(link);

        lock(&self.urls).push(format!("{}{}", self.base_url, camera_id));
        lock(&self.links).push(Arc::clone(&link));

        match *lock(&self.script) {
            ServerScript::Refuse => endpoint.fail("connection refused"),
            script => {
                endpoint.mark_open();
                tokio::spawn(serve(endpoint, script, Arc::clone(&self.received)));
            }
        }
        Ok(link)
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

async fn serve(
    mut endpoint: LinkEndpoint,
    script: ServerScript,
    received: Arc<Mutex<Vec<OutboundMessage>>>,
) {
    let (form, noise, candidate_first) = match script {
        ServerScript::Answer { form, noise } => (form, noise, false),
        ServerScript::CandidateFirst => (AnswerForm::Nested, false, true),
        ServerScript::Refuse | ServerScript::Silent => {
            while let Some(message) = endpoint.next_outbound().await {
                lock(&received).push(message);
            }
            return;
        }
    };

    while let Some(message) = endpoint.next_outbound().await {
        let is_offer = matches!(message, OutboundMessage::Offer { .. });
        lock(&received).push(message);
        if !is_offer {
            continue;
        }

        if noise {
            endpoint.deliver_text("{ this is not json");
            endpoint.deliver_text(r#"{"type":"keepalive"}"#);
            endpoint.deliver_text(r#"{"sdp":"no type field"}"#);
        }

        let answer = match form {
            AnswerForm::Nested => InboundMessage::nested_answer(ANSWER_SDP),
            AnswerForm::Flat => InboundMessage::flat_answer(ANSWER_SDP),
        };
        if candidate_first {
            endpoint.deliver(remote_candidate());
            endpoint.deliver(answer);
        } else {
            endpoint.deliver(answer);
            endpoint.deliver(remote_candidate());
        }
    }
}

fn remote_candidate() -> InboundMessage {
    InboundMessage::IceCandidate {
        data: IceCandidateInit {
            candidate: REMOTE_CANDIDATE.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        },
    }
}

// ─── Status cache ───────────────────────────────────────────────────────────

type RetryProbe = Arc<dyn Fn(CameraId) -> u32 + Send + Sync>;

/// One observed status write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub camera_id: CameraId,
    pub status: Option<CameraStatus>,
    /// Retry counter of the camera at the time of the write, when probed
    pub attempts_at_write: Option<u32>,
}

#[derive(Default)]
pub struct RecordingStatusCache {
    records: InMemoryStatusCache,
    writes: Mutex<Vec<RecordedWrite>>,
    probe: Mutex<Option<RetryProbe>>,
}

impl RecordingStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the manager's retry counter alongside every write
    pub fn probe_retries(&self, manager: &ConnectionManager) {
        let manager = manager.clone();
        *lock(&self.probe) = Some(Arc::new(move |camera| manager.retry_policy().attempts(camera)));
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        lock(&self.writes).clone()
    }

    pub fn writes_for(&self, camera_id: CameraId) -> Vec<RecordedWrite> {
        self.writes()
            .into_iter()
            .filter(|w| w.camera_id == camera_id)
            .collect()
    }

    pub fn statuses_for(&self, camera_id: CameraId) -> Vec<CameraStatus> {
        self.writes_for(camera_id)
            .into_iter()
            .filter_map(|w| w.status)
            .collect()
    }
}

impl StatusCache for RecordingStatusCache {
    fn read(&self, camera_id: CameraId) -> Option<CameraRecord> {
        self.records.read(camera_id)
    }

    fn write(&self, camera_id: CameraId, update: CameraUpdate) {
        let probe = lock(&self.probe).clone();
        lock(&self.writes).push(RecordedWrite {
            camera_id,
            status: update.status,
            attempts_at_write: probe.map(|probe| probe(camera_id)),
        });
        self.records.write(camera_id, update);
    }
}

// ─── Harness ────────────────────────────────────────────────────────────────

pub const BASE_URL: &str = "wss://sig/";

pub struct Harness {
    pub manager: ConnectionManager,
    pub transport: Arc<MockTransport>,
    pub peers: Arc<MockPeerFactory>,
    pub cache: Arc<RecordingStatusCache>,
}

impl Harness {
    pub fn new(server: ServerScript, peer: PeerScript) -> Self {
        Self::with_config(CrabViewConfig::with_base_url(BASE_URL), server, peer)
    }

    pub fn with_config(config: CrabViewConfig, server: ServerScript, peer: PeerScript) -> Self {
        let transport = Arc::new(MockTransport::new(&config.signaling.base_url, server));
        let peers = Arc::new(MockPeerFactory::new(peer));
        let manager = ConnectionManager::new(&config, transport.clone(), peers.clone());
        let cache = Arc::new(RecordingStatusCache::new());
        manager.status().attach(cache.clone());

        Self {
            manager,
            transport,
            peers,
            cache,
        }
    }

    /// Server answers with the nested form; track arrives right away
    pub fn connecting() -> Self {
        Self::new(ServerScript::nested(), PeerScript::TrackAfter(Duration::ZERO))
    }
}

/// Poll `check` until it holds or a second passes
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
