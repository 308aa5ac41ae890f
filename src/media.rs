//! Received media handles
//!
//! A [`MediaStream`] is what a successful negotiation hands to the caller.
//! Clones share state: the registry keeps one copy for reuse, the consumer
//! keeps another for rendering, and only the registry stops the tracks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use crate::types::CameraId;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl From<RTPCodecType> for TrackKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        }
    }
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    ended: AtomicBool,
    remote: Option<Arc<TrackRemote>>,
}

/// One inbound media track
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Track without a backing RTP source
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                ended: AtomicBool::new(false),
                remote: None,
            }),
        }
    }

    /// Wrap a track received on a peer connection
    pub fn from_remote(track: Arc<TrackRemote>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: track.id(),
                kind: track.kind().into(),
                ended: AtomicBool::new(false),
                remote: Some(track),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    /// RTP source to read packets from, if this track came off a peer connection
    pub fn remote(&self) -> Option<&Arc<TrackRemote>> {
        self.inner.remote.as_ref()
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    /// Mark the track ended. Idempotent.
    pub fn end(&self) {
        self.inner.ended.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("ended", &self.is_ended())
            .finish()
    }
}

struct StreamInner {
    id: Uuid,
    camera_id: CameraId,
    tracks: std::sync::RwLock<Vec<MediaTrack>>,
    stopped: AtomicBool,
}

/// Shared handle over the tracks negotiated for one camera
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl MediaStream {
    pub fn new(camera_id: CameraId, tracks: Vec<MediaTrack>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: Uuid::new_v4(),
                camera_id,
                tracks: std::sync::RwLock::new(tracks),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn camera_id(&self) -> CameraId {
        self.inner.camera_id
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        match self.inner.tracks.read() {
            Ok(tracks) => tracks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn video_tracks(&self) -> Vec<MediaTrack> {
        self.tracks()
            .into_iter()
            .filter(|t| t.kind() == TrackKind::Video)
            .collect()
    }

    /// Attach a track that arrived after the stream was handed out
    pub(crate) fn add_track(&self, track: MediaTrack) {
        if self.is_stopped() {
            track.end();
        }
        match self.inner.tracks.write() {
            Ok(mut tracks) => tracks.push(track),
            Err(poisoned) => poisoned.into_inner().push(track),
        }
    }

    /// Active until stopped or until every track has ended
    pub fn is_active(&self) -> bool {
        !self.is_stopped() && self.tracks().iter().any(|t| !t.is_ended())
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// End every track. Idempotent.
    pub(crate) fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        for track in self.tracks() {
            track.end();
        }
        log::debug!("Stopped media stream {} for camera {}", self.inner.id, self.inner.camera_id);
    }

    /// Whether both handles refer to the same negotiated stream
    pub fn ptr_eq(&self, other: &MediaStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("camera_id", &self.inner.camera_id)
            .field("tracks", &self.tracks())
            .field("active", &self.is_active())
            .finish()
    }
}
