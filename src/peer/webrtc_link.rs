use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

use super::{
    BundlePolicy, IceCandidateInit, IceTransportPolicy, PeerConnectionState, PeerEvent, PeerLink,
    PeerLinkFactory, PeerLinkStats, RTCConfiguration, SdpType, SessionDescription,
};
use crate::errors::{Result, StreamError};
use crate::media::MediaTrack;
use crate::types::CameraId;

impl From<IceCandidateInit> for RTCIceCandidateInit {
    fn from(candidate: IceCandidateInit) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidateInit {
    fn from(candidate: RTCIceCandidateInit) -> Self {
        IceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = StreamError;

    fn try_from(desc: SessionDescription) -> Result<Self> {
        let converted = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        };
        converted.map_err(|e| StreamError::Negotiation(format!("Invalid SDP: {}", e)))
    }
}

fn to_webrtc_configuration(
    config: &RTCConfiguration,
) -> webrtc::peer_connection::configuration::RTCConfiguration {
    webrtc::peer_connection::configuration::RTCConfiguration {
        ice_servers: config.ice_servers.iter().cloned().map(Into::into).collect(),
        ice_transport_policy: match config.ice_transport_policy {
            IceTransportPolicy::All => RTCIceTransportPolicy::All,
            IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
        },
        bundle_policy: match config.bundle_policy {
            BundlePolicy::Balanced => RTCBundlePolicy::Balanced,
            BundlePolicy::MaxCompat => RTCBundlePolicy::MaxCompat,
            BundlePolicy::MaxBundle => RTCBundlePolicy::MaxBundle,
        },
        ..Default::default()
    }
}

/// Creates webrtc-rs peer connections with the configured ICE servers
#[derive(Debug, Clone, Default)]
pub struct WebRtcPeerFactory {
    config: RTCConfiguration,
}

impl WebRtcPeerFactory {
    pub fn new(config: RTCConfiguration) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerLinkFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        camera_id: CameraId,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerLink>> {
        let link = WebRtcPeerLink::new(camera_id, &self.config, events).await?;
        Ok(Arc::new(link))
    }
}

/// PeerLink backed by an `RTCPeerConnection`
///
/// Remote candidates that arrive before the answer are held back and applied
/// right after the remote description is set.
pub struct WebRtcPeerLink {
    camera_id: CameraId,
    peer_connection: Arc<RTCPeerConnection>,
    early_candidates: Mutex<Vec<IceCandidateInit>>,
    closed: AtomicBool,
}

impl WebRtcPeerLink {
    /// Create a peer connection and wire its callbacks into `events`
    pub async fn new(
        camera_id: CameraId,
        config: &RTCConfiguration,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| StreamError::Negotiation(format!("Failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| StreamError::Negotiation(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = Arc::new(
            api.new_peer_connection(to_webrtc_configuration(config))
                .await
                .map_err(|e| {
                    StreamError::Negotiation(format!("Failed to create peer connection: {}", e))
                })?,
        );

        let candidate_tx = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        log::debug!("Camera {}: gathered ICE candidate {}", camera_id, init.candidate);
                        let _ = candidate_tx.send(PeerEvent::LocalCandidate(init.into()));
                    }
                    Err(e) => log::warn!("Camera {}: unusable local candidate: {}", camera_id, e),
                }
            }
            Box::pin(async {})
        }));

        let track_tx = events.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                log::info!(
                    "Camera {}: remote {} track {} arrived",
                    camera_id,
                    track.kind(),
                    track.id()
                );
                let _ = track_tx.send(PeerEvent::Track(MediaTrack::from_remote(track)));
                Box::pin(async {})
            },
        ));

        let state_tx = events;
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                log::debug!("Camera {}: peer connection state {}", camera_id, state);
                let _ = state_tx.send(PeerEvent::StateChanged(state.into()));
                Box::pin(async {})
            },
        ));

        Ok(Self {
            camera_id,
            peer_connection,
            early_candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }
}

impl WebRtcPeerLink {
    async fn apply_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        log::debug!(
            "Adding ICE candidate for camera {}: {}",
            self.camera_id,
            candidate.candidate
        );

        self.peer_connection
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| StreamError::Negotiation(format!("Failed to add ICE candidate: {}", e)))
    }
}

#[async_trait]
impl PeerLink for WebRtcPeerLink {
    async fn add_video_receiver(&self) -> Result<()> {
        self.peer_connection
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map(|_| ())
            .map_err(|e| StreamError::Negotiation(format!("Failed to add transceiver: {}", e)))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        log::info!("Creating SDP offer for camera {}", self.camera_id);

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| StreamError::Negotiation(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| {
                StreamError::Negotiation(format!("Failed to set local description: {}", e))
            })?;

        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        log::info!("Setting remote description for camera {}", self.camera_id);

        let rtc_desc = RTCSessionDescription::try_from(desc)?;
        self.peer_connection
            .set_remote_description(rtc_desc)
            .await
            .map_err(|e| {
                StreamError::Negotiation(format!("Failed to set remote description: {}", e))
            })?;

        let early = std::mem::take(&mut *self.early_candidates.lock().await);
        for candidate in early {
            self.apply_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        if self.peer_connection.remote_description().await.is_none() {
            log::debug!(
                "Camera {}: holding ICE candidate until the answer arrives",
                self.camera_id
            );
            self.early_candidates.lock().await.push(candidate);
            return Ok(());
        }
        self.apply_candidate(candidate).await
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.peer_connection.connection_state().into()
    }

    async fn stats(&self) -> Result<PeerLinkStats> {
        let report = self.peer_connection.get_stats().await;

        let mut packets_received = 0;
        let mut bytes_received = 0;
        let mut round_trip_time_ms = None;
        for stat in report.reports.values() {
            match stat {
                StatsReportType::InboundRTP(inbound) if inbound.kind == "video" => {
                    packets_received += inbound.packets_received;
                    bytes_received += inbound.bytes_received;
                }
                StatsReportType::CandidatePair(pair) if pair.nominated => {
                    round_trip_time_ms = Some(pair.current_round_trip_time * 1000.0);
                }
                _ => {}
            }
        }

        Ok(PeerLinkStats {
            camera_id: self.camera_id,
            state: self.connection_state(),
            has_local_description: self.peer_connection.local_description().await.is_some(),
            has_remote_description: self.peer_connection.remote_description().await.is_some(),
            packets_received,
            bytes_received,
            round_trip_time_ms,
        })
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log::info!("Closing peer connection for camera {}", self.camera_id);

        self.peer_connection
            .close()
            .await
            .map_err(|e| StreamError::Negotiation(format!("Failed to close peer connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peer_link_creation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = WebRtcPeerLink::new(CameraId(1), &RTCConfiguration::default(), tx)
            .await
            .unwrap();

        assert_eq!(link.connection_state(), PeerConnectionState::New);
    }

    #[tokio::test]
    async fn test_offer_contains_recvonly_video() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = WebRtcPeerLink::new(CameraId(2), &RTCConfiguration::default(), tx)
            .await
            .unwrap();

        link.add_video_receiver().await.unwrap();
        let offer = link.create_offer().await.unwrap();

        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("v=0"));
        assert!(offer.sdp.contains("m=video"));
        assert!(offer.sdp.contains("a=recvonly"));

        let stats = link.stats().await.unwrap();
        assert!(stats.has_local_description);
        assert!(!stats.has_remote_description);
        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = WebRtcPeerLink::new(CameraId(3), &RTCConfiguration::default(), tx)
            .await
            .unwrap();

        link.close().await.unwrap();
        link.close().await.unwrap();
        assert_eq!(link.connection_state(), PeerConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_candidate_before_answer_is_held() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = WebRtcPeerLink::new(CameraId(5), &RTCConfiguration::default(), tx)
            .await
            .unwrap();

        link.add_video_receiver().await.unwrap();
        link.create_offer().await.unwrap();
        link.add_ice_candidate(IceCandidateInit {
            candidate: "candidate:1 1 UDP 2122260223 10.0.0.2 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        })
        .await
        .unwrap();

        assert_eq!(link.early_candidates.lock().await.len(), 1);
        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_answer_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = WebRtcPeerLink::new(CameraId(4), &RTCConfiguration::default(), tx)
            .await
            .unwrap();

        link.add_video_receiver().await.unwrap();
        link.create_offer().await.unwrap();
        let result = link
            .set_remote_description(SessionDescription::answer("not an sdp"))
            .await;
        assert!(matches!(result, Err(StreamError::Negotiation(_))));
        link.close().await.unwrap();
    }
}
