//! Signaling wire protocol
//!
//! JSON messages tagged by `type`. Outbound messages carry the camera id;
//! inbound answers arrive either with a nested `data` description or with
//! flat `sdp`/`sdpType` fields, and both forms are accepted.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StreamError};
use crate::peer::{IceCandidateInit, SdpType, SessionDescription};
use crate::types::CameraId;

/// Messages this client sends to the signaling endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    Offer {
        sdp: String,
        #[serde(rename = "cameraId")]
        camera_id: CameraId,
    },
    IceCandidate {
        data: IceCandidateInit,
        #[serde(rename = "cameraId")]
        camera_id: CameraId,
    },
}

/// Messages the signaling endpoint sends back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<SessionDescription>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdp: Option<String>,
        #[serde(default, rename = "sdpType", skip_serializing_if = "Option::is_none")]
        sdp_type: Option<String>,
    },
    IceCandidate {
        data: IceCandidateInit,
    },
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Answer with the description nested under `data`
    pub fn nested_answer(sdp: impl Into<String>) -> Self {
        InboundMessage::Answer {
            data: Some(SessionDescription::answer(sdp)),
            sdp: None,
            sdp_type: None,
        }
    }

    /// Answer with flat `sdp` / `sdpType` fields
    pub fn flat_answer(sdp: impl Into<String>) -> Self {
        InboundMessage::Answer {
            data: None,
            sdp: Some(sdp.into()),
            sdp_type: Some("answer".to_string()),
        }
    }

    /// Parse a text frame. `None` for anything that is not a known message.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<InboundMessage>(text) {
            Ok(InboundMessage::Unknown) => {
                log::debug!("Ignoring signaling message of unknown type: {}", text);
                None
            }
            Ok(message) => Some(message),
            Err(e) => {
                log::warn!("Dropping malformed signaling payload: {}", e);
                None
            }
        }
    }
}

/// Resolve either answer form into a session description.
///
/// The nested form wins when both are present.
pub fn answer_description(
    data: Option<SessionDescription>,
    sdp: Option<String>,
    sdp_type: Option<String>,
) -> Result<SessionDescription> {
    if let Some(desc) = data {
        return Ok(desc);
    }

    let sdp = sdp.ok_or_else(|| StreamError::Negotiation("Answer carried no SDP".to_string()))?;
    let sdp_type = match sdp_type.as_deref() {
        None => SdpType::Answer,
        Some(raw) => SdpType::parse(raw).ok_or_else(|| {
            StreamError::Negotiation(format!("Unsupported answer sdpType {:?}", raw))
        })?,
    };
    Ok(SessionDescription { sdp_type, sdp })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_format() {
        let msg = OutboundMessage::Offer {
            sdp: "v=0".to_string(),
            camera_id: CameraId(42),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0");
        assert_eq!(json["cameraId"], 42);
    }

    #[test]
    fn test_ice_candidate_wire_format() {
        let msg = OutboundMessage::IceCandidate {
            data: IceCandidateInit {
                candidate: "candidate:1".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
            camera_id: CameraId(5),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ice-candidate");
        assert_eq!(json["data"]["candidate"], "candidate:1");
        assert_eq!(json["data"]["sdpMLineIndex"], 0);
        assert_eq!(json["cameraId"], 5);
    }

    #[test]
    fn test_nested_answer_is_accepted() {
        let msg = InboundMessage::parse(
            r#"{"type":"answer","data":{"type":"answer","sdp":"v=0\r\n"}}"#,
        )
        .unwrap();
        let InboundMessage::Answer { data, sdp, sdp_type } = msg else {
            panic!("expected answer");
        };
        let desc = answer_description(data, sdp, sdp_type).unwrap();
        assert_eq!(desc, SessionDescription::answer("v=0\r\n"));
    }

    #[test]
    fn test_flat_answer_is_accepted() {
        let msg =
            InboundMessage::parse(r#"{"type":"answer","sdp":"v=0\r\n","sdpType":"answer"}"#)
                .unwrap();
        let InboundMessage::Answer { data, sdp, sdp_type } = msg else {
            panic!("expected answer");
        };
        let desc = answer_description(data, sdp, sdp_type).unwrap();
        assert_eq!(desc.sdp_type, SdpType::Answer);
        assert_eq!(desc.sdp, "v=0\r\n");
    }

    #[test]
    fn test_flat_answer_without_type_defaults_to_answer() {
        let desc = answer_description(None, Some("v=0".to_string()), None).unwrap();
        assert_eq!(desc.sdp_type, SdpType::Answer);
    }

    #[test]
    fn test_answer_without_sdp_is_a_negotiation_error() {
        let result = answer_description(None, None, Some("answer".to_string()));
        assert!(matches!(result, Err(StreamError::Negotiation(_))));
    }

    #[test]
    fn test_inbound_candidate() {
        let msg = InboundMessage::parse(
            r#"{"type":"ice-candidate","data":{"candidate":"candidate:2","sdpMid":"0","sdpMLineIndex":0}}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::IceCandidate { data } => {
                assert_eq!(data.candidate, "candidate:2");
                assert_eq!(data.sdp_mid.as_deref(), Some("0"));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_malformed_and_unknown_payloads_are_dropped() {
        assert!(InboundMessage::parse("{not json").is_none());
        assert!(InboundMessage::parse(r#"{"sdp":"missing type"}"#).is_none());
        assert!(InboundMessage::parse(r#"{"type":"ping"}"#).is_none());
        assert!(InboundMessage::parse(r#"{"type":"ice-candidate"}"#).is_none());
    }
}
