use std::time::Duration;

use thiserror::Error;

use crate::types::CameraId;

/// Errors produced while negotiating or managing camera streams.
///
/// Every session-fatal variant is caught at the session boundary, logged and
/// projected into an `offline` status write. Only [`StreamError::Exhausted`]
/// is meant to be acted on by UI code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("Signaling transport error: {0}")]
    Transport(String),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Negotiation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Camera {camera_id}: giving up after {attempts} failed attempts")]
    Exhausted { camera_id: CameraId, attempts: u32 },

    #[error("Camera {0} already has a live session")]
    AlreadyActive(CameraId),

    #[error("Session closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StreamError {
    /// True when the retry budget for the camera is spent.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, StreamError::Exhausted { .. })
    }

    /// Whether the error ends the session and counts against the retry budget.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            StreamError::Transport(_) | StreamError::Negotiation(_) | StreamError::Timeout(_)
        )
    }
}

impl From<webrtc::Error> for StreamError {
    fn from(err: webrtc::Error) -> Self {
        StreamError::Negotiation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
