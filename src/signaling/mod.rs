//! Signaling transport
//!
//! A [`SignalingTransport`] opens one [`SignalingLink`] per camera
//! negotiation. Links come back in the `Connecting` state and connect in the
//! background; sends issued before the link opens are buffered for a bounded
//! time and then dropped.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::types::CameraId;

pub mod link;
pub mod message;
pub mod websocket;

pub use link::{LinkEndpoint, LinkState, SendOptions, SignalingLink};
pub use message::{answer_description, InboundMessage, OutboundMessage};
pub use websocket::WebSocketTransport;

/// Opens per-camera signaling links
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open a link for `camera_id`. Connection failures surface later as
    /// [`LinkState::Failed`], not as an error here.
    async fn open(&self, camera_id: CameraId) -> Result<Arc<SignalingLink>>;

    /// Release shared transport resources
    async fn shutdown(&self) {}
}
