//! CrabView: WebRTC stream connection manager for multi-camera dashboards
//!
//! This crate opens, multiplexes, monitors and recovers live WebRTC video
//! connections to many cameras at once, negotiated over a JSON signaling
//! channel.
//!
//! # Features
//! - One negotiation session per camera, shared by concurrent callers
//! - Bounded retries with a distinct "give up" error
//! - Online/offline projection into an attachable status cache
//! - Deterministic teardown of peer connections and signaling sockets
//! - Pluggable signaling transport and media stack
//!
//! # Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use crabview::{CameraId, ConnectionManager, CrabViewConfig, InMemoryStatusCache};
//!
//! #[tokio::main]
//! async fn main() {
//!     crabview::init_logging();
//!     let config = CrabViewConfig::with_base_url("wss://nvr.example/ws/webrtc/");
//!     let manager = ConnectionManager::with_defaults(&config);
//!     manager.status().attach(Arc::new(InMemoryStatusCache::new()));
//!
//!     if let Some(stream) = manager.get_stream(CameraId(42)).await {
//!         println!("camera 42: {} video track(s)", stream.video_tracks().len());
//!     }
//!     manager.release_all_streams().await;
//! }
//! ```
pub mod config;
pub mod errors;
pub mod manager;
pub mod media;
pub mod peer;
pub mod registry;
pub mod retry;
pub mod session;
pub mod signaling;
pub mod status;
pub mod types;

// Re-exports for convenience
pub use config::CrabViewConfig;
pub use errors::StreamError;
pub use manager::ConnectionManager;
pub use media::{MediaStream, MediaTrack, TrackKind};
pub use peer::{PeerConnectionState, PeerLink, PeerLinkFactory, PeerLinkStats};
pub use registry::ConnectionRegistry;
pub use retry::RetryPolicy;
pub use session::{NegotiationSession, SessionState};
pub use signaling::{SignalingLink, SignalingTransport, WebSocketTransport};
pub use status::{InMemoryStatusCache, StatusCache, StatusProjector};
pub use types::{CameraId, CameraRecord, CameraStatus, CameraUpdate};

/// Initialize logging for the connection manager
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabview=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
