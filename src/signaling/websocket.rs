//! WebSocket signaling transport
//!
//! One socket per link, connected to `<base_url><camera_id>`. The socket
//! task owns the stream and drives the link's [`LinkEndpoint`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::link::{LinkEndpoint, SendOptions, SignalingLink};
use super::SignalingTransport;
use crate::config::SignalingConfig;
use crate::errors::Result;
use crate::types::CameraId;

/// Signaling transport over tokio-tungstenite
///
/// Every socket task runs under a child of the transport's shutdown token.
/// `shutdown` stops them all and arms a fresh token for later links.
pub struct WebSocketTransport {
    base_url: String,
    options: SendOptions,
    shutdown: Mutex<CancellationToken>,
}

impl WebSocketTransport {
    pub fn new(config: &SignalingConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            options: SendOptions::from(config),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    fn shutdown_token(&self) -> CancellationToken {
        match self.shutdown.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn endpoint_url(&self, camera_id: CameraId) -> String {
        format!("{}{}", self.base_url, camera_id)
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn open(&self, camera_id: CameraId) -> Result<Arc<SignalingLink>> {
        let (link, endpoint) =
            SignalingLink::channel_with_token(camera_id, self.options, self.shutdown_token().child_token());
        let url = self.endpoint_url(camera_id);

        log::debug!("Camera {}: opening signaling socket {}", camera_id, url);
        tokio::spawn(run_socket(url, endpoint));

        Ok(Arc::new(link))
    }

    async fn shutdown(&self) {
        log::info!("Shutting down signaling sockets");
        let previous = match self.shutdown.lock() {
            Ok(mut token) => std::mem::replace(&mut *token, CancellationToken::new()),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), CancellationToken::new()),
        };
        previous.cancel();
    }
}

async fn run_socket(url: String, mut endpoint: LinkEndpoint) {
    let camera_id = endpoint.camera_id();
    let stop = endpoint.stop_token();

    let connect = tokio::select! {
        biased;
        _ = stop.cancelled() => {
            endpoint.mark_closed();
            return;
        }
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };

    let ws_stream = match connect {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            endpoint.fail(format!("Failed to connect to {}: {}", url, e));
            return;
        }
    };

    endpoint.mark_open();
    log::info!("Camera {}: signaling socket connected", camera_id);

    let (mut writer, mut reader) = ws_stream.split();

    loop {
        tokio::select! {
            outbound = endpoint.next_outbound() => {
                let Some(message) = outbound else {
                    let _ = writer.send(Message::Close(None)).await;
                    endpoint.mark_closed();
                    break;
                };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        log::warn!("Camera {}: failed to encode signaling message: {}", camera_id, e);
                        continue;
                    }
                };
                if let Err(e) = writer.send(Message::Text(json)).await {
                    endpoint.fail(format!("Signaling send failed: {}", e));
                    break;
                }
            }
            frame = reader.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        endpoint.deliver_text(&text);
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            endpoint.deliver_text(text);
                        }
                        Err(_) => {
                            log::warn!("Camera {}: dropping non UTF-8 binary frame", camera_id);
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Camera {}: signaling socket closed by remote", camera_id);
                        endpoint.mark_closed();
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        endpoint.fail(format!("Signaling socket error: {}", e));
                        break;
                    }
                }
            }
        }
    }
}
