//! Reverse WebSocket client.
//!
//! Dials a consumer-hosted endpoint, pushes events over it, and answers the
//! action frames it sends. Lost connections are retried every
//! `reconnect_interval` until [`ReverseWsClient::stop`] is called.
//!
//! Every run loop carries the [`Generation`] stamp it was started with. The
//! stamp is checked before dialing, after a connection ends and after the
//! backoff timer fires, so a stopped client never dials again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tracing::{debug, info, trace, warn};

use onegate_core::{
    ActionEndpoint, ClientIdentity, EventSink, TransportError, TransportResult,
};

use crate::frame::{encode_response, handle_frame};
use crate::generation::Generation;

/// Text channel pair for one established connection.
///
/// Dropping `outgoing` closes the connection; `incoming` yields `None` once
/// the peer has gone away.
pub struct Duplex {
    pub outgoing: mpsc::Sender<String>,
    pub incoming: mpsc::Receiver<String>,
}

/// Opens connections for [`ReverseWsClient`].
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str, identity: &ClientIdentity) -> TransportResult<Duplex>;
}

/// [`Dialer`] backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteDialer;

#[async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, url: &str, identity: &ClientIdentity) -> TransportResult<Duplex> {
        let failed = |reason: String| TransportError::ConnectionFailed {
            url: url.to_string(),
            reason,
        };

        let mut request = url.into_client_request().map_err(|e| failed(e.to_string()))?;
        for (name, value) in identity.all_headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| failed(format!("WebSocket connection failed: {e}")))?;
        let (mut ws_tx, mut ws_rx) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        let (in_tx, in_rx) = mpsc::channel::<String>(256);
        let url = url.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = out_rx.recv() => match outbound {
                        Some(text) => {
                            if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                                warn!(url = %url, error = %e, "Failed to send frame");
                                break;
                            }
                        }
                        None => {
                            let _ = ws_tx.close().await;
                            break;
                        }
                    },
                    inbound = ws_rx.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(text.as_str().to_string()).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            let text = String::from_utf8_lossy(&data).into_owned();
                            if in_tx.send(text).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            trace!(url = %url, "Received ping, sending pong");
                            let _ = ws_tx.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            info!(url = %url, frame = ?frame, "Server closed connection");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(url = %url, error = %e, "WebSocket error");
                            break;
                        }
                        None => {
                            info!(url = %url, "WebSocket stream ended");
                            break;
                        }
                    },
                }
            }
        });

        Ok(Duplex {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

/// Connection state of a [`ReverseWsClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    /// Backing off before the next attempt.
    Waiting,
    Stopped,
}

struct ClientInner {
    url: String,
    identity: ClientIdentity,
    reconnect_interval: Duration,
    endpoint: Arc<dyn ActionEndpoint>,
    dialer: Arc<dyn Dialer>,
    generation: Generation,
    state: Mutex<LinkState>,
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
    attempts: AtomicU64,
}

/// Reverse WebSocket connection to one consumer.
#[derive(Clone)]
pub struct ReverseWsClient {
    inner: Arc<ClientInner>,
}

impl ReverseWsClient {
    pub fn new(
        url: impl Into<String>,
        identity: ClientIdentity,
        reconnect_interval: Duration,
        endpoint: Arc<dyn ActionEndpoint>,
    ) -> Self {
        Self::with_dialer(
            url,
            identity,
            reconnect_interval,
            endpoint,
            Arc::new(TungsteniteDialer),
        )
    }

    pub fn with_dialer(
        url: impl Into<String>,
        identity: ClientIdentity,
        reconnect_interval: Duration,
        endpoint: Arc<dyn ActionEndpoint>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                url: url.into(),
                identity,
                reconnect_interval,
                endpoint,
                dialer,
                generation: Generation::new(),
                state: Mutex::new(LinkState::Idle),
                outgoing: Mutex::new(None),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.lock()
    }

    /// Number of dial attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    /// Starts the connect loop. A running loop is replaced.
    pub fn start(&self) {
        let stamp = self.inner.generation.advance();
        *self.inner.state.lock() = LinkState::Connecting;
        tokio::spawn(Arc::clone(&self.inner).run(stamp));
    }

    /// Stops the client; pending reconnect timers become no-ops.
    pub fn stop(&self) {
        self.inner.generation.advance();
        *self.inner.state.lock() = LinkState::Stopped;
        self.inner.outgoing.lock().take();
        debug!(url = %self.inner.url, "Reverse WebSocket client stopped");
    }
}

impl ClientInner {
    async fn run(self: Arc<Self>, stamp: u64) {
        let mut changes = self.generation.subscribe();
        loop {
            if !self.generation.is_current(stamp) {
                return;
            }

            self.set_state(stamp, LinkState::Connecting);
            self.attempts.fetch_add(1, Ordering::Relaxed);
            match self.dialer.dial(&self.url, &self.identity).await {
                Ok(duplex) => {
                    if !self.generation.is_current(stamp) {
                        return;
                    }
                    info!(url = %self.url, "Reverse WebSocket connected");
                    self.set_state(stamp, LinkState::Connected);
                    self.serve(duplex, stamp).await;
                    info!(url = %self.url, "Reverse WebSocket disconnected");
                }
                Err(e) => {
                    debug!(url = %self.url, error = %e, "Reverse WebSocket connection failed");
                }
            }

            if !self.generation.is_current(stamp) {
                return;
            }
            self.set_state(stamp, LinkState::Waiting);
            debug!(url = %self.url, delay = ?self.reconnect_interval, "Reconnecting...");

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_interval) => {}
                _ = changes.changed() => {}
            }
            if !self.generation.is_current(stamp) {
                trace!(url = %self.url, "Reconnect timer outlived its client");
                return;
            }
        }
    }

    async fn serve(&self, duplex: Duplex, stamp: u64) {
        let Duplex {
            outgoing,
            mut incoming,
        } = duplex;
        *self.outgoing.lock() = Some(outgoing.clone());

        for frame in self.endpoint.greeting_frames() {
            if outgoing.send(frame).await.is_err() {
                break;
            }
        }

        let mut changes = self.generation.subscribe();
        if !self.generation.is_current(stamp) {
            return;
        }
        loop {
            tokio::select! {
                frame = incoming.recv() => {
                    let Some(text) = frame else { break };
                    let endpoint = Arc::clone(&self.endpoint);
                    let reply = outgoing.clone();
                    tokio::spawn(async move {
                        let response = handle_frame(endpoint.as_ref(), &text).await;
                        if let Some(encoded) = encode_response(&response) {
                            let _ = reply.send(encoded).await;
                        }
                    });
                }
                changed = changes.changed() => {
                    if changed.is_err() || !self.generation.is_current(stamp) {
                        break;
                    }
                }
            }
        }

        if self.generation.is_current(stamp) {
            self.outgoing.lock().take();
        }
    }

    fn set_state(&self, stamp: u64, state: LinkState) {
        let mut current = self.state.lock();
        if self.generation.is_current(stamp) {
            *current = state;
        }
    }
}

#[async_trait]
impl EventSink for ReverseWsClient {
    fn describe(&self) -> String {
        format!("reverse ws {}", self.inner.url)
    }

    async fn push(&self, payload: Arc<str>) -> Option<Value> {
        let sender = self.inner.outgoing.lock().clone();
        match sender {
            Some(sender) => {
                if sender.send(payload.to_string()).await.is_err() {
                    debug!(url = %self.inner.url, "Connection closed while pushing event");
                }
            }
            None => trace!(url = %self.inner.url, "Not connected, event dropped"),
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;
    use crate::frame::testing::RecordingEndpoint;

    struct Peer {
        to_client: mpsc::Sender<String>,
        from_client: mpsc::Receiver<String>,
    }

    #[derive(Default)]
    struct LoopbackDialer {
        fail: bool,
        dials: AtomicUsize,
        peers: Mutex<Vec<Peer>>,
    }

    #[async_trait]
    impl Dialer for LoopbackDialer {
        async fn dial(&self, url: &str, _identity: &ClientIdentity) -> TransportResult<Duplex> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransportError::ConnectionFailed {
                    url: url.to_string(),
                    reason: "refused".into(),
                });
            }
            let (out_tx, out_rx) = mpsc::channel(16);
            let (in_tx, in_rx) = mpsc::channel(16);
            self.peers.lock().push(Peer {
                to_client: in_tx,
                from_client: out_rx,
            });
            Ok(Duplex {
                outgoing: out_tx,
                incoming: in_rx,
            })
        }
    }

    fn client(dialer: Arc<LoopbackDialer>) -> ReverseWsClient {
        ReverseWsClient::with_dialer(
            "ws://consumer/onebot",
            ClientIdentity::default(),
            Duration::from_secs(3),
            RecordingEndpoint::shared(),
            dialer,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff_prevents_reconnect() {
        let dialer = Arc::new(LoopbackDialer {
            fail: true,
            ..Default::default()
        });
        let client = client(Arc::clone(&dialer));

        client.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), LinkState::Waiting);

        client.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), LinkState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_disconnect_prevents_reconnect() {
        let dialer = Arc::new(LoopbackDialer::default());
        let client = client(Arc::clone(&dialer));

        client.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.state(), LinkState::Connected);

        drop(dialer.peers.lock().remove(0));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.state(), LinkState::Waiting);

        tokio::time::sleep(Duration::from_secs(1)).await;
        client.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), LinkState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dial_retries_after_interval() {
        let dialer = Arc::new(LoopbackDialer {
            fail: true,
            ..Default::default()
        });
        let client = client(Arc::clone(&dialer));

        client.start();
        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 2);
        client.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_session() {
        let dialer = Arc::new(LoopbackDialer::default());
        let client = client(Arc::clone(&dialer));

        client.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.state(), LinkState::Connected);
        let mut peer = dialer.peers.lock().remove(0);

        let greeting = peer.from_client.recv().await.unwrap();
        assert!(greeting.contains("lifecycle"));

        peer.to_client
            .send(r#"{"action":"get_status","params":{},"echo":"e-9"}"#.into())
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&peer.from_client.recv().await.unwrap()).unwrap();
        assert_eq!(reply["status"], "ok");
        assert_eq!(reply["echo"], json!("e-9"));

        client.push(Arc::from(r#"{"post_type":"notice"}"#)).await;
        assert_eq!(
            peer.from_client.recv().await.unwrap(),
            r#"{"post_type":"notice"}"#
        );

        // Peer hangs up; the client waits out the interval and redials.
        drop(peer);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.state(), LinkState::Waiting);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 2);

        client.stop();
    }
}
