//! ConnectionManager: one live collaboration socket per document session.
//!
//! Owns at most one WebSocket for a (document, user, credential) identity.
//! Abnormal closures schedule reconnects with exponential backoff (base
//! 1000 ms, doubling, capped at 5 attempts); a manual `disconnect` cancels
//! any pending reconnect and clears the identity. Calling `connect` again
//! with the same identity while connected is a no-op, so sessions never
//! open redundant sockets.
//!
//! Sends are best-effort: when the socket is not open the operation is
//! dropped, not queued. Inbound frames that fail to parse are logged and
//! dropped without closing the connection.

use coedit_core::protocol::{ConnectionState, Operation};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

/// Give up after this many consecutive failed reconnect attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base delay for exponential backoff.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("No session identity; call connect first")]
    NoIdentity,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Identity of one collaboration session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub document_id: i64,
    pub user_id: i64,
    pub token: String,
}

/// Event emitted by the connection manager.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Socket opened (initial connect or reconnect).
    Opened,
    /// Parsed inbound operation.
    Message(Operation),
    /// Transport-level error; the session stays alive.
    Error(String),
    /// Socket closed. The session decides whether to schedule a reconnect
    /// via `handle_closed`.
    Closed { code: Option<u16> },
    /// A scheduled backoff delay elapsed; answer with `redial`.
    ReconnectDue { generation: u64 },
}

/// Backoff delay before reconnect attempt `attempt` (1-based):
/// `base * 2^(attempt-1)`.
pub fn reconnect_delay(attempt: u32) -> Duration {
    RECONNECT_BASE_DELAY * 2u32.pow(attempt.saturating_sub(1))
}

/// Whether another automatic reconnect should be scheduled.
pub fn should_reconnect(attempts: u32, manual_close: bool, has_identity: bool) -> bool {
    has_identity && !manual_close && attempts < MAX_RECONNECT_ATTEMPTS
}

/// Collaboration endpoint URL for a document.
pub fn collaboration_url(server_url: &str, document_id: i64, token: &str) -> String {
    format!(
        "{}/ws/collaboration/{}?token={}",
        server_url.trim_end_matches('/'),
        document_id,
        urlencoding::encode(token)
    )
}

/// Derive the WebSocket base URL from an HTTP base URL.
pub fn ws_base_from_http(http_url: &str) -> String {
    if let Some(rest) = http_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = http_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        http_url.to_string()
    }
}

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSED: u8 = 3;

/// Manages the single live socket of a document session.
pub struct ConnectionManager {
    /// WebSocket base URL, e.g. `ws://localhost:8000`.
    server_url: String,
    /// Current identity; cleared on manual disconnect.
    identity: Option<SessionIdentity>,
    /// Write half of the live socket.
    write: Option<Arc<Mutex<WsSink>>>,
    /// Handle to the read task.
    read_task: Option<JoinHandle<()>>,
    /// Handle to the pending backoff timer, if any.
    reconnect_task: Option<JoinHandle<()>>,
    /// Consecutive failed attempts; reset when a socket opens.
    attempts: u32,
    /// Set by `disconnect`; suppresses all reconnect scheduling.
    manual_close: bool,
    /// Bumped on every teardown so stale ReconnectDue events are ignored.
    generation: u64,
    /// Transport state shared with the read task.
    state: Arc<AtomicU8>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a manager for a WebSocket base URL.
    pub fn new(server_url: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                server_url: server_url.into(),
                identity: None,
                write: None,
                read_task: None,
                reconnect_task: None,
                attempts: 0,
                manual_close: false,
                generation: 0,
                state: Arc::new(AtomicU8::new(STATE_CLOSED)),
                event_tx,
            },
            event_rx,
        )
    }

    /// Observed transport state.
    pub fn state(&self) -> ConnectionState {
        if self.write.is_none() {
            return ConnectionState::Closed;
        }
        match self.state.load(Ordering::SeqCst) {
            STATE_CONNECTING => ConnectionState::Connecting,
            STATE_OPEN => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Consecutive failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Open a socket for a session identity.
    ///
    /// Tears down any previous socket first; at most one is ever live. A
    /// repeated call with an identical identity while connected is a no-op.
    /// A failed dial schedules a backoff retry before returning the error.
    pub async fn connect(&mut self, document_id: i64, user_id: i64, token: &str) -> Result<()> {
        let identity = SessionIdentity {
            document_id,
            user_id,
            token: token.to_string(),
        };

        if self.identity.as_ref() == Some(&identity) && self.is_connected() {
            debug!("Already connected to document {}; skipping", document_id);
            return Ok(());
        }

        self.teardown().await;
        self.identity = Some(identity);
        self.manual_close = false;
        self.attempts = 0;

        match self.dial().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.event_tx.send(ConnectionEvent::Error(e.to_string()));
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    /// Close the socket and forget the session identity.
    ///
    /// Any scheduled reconnect is cancelled and will not fire.
    pub async fn disconnect(&mut self) {
        self.manual_close = true;
        self.teardown().await;
        self.identity = None;
        info!("Disconnected");
    }

    /// Best-effort send: dropped when the socket is not open.
    pub async fn send(&self, operation: &Operation) {
        if !self.is_connected() {
            debug!("Send skipped; socket not open ({:?})", self.state());
            return;
        }
        if let Some(write) = &self.write {
            let mut w = write.lock().await;
            if let Err(e) = w.send(Message::Text(operation.to_json().into())).await {
                warn!("Failed to send operation: {}", e);
            }
        }
    }

    /// React to a `Closed` event: schedule a backoff reconnect unless the
    /// close was manual or the attempt budget is spent.
    pub fn handle_closed(&mut self) {
        self.write = None;
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        self.schedule_reconnect();
    }

    /// Answer a `ReconnectDue` event. Stale generations (a newer connect or
    /// disconnect happened meanwhile) are ignored.
    pub async fn redial(&mut self, generation: u64) -> Result<()> {
        if generation != self.generation || self.manual_close {
            debug!("Ignoring stale reconnect (generation {})", generation);
            return Ok(());
        }
        if self.identity.is_none() {
            return Ok(());
        }

        info!("Reconnecting (attempt {})", self.attempts);
        match self.dial().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.event_tx.send(ConnectionEvent::Error(e.to_string()));
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    async fn dial(&mut self) -> Result<()> {
        let identity = self.identity.clone().ok_or(TransportError::NoIdentity)?;
        let url = collaboration_url(&self.server_url, identity.document_id, &identity.token);

        self.state.store(STATE_CONNECTING, Ordering::SeqCst);
        let (ws_stream, _) = match connect_async(&url).await {
            Ok(ok) => ok,
            Err(e) => {
                self.state.store(STATE_CLOSED, Ordering::SeqCst);
                return Err(TransportError::ConnectionFailed(e.to_string()));
            }
        };

        let (write, read) = ws_stream.split();
        self.write = Some(Arc::new(Mutex::new(write)));
        self.state.store(STATE_OPEN, Ordering::SeqCst);
        self.attempts = 0;

        let event_tx = self.event_tx.clone();
        let state = Arc::clone(&self.state);
        let _ = event_tx.send(ConnectionEvent::Opened);
        self.read_task = Some(tokio::spawn(async move {
            Self::read_loop(read, event_tx, state).await;
        }));

        info!("Connected to document {}", identity.document_id);
        Ok(())
    }

    /// Read loop that forwards parsed operations to the event channel.
    async fn read_loop(
        mut read: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
        state: Arc<AtomicU8>,
    ) {
        let mut close_code = None;
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let text = match msg {
                        Message::Text(text) => text.to_string(),
                        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                debug!("Dropping non-UTF-8 binary frame");
                                continue;
                            }
                        },
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(frame) => {
                            close_code = frame.map(|f| u16::from(f.code));
                            debug!("Received close frame (code {:?})", close_code);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    match Operation::from_json(&text) {
                        Some(operation) => {
                            let _ = event_tx.send(ConnectionEvent::Message(operation));
                        }
                        None => {
                            // Malformed payloads are dropped, never fatal.
                            debug!("Dropping malformed operation ({} bytes)", text.len());
                        }
                    }
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection closed");
                        }
                        _ => {
                            error!("WebSocket error: {}", e);
                            let _ = event_tx.send(ConnectionEvent::Error(e.to_string()));
                        }
                    }
                    break;
                }
                None => {
                    debug!("Stream ended");
                    break;
                }
            }
        }

        state.store(STATE_CLOSED, Ordering::SeqCst);
        let _ = event_tx.send(ConnectionEvent::Closed { code: close_code });
    }

    fn schedule_reconnect(&mut self) {
        if !should_reconnect(self.attempts, self.manual_close, self.identity.is_some()) {
            if self.attempts >= MAX_RECONNECT_ATTEMPTS {
                warn!(
                    "Giving up after {} reconnect attempts; call connect again to retry",
                    self.attempts
                );
            }
            return;
        }

        self.attempts += 1;
        let delay = reconnect_delay(self.attempts);
        let generation = self.generation;
        let event_tx = self.event_tx.clone();

        info!(
            "Scheduling reconnect in {:?} (attempt {})",
            delay, self.attempts
        );
        self.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = event_tx.send(ConnectionEvent::ReconnectDue { generation });
        }));
    }

    /// Close the socket and cancel pending work. Bumping the generation
    /// invalidates any in-flight ReconnectDue event.
    async fn teardown(&mut self) {
        self.generation += 1;

        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
        if let Some(write) = self.write.take() {
            if let Ok(mut w) = write.try_lock() {
                let _ = w.send(Message::Close(None)).await;
            }
        }
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Backoff calculation ====================

    #[test]
    fn test_reconnect_delay_exponential() {
        // 1s, 2s, 4s, 8s, 16s
        assert_eq!(reconnect_delay(1), Duration::from_millis(1000));
        assert_eq!(reconnect_delay(2), Duration::from_millis(2000));
        assert_eq!(reconnect_delay(3), Duration::from_millis(4000));
        assert_eq!(reconnect_delay(4), Duration::from_millis(8000));
        assert_eq!(reconnect_delay(5), Duration::from_millis(16000));
    }

    #[test]
    fn test_reconnect_delay_zero_attempt() {
        assert_eq!(reconnect_delay(0), Duration::from_millis(1000));
    }

    #[test]
    fn test_should_reconnect_respects_attempt_cap() {
        assert!(should_reconnect(0, false, true));
        assert!(should_reconnect(4, false, true));
        assert!(!should_reconnect(5, false, true));
        assert!(!should_reconnect(9, false, true));
    }

    #[test]
    fn test_should_reconnect_blocked_by_manual_close() {
        assert!(!should_reconnect(0, true, true));
    }

    #[test]
    fn test_should_reconnect_requires_identity() {
        assert!(!should_reconnect(0, false, false));
    }

    // ==================== URL building ====================

    #[test]
    fn test_collaboration_url() {
        let url = collaboration_url("ws://localhost:8000", 42, "abc123");
        assert_eq!(url, "ws://localhost:8000/ws/collaboration/42?token=abc123");
    }

    #[test]
    fn test_collaboration_url_encodes_token() {
        let url = collaboration_url("ws://localhost:8000/", 1, "a+b/c=");
        assert_eq!(url, "ws://localhost:8000/ws/collaboration/1?token=a%2Bb%2Fc%3D");
    }

    #[test]
    fn test_ws_base_from_http() {
        assert_eq!(ws_base_from_http("http://localhost:8000"), "ws://localhost:8000");
        assert_eq!(ws_base_from_http("https://example.com"), "wss://example.com");
        assert_eq!(ws_base_from_http("ws://already"), "ws://already");
    }

    // ==================== Manager state ====================

    #[tokio::test]
    async fn test_manager_starts_disconnected() {
        let (manager, _rx) = ConnectionManager::new("ws://localhost:9");

        assert!(!manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(manager.attempts(), 0);
    }

    #[tokio::test]
    async fn test_send_without_socket_is_noop() {
        let (manager, _rx) = ConnectionManager::new("ws://localhost:9");
        // Must not panic or error.
        manager.send(&Operation::sync(1, "{}")).await;
    }

    // Note: reconnect and broadcast behavior need a live relay and are
    // covered by tests/e2e.rs.
}
