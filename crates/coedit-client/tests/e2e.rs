//! End-to-end tests for the connection manager against a live relay.
//!
//! The relay mirrors the production server's contract: every text frame a
//! client sends is rebroadcast verbatim to the other clients of the same
//! document, with no transformation or acknowledgement.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use coedit_client::connection::{collaboration_url, ConnectionEvent, ConnectionManager};
use coedit_core::content::{self, Block};
use coedit_core::coordinator::{RemoteDecision, SyncCoordinator};
use coedit_core::editor::{EditorModel, InMemoryEditor};
use coedit_core::protocol::{OpKind, Operation};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};

/// A broadcast relay: frames from one client go to all the others.
struct Relay {
    addr: SocketAddr,
    /// Closes every live connection when signalled.
    kick: broadcast::Sender<()>,
}

impl Relay {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind relay");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let (bus_tx, _) = broadcast::channel::<(usize, String)>(64);
        let (kick_tx, _) = broadcast::channel::<()>(4);

        let bus = bus_tx.clone();
        let kick = kick_tx.clone();
        tokio::spawn(async move {
            let mut next_id = 0usize;
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                next_id += 1;
                let id = next_id;
                let bus_tx = bus.clone();
                let mut bus_rx = bus.subscribe();
                let mut kick_rx = kick.subscribe();

                tokio::spawn(async move {
                    let ws = match accept_async(stream).await {
                        Ok(ws) => ws,
                        Err(_) => return,
                    };
                    let (mut write, mut read) = ws.split();
                    loop {
                        tokio::select! {
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = bus_tx.send((id, text.to_string()));
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                            result = bus_rx.recv() => match result {
                                Ok((from, text)) if from != id => {
                                    if write.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(_) => {}
                                Err(_) => break,
                            },
                            _ = kick_rx.recv() => {
                                let _ = write.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                });
            }
        });

        Relay {
            addr,
            kick: kick_tx,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Close every established connection (the listener stays up).
    fn kick_all(&self) {
        let _ = self.kick.send(());
    }
}

fn doc(text: &str) -> String {
    content::to_document_json(&[Block::paragraph(text)])
}

/// Wait for the next event matching a predicate, skipping others.
async fn expect_event<F>(
    rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
    wait: Duration,
    mut matches: F,
) -> ConnectionEvent
where
    F: FnMut(&ConnectionEvent) -> bool,
{
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = timeout(remaining, rx.recv())
            .await
            .expect("Timed out waiting for event")
            .expect("Event channel closed");
        if matches(&event) {
            return event;
        }
    }
}

// ============================================================================
// Sync broadcast
// ============================================================================

#[tokio::test]
async fn test_sync_operation_reaches_other_client() {
    let relay = Relay::spawn().await;

    let (mut alice, mut alice_rx) = ConnectionManager::new(relay.url());
    let (mut bob, mut bob_rx) = ConnectionManager::new(relay.url());

    alice.connect(1, 1, "token-a").await.expect("alice connect");
    bob.connect(1, 2, "token-b").await.expect("bob connect");

    expect_event(&mut alice_rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Opened)
    })
    .await;
    expect_event(&mut bob_rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Opened)
    })
    .await;

    alice.send(&Operation::sync(1, doc("hello from alice"))).await;

    let event = expect_event(&mut bob_rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Message(_))
    })
    .await;

    match event {
        ConnectionEvent::Message(op) => {
            assert_eq!(op.user_id, 1);
            assert_eq!(op.op, OpKind::Sync);
            assert!(op.content.unwrap().contains("hello from alice"));
        }
        other => panic!("Expected Message, got {:?}", other),
    }

    alice.disconnect().await;
    bob.disconnect().await;
}

#[tokio::test]
async fn test_last_writer_wins_across_clients() {
    // Two clients of the same document: a snapshot from one overwrites the
    // other's local view wholesale.
    let relay = Relay::spawn().await;

    let (mut alice, mut alice_rx) = ConnectionManager::new(relay.url());
    let (mut bob, mut bob_rx) = ConnectionManager::new(relay.url());

    alice.connect(1, 1, "t").await.expect("alice connect");
    bob.connect(1, 2, "t").await.expect("bob connect");
    expect_event(&mut alice_rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Opened)
    })
    .await;
    expect_event(&mut bob_rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Opened)
    })
    .await;

    let mut bob_editor = InMemoryEditor::from_serialized(&doc("bob's stale view"));
    let bob_coordinator = SyncCoordinator::new(2);

    alice.send(&Operation::sync(1, doc("alice's version"))).await;

    let event = expect_event(&mut bob_rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Message(_))
    })
    .await;
    let operation = match event {
        ConnectionEvent::Message(op) => op,
        other => panic!("Expected Message, got {:?}", other),
    };

    match bob_coordinator.on_remote(&operation) {
        RemoteDecision::Apply { blocks, .. } => bob_editor.replace_all(blocks),
        other => panic!("Expected Apply, got {:?}", other),
    }

    assert_eq!(bob_editor.plain_text(), "alice's version");

    alice.disconnect().await;
    bob.disconnect().await;
}

// ============================================================================
// Malformed frames
// ============================================================================

#[tokio::test]
async fn test_malformed_frame_dropped_without_closing() {
    let relay = Relay::spawn().await;

    let (mut manager, mut rx) = ConnectionManager::new(relay.url());
    manager.connect(1, 1, "t").await.expect("connect");
    expect_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Opened)
    })
    .await;

    // A raw peer sends garbage, then a valid operation.
    let url = collaboration_url(&relay.url(), 1, "raw");
    let (mut raw, _) = connect_async(&url).await.expect("raw connect");
    raw.send(Message::Text("this is not json".into()))
        .await
        .expect("send garbage");
    raw.send(Message::Text(Operation::sync(9, doc("valid")).to_json().into()))
        .await
        .expect("send valid");

    // The manager surfaces only the valid operation; the garbage is dropped
    // silently and the socket stays open.
    let event = expect_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Message(_) | ConnectionEvent::Closed { .. })
    })
    .await;

    match event {
        ConnectionEvent::Message(op) => assert_eq!(op.user_id, 9),
        other => panic!("Socket should stay open past garbage, got {:?}", other),
    }
    assert!(manager.is_connected());

    manager.disconnect().await;
    let _ = raw.close(None).await;
}

// ============================================================================
// Reconnect behavior
// ============================================================================

#[tokio::test]
async fn test_abnormal_close_schedules_backoff_reconnect() {
    let relay = Relay::spawn().await;

    let (mut manager, mut rx) = ConnectionManager::new(relay.url());
    manager.connect(1, 1, "t").await.expect("connect");
    expect_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Opened)
    })
    .await;

    // Server drops the connection.
    let kicked_at = Instant::now();
    relay.kick_all();

    expect_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Closed { .. })
    })
    .await;
    manager.handle_closed();
    assert_eq!(manager.attempts(), 1);

    // First backoff delay is ~1s.
    let event = expect_event(&mut rx, Duration::from_secs(3), |e| {
        matches!(e, ConnectionEvent::ReconnectDue { .. })
    })
    .await;
    assert!(
        kicked_at.elapsed() >= Duration::from_millis(900),
        "Reconnect fired too early: {:?}",
        kicked_at.elapsed()
    );

    // Redialing succeeds (the listener is still up) and resets the counter.
    let generation = match event {
        ConnectionEvent::ReconnectDue { generation } => generation,
        other => panic!("Expected ReconnectDue, got {:?}", other),
    };
    manager.redial(generation).await.expect("redial");
    expect_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Opened)
    })
    .await;
    assert!(manager.is_connected());
    assert_eq!(manager.attempts(), 0);

    manager.disconnect().await;
}

#[tokio::test]
async fn test_manual_disconnect_cancels_pending_reconnect() {
    let relay = Relay::spawn().await;

    let (mut manager, mut rx) = ConnectionManager::new(relay.url());
    manager.connect(1, 1, "t").await.expect("connect");
    expect_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Opened)
    })
    .await;

    relay.kick_all();
    expect_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Closed { .. })
    })
    .await;
    manager.handle_closed();

    // Disconnect before the backoff timer fires.
    manager.disconnect().await;

    // No ReconnectDue arrives (1s delay plus margin).
    tokio::time::sleep(Duration::from_millis(1600)).await;
    let mut due = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, ConnectionEvent::ReconnectDue { .. }) {
            due = true;
        }
    }
    assert!(!due, "Manual disconnect must cancel the scheduled reconnect");
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn test_connect_failure_schedules_retry() {
    // Bind a port, then drop the listener so dialing is refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let (mut manager, mut rx) = ConnectionManager::new(format!("ws://{}", addr));
    assert!(manager.connect(1, 1, "t").await.is_err());
    assert_eq!(manager.attempts(), 1);

    // Error surfaced, then a retry is scheduled with the base delay.
    expect_event(&mut rx, Duration::from_secs(1), |e| {
        matches!(e, ConnectionEvent::Error(_))
    })
    .await;
    let event = expect_event(&mut rx, Duration::from_secs(3), |e| {
        matches!(e, ConnectionEvent::ReconnectDue { .. })
    })
    .await;

    // A failed redial keeps backing off with a doubled delay.
    let generation = match event {
        ConnectionEvent::ReconnectDue { generation } => generation,
        other => panic!("Expected ReconnectDue, got {:?}", other),
    };
    let redialed_at = Instant::now();
    assert!(manager.redial(generation).await.is_err());
    assert_eq!(manager.attempts(), 2);

    expect_event(&mut rx, Duration::from_secs(4), |e| {
        matches!(e, ConnectionEvent::ReconnectDue { .. })
    })
    .await;
    assert!(
        redialed_at.elapsed() >= Duration::from_millis(1800),
        "Second backoff should be ~2s, was {:?}",
        redialed_at.elapsed()
    );
}

#[tokio::test]
async fn test_stale_generation_does_not_redial() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let (mut manager, _rx) = ConnectionManager::new(format!("ws://{}", addr));
    assert!(manager.connect(1, 1, "t").await.is_err());
    assert_eq!(manager.attempts(), 1);

    // A ReconnectDue from a previous socket generation must be ignored.
    assert!(manager.redial(u64::MAX).await.is_ok());
    assert_eq!(manager.attempts(), 1, "Stale generation must not dial");
}

#[tokio::test]
async fn test_reidentification_is_noop() {
    let relay = Relay::spawn().await;

    let (mut manager, mut rx) = ConnectionManager::new(relay.url());
    manager.connect(1, 1, "t").await.expect("connect");
    expect_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::Opened)
    })
    .await;

    // Same identity while connected: no new socket, no second Opened.
    manager.connect(1, 1, "t").await.expect("reconnect");
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut opened_again = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, ConnectionEvent::Opened) {
            opened_again = true;
        }
    }
    assert!(!opened_again, "Identical identity must not reopen the socket");
    assert!(manager.is_connected());

    manager.disconnect().await;
}
