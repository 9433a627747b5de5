//! Integration tests for the WebSocket relay.
//!
//! These start a real relay and connect real clients, covering fan-out,
//! snapshot-on-subscribe and removal of a closed connection's paths.

use easel_collab::channel::{
    ChannelEvent, ChannelPath, CursorRecord, EphemeralChannel, EphemeralValue, StreamKind,
};
use easel_collab::relay::{RelayClient, RelayConfig, RelayServer};
use easel_collab::session::{BoardSession, SessionConfig};
use easel_collab::storage::MemoryStore;
use easel_collab::subscription::Subscription;
use easel_core::{ElementBody, ElementKind, NoteBody, UserId};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a relay on a free port, return its URL.
async fn start_test_relay() -> String {
    let port = free_port().await;
    let server = RelayServer::new(RelayConfig::for_testing(format!("127.0.0.1:{port}")));
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give the relay time to bind
    sleep(Duration::from_millis(50)).await;
    format!("ws://127.0.0.1:{port}")
}

fn cursor_path(user: &str) -> ChannelPath {
    ChannelPath::stream(&"board".into(), StreamKind::Cursors, &user.into())
}

fn cursor(x: f64, y: f64, at: u64) -> EphemeralValue {
    EphemeralValue::Cursor(CursorRecord { x, y, updated_at: at })
}

async fn next_event(sub: &mut Subscription<ChannelEvent>) -> ChannelEvent {
    timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("no event within 2s")
        .expect("subscription ended")
}

#[tokio::test]
async fn test_client_connects() {
    let url = start_test_relay().await;
    let client = RelayClient::connect(&url).await;
    assert!(client.is_ok(), "Should connect to relay");
    assert!(!client.unwrap().is_closed());
}

#[tokio::test]
async fn test_connect_to_missing_relay_fails() {
    let port = free_port().await;
    let result = RelayClient::connect(format!("ws://127.0.0.1:{port}")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_set_fans_out_to_subscribers() {
    let url = start_test_relay().await;
    let alice = RelayClient::connect(&url).await.unwrap();
    let bob = RelayClient::connect(&url).await.unwrap();

    let mut sub = bob
        .subscribe(&ChannelPath::board_prefix(&"board".into()))
        .await
        .unwrap();
    sleep(Duration::from_millis(20)).await;

    alice.set(&cursor_path("alice"), cursor(1.0, 2.0, 10)).await.unwrap();
    match next_event(&mut sub).await {
        ChannelEvent::Set { path, value } => {
            assert_eq!(path, cursor_path("alice"));
            assert_eq!(value, cursor(1.0, 2.0, 10));
        }
        other => panic!("Expected Set, got {other:?}"),
    }

    alice.remove(&cursor_path("alice")).await.unwrap();
    assert_eq!(
        next_event(&mut sub).await,
        ChannelEvent::Removed { path: cursor_path("alice") }
    );
}

#[tokio::test]
async fn test_subscribe_delivers_existing_values() {
    let url = start_test_relay().await;
    let alice = RelayClient::connect(&url).await.unwrap();
    alice.set(&cursor_path("alice"), cursor(5.0, 5.0, 1)).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let bob = RelayClient::connect(&url).await.unwrap();
    let mut sub = bob
        .subscribe(&ChannelPath::kind_prefix(&"board".into(), StreamKind::Cursors))
        .await
        .unwrap();
    assert!(matches!(next_event(&mut sub).await, ChannelEvent::Set { .. }));
}

#[tokio::test]
async fn test_other_boards_are_filtered() {
    let url = start_test_relay().await;
    let alice = RelayClient::connect(&url).await.unwrap();
    let bob = RelayClient::connect(&url).await.unwrap();

    let mut sub = bob
        .subscribe(&ChannelPath::board_prefix(&"board".into()))
        .await
        .unwrap();
    sleep(Duration::from_millis(20)).await;

    let elsewhere = ChannelPath::stream(&"board-2".into(), StreamKind::Cursors, &"alice".into());
    alice.set(&elsewhere, cursor(0.0, 0.0, 1)).await.unwrap();
    alice.set(&cursor_path("alice"), cursor(3.0, 3.0, 2)).await.unwrap();

    match next_event(&mut sub).await {
        ChannelEvent::Set { path, .. } => assert_eq!(path, cursor_path("alice")),
        other => panic!("Expected Set, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_removes_registered_paths() {
    let url = start_test_relay().await;
    let alice = RelayClient::connect(&url).await.unwrap();
    let bob = RelayClient::connect(&url).await.unwrap();

    let mut sub = bob
        .subscribe(&ChannelPath::board_prefix(&"board".into()))
        .await
        .unwrap();
    sleep(Duration::from_millis(20)).await;

    alice.on_disconnect_remove(&cursor_path("alice")).await.unwrap();
    alice.set(&cursor_path("alice"), cursor(9.0, 9.0, 1)).await.unwrap();
    assert!(matches!(next_event(&mut sub).await, ChannelEvent::Set { .. }));

    alice.disconnect().await.unwrap();
    assert!(alice.is_closed());
    assert_eq!(
        next_event(&mut sub).await,
        ChannelEvent::Removed { path: cursor_path("alice") }
    );
    assert!(alice.set(&cursor_path("alice"), cursor(0.0, 0.0, 2)).await.is_err());
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let url = start_test_relay().await;
    let alice = RelayClient::connect(&url).await.unwrap();
    let bob = RelayClient::connect(&url).await.unwrap();

    let sub = bob
        .subscribe(&ChannelPath::board_prefix(&"board".into()))
        .await
        .unwrap();
    assert_eq!(bob.route_count(), 1);
    sub.unsubscribe();
    assert_eq!(bob.route_count(), 0);
    sleep(Duration::from_millis(20)).await;

    // Bob's second subscription only sees what arrives after it.
    let mut later = bob
        .subscribe(&ChannelPath::kind_prefix(&"board".into(), StreamKind::Selections))
        .await
        .unwrap();
    alice.set(&cursor_path("alice"), cursor(1.0, 1.0, 1)).await.unwrap();
    let got = timeout(Duration::from_millis(200), later.recv()).await;
    assert!(got.is_err());
}

#[tokio::test]
async fn test_failed_subscribe_leaves_no_route() {
    let url = start_test_relay().await;
    let client = RelayClient::connect(&url).await.unwrap();
    client.disconnect().await.unwrap();

    let result = client.subscribe(&ChannelPath::board_prefix(&"board".into())).await;
    assert!(result.is_err());
    assert_eq!(client.route_count(), 0);
}

#[tokio::test]
async fn test_sessions_over_relay() {
    let url = start_test_relay().await;
    let store = Arc::new(MemoryStore::new());

    let open = |user: &'static str| {
        let store = store.clone();
        let url = url.clone();
        async move {
            let channel = RelayClient::connect(&url).await.unwrap();
            let session = BoardSession::open(
                "board".into(),
                user.into(),
                store,
                Arc::new(channel),
                SessionConfig::for_testing(),
            )
            .await
            .unwrap();
            session.ready().await.unwrap();
            session
        }
    };
    let alice = open("alice").await;
    let bob = open("bob").await;

    let id = alice
        .create(ElementBody::Note(NoteBody::default()), None)
        .await
        .unwrap();
    alice.select(vec![id.clone()]).await;

    let mut rx = bob.view();
    let seen = timeout(Duration::from_secs(2), async {
        loop {
            let done = rx.borrow_and_update().ready().is_some_and(|v| {
                v.board.elements(ElementKind::Note).len() == 1
                    && v.users.len() == 2
                    && v.board.selections.iter().any(|s| s.user_id == UserId::from("alice"))
            });
            if done {
                break;
            }
            rx.changed().await.unwrap();
        }
    })
    .await;
    assert!(seen.is_ok(), "bob should see alice's note, presence and selection");

    alice.close().await;
    bob.close().await;
}
