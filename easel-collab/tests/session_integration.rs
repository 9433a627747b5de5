//! Multi-user session scenarios over the in-process store and hub.
//!
//! Each test opens two sessions on the same board, drives one of them and
//! waits for the other to observe the result.

use easel_collab::memory::MemoryHub;
use easel_collab::session::{BoardSession, SessionConfig, SessionView};
use easel_collab::storage::MemoryStore;
use easel_core::{ElementBody, ElementId, ElementKind, ElementPatch, NoteBody, Point, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

async fn open(store: &Arc<MemoryStore>, hub: &MemoryHub, user: &str) -> BoardSession {
    let config = SessionConfig {
        display_name: Some(user.to_uppercase()),
        ..SessionConfig::for_testing()
    };
    let session = BoardSession::open(
        "board".into(),
        user.into(),
        store.clone(),
        Arc::new(hub.connect()),
        config,
    )
    .await
    .unwrap();
    session.ready().await.unwrap();
    session
}

/// Wait until `session`'s published view satisfies `pred`.
async fn eventually(session: &BoardSession, pred: impl Fn(&SessionView) -> bool) -> Arc<SessionView> {
    let mut rx = session.view();
    let found = timeout(Duration::from_secs(2), async {
        loop {
            if let Some(view) = rx.borrow_and_update().ready() {
                if pred(view) {
                    return view.clone();
                }
            }
            if rx.changed().await.is_err() {
                sleep(Duration::from_millis(10)).await;
            }
        }
    })
    .await;
    found.expect("condition not reached within 2s")
}

fn note_at(x: f64, y: f64) -> ElementBody {
    ElementBody::Note(NoteBody { x, y, ..NoteBody::default() })
}

fn note_position(view: &SessionView, id: &ElementId) -> Option<Point> {
    view.board
        .elements(ElementKind::Note)
        .iter()
        .find(|e| &e.id == id)
        .and_then(|e| e.position())
}

// ── Element sync ──

#[tokio::test]
async fn test_create_reaches_other_session() {
    let store = Arc::new(MemoryStore::new());
    let hub = MemoryHub::new();
    let alice = open(&store, &hub, "alice").await;
    let bob = open(&store, &hub, "bob").await;

    let id = alice.create(note_at(10.0, 20.0), None).await.unwrap();

    let view = eventually(&bob, |v| note_position(v, &id).is_some()).await;
    assert_eq!(note_position(&view, &id), Some(Point::new(10.0, 20.0)));
    assert_eq!(view.board.elements(ElementKind::Note)[0].created_by, UserId::from("alice"));

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_concurrent_edits_converge() {
    let store = Arc::new(MemoryStore::new());
    let hub = MemoryHub::new();
    let alice = open(&store, &hub, "alice").await;
    let bob = open(&store, &hub, "bob").await;

    let id = alice.create(note_at(0.0, 0.0), None).await.unwrap();
    eventually(&bob, |v| note_position(v, &id).is_some()).await;

    alice.update(&id, ElementPatch::text("from alice")).await.unwrap();
    alice.flush().await;
    sleep(Duration::from_millis(5)).await;
    bob.update(&id, ElementPatch::text("from bob")).await.unwrap();
    bob.flush().await;

    let text_of = |v: &SessionView| match &v.board.elements(ElementKind::Note)[0].body {
        ElementBody::Note(n) => n.text.clone(),
        _ => String::new(),
    };
    eventually(&alice, |v| text_of(v) == "from bob").await;
    eventually(&bob, |v| text_of(v) == "from bob").await;

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_delete_and_undo_propagate() {
    let store = Arc::new(MemoryStore::new());
    let hub = MemoryHub::new();
    let alice = open(&store, &hub, "alice").await;
    let bob = open(&store, &hub, "bob").await;

    let id = alice.create(note_at(5.0, 5.0), None).await.unwrap();
    eventually(&bob, |v| note_position(v, &id).is_some()).await;

    assert!(alice.delete(&id).await.unwrap());
    eventually(&bob, |v| v.board.is_empty()).await;

    assert!(alice.undo().await.unwrap());
    let view = eventually(&bob, |v| note_position(v, &id).is_some()).await;
    assert_eq!(note_position(&view, &id), Some(Point::new(5.0, 5.0)));

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_failed_write_is_rolled_back_everywhere() {
    let store = Arc::new(MemoryStore::new());
    let hub = MemoryHub::new();
    let alice = open(&store, &hub, "alice").await;
    let bob = open(&store, &hub, "bob").await;

    store.fail_next_writes(1);
    alice.create(note_at(1.0, 1.0), None).await.unwrap();
    alice.flush().await;

    eventually(&alice, |v| v.board.is_empty()).await;
    sleep(Duration::from_millis(50)).await;
    assert!(bob.with_board(|b| b.is_empty()).await);
    assert!(store.is_empty());

    alice.close().await;
    bob.close().await;
}

// ── Gestures ──

#[tokio::test]
async fn test_drag_is_streamed_then_persisted() {
    let store = Arc::new(MemoryStore::new());
    let hub = MemoryHub::new();
    let alice = open(&store, &hub, "alice").await;
    let bob = open(&store, &hub, "bob").await;

    let id = alice.create(note_at(0.0, 0.0), None).await.unwrap();
    eventually(&bob, |v| note_position(v, &id).is_some()).await;
    alice.flush().await;
    let writes_before = store.write_count();

    alice.drag_start(&[id.clone()]).await.unwrap();
    alice.drag_move(&[(id.clone(), Point::new(40.0, 30.0))]).await.unwrap();
    eventually(&bob, |v| note_position(v, &id) == Some(Point::new(40.0, 30.0))).await;
    alice.flush().await;
    assert_eq!(store.write_count(), writes_before, "drag moves are not persisted");

    alice.drag_end(&[(id.clone(), Point::new(80.0, 60.0))]).await.unwrap();
    alice.flush().await;
    assert_eq!(store.write_count(), writes_before + 1);

    eventually(&bob, |v| note_position(v, &id) == Some(Point::new(80.0, 60.0))).await;
    eventually(&bob, |v| v.board.lingering.is_empty()).await;

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_selection_is_shared_and_cleared() {
    let store = Arc::new(MemoryStore::new());
    let hub = MemoryHub::new();
    let alice = open(&store, &hub, "alice").await;
    let bob = open(&store, &hub, "bob").await;

    let id = alice.create(note_at(0.0, 0.0), None).await.unwrap();
    eventually(&bob, |v| note_position(v, &id).is_some()).await;

    alice.select(vec![id.clone()]).await;
    let view = eventually(&bob, |v| !v.board.selections.is_empty()).await;
    assert_eq!(view.board.selections[0].user_id, UserId::from("alice"));
    assert_eq!(view.board.selections[0].element_id, id);

    alice.select(Vec::new()).await;
    eventually(&bob, |v| v.board.selections.is_empty()).await;

    alice.close().await;
    bob.close().await;
}

// ── Presence ──

#[tokio::test]
async fn test_presence_and_cursors() {
    let store = Arc::new(MemoryStore::new());
    let hub = MemoryHub::new();
    let alice = open(&store, &hub, "alice").await;
    let bob = open(&store, &hub, "bob").await;

    let view = eventually(&bob, |v| v.users.len() == 2).await;
    assert!(view.users.iter().all(|u| u.online));
    let alice_entry = view.users.iter().find(|u| u.user_id == UserId::from("alice")).unwrap();
    assert_eq!(alice_entry.display_name, "ALICE");

    alice.cursor_move(Point::new(12.0, 34.0)).await;
    let view = eventually(&bob, |v| !v.cursors.is_empty()).await;
    assert_eq!(view.cursors[0].user_id, UserId::from("alice"));
    assert_eq!(view.cursors[0].position, Point::new(12.0, 34.0));

    // Bob never sees his own cursor.
    bob.cursor_move(Point::new(1.0, 1.0)).await;
    bob.flush().await;
    let view = eventually(&bob, |v| !v.cursors.is_empty()).await;
    assert!(view.cursors.iter().all(|c| c.user_id != UserId::from("bob")));

    alice.close().await;
    let view = eventually(&bob, |v| v.users.len() == 1 && v.cursors.is_empty()).await;
    assert_eq!(view.users[0].user_id, UserId::from("bob"));

    bob.close().await;
    assert!(hub.is_empty());
}

#[tokio::test]
async fn test_dropped_connection_clears_drag() {
    let store = Arc::new(MemoryStore::new());
    let hub = MemoryHub::new();
    let alice_channel = Arc::new(hub.connect());
    let alice = BoardSession::open(
        "board".into(),
        "alice".into(),
        store.clone(),
        alice_channel.clone(),
        SessionConfig::for_testing(),
    )
    .await
    .unwrap();
    alice.ready().await.unwrap();
    let bob = open(&store, &hub, "bob").await;

    let id = alice.create(note_at(0.0, 0.0), None).await.unwrap();
    eventually(&bob, |v| note_position(v, &id).is_some()).await;

    alice.drag_start(&[id.clone()]).await.unwrap();
    alice.drag_move(&[(id.clone(), Point::new(200.0, 200.0))]).await.unwrap();
    eventually(&bob, |v| note_position(v, &id) == Some(Point::new(200.0, 200.0))).await;

    // Connection lost mid-drag: the hub removes alice's registered paths and
    // bob falls back to the durable position once the linger expires.
    drop(alice);
    drop(alice_channel);
    eventually(&bob, |v| note_position(v, &id) == Some(Point::new(0.0, 0.0))).await;

    bob.close().await;
}
