//! Agent batches against a board, end to end.

use easel_agent::{AgentBridge, Outcome, ToolInvocation};
use easel_core::{
    Board, BoardSnapshot, ElementKind, HistoryConfig, LingerConfig, UndoStack, WriteIntent,
};
use easel_collab::{BoardSession, MemoryHub, MemoryStore, SessionConfig};
use serde_json::json;
use std::sync::Arc;

fn board(user: &str) -> Board {
    Board::new(user.into(), LingerConfig::default())
}

fn call(name: &str, args: serde_json::Value) -> ToolInvocation {
    ToolInvocation::new(name, args)
}

#[test]
fn test_unknown_tool_in_the_middle_of_a_batch() {
    let mut board = board("agent");
    let mut bridge = AgentBridge::new();
    let batch = [
        call("createFrame", json!({"title": "Ideas", "x": 0, "y": 0})),
        call("createStickyNote", json!({"text": "one", "x": 20, "y": 40})),
        call("paintMural", json!({"wall": "north"})),
        call("createStickyNote", json!({"text": "two", "x": 200, "y": 40})),
        call("createShape", json!({"shapeType": "diamond", "x": 0, "y": 300, "color": "green"})),
    ];

    let report = bridge.execute(&mut board, &batch, 1_000);

    let statuses: Vec<bool> = report
        .outcomes
        .iter()
        .map(|r| matches!(r.outcome, Outcome::Applied { .. }))
        .collect();
    assert_eq!(statuses, vec![true, true, false, true, true]);
    assert_eq!(board.len(), 4);
    assert_eq!(report.created().len(), 4);
    assert!(report.summary().contains("1 of 5 actions skipped"));
}

#[test]
fn test_agent_batch_undoes_as_one_step() {
    let mut board = board("agent");
    let mut history: UndoStack<BoardSnapshot> = UndoStack::new(HistoryConfig::for_testing());

    history.push(board.snapshot(), 0);
    let report = AgentBridge::new().execute(
        &mut board,
        &[call("createSwot", json!({"x": 0, "y": 0})), call("createNoteGrid", json!({"x": 0, "y": 600, "rows": 2, "columns": 3}))],
        1_000,
    );
    assert_eq!(board.len(), 10);
    assert_eq!(report.writes.len(), 10);

    let previous = history.undo(board.snapshot()).expect("one undo step");
    let writes = board.restore(&previous, 2_000);
    assert!(board.is_empty());
    assert_eq!(writes.len(), 10);
    assert!(writes.iter().all(|w| matches!(w, WriteIntent::Delete { .. })));
}

#[test]
fn test_writes_replay_on_another_board() {
    let mut source = board("agent");
    let report = AgentBridge::new().execute(
        &mut source,
        &[call(
            "createFlowchart",
            json!({"steps": ["Sign up", "Verify", "Onboard"], "x": 100, "y": 100}),
        )],
        1_000,
    );

    // What another client sees once the writes land in the durable store.
    let mut replica = board("bob");
    for kind in ElementKind::ALL {
        let elements = report
            .writes
            .iter()
            .filter_map(|w| match w {
                WriteIntent::Put(e) if e.kind() == kind => Some(e.clone()),
                _ => None,
            })
            .collect();
        replica.apply_durable_snapshot(kind, elements, 1_100);
    }

    assert_eq!(replica.len(), source.len());
    for id in report.created() {
        assert_eq!(replica.get(&id), source.get(&id));
    }
    for connector in replica.elements(ElementKind::Connector) {
        assert!(replica.connector_endpoints(connector).is_some());
    }
}

#[test]
fn test_context_ids_feed_the_next_batch() {
    let mut board = board("agent");
    let mut bridge = AgentBridge::new();
    bridge.execute(&mut board, &[call("createSwot", json!({"x": 0, "y": 0}))], 1_000);

    let report = bridge.execute(&mut board, &[call("getBoardState", json!({}))], 1_100);
    let context = report.context.expect("context");
    assert_eq!(context.element_count, 4);
    let threats = context
        .elements
        .iter()
        .find(|e| e.text.as_deref() == Some("Threats"))
        .expect("threats frame");

    let frame_id = threats.id.as_str();
    bridge.execute(
        &mut board,
        &[
            call("createStickyNote", json!({"text": "Churn", "x": 720, "y": 300, "parentFrameId": frame_id})),
            call("fitFrameToContents", json!({"frameId": frame_id})),
        ],
        1_200,
    );
    assert_eq!(board.children_of(&threats.id).len(), 1);
    assert_eq!(bridge.total_processed(), 4);
}

#[tokio::test]
async fn test_agent_batch_through_a_session() {
    let store = Arc::new(MemoryStore::new());
    let hub = MemoryHub::new();
    let session = BoardSession::open(
        "board".into(),
        "agent".into(),
        store.clone(),
        Arc::new(hub.connect()),
        SessionConfig::for_testing(),
    )
    .await
    .unwrap();
    session.ready().await.unwrap();

    let mut bridge = AgentBridge::new();
    let batch = [call("createSwot", json!({"x": 0, "y": 0}))];
    let report = session
        .mutate(|board, now| {
            let report = bridge.execute(board, &batch, now);
            let writes = report.writes.clone();
            (report, writes)
        })
        .await
        .unwrap();
    assert_eq!(report.created().len(), 4);

    session.flush().await;
    assert_eq!(store.len(), 4);

    // The whole batch is one history entry.
    assert!(session.undo().await.unwrap());
    session.flush().await;
    assert!(store.is_empty());

    session.close().await;
}
