use criterion::{black_box, criterion_group, criterion_main, Criterion};
use easel_agent::{board_context, AgentBridge, ToolInvocation};
use easel_core::{Board, ElementBody, LingerConfig, NoteBody};
use serde_json::json;

fn populated_board(n: usize) -> Board {
    let mut board = Board::new("agent".into(), LingerConfig::default());
    for i in 0..n {
        let body = NoteBody {
            x: (i % 20) as f64 * 180.0,
            y: (i / 20) as f64 * 140.0,
            text: format!("note {i}"),
            ..NoteBody::default()
        };
        board.create(ElementBody::Note(body), None, i as u64 + 1);
    }
    board
}

fn bench_decode_invocation(c: &mut Criterion) {
    let invocation = ToolInvocation::new(
        "createStickyNote",
        json!({"text": "Idea", "x": 120, "y": 80, "color": "pink"}),
    );
    c.bench_function("decode_create_sticky_note", |b| {
        b.iter(|| black_box(invocation.decode().unwrap()))
    });
}

fn bench_note_grid_batch(c: &mut Criterion) {
    let batch = [ToolInvocation::new(
        "createNoteGrid",
        json!({"x": 0, "y": 0, "rows": 10, "columns": 10}),
    )];
    c.bench_function("note_grid_10x10", |b| {
        b.iter(|| {
            let mut board = Board::new("agent".into(), LingerConfig::default());
            let report = AgentBridge::new().execute(&mut board, black_box(&batch), 1_000);
            black_box(report.writes.len());
        })
    });
}

fn bench_board_context_500(c: &mut Criterion) {
    let board = populated_board(500);
    c.bench_function("board_context_500_notes", |b| {
        b.iter(|| black_box(board_context(&board).describe()))
    });
}

criterion_group!(
    benches,
    bench_decode_invocation,
    bench_note_grid_batch,
    bench_board_context_500
);
criterion_main!(benches);
