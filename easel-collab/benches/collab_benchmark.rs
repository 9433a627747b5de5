use criterion::{black_box, criterion_group, criterion_main, Criterion};
use easel_collab::channel::{
    ChannelEvent, ChannelPath, CursorRecord, DragRecord, EphemeralValue, PresenceRecord, StreamKind,
};
use easel_collab::presence::{PresenceConfig, PresenceTracker, UserColor};
use easel_collab::relay::RelayFrame;
use easel_collab::throttle::ThrottleState;
use easel_core::{ElementId, RemoteDrag, UserId};

fn drag_record(n: usize) -> DragRecord {
    DragRecord {
        items: (0..n)
            .map(|i| RemoteDrag {
                element_id: ElementId::from(format!("el-{i}").as_str()),
                x: i as f64 * 10.0,
                y: i as f64 * 5.0,
                updated_at: 1_000,
            })
            .collect(),
        updated_at: 1_000,
    }
}

fn bench_cursor_frame_encode(c: &mut Criterion) {
    let path = ChannelPath::stream(&"board".into(), StreamKind::Cursors, &"alice".into());
    let value = EphemeralValue::Cursor(CursorRecord {
        x: 120.0,
        y: 80.0,
        updated_at: 1_000,
    });

    c.bench_function("cursor_frame_encode", |b| {
        b.iter(|| {
            let frame = RelayFrame::Set {
                path: black_box(path.clone()),
                value: black_box(value.clone()),
            };
            black_box(frame.encode().unwrap());
        })
    });
}

fn bench_drag_event_decode(c: &mut Criterion) {
    let path = ChannelPath::stream(&"board".into(), StreamKind::Drags, &"alice".into());
    let frame = RelayFrame::Event {
        sub_id: 1,
        event: ChannelEvent::Set {
            path,
            value: EphemeralValue::Drag(drag_record(20)),
        },
    };
    let encoded = frame.encode().unwrap();

    c.bench_function("drag_event_decode_20_items", |b| {
        b.iter(|| {
            black_box(RelayFrame::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_throttle_offer(c: &mut Criterion) {
    c.bench_function("throttle_offer_1k", |b| {
        b.iter(|| {
            let mut state = ThrottleState::new();
            for now in 0..1_000u64 {
                black_box(state.offer(black_box(now), now, 33));
                if let Some(p) = state.take_due(now) {
                    black_box(p);
                }
            }
        })
    });
}

fn bench_presence_list(c: &mut Criterion) {
    let mut tracker = PresenceTracker::new("me".into(), PresenceConfig::default());
    for i in 0..100u64 {
        let user = UserId::from(format!("user-{i}").as_str());
        tracker.apply_presence(
            &user,
            &PresenceRecord {
                display_name: None,
                updated_at: 10_000 + i * 100,
                cursor: None,
            },
            10_000 + i * 100,
        );
    }

    c.bench_function("presence_list_100_users", |b| {
        b.iter(|| {
            black_box(tracker.list_users(black_box(25_000)));
        })
    });
}

fn bench_user_color(c: &mut Criterion) {
    let user: UserId = "5f2a9c1e-user".into();
    c.bench_function("user_color_from_id", |b| {
        b.iter(|| {
            black_box(UserColor::from_user(black_box(&user)).to_hex());
        })
    });
}

criterion_group!(
    benches,
    bench_cursor_frame_encode,
    bench_drag_event_decode,
    bench_throttle_offer,
    bench_presence_list,
    bench_user_color,
);
criterion_main!(benches);
