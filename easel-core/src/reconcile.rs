//! Per-kind merge of the three view layers.
//!
//! ```text
//!   durable ──────────┐
//!                     ▼
//!   optimistic ──► [ map by id ] ──► remote drags ──► sort(createdAt, id)
//!   (upsert/delete)   (LWW by updatedAt)   (position only)
//! ```
//!
//! The merge is a pure function of its inputs. Exactly one source is
//! authoritative for every id; remote drags only ever override `x`/`y` of an
//! element that already exists in the map.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::element::{Element, ElementId, UserId};
use crate::geometry::Point;

/// One element being dragged by a remote user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDrag {
    pub element_id: ElementId,
    pub x: f64,
    pub y: f64,
    pub updated_at: u64,
}

impl RemoteDrag {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A local write that the durable subscription has not confirmed yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Pending {
    Upsert(Element),
    Delete { id: ElementId, updated_at: u64 },
}

impl Pending {
    pub fn id(&self) -> &ElementId {
        match self {
            Pending::Upsert(e) => &e.id,
            Pending::Delete { id, .. } => id,
        }
    }

    pub fn updated_at(&self) -> u64 {
        match self {
            Pending::Upsert(e) => e.updated_at,
            Pending::Delete { updated_at, .. } => *updated_at,
        }
    }
}

/// Where the merged value of an element came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Durable,
    Optimistic,
    /// Durable or optimistic body with a remote user's drag position.
    RemoteDrag,
}

/// Pick the winning drag per element across users: greatest `updated_at`,
/// ties broken by the greater user id.
pub fn winning_drags<'a>(
    remote_by_user: &'a FxHashMap<UserId, Vec<RemoteDrag>>,
) -> FxHashMap<&'a ElementId, (&'a UserId, &'a RemoteDrag)> {
    let mut winners: FxHashMap<&ElementId, (&UserId, &RemoteDrag)> = FxHashMap::default();
    for (user, drags) in remote_by_user {
        for drag in drags {
            let replace = match winners.get(&drag.element_id) {
                Some((best_user, best)) => (drag.updated_at, user) > (best.updated_at, *best_user),
                None => true,
            };
            if replace {
                winners.insert(&drag.element_id, (user, drag));
            }
        }
    }
    winners
}

/// Merge with per-element source attribution.
pub fn merge_with_sources(
    durable: &[Element],
    remote_by_user: &FxHashMap<UserId, Vec<RemoteDrag>>,
    optimistic: &[Pending],
) -> Vec<(Element, Source)> {
    let mut map: FxHashMap<ElementId, (Element, Source)> =
        FxHashMap::with_capacity_and_hasher(durable.len() + optimistic.len(), Default::default());

    for e in durable {
        map.insert(e.id.clone(), (e.clone(), Source::Durable));
    }

    for pending in optimistic {
        let durable_at = map
            .get(pending.id())
            .filter(|(_, src)| *src == Source::Durable)
            .map(|(e, _)| e.updated_at);
        let wins = durable_at.map_or(true, |d| pending.updated_at() >= d);
        if !wins {
            continue;
        }
        match pending {
            Pending::Upsert(e) => {
                map.insert(e.id.clone(), (e.clone(), Source::Optimistic));
            }
            Pending::Delete { id, .. } => {
                map.remove(id);
            }
        }
    }

    for (id, (_, drag)) in winning_drags(remote_by_user) {
        if let Some((element, source)) = map.get_mut(id) {
            if element.set_position(drag.position()) {
                *source = Source::RemoteDrag;
            }
        }
    }

    let mut out: Vec<(Element, Source)> = map.into_values().collect();
    out.sort_by(|(a, _), (b, _)| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    out
}

/// `merge(durable, remoteTransientByUser, optimistic) -> ordered elements`.
pub fn merge(
    durable: &[Element],
    remote_by_user: &FxHashMap<UserId, Vec<RemoteDrag>>,
    optimistic: &[Pending],
) -> Vec<Element> {
    merge_with_sources(durable, remote_by_user, optimistic)
        .into_iter()
        .map(|(e, _)| e)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementBody, NoteBody};

    fn note(id: &str, created: u64, updated: u64, x: f64, y: f64) -> Element {
        let mut e = Element::new(
            id.into(),
            "author".into(),
            created,
            ElementBody::Note(NoteBody { x, y, ..NoteBody::default() }),
        );
        e.updated_at = updated;
        e
    }

    fn drag(id: &str, x: f64, y: f64, at: u64) -> RemoteDrag {
        RemoteDrag { element_id: id.into(), x, y, updated_at: at }
    }

    fn no_drags() -> FxHashMap<UserId, Vec<RemoteDrag>> {
        FxHashMap::default()
    }

    // ── Precedence tests ─────────────────────────────────

    #[test]
    fn test_optimistic_wins_when_newer_or_equal() {
        let durable = vec![note("a", 100, 100, 0.0, 0.0)];
        let pending = vec![Pending::Upsert(note("a", 100, 150, 50.0, 60.0))];
        let merged = merge(&durable, &no_drags(), &pending);
        assert_eq!(merged[0].position(), Some(Point::new(50.0, 60.0)));

        let durable = vec![note("a", 100, 150, 1.0, 1.0)];
        let pending = vec![Pending::Upsert(note("a", 100, 150, 2.0, 2.0))];
        let merged = merge(&durable, &no_drags(), &pending);
        assert_eq!(merged[0].position(), Some(Point::new(2.0, 2.0)));
    }

    #[test]
    fn test_durable_wins_when_newer() {
        let durable = vec![note("a", 100, 200, 9.0, 9.0)];
        let pending = vec![Pending::Upsert(note("a", 100, 150, 50.0, 60.0))];
        let merged = merge(&durable, &no_drags(), &pending);
        assert_eq!(merged[0].position(), Some(Point::new(9.0, 9.0)));
    }

    #[test]
    fn test_pending_delete_hides_older_durable() {
        let durable = vec![note("a", 1, 10, 0.0, 0.0), note("b", 2, 10, 0.0, 0.0)];
        let pending = vec![Pending::Delete { id: "a".into(), updated_at: 20 }];
        let merged = merge(&durable, &no_drags(), &pending);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id.as_str(), "b");

        let stale = vec![Pending::Delete { id: "a".into(), updated_at: 5 }];
        assert_eq!(merge(&durable, &no_drags(), &stale).len(), 2);
    }

    #[test]
    fn test_optimistic_create_without_durable() {
        let pending = vec![Pending::Upsert(note("new", 5, 5, 0.0, 0.0))];
        let merged = merge(&[], &no_drags(), &pending);
        assert_eq!(merged.len(), 1);
    }

    // ── Remote drag tests ────────────────────────────────

    #[test]
    fn test_remote_drag_never_fabricates() {
        let mut drags = no_drags();
        drags.insert("bob".into(), vec![drag("ghost", 1.0, 1.0, 10)]);
        assert!(merge(&[], &drags, &[]).is_empty());
    }

    #[test]
    fn test_remote_drag_overrides_position_only() {
        let mut durable = note("a", 1, 10, 0.0, 0.0);
        durable.set_text("keep me");
        let mut drags = no_drags();
        drags.insert("bob".into(), vec![drag("a", 30.0, 40.0, 11)]);
        let merged = merge_with_sources(&[durable], &drags, &[]);
        assert_eq!(merged[0].1, Source::RemoteDrag);
        assert_eq!(merged[0].0.position(), Some(Point::new(30.0, 40.0)));
        assert_eq!(merged[0].0.text(), Some("keep me"));
        assert_eq!(merged[0].0.updated_at, 10);
    }

    #[test]
    fn test_concurrent_drags_latest_then_user_id_wins() {
        let durable = vec![note("a", 1, 1, 0.0, 0.0)];
        let mut drags = no_drags();
        drags.insert("bob".into(), vec![drag("a", 1.0, 1.0, 20)]);
        drags.insert("carol".into(), vec![drag("a", 2.0, 2.0, 30)]);
        assert_eq!(merge(&durable, &drags, &[])[0].position(), Some(Point::new(2.0, 2.0)));

        let mut tied = no_drags();
        tied.insert("bob".into(), vec![drag("a", 1.0, 1.0, 20)]);
        tied.insert("carol".into(), vec![drag("a", 2.0, 2.0, 20)]);
        assert_eq!(merge(&durable, &tied, &[])[0].position(), Some(Point::new(2.0, 2.0)));
    }

    #[test]
    fn test_multi_drag_moves_every_listed_element() {
        let durable = vec![note("a", 1, 1, 0.0, 0.0), note("b", 2, 1, 0.0, 0.0)];
        let mut drags = no_drags();
        drags.insert("bob".into(), vec![drag("a", 5.0, 5.0, 3), drag("b", 6.0, 6.0, 3)]);
        let merged = merge(&durable, &drags, &[]);
        assert_eq!(merged[0].position(), Some(Point::new(5.0, 5.0)));
        assert_eq!(merged[1].position(), Some(Point::new(6.0, 6.0)));
    }

    // ── Ordering tests ───────────────────────────────────

    #[test]
    fn test_sorted_by_created_at_then_id() {
        let durable = vec![
            note("c", 5, 5, 0.0, 0.0),
            note("b", 1, 1, 0.0, 0.0),
            note("a", 5, 5, 0.0, 0.0),
        ];
        let ids: Vec<_> = merge(&durable, &no_drags(), &[])
            .into_iter()
            .map(|e| e.id.to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
