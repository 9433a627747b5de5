//! The all-kinds reconciler and mutation API.
//!
//! ```text
//!            gestures / agent
//!                   │
//!                   ▼
//!   ┌──────────────────────────────┐   WriteIntent    ┌───────────────┐
//!   │ Board                        │ ───────────────► │ durable store │
//!   │  per kind: durable           │                  └───────┬───────┘
//!   │            optimistic        │ ◄── snapshot ────────────┘
//!   │            merged / rendered │
//!   │  remote drags, selections    │ ◄── ephemeral channel
//!   │  linger resolver             │
//!   └──────────────────────────────┘
//! ```
//!
//! A `Board` is a plain single-threaded value. Every mutation updates the
//! optimistic layer synchronously and hands back the writes the caller must
//! persist; nothing here performs I/O or reads the clock.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::element::{Element, ElementBody, ElementId, ElementKind, ElementPatch, UserId};
use crate::geometry::{Point, Rect};
use crate::linger::{DragLingerResolver, LingerConfig};
use crate::reconcile::{merge, winning_drags, Pending, RemoteDrag};

// ───────────────────────────────────────────────────────────────────
// Public types
// ───────────────────────────────────────────────────────────────────

/// A write the caller must apply to the durable store.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteIntent {
    Put(Element),
    Delete {
        kind: ElementKind,
        id: ElementId,
        updated_at: u64,
    },
}

impl WriteIntent {
    pub fn id(&self) -> &ElementId {
        match self {
            WriteIntent::Put(e) => &e.id,
            WriteIntent::Delete { id, .. } => id,
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            WriteIntent::Put(e) => e.kind(),
            WriteIntent::Delete { kind, .. } => *kind,
        }
    }

    pub fn updated_at(&self) -> u64 {
        match self {
            WriteIntent::Put(e) => e.updated_at,
            WriteIntent::Delete { updated_at, .. } => *updated_at,
        }
    }
}

/// Full authoritative state, used by the undo stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardSnapshot {
    pub elements: Vec<Element>,
}

impl BoardSnapshot {
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Another user's selection of one element, with the outline to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionOutline {
    pub user_id: UserId,
    pub element_id: ElementId,
    pub bounds: Rect,
}

/// A connector resolved to two concrete points.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorLine {
    pub id: ElementId,
    pub from: Point,
    pub to: Point,
}

/// Everything the rendering layer needs for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardView {
    by_kind: [Vec<Element>; 5],
    pub selections: Vec<SelectionOutline>,
    pub connector_lines: Vec<ConnectorLine>,
    pub lingering: Vec<ElementId>,
}

impl BoardView {
    pub fn elements(&self, kind: ElementKind) -> &[Element] {
        &self.by_kind[kind.index()]
    }

    pub fn len(&self) -> usize {
        self.by_kind.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Flat, serializable export of one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedElement {
    pub id: ElementId,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Rect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_frame_id: Option<ElementId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_id: Option<ElementId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_id: Option<ElementId>,
    pub created_by: UserId,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<&Element> for ExportedElement {
    fn from(e: &Element) -> Self {
        let (from_id, to_id) = match e.references() {
            Some((a, b)) => (Some(a.clone()), Some(b.clone())),
            None => (None, None),
        };
        Self {
            id: e.id.clone(),
            kind: e.kind(),
            bounds: e.bounds(),
            text: e.text().map(str::to_string),
            color: e.color().to_string(),
            parent_frame_id: e.parent_frame_id.clone(),
            from_id,
            to_id,
            created_by: e.created_by.clone(),
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

/// z-order: `createdAt` ascending, ties by id.
pub fn z_order(a: &Element, b: &Element) -> Ordering {
    a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
}

// ───────────────────────────────────────────────────────────────────
// Per-kind state
// ───────────────────────────────────────────────────────────────────

/// A pending delete is confirmed once the store acknowledged it and a
/// snapshot lacks the id after one had shown it. A snapshot taken before
/// the element's create landed lacks the id too, and must not count.
#[derive(Debug, Clone, Copy, Default)]
struct DeleteProgress {
    seen: bool,
    gone: bool,
    acked: bool,
}

impl DeleteProgress {
    fn confirmed(&self) -> bool {
        self.gone && self.acked
    }
}

#[derive(Debug, Default)]
struct KindView {
    durable: Vec<Element>,
    optimistic: Vec<Pending>,
    /// Progress of each pending delete toward confirmation.
    deletes: FxHashMap<ElementId, DeleteProgress>,
    /// Merge output, before linger overrides.
    merged: Vec<Element>,
    /// `merged` with linger overrides applied; same order.
    rendered: Vec<Element>,
    /// id → index into `merged` / `rendered`.
    index: FxHashMap<ElementId, usize>,
    dirty: bool,
}

impl KindView {
    fn durable(&self, id: &ElementId) -> Option<&Element> {
        self.durable.iter().find(|e| &e.id == id)
    }

    fn pending(&self, id: &ElementId) -> Option<&Pending> {
        self.optimistic.iter().find(|p| p.id() == id)
    }

    /// Durable/optimistic winner, ignoring transient positions.
    fn authoritative(&self, id: &ElementId) -> Option<&Element> {
        let durable = self.durable(id);
        match self.pending(id) {
            Some(p) if durable.map_or(true, |d| p.updated_at() >= d.updated_at) => match p {
                Pending::Upsert(e) => Some(e),
                Pending::Delete { .. } => None,
            },
            _ => durable,
        }
    }

    fn stage(&mut self, pending: Pending) {
        let id = pending.id().clone();
        if matches!(pending, Pending::Delete { .. }) {
            let seen = self.durable(&id).is_some();
            self.deletes.insert(id, DeleteProgress { seen, ..Default::default() });
        } else {
            self.deletes.remove(&id);
        }
        match self.optimistic.iter_mut().find(|p| p.id() == pending.id()) {
            Some(slot) => *slot = pending,
            None => self.optimistic.push(pending),
        }
        self.dirty = true;
    }

    fn rendered(&self, id: &ElementId) -> Option<&Element> {
        self.index.get(id).map(|&i| &self.rendered[i])
    }

    fn merged_position(&self, id: &ElementId) -> Option<Point> {
        self.index.get(id).and_then(|&i| self.merged[i].position())
    }

    fn render(&mut self, linger: &DragLingerResolver) {
        self.rendered = self
            .merged
            .iter()
            .map(|e| {
                let mut e = e.clone();
                if let Some(p) = linger.override_for(&e.id) {
                    e.set_position(p);
                }
                e
            })
            .collect();
    }
}

fn merged_position(kinds: &[KindView; 5], id: &ElementId) -> Option<Point> {
    kinds.iter().find_map(|k| k.merged_position(id))
}

// ───────────────────────────────────────────────────────────────────
// Board
// ───────────────────────────────────────────────────────────────────

/// Reconciled state of one board as seen by one local user.
#[derive(Debug)]
pub struct Board {
    local_user: UserId,
    kinds: [KindView; 5],
    remote_drags: FxHashMap<UserId, Vec<RemoteDrag>>,
    remote_selections: FxHashMap<UserId, Vec<ElementId>>,
    linger: DragLingerResolver,
    last_stamp: u64,
}

impl Board {
    pub fn new(local_user: UserId, linger: LingerConfig) -> Self {
        Self {
            local_user,
            kinds: Default::default(),
            remote_drags: FxHashMap::default(),
            remote_selections: FxHashMap::default(),
            linger: DragLingerResolver::new(linger),
            last_stamp: 0,
        }
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// Next per-writer timestamp: `max(now, previous + 1, floor)`.
    fn stamp(&mut self, now: u64, floor: u64) -> u64 {
        let t = now.max(self.last_stamp.saturating_add(1)).max(floor);
        self.last_stamp = t;
        t
    }

    fn view_mut(&mut self, kind: ElementKind) -> &mut KindView {
        &mut self.kinds[kind.index()]
    }

    fn refresh(&mut self, kind: ElementKind) {
        let view = &mut self.kinds[kind.index()];
        view.merged = merge(&view.durable, &self.remote_drags, &view.optimistic);
        view.index = view
            .merged
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        view.render(&self.linger);
        view.dirty = false;
    }

    fn refresh_dirty(&mut self) {
        for kind in ElementKind::ALL {
            if self.kinds[kind.index()].dirty {
                self.refresh(kind);
            }
        }
    }

    fn refresh_all(&mut self) {
        for kind in ElementKind::ALL {
            self.refresh(kind);
        }
    }

    fn rerender_all(&mut self) {
        for view in self.kinds.iter_mut() {
            view.render(&self.linger);
        }
    }

    /// Authoritative (durable or optimistic) value of an element, without
    /// transient drag positions or linger overrides.
    pub fn authoritative(&self, id: &ElementId) -> Option<&Element> {
        self.kinds.iter().find_map(|k| k.authoritative(id))
    }

    // ─── Mutations ───────────────────────────────────────────────

    /// Create a new element owned by the local user. Always mints a new id.
    pub fn create(
        &mut self,
        body: ElementBody,
        parent_frame_id: Option<ElementId>,
        now: u64,
    ) -> (ElementId, WriteIntent) {
        let stamp = self.stamp(now, 0);
        let element = Element::new(ElementId::mint(), self.local_user.clone(), stamp, body)
            .with_parent(parent_frame_id);
        let id = element.id.clone();
        let kind = element.kind();
        self.view_mut(kind).stage(Pending::Upsert(element.clone()));
        self.refresh(kind);
        log::debug!("created {kind} {id}");
        (id, WriteIntent::Put(element))
    }

    fn stage_patch(&mut self, id: &ElementId, patch: &ElementPatch, now: u64) -> Option<WriteIntent> {
        let mut element = self.authoritative(id)?.clone();
        if !patch.apply(&mut element) {
            log::debug!("patch partially inapplicable to {} {}", element.kind(), id);
        }
        element.updated_at = self.stamp(now, element.updated_at.saturating_add(1));
        self.view_mut(element.kind()).stage(Pending::Upsert(element.clone()));
        Some(WriteIntent::Put(element))
    }

    /// Apply a field patch. Unknown ids and empty patches are a no-op.
    pub fn update(&mut self, id: &ElementId, patch: &ElementPatch, now: u64) -> Option<WriteIntent> {
        if patch.is_empty() {
            return None;
        }
        let write = self.stage_patch(id, patch, now);
        self.refresh_dirty();
        write
    }

    pub fn move_to(&mut self, id: &ElementId, to: Point, now: u64) -> Option<WriteIntent> {
        if self.authoritative(id)?.kind() == ElementKind::Connector {
            return None;
        }
        self.update(id, &ElementPatch::position(to), now)
    }

    /// Move several elements in one pass (multi-drag commit).
    pub fn move_many(&mut self, moves: &[(ElementId, Point)], now: u64) -> Vec<WriteIntent> {
        let mut writes = Vec::with_capacity(moves.len());
        for (id, to) in moves {
            let movable = self
                .authoritative(id)
                .is_some_and(|e| e.kind() != ElementKind::Connector);
            if !movable {
                continue;
            }
            if let Some(write) = self.stage_patch(id, &ElementPatch::position(*to), now) {
                writes.push(write);
            }
        }
        self.refresh_dirty();
        writes
    }

    pub fn resize(&mut self, id: &ElementId, width: f64, height: f64, now: u64) -> Option<WriteIntent> {
        if !(width > 0.0 && height > 0.0) {
            return None;
        }
        if self.authoritative(id)?.kind() == ElementKind::Connector {
            return None;
        }
        self.update(id, &ElementPatch::size(width, height), now)
    }

    fn stage_delete(&mut self, id: &ElementId, now: u64) -> Option<WriteIntent> {
        let (kind, floor) = {
            let e = self.authoritative(id)?;
            (e.kind(), e.updated_at.saturating_add(1))
        };
        let updated_at = self.stamp(now, floor);
        self.view_mut(kind).stage(Pending::Delete { id: id.clone(), updated_at });

        for drags in self.remote_drags.values_mut() {
            drags.retain(|d| &d.element_id != id);
        }
        for selection in self.remote_selections.values_mut() {
            selection.retain(|s| s != id);
        }
        self.linger.forget(id);
        Some(WriteIntent::Delete { kind, id: id.clone(), updated_at })
    }

    /// Delete an element. Deleting an absent or already deleted id is a
    /// no-op, which makes the operation idempotent.
    pub fn delete(&mut self, id: &ElementId, now: u64) -> Option<WriteIntent> {
        let write = self.stage_delete(id, now);
        if write.is_some() {
            log::debug!("deleted {id}");
            self.refresh_all();
        }
        write
    }

    pub fn delete_many(&mut self, ids: &[ElementId], now: u64) -> Vec<WriteIntent> {
        let writes: Vec<_> = ids.iter().filter_map(|id| self.stage_delete(id, now)).collect();
        if !writes.is_empty() {
            self.refresh_all();
        }
        writes
    }

    /// Replace the optimistic state with `snapshot` (undo/redo).
    ///
    /// Elements whose content already matches are left alone; everything
    /// else becomes an optimistic upsert or delete stamped `now`.
    pub fn restore(&mut self, snapshot: &BoardSnapshot, now: u64) -> Vec<WriteIntent> {
        let floor = snapshot
            .elements
            .iter()
            .filter_map(|e| self.authoritative(&e.id))
            .map(|e| e.updated_at.saturating_add(1))
            .max()
            .unwrap_or(0);
        let stamp = self.stamp(now, floor);

        let wanted: FxHashMap<&ElementId, &Element> =
            snapshot.elements.iter().map(|e| (&e.id, e)).collect();
        let visible: Vec<(ElementKind, ElementId, u64)> = self
            .kinds
            .iter()
            .flat_map(|k| k.merged.iter())
            .filter_map(|e| self.authoritative(&e.id).map(|a| (a.kind(), a.id.clone(), a.updated_at)))
            .collect();

        let mut writes = Vec::new();
        for (kind, id, current_at) in visible {
            if wanted.contains_key(&id) {
                continue;
            }
            let updated_at = stamp.max(current_at.saturating_add(1));
            self.view_mut(kind).stage(Pending::Delete { id: id.clone(), updated_at });
            self.linger.forget(&id);
            writes.push(WriteIntent::Delete { kind, id, updated_at });
        }

        for target in &snapshot.elements {
            let current = self.authoritative(&target.id);
            if current.is_some_and(|c| same_content(c, target)) {
                continue;
            }
            let mut element = target.clone();
            element.updated_at = current.map_or(stamp, |c| stamp.max(c.updated_at.saturating_add(1)));
            self.view_mut(element.kind()).stage(Pending::Upsert(element.clone()));
            writes.push(WriteIntent::Put(element));
        }

        self.refresh_dirty();
        log::debug!("restored snapshot of {} elements with {} writes", snapshot.len(), writes.len());
        writes
    }

    /// Undo the optimistic effect of a write that failed to persist.
    /// Only rolls back if no newer local write has replaced it.
    pub fn rollback(&mut self, write: &WriteIntent) -> bool {
        let kind = write.kind();
        let view = self.view_mut(kind);
        let before = view.optimistic.len();
        view.optimistic.retain(|p| !(p.id() == write.id() && p.updated_at() == write.updated_at()));
        let rolled_back = view.optimistic.len() != before;
        if rolled_back {
            view.deletes.remove(write.id());
            log::warn!("rolled back failed write to {kind} {}", write.id());
            self.refresh(kind);
        }
        rolled_back
    }

    /// Record that the store has applied `write`. A pending delete is
    /// released only once acknowledged, so a snapshot taken before its
    /// create landed cannot resurrect the element.
    pub fn acknowledge(&mut self, write: &WriteIntent) -> bool {
        let WriteIntent::Delete { kind, id, updated_at } = write else {
            return false;
        };
        let view = self.view_mut(*kind);
        let matches = view
            .pending(id)
            .is_some_and(|p| matches!(p, Pending::Delete { .. }) && p.updated_at() == *updated_at);
        let Some(progress) = view.deletes.get_mut(id).filter(|_| matches) else {
            return false;
        };
        progress.acked = true;
        if progress.confirmed() {
            view.deletes.remove(id);
            view.optimistic.retain(|p| p.id() != id);
            log::trace!("delete of {kind} {id} confirmed");
            self.refresh(*kind);
        }
        true
    }

    /// The write that would persist the current optimistic entry for `id`.
    pub fn pending_write(&self, id: &ElementId) -> Option<WriteIntent> {
        ElementKind::ALL.into_iter().find_map(|kind| {
            self.kinds[kind.index()].pending(id).map(|p| match p {
                Pending::Upsert(e) => WriteIntent::Put(e.clone()),
                Pending::Delete { id, updated_at } => WriteIntent::Delete {
                    kind,
                    id: id.clone(),
                    updated_at: *updated_at,
                },
            })
        })
    }

    // ─── Inputs ──────────────────────────────────────────────────

    /// Replace the durable view of one kind and drop the optimistic
    /// entries the snapshot confirms.
    pub fn apply_durable_snapshot(&mut self, kind: ElementKind, elements: Vec<Element>, now: u64) {
        let view = self.view_mut(kind);
        view.durable = elements.into_iter().filter(|e| e.kind() == kind).collect();

        let durable = &view.durable;
        let deletes = &mut view.deletes;
        view.optimistic.retain(|p| {
            let d = durable.iter().find(|e| &e.id == p.id());
            match p {
                Pending::Upsert(e) => d.map_or(true, |d| d.updated_at < e.updated_at),
                Pending::Delete { id, updated_at } => {
                    let progress = deletes.entry(id.clone()).or_default();
                    match d {
                        Some(d) => {
                            progress.seen = true;
                            d.updated_at <= *updated_at
                        }
                        None => {
                            progress.gone |= progress.seen;
                            !progress.confirmed()
                        }
                    }
                }
            }
        });
        let optimistic = &view.optimistic;
        view.deletes.retain(|id, _| {
            optimistic
                .iter()
                .any(|p| p.id() == id && matches!(p, Pending::Delete { .. }))
        });
        log::trace!(
            "{kind} snapshot: {} durable, {} pending",
            view.durable.len(),
            view.optimistic.len()
        );

        self.refresh(kind);
        self.tick(now);
    }

    /// Replace one remote user's drag records. Records from the local
    /// user are ignored, as is a record older than the one stored; within
    /// a newer record a stored item newer than its replacement is kept.
    pub fn apply_remote_drags(&mut self, user: &UserId, drags: Vec<RemoteDrag>, now: u64) -> bool {
        if user == &self.local_user {
            return false;
        }
        if drags.is_empty() {
            return self.clear_remote_drags(user, now);
        }
        let drags = match self.remote_drags.get(user) {
            Some(stored) => {
                let newest = |ds: &[RemoteDrag]| ds.iter().map(|d| d.updated_at).max();
                if newest(drags.as_slice()) < newest(stored.as_slice()) {
                    log::trace!("ignoring stale drag record from {user}");
                    return false;
                }
                let merged: Vec<RemoteDrag> = drags
                    .into_iter()
                    .map(|d| match stored.iter().find(|s| s.element_id == d.element_id) {
                        Some(s) if s.updated_at > d.updated_at => s.clone(),
                        _ => d,
                    })
                    .collect();
                if &merged == stored {
                    return false;
                }
                merged
            }
            None => drags,
        };
        self.remote_drags.insert(user.clone(), drags);
        self.after_drags_changed(now);
        true
    }

    pub fn clear_remote_drags(&mut self, user: &UserId, now: u64) -> bool {
        if self.remote_drags.remove(user).is_none() {
            return false;
        }
        self.after_drags_changed(now);
        true
    }

    fn after_drags_changed(&mut self, now: u64) {
        let active: Vec<(ElementId, Point)> = winning_drags(&self.remote_drags)
            .into_iter()
            .map(|(id, (_, drag))| (id.clone(), drag.position()))
            .collect();
        self.refresh_all();
        self.linger.observe(active, now);
        self.rerender_all();
    }

    pub fn apply_remote_selection(&mut self, user: &UserId, ids: Vec<ElementId>) -> bool {
        if user == &self.local_user {
            return false;
        }
        if ids.is_empty() {
            return self.clear_remote_selection(user);
        }
        self.remote_selections.insert(user.clone(), ids);
        true
    }

    pub fn clear_remote_selection(&mut self, user: &UserId) -> bool {
        self.remote_selections.remove(user).is_some()
    }

    /// Re-evaluate time-dependent state. Returns whether the rendered
    /// view changed.
    pub fn tick(&mut self, now: u64) -> bool {
        let kinds = &self.kinds;
        let changed = self.linger.settle(|id| merged_position(kinds, id), now);
        if changed {
            self.rerender_all();
        }
        changed
    }

    // ─── Reads ───────────────────────────────────────────────────

    /// Rendered elements of one kind in z-order.
    pub fn elements(&self, kind: ElementKind) -> &[Element] {
        &self.kinds[kind.index()].rendered
    }

    /// Every rendered element in z-order.
    pub fn all_elements(&self) -> Vec<&Element> {
        let mut all: Vec<&Element> = self.kinds.iter().flat_map(|k| k.rendered.iter()).collect();
        all.sort_by(|a, b| z_order(a, b));
        all
    }

    pub fn get(&self, id: &ElementId) -> Option<&Element> {
        self.kinds.iter().find_map(|k| k.rendered(id))
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.kinds.iter().map(|k| k.rendered.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements whose `parentFrameId` is `frame`.
    pub fn children_of(&self, frame: &ElementId) -> Vec<&Element> {
        self.all_elements()
            .into_iter()
            .filter(|e| e.parent_frame_id.as_ref() == Some(frame))
            .collect()
    }

    /// Centers of a connector's two endpoints, or `None` if either end is
    /// missing or has no bounds.
    pub fn connector_endpoints(&self, connector: &Element) -> Option<(Point, Point)> {
        let (from, to) = connector.references()?;
        let a = self.get(from)?.bounds()?.center();
        let b = self.get(to)?.bounds()?.center();
        Some((a, b))
    }

    fn element_outline(&self, e: &Element) -> Option<Rect> {
        match e.bounds() {
            Some(b) => Some(b),
            None => {
                let (a, b) = self.connector_endpoints(e)?;
                let min_x = a.x.min(b.x);
                let min_y = a.y.min(b.y);
                Some(Rect::new(min_x, min_y, (a.x - b.x).abs(), (a.y - b.y).abs()))
            }
        }
    }

    /// Remote users' selections resolved to outlines. Stale ids are skipped.
    pub fn selection_outlines(&self) -> Vec<SelectionOutline> {
        let mut out: Vec<SelectionOutline> = self
            .remote_selections
            .iter()
            .flat_map(|(user, ids)| ids.iter().map(move |id| (user, id)))
            .filter_map(|(user, id)| {
                let e = self.get(id)?;
                Some(SelectionOutline {
                    user_id: user.clone(),
                    element_id: id.clone(),
                    bounds: self.element_outline(e)?,
                })
            })
            .collect();
        out.sort_by(|a, b| (&a.user_id, &a.element_id).cmp(&(&b.user_id, &b.element_id)));
        out
    }

    pub fn lingering_ids(&self) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self.linger.lingering_ids().into_iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn next_linger_expiry(&self) -> Option<u64> {
        self.linger.next_expiry()
    }

    /// Whether the local user has unconfirmed writes.
    pub fn has_pending(&self) -> bool {
        self.kinds.iter().any(|k| !k.optimistic.is_empty())
    }

    pub fn pending_count(&self) -> usize {
        self.kinds.iter().map(|k| k.optimistic.len()).sum()
    }

    /// Authoritative state for the undo stack.
    pub fn snapshot(&self) -> BoardSnapshot {
        let mut elements: Vec<Element> = self
            .kinds
            .iter()
            .flat_map(|k| k.merged.iter())
            .filter_map(|e| self.authoritative(&e.id).cloned())
            .collect();
        elements.sort_by(z_order);
        BoardSnapshot { elements }
    }

    /// Settle time-dependent state and build a render view.
    pub fn view(&mut self, now: u64) -> BoardView {
        self.tick(now);
        let by_kind = ElementKind::ALL.map(|k| self.kinds[k.index()].rendered.clone());
        let connector_lines = self
            .elements(ElementKind::Connector)
            .iter()
            .filter_map(|c| {
                let (from, to) = self.connector_endpoints(c)?;
                Some(ConnectorLine { id: c.id.clone(), from, to })
            })
            .collect();
        BoardView {
            by_kind,
            selections: self.selection_outlines(),
            connector_lines,
            lingering: self.lingering_ids(),
        }
    }

    pub fn export(&self) -> Vec<ExportedElement> {
        self.all_elements().into_iter().map(ExportedElement::from).collect()
    }

    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.export())
    }
}

/// Equal in everything except `updated_at`.
fn same_content(a: &Element, b: &Element) -> bool {
    a.id == b.id
        && a.created_by == b.created_by
        && a.created_at == b.created_at
        && a.parent_frame_id == b.parent_frame_id
        && a.body == b.body
}
