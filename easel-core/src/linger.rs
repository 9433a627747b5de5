//! Drag hand-off anti-flicker.
//!
//! When a remote user releases a drag, the transient record vanishes from
//! the ephemeral channel a few frames before the durable write echoes back.
//! Rendering the durable position in between snaps the element back to
//! where it started. The resolver keeps the last transient position alive
//! until the durable value catches up or a short window expires.
//!
//! ```text
//! transient  ████████████░░░░░░░░░░
//! linger                 ██████▌        (until durable ≈ last, or window)
//! durable    ────────────────────███
//! ```

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::element::ElementId;
use crate::geometry::Point;

/// Tuning for the linger heuristic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LingerConfig {
    pub enabled: bool,
    /// How long a released drag keeps rendering its last position.
    pub window_ms: u64,
    /// Per-axis tolerance for "durable has caught up".
    pub epsilon: f64,
}

impl Default for LingerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 400,
            epsilon: 0.5,
        }
    }
}

impl LingerConfig {
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    pub fn for_testing() -> Self {
        Self { window_ms: 100, ..Self::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linger {
    pub position: Point,
    pub expires_at: u64,
}

/// Tracks transient positions and the lingers left behind when they end.
#[derive(Debug, Default)]
pub struct DragLingerResolver {
    config: LingerConfig,
    last_seen: FxHashMap<ElementId, Point>,
    lingering: FxHashMap<ElementId, Linger>,
}

impl DragLingerResolver {
    pub fn new(config: LingerConfig) -> Self {
        Self {
            config,
            last_seen: FxHashMap::default(),
            lingering: FxHashMap::default(),
        }
    }

    pub fn config(&self) -> &LingerConfig {
        &self.config
    }

    /// Feed the complete set of currently active transient positions.
    /// Ids that were active before and are absent now start lingering.
    pub fn observe<I>(&mut self, active: I, now: u64)
    where
        I: IntoIterator<Item = (ElementId, Point)>,
    {
        let mut next: FxHashMap<ElementId, Point> = FxHashMap::default();
        for (id, pos) in active {
            self.lingering.remove(&id);
            next.insert(id, pos);
        }

        if self.config.enabled {
            let expires_at = now.saturating_add(self.config.window_ms);
            for (id, position) in self.last_seen.drain() {
                if !next.contains_key(&id) {
                    log::trace!("drag on {id} released, lingering until {expires_at}");
                    self.lingering.insert(id, Linger { position, expires_at });
                }
            }
        }
        self.last_seen = next;
    }

    /// Drop lingers whose authoritative position has caught up or whose
    /// window has elapsed. `authoritative` returns `None` for ids that no
    /// longer exist, which also ends the linger. Returns whether anything
    /// was dropped.
    pub fn settle<F>(&mut self, authoritative: F, now: u64) -> bool
    where
        F: Fn(&ElementId) -> Option<Point>,
    {
        let epsilon = self.config.epsilon;
        let before = self.lingering.len();
        self.lingering.retain(|id, linger| {
            if now >= linger.expires_at {
                return false;
            }
            match authoritative(id) {
                Some(pos) => !pos.approx_eq(&linger.position, epsilon),
                None => false,
            }
        });
        before != self.lingering.len()
    }

    /// Position to render instead of the merged one, if lingering.
    pub fn override_for(&self, id: &ElementId) -> Option<Point> {
        self.lingering.get(id).map(|l| l.position)
    }

    pub fn is_lingering(&self, id: &ElementId) -> bool {
        self.lingering.contains_key(id)
    }

    pub fn lingering_ids(&self) -> FxHashSet<&ElementId> {
        self.lingering.keys().collect()
    }

    /// Forget everything about an element (deleted).
    pub fn forget(&mut self, id: &ElementId) {
        self.last_seen.remove(id);
        self.lingering.remove(id);
    }

    /// Earliest instant at which a linger will expire on its own.
    pub fn next_expiry(&self) -> Option<u64> {
        self.lingering.values().map(|l| l.expires_at).min()
    }
}
