//! Presence / Cursor Tracker.
//!
//! ```text
//!  presence heartbeat ──► last_seen_at ──► online   (age <  online_window)
//!                                      ├─► offline  (age ≥  online_window)
//!                                      └─► pruned   (age >  removal_window)
//!  cursor record ───────► kept while age ≤ cursor_stale
//! ```
//!
//! Pure state: every query takes `now` in milliseconds. Ages are measured
//! from the local receive time, so a skewed remote clock cannot make a user
//! look online or offline; the remote `updated_at` only orders records from
//! the same sender. The session drives
//! [`PresenceTracker::tick`] on a fixed cadence and republishes the view when
//! it reports a change.

use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

use easel_core::{Point, UserId};

use crate::channel::{CursorRecord, PresenceRecord};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// A user is online while their last heartbeat is younger than this
    pub online_window_ms: u64,
    /// Users silent for longer than this disappear from the list
    pub removal_window_ms: u64,
    pub cursor_stale_ms: u64,
    /// Re-evaluation cadence
    pub tick_ms: u64,
    /// Local heartbeat cadence
    pub heartbeat_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            online_window_ms: 10_000,
            removal_window_ms: 60_000,
            cursor_stale_ms: 10_000,
            tick_ms: 2_000,
            heartbeat_ms: 5_000,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Colors
// ───────────────────────────────────────────────────────────────────

/// Stable per-user display color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UserColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl UserColor {
    /// Derive a vivid color from a hash of the user id. The same id always
    /// maps to the same color on every client.
    pub fn from_user(id: &UserId) -> Self {
        let mut hasher = FxHasher::default();
        id.as_str().hash(&mut hasher);
        let hue = ((hasher.finish() % 360) as f32) / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        Self { r, g, b }
    }

    /// `#rrggbb`
    pub fn to_hex(&self) -> String {
        let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", c(self.r), c(self.g), c(self.b))
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 { t += 1.0; }
    if t > 1.0 { t -= 1.0; }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// `Guest-` plus the first four alphanumeric characters of the id.
pub fn guest_name(id: &UserId) -> String {
    let tag: String = id.as_str().chars().filter(|c| c.is_ascii_alphanumeric()).take(4).collect();
    format!("Guest-{tag}")
}

// ───────────────────────────────────────────────────────────────────
// Tracker
// ───────────────────────────────────────────────────────────────────

/// One row of the online-users list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserPresence {
    pub user_id: UserId,
    pub display_name: String,
    pub online: bool,
    pub last_seen_at: u64,
    pub color: UserColor,
}

/// A remote cursor ready to draw.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteCursor {
    pub user_id: UserId,
    pub display_name: String,
    pub position: Point,
    pub updated_at: u64,
    pub color: UserColor,
}

#[derive(Debug, Clone)]
struct Entry {
    display_name: String,
    /// Local time the newest heartbeat arrived
    last_seen_at: u64,
    /// Sender's stamp on that heartbeat
    remote_at: u64,
    color: UserColor,
}

#[derive(Debug, Clone)]
struct CursorEntry {
    record: CursorRecord,
    received_at: u64,
}

#[derive(Debug)]
pub struct PresenceTracker {
    local_user: UserId,
    config: PresenceConfig,
    users: FxHashMap<UserId, Entry>,
    cursors: FxHashMap<UserId, CursorEntry>,
    /// `(user, online)` as of the last tick
    last_visible: Vec<(UserId, bool)>,
}

impl PresenceTracker {
    pub fn new(local_user: UserId, config: PresenceConfig) -> Self {
        Self {
            local_user,
            config,
            users: FxHashMap::default(),
            cursors: FxHashMap::default(),
            last_visible: Vec::new(),
        }
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Record a heartbeat received at local time `now`. A heartbeat older
    /// than one already seen (a replay) updates the name but not liveness.
    pub fn apply_presence(&mut self, user: &UserId, record: &PresenceRecord, now: u64) {
        let display_name = record
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| guest_name(user));

        let entry = self.users.entry(user.clone()).or_insert_with(|| Entry {
            display_name: display_name.clone(),
            last_seen_at: now,
            remote_at: record.updated_at,
            color: UserColor::from_user(user),
        });
        entry.display_name = display_name;
        if record.updated_at > entry.remote_at {
            entry.remote_at = record.updated_at;
            entry.last_seen_at = entry.last_seen_at.max(now);
        }

        if let Some(cursor) = record.cursor {
            self.apply_cursor(
                user,
                &CursorRecord {
                    x: cursor.x,
                    y: cursor.y,
                    updated_at: record.updated_at,
                },
                now,
            );
        }
    }

    /// The user's presence key went away (disconnect or leave).
    pub fn remove_presence(&mut self, user: &UserId) -> bool {
        self.cursors.remove(user);
        self.users.remove(user).is_some()
    }

    pub fn apply_cursor(&mut self, user: &UserId, record: &CursorRecord, now: u64) {
        match self.cursors.get(user) {
            Some(existing) if existing.record.updated_at >= record.updated_at => {}
            _ => {
                self.cursors.insert(
                    user.clone(),
                    CursorEntry {
                        record: record.clone(),
                        received_at: now,
                    },
                );
            }
        }
    }

    pub fn remove_cursor(&mut self, user: &UserId) -> bool {
        self.cursors.remove(user).is_some()
    }

    fn age(&self, now: u64, at: u64) -> u64 {
        now.saturating_sub(at)
    }

    /// Users not yet pruned, sorted by id.
    pub fn list_users(&self, now: u64) -> Vec<UserPresence> {
        let mut list: Vec<UserPresence> = self
            .users
            .iter()
            .filter(|(_, e)| self.age(now, e.last_seen_at) <= self.config.removal_window_ms)
            .map(|(id, e)| UserPresence {
                user_id: id.clone(),
                display_name: e.display_name.clone(),
                online: self.age(now, e.last_seen_at) < self.config.online_window_ms,
                last_seen_at: e.last_seen_at,
                color: e.color,
            })
            .collect();
        list.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        list
    }

    /// Fresh remote cursors, sorted by user id. The local user's own
    /// cursor is never returned.
    pub fn cursors(&self, now: u64) -> Vec<RemoteCursor> {
        let mut list: Vec<RemoteCursor> = self
            .cursors
            .iter()
            .filter(|(id, _)| **id != self.local_user)
            .filter(|(_, c)| self.age(now, c.received_at) <= self.config.cursor_stale_ms)
            .map(|(id, c)| {
                let (display_name, color) = match self.users.get(id) {
                    Some(e) => (e.display_name.clone(), e.color),
                    None => (guest_name(id), UserColor::from_user(id)),
                };
                RemoteCursor {
                    user_id: id.clone(),
                    display_name,
                    position: c.record.position(),
                    updated_at: c.record.updated_at,
                    color,
                }
            })
            .collect();
        list.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        list
    }

    /// Prune expired entries and report whether anything visible changed
    /// since the previous tick: who is listed, who is online, or a cursor
    /// going stale.
    pub fn tick(&mut self, now: u64) -> bool {
        let removal = self.config.removal_window_ms;
        let stale = self.config.cursor_stale_ms;
        self.users.retain(|_, e| now.saturating_sub(e.last_seen_at) <= removal);
        let cursors_before = self.cursors.len();
        self.cursors.retain(|_, c| now.saturating_sub(c.received_at) <= stale);
        let cursors_pruned = self.cursors.len() != cursors_before;

        let visible: Vec<(UserId, bool)> = self
            .list_users(now)
            .into_iter()
            .map(|u| (u.user_id, u.online))
            .collect();
        let changed = visible != self.last_visible || cursors_pruned;
        if changed {
            log::debug!(
                "Presence changed: {} listed, {} online",
                visible.len(),
                visible.iter().filter(|(_, online)| *online).count()
            );
        }
        self.last_visible = visible;
        changed
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(name: Option<&str>, at: u64) -> PresenceRecord {
        PresenceRecord {
            display_name: name.map(str::to_string),
            updated_at: at,
            cursor: None,
        }
    }

    fn tracker() -> PresenceTracker {
        PresenceTracker::new("me".into(), PresenceConfig::default())
    }

    // ── Color tests ──

    #[test]
    fn test_color_stable_per_user() {
        let a = UserColor::from_user(&"alice".into());
        assert_eq!(a, UserColor::from_user(&"alice".into()));
        assert_eq!(a.to_hex().len(), 7);
        assert!(a.to_hex().starts_with('#'));
    }

    #[test]
    fn test_hsl_achromatic() {
        assert_eq!(hsl_to_rgb(0.3, 0.0, 0.5), (0.5, 0.5, 0.5));
    }

    #[test]
    fn test_guest_name() {
        assert_eq!(guest_name(&"a1-b2c3d4".into()), "Guest-a1b2");
        assert_eq!(guest_name(&"x".into()), "Guest-x");
    }

    // ── Tracker tests ──

    #[test]
    fn test_online_offline_removed_windows() {
        let mut t = tracker();
        t.apply_presence(&"u1".into(), &heartbeat(Some("Ada"), 0), 0);

        let at = |now| t.list_users(now);
        assert!(at(9_999)[0].online);
        let offline = at(10_001);
        assert_eq!(offline.len(), 1);
        assert!(!offline[0].online);
        assert!(at(60_001).is_empty());
    }

    #[test]
    fn test_missing_name_becomes_guest() {
        let mut t = tracker();
        t.apply_presence(&"zq9-77".into(), &heartbeat(None, 5), 5);
        t.apply_presence(&"u2".into(), &heartbeat(Some("   "), 5), 5);
        let users = t.list_users(10);
        assert_eq!(users[0].display_name, "Guest-u2");
        assert_eq!(users[1].display_name, "Guest-zq97");
    }

    #[test]
    fn test_old_heartbeat_does_not_rewind() {
        let mut t = tracker();
        t.apply_presence(&"u1".into(), &heartbeat(None, 500), 500);
        t.apply_presence(&"u1".into(), &heartbeat(None, 100), 550);
        assert_eq!(t.list_users(600)[0].last_seen_at, 500);
    }

    #[test]
    fn test_liveness_ignores_remote_clock_skew() {
        let mut t = tracker();
        // Sender's clock an hour ahead of ours.
        t.apply_presence(&"ahead".into(), &heartbeat(None, 3_600_000), 1_000);
        // Sender's clock far behind ours.
        t.apply_presence(&"behind".into(), &heartbeat(None, 0), 100_000);

        let users = t.list_users(100_500);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id.as_str(), "behind");
        assert!(users[0].online);

        let users = t.list_users(5_000);
        assert!(users.iter().find(|u| u.user_id.as_str() == "ahead").unwrap().online);
    }

    #[test]
    fn test_replayed_heartbeat_does_not_refresh_liveness() {
        let mut t = tracker();
        t.apply_presence(&"u1".into(), &heartbeat(None, 40), 0);
        t.apply_presence(&"u1".into(), &heartbeat(None, 40), 9_000);
        assert!(!t.list_users(10_500)[0].online);
        t.apply_presence(&"u1".into(), &heartbeat(None, 41), 10_000);
        assert!(t.list_users(10_500)[0].online);
    }

    #[test]
    fn test_cursor_staleness_uses_receive_time() {
        let mut t = tracker();
        t.apply_cursor(&"u1".into(), &CursorRecord { x: 1.0, y: 2.0, updated_at: 5 }, 50_000);
        assert_eq!(t.cursors(55_000).len(), 1);
        assert!(!t.tick(55_000));
        assert!(t.cursors(60_001).is_empty());
    }

    #[test]
    fn test_stale_cursors_discarded_on_read() {
        let mut t = tracker();
        t.apply_cursor(&"u1".into(), &CursorRecord { x: 1.0, y: 2.0, updated_at: 0 }, 0);
        t.apply_cursor(&"me".into(), &CursorRecord { x: 0.0, y: 0.0, updated_at: 0 }, 0);
        assert_eq!(t.cursors(10_000).len(), 1);
        assert!(t.cursors(10_001).is_empty());
    }

    #[test]
    fn test_presence_cursor_feeds_cursor_list() {
        let mut t = tracker();
        t.apply_presence(
            &"u1".into(),
            &PresenceRecord {
                display_name: Some("Ada".into()),
                updated_at: 10,
                cursor: Some(Point::new(3.0, 4.0)),
            },
            10,
        );
        let cursors = t.cursors(20);
        assert_eq!(cursors[0].position, Point::new(3.0, 4.0));
        assert_eq!(cursors[0].display_name, "Ada");
    }

    #[test]
    fn test_tick_reports_transitions() {
        let mut t = tracker();
        t.apply_presence(&"u1".into(), &heartbeat(None, 0), 0);
        assert!(t.tick(0));
        assert!(!t.tick(2_000));
        assert!(t.tick(10_000));
        assert!(!t.tick(12_000));
        assert!(t.tick(60_001));
        assert_eq!(t.user_count(), 0);
    }

    #[test]
    fn test_remove_presence() {
        let mut t = tracker();
        t.apply_presence(&"u1".into(), &heartbeat(None, 0), 0);
        assert!(t.remove_presence(&"u1".into()));
        assert!(t.list_users(1).is_empty());
        assert!(!t.remove_presence(&"u1".into()));
    }
}
