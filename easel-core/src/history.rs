//! Bounded, debounced, linear undo/redo over full-state snapshots.
//!
//! The stack stores whole snapshots rather than inverse operations, so
//! undoing never needs to know what kind of edit produced a state.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Minimum spacing between accepted pushes.
    pub debounce_ms: u64,
    /// Oldest entries are evicted beyond this depth.
    pub max_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            max_depth: 50,
        }
    }
}

impl HistoryConfig {
    pub fn for_testing() -> Self {
        Self {
            debounce_ms: 0,
            max_depth: 5,
        }
    }
}

/// Linear undo/redo stack.
///
/// `push` records the state *before* an edit. `undo(current)` returns the
/// state to restore and remembers `current` for redo.
#[derive(Debug)]
pub struct UndoStack<S> {
    config: HistoryConfig,
    undo: VecDeque<S>,
    redo: Vec<S>,
    last_push_at: Option<u64>,
}

impl<S: Clone> UndoStack<S> {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            undo: VecDeque::new(),
            redo: Vec::new(),
            last_push_at: None,
        }
    }

    /// Record a state. Returns `false` when debounced. An accepted push
    /// clears the redo stack.
    pub fn push(&mut self, snapshot: S, now: u64) -> bool {
        if let Some(last) = self.last_push_at {
            if now.saturating_sub(last) < self.config.debounce_ms {
                return false;
            }
        }
        self.last_push_at = Some(now);
        self.undo.push_back(snapshot);
        while self.undo.len() > self.config.max_depth {
            self.undo.pop_front();
        }
        self.redo.clear();
        true
    }

    pub fn undo(&mut self, current: S) -> Option<S> {
        let previous = self.undo.pop_back()?;
        self.redo.push(current);
        Some(previous)
    }

    pub fn redo(&mut self, current: S) -> Option<S> {
        let next = self.redo.pop()?;
        self.undo.push_back(current);
        while self.undo.len() > self.config.max_depth {
            self.undo.pop_front();
        }
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.undo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.last_push_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> UndoStack<u32> {
        UndoStack::new(HistoryConfig::default())
    }

    #[test]
    fn test_push_is_debounced() {
        let mut s = stack();
        assert!(s.push(1, 0));
        assert!(!s.push(2, 299));
        assert!(s.push(3, 300));
        assert_eq!(s.depth(), 2);
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let mut s = stack();
        s.push(1, 0);
        s.push(2, 1000);
        assert_eq!(s.undo(3), Some(2));
        assert_eq!(s.undo(2), Some(1));
        assert_eq!(s.undo(1), None);
        assert_eq!(s.redo(1), Some(2));
        assert_eq!(s.redo(2), Some(3));
        assert!(!s.can_redo());
    }

    #[test]
    fn test_push_clears_redo() {
        let mut s = stack();
        s.push(1, 0);
        s.undo(2);
        assert!(s.can_redo());
        s.push(5, 1000);
        assert!(!s.can_redo());
    }

    #[test]
    fn test_depth_is_bounded() {
        let mut s = stack();
        for i in 0..60u32 {
            s.push(i, u64::from(i) * 1000);
        }
        assert_eq!(s.depth(), 50);
        // Oldest ten evicted.
        let mut last = None;
        while let Some(v) = s.undo(0) {
            last = Some(v);
        }
        assert_eq!(last, Some(10));
    }
}
