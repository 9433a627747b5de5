//! Board context handed to the agent before it picks ids.
//!
//! Lists every element in z-order with no truncation, so two calls on the
//! same state always yield the same context.

use serde::Serialize;
use std::fmt::Write as _;

use easel_core::{Board, ElementKind, ExportedElement};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardContext {
    pub element_count: usize,
    pub counts: Vec<(ElementKind, usize)>,
    pub elements: Vec<ExportedElement>,
}

pub fn board_context(board: &Board) -> BoardContext {
    let elements = board.export();
    let counts = ElementKind::ALL
        .iter()
        .map(|k| (*k, elements.iter().filter(|e| e.kind == *k).count()))
        .collect();
    BoardContext {
        element_count: elements.len(),
        counts,
        elements,
    }
}

impl BoardContext {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// One line per element, for prompt text.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        if self.elements.is_empty() {
            out.push_str("The board is empty.\n");
            return out;
        }
        let _ = writeln!(out, "{} elements on the board:", self.element_count);
        for e in &self.elements {
            let _ = write!(out, "- {} {}", e.kind, e.id);
            if let Some(b) = e.bounds {
                let _ = write!(out, " at ({}, {}) size {}x{}", b.x, b.y, b.width, b.height);
            }
            if let (Some(from), Some(to)) = (&e.from_id, &e.to_id) {
                let _ = write!(out, " from {from} to {to}");
            }
            if let Some(text) = e.text.as_deref().filter(|t| !t.is_empty()) {
                let _ = write!(out, " text {text:?}");
            }
            let _ = write!(out, " color {}", e.color);
            if let Some(parent) = &e.parent_frame_id {
                let _ = write!(out, " in frame {parent}");
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use easel_core::{ElementBody, FrameBody, LingerConfig, NoteBody};

    #[test]
    fn test_empty_board() {
        let board = Board::new("agent".into(), LingerConfig::default());
        let ctx = board_context(&board);
        assert_eq!(ctx.element_count, 0);
        assert_eq!(ctx.describe(), "The board is empty.\n");
    }

    #[test]
    fn test_context_lists_everything_in_order() {
        let mut board = Board::new("agent".into(), LingerConfig::default());
        let (frame, _) = board.create(ElementBody::Frame(FrameBody::default()), None, 10);
        for i in 0..120 {
            let body = ElementBody::Note(NoteBody { text: format!("n{i}"), ..NoteBody::default() });
            board.create(body, Some(frame.clone()), 11 + i);
        }

        let ctx = board_context(&board);
        assert_eq!(ctx.element_count, 121);
        assert_eq!(ctx.elements[0].id, frame);
        assert!(ctx.counts.contains(&(ElementKind::Note, 120)));
        assert_eq!(ctx.describe().lines().count(), 122);
        assert!(ctx.describe().contains(&format!("in frame {frame}")));

        // Same state, same context.
        assert_eq!(board_context(&board), ctx);
    }
}
