//! Deterministic layouts for template and arrangement tools.
//!
//! Everything here is a pure function of its arguments, so repeating a
//! template call with the same arguments places elements identically.
//!
//! ```text
//!  grid:      x = x0 + col * (w + spacing)
//!             y = y0 + row * (h + spacing)
//!
//!  swot:      ┌─────────────┐ ┌─────────────┐
//!             │ Strengths   │ │ Weaknesses  │
//!             └─────────────┘ └─────────────┘
//!             ┌─────────────┐ ┌─────────────┐
//!             │Opportunities│ │ Threats     │
//!             └─────────────┘ └─────────────┘
//! ```

use easel_core::element::{FRAME_SIZE, FRAME_TITLE_BAR};
use easel_core::{Point, Rect};

use crate::tools::Direction;

pub const DEFAULT_SPACING: f64 = 24.0;

/// Upper bound on elements a single template call may create.
pub const MAX_TEMPLATE_ITEMS: usize = 200;

pub const SWOT_TITLES: [&str; 4] = ["Strengths", "Weaknesses", "Opportunities", "Threats"];

/// Smallest column count whose square grid fits `count` items.
pub fn default_columns(count: usize) -> usize {
    if count == 0 {
        return 1;
    }
    let mut cols = 1;
    while cols * cols < count {
        cols += 1;
    }
    cols
}

/// Row-major grid cell origins.
pub fn grid(origin: Point, count: usize, columns: usize, cell: (f64, f64), spacing: f64) -> Vec<Point> {
    let columns = columns.max(1);
    (0..count)
        .map(|i| {
            let (row, col) = (i / columns, i % columns);
            Point::new(
                origin.x + col as f64 * (cell.0 + spacing),
                origin.y + row as f64 * (cell.1 + spacing),
            )
        })
        .collect()
}

/// Origins of `count` equally sized items laid in a line.
pub fn chain(origin: Point, count: usize, size: (f64, f64), spacing: f64, direction: Direction) -> Vec<Point> {
    (0..count)
        .map(|i| {
            let i = i as f64;
            match direction {
                Direction::Horizontal => Point::new(origin.x + i * (size.0 + spacing), origin.y),
                Direction::Vertical => Point::new(origin.x, origin.y + i * (size.1 + spacing)),
            }
        })
        .collect()
}

/// Pack `rects` along one axis in their current order, starting where the
/// first one is and leaving `spacing` between neighbours. The cross axis is
/// left unchanged.
pub fn distribute(rects: &[Rect], direction: Direction, spacing: f64) -> Vec<Point> {
    let mut out = Vec::with_capacity(rects.len());
    let Some(first) = rects.first() else {
        return out;
    };
    let mut cursor = match direction {
        Direction::Horizontal => first.x,
        Direction::Vertical => first.y,
    };
    for r in rects {
        match direction {
            Direction::Horizontal => {
                out.push(Point::new(cursor, r.y));
                cursor += r.width + spacing;
            }
            Direction::Vertical => {
                out.push(Point::new(r.x, cursor));
                cursor += r.height + spacing;
            }
        }
    }
    out
}

/// Frame bounds enclosing `children` with `padding` on every side and the
/// title bar on top. `None` without children.
pub fn fit_frame(children: &[Rect], padding: f64) -> Option<Rect> {
    let content = Rect::enclosing(children)?;
    Some(Rect::new(
        content.x - padding,
        content.y - padding - FRAME_TITLE_BAR,
        content.width + 2.0 * padding,
        content.height + 2.0 * padding + FRAME_TITLE_BAR,
    ))
}

/// One stage of a journey map: the frame and where its header note goes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JourneyStage {
    pub frame: Rect,
    pub header: Point,
}

/// Stage frames left to right, each with a header note just below the
/// title bar.
pub fn journey(origin: Point, stages: usize, spacing: f64) -> Vec<JourneyStage> {
    chain(origin, stages, FRAME_SIZE, spacing, Direction::Horizontal)
        .into_iter()
        .map(|p| JourneyStage {
            frame: Rect::new(p.x, p.y, FRAME_SIZE.0, FRAME_SIZE.1),
            header: Point::new(p.x + spacing, p.y + FRAME_TITLE_BAR + spacing),
        })
        .collect()
}

/// SWOT quadrants in title order.
pub fn swot(origin: Point, spacing: f64) -> [(&'static str, Rect); 4] {
    let cells = grid(origin, 4, 2, FRAME_SIZE, spacing);
    let rect = |i: usize| Rect::new(cells[i].x, cells[i].y, FRAME_SIZE.0, FRAME_SIZE.1);
    [
        (SWOT_TITLES[0], rect(0)),
        (SWOT_TITLES[1], rect(1)),
        (SWOT_TITLES[2], rect(2)),
        (SWOT_TITLES[3], rect(3)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_columns() {
        assert_eq!(default_columns(0), 1);
        assert_eq!(default_columns(1), 1);
        assert_eq!(default_columns(4), 2);
        assert_eq!(default_columns(5), 3);
        assert_eq!(default_columns(9), 3);
        assert_eq!(default_columns(10), 4);
    }

    #[test]
    fn test_grid_formula() {
        let cells = grid(Point::new(100.0, 50.0), 5, 2, (160.0, 120.0), 24.0);
        assert_eq!(cells[0], Point::new(100.0, 50.0));
        assert_eq!(cells[1], Point::new(284.0, 50.0));
        assert_eq!(cells[2], Point::new(100.0, 194.0));
        assert_eq!(cells[4], Point::new(100.0, 338.0));
    }

    #[test]
    fn test_chain_directions() {
        let h = chain(Point::ZERO, 3, (120.0, 80.0), 24.0, Direction::Horizontal);
        assert_eq!(h[2], Point::new(288.0, 0.0));
        let v = chain(Point::ZERO, 3, (120.0, 80.0), 24.0, Direction::Vertical);
        assert_eq!(v[2], Point::new(0.0, 208.0));
    }

    #[test]
    fn test_distribute_keeps_cross_axis() {
        let rects = [
            Rect::new(10.0, 5.0, 50.0, 10.0),
            Rect::new(300.0, 40.0, 20.0, 10.0),
            Rect::new(90.0, 70.0, 30.0, 10.0),
        ];
        let out = distribute(&rects, Direction::Horizontal, 10.0);
        assert_eq!(out, vec![Point::new(10.0, 5.0), Point::new(70.0, 40.0), Point::new(100.0, 70.0)]);
        assert!(distribute(&[], Direction::Vertical, 10.0).is_empty());
    }

    #[test]
    fn test_fit_frame_includes_title_bar() {
        let children = [Rect::new(100.0, 100.0, 160.0, 120.0), Rect::new(300.0, 150.0, 100.0, 100.0)];
        let frame = fit_frame(&children, 24.0).unwrap();
        assert_eq!(frame, Rect::new(76.0, 48.0, 348.0, 226.0));
        assert!(fit_frame(&[], 24.0).is_none());
    }

    #[test]
    fn test_journey_headers_inside_frames() {
        let stages = journey(Point::new(0.0, 0.0), 3, 24.0);
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[1].frame.x, 344.0);
        for s in &stages {
            assert!(s.frame.contains(s.header));
        }
    }

    #[test]
    fn test_swot_is_two_by_two() {
        let q = swot(Point::new(0.0, 0.0), 24.0);
        assert_eq!(q.map(|(t, _)| t), SWOT_TITLES);
        assert_eq!(q[1].1.x, 344.0);
        assert_eq!(q[2].1.y, 224.0);
        assert_eq!(q[3].1.x, q[1].1.x);
    }
}
