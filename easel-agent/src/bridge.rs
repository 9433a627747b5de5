//! Agent → Board bridge
//!
//! Applies a batch of agent tool invocations to a [`Board`] through its
//! mutation API. Invocations run strictly in order and in isolation: one
//! that fails to decode or validate is skipped and logged, and the batch
//! carries on with the next.
//!
//! ```text
//!  [{name, args}] ──decode──▸ Tool ──validate──▸ Board mutations ──▸ WriteIntents
//!                     │                    │
//!                     └──── skip + warn ◂──┘
//! ```
//!
//! Each handler validates all of its arguments before touching the board,
//! so a skipped invocation never leaves a partial write behind. Ids that do
//! not exist on the board are a no-op for that sub-operation.

use easel_core::element::{
    FRAME_FILL, FRAME_SIZE, FRAME_TITLE, NOTE_COLOR, NOTE_SIZE, SHAPE_FILL,
    SHAPE_SIZE, SHAPE_STROKE, TEXT_COLOR, TEXT_FONT_SIZE, TEXT_SIZE,
};
use easel_core::{
    Board, ConnectorBody, ElementBody, ElementId, ElementKind, ElementPatch, FrameBody, NoteBody,
    Point, Rect, ShapeBody, ShapeType, TextBody, WriteIntent,
};

use crate::context::{board_context, BoardContext};
use crate::layout::{self, DEFAULT_SPACING, MAX_TEMPLATE_ITEMS};
use crate::tools::{
    finite, parse_endpoint, parse_shape_type, resolve_color, resolve_optional_color, size_or,
    ArrangeInGrid, CreateConnector, CreateFlowchart, CreateFrame, CreateJourneyMap, CreateNoteGrid,
    CreateShape, CreateStickyNote, CreateSwot, CreateText, Direction, DistributeObjects,
    FitFrameToContents, Tool, ToolError, ToolInvocation,
};

// ───────────────────────────────────────────────────────────────────
// Reports
// ───────────────────────────────────────────────────────────────────

/// What happened to one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The board changed.
    Applied {
        created: Vec<ElementId>,
        writes: usize,
    },
    /// Read-only tool; see [`BatchReport::context`].
    Read,
    /// Valid, but every referenced id was unknown.
    NoOp,
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationReport {
    pub index: usize,
    pub name: String,
    pub outcome: Outcome,
}

/// Result of [`AgentBridge::execute`].
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<InvocationReport>,
    /// Every write produced, in order. The caller persists these.
    pub writes: Vec<WriteIntent>,
    /// Set by `getBoardState`; the board as it was when the tool ran.
    pub context: Option<BoardContext>,
}

impl BatchReport {
    pub fn applied(&self) -> impl Iterator<Item = &InvocationReport> {
        self.outcomes
            .iter()
            .filter(|r| !matches!(r.outcome, Outcome::Skipped { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|r| match &r.outcome {
            Outcome::Skipped { reason } => Some((r.name.as_str(), reason.as_str())),
            _ => None,
        })
    }

    /// Ids minted by create tools, in creation order.
    pub fn created(&self) -> Vec<ElementId> {
        self.outcomes
            .iter()
            .filter_map(|r| match &r.outcome {
                Outcome::Applied { created, .. } => Some(created.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// One line for a dismissible status message.
    pub fn summary(&self) -> String {
        let created = self.created();
        let deleted = self
            .writes
            .iter()
            .filter(|w| matches!(w, WriteIntent::Delete { .. }))
            .count();
        let updated = self
            .writes
            .iter()
            .filter(|w| matches!(w, WriteIntent::Put(e) if !created.contains(&e.id)))
            .count();

        let mut parts = Vec::new();
        if !created.is_empty() {
            parts.push(format!("created {}", created.len()));
        }
        if updated > 0 {
            parts.push(format!("updated {updated}"));
        }
        if deleted > 0 {
            parts.push(format!("deleted {deleted}"));
        }
        let mut line = if parts.is_empty() {
            "No changes".to_string()
        } else {
            let joined = parts.join(", ");
            let mut chars = joined.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>() + " elements",
                None => joined,
            }
        };
        let skipped = self.skipped().count();
        if skipped > 0 {
            line.push_str(&format!(" ({skipped} of {} actions skipped)", self.outcomes.len()));
        }
        line
    }
}

/// Output of one successful handler.
#[derive(Default)]
struct Applied {
    created: Vec<ElementId>,
    writes: Vec<WriteIntent>,
}

impl Applied {
    fn push(&mut self, write: Option<WriteIntent>) {
        self.writes.extend(write);
    }
}

// ───────────────────────────────────────────────────────────────────
// Bridge
// ───────────────────────────────────────────────────────────────────

/// Executes agent tool batches against a board.
pub struct AgentBridge {
    spacing: f64,
    /// Invocations handled over the lifetime of the bridge.
    processed: u64,
}

impl Default for AgentBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBridge {
    pub fn new() -> Self {
        Self {
            spacing: DEFAULT_SPACING,
            processed: 0,
        }
    }

    /// Default gap used by layout tools when the call gives none.
    pub fn with_spacing(spacing: f64) -> Self {
        Self {
            spacing,
            processed: 0,
        }
    }

    #[inline]
    pub fn total_processed(&self) -> u64 {
        self.processed
    }

    /// Apply `invocations` in order. Never fails as a whole.
    pub fn execute(&mut self, board: &mut Board, invocations: &[ToolInvocation], now: u64) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, invocation) in invocations.iter().enumerate() {
            let result = invocation.decode().and_then(|tool| {
                if tool.is_read_only() {
                    report.context = Some(board_context(board));
                    return Ok(None);
                }
                self.apply_one(board, &tool, now).map(Some)
            });

            let outcome = match result {
                Ok(None) => Outcome::Read,
                Ok(Some(applied)) if applied.writes.is_empty() => Outcome::NoOp,
                Ok(Some(applied)) => {
                    let outcome = Outcome::Applied {
                        created: applied.created,
                        writes: applied.writes.len(),
                    };
                    report.writes.extend(applied.writes);
                    outcome
                }
                Err(e) => {
                    log::warn!("Agent bridge: skipping #{index} {}: {e}", invocation.name);
                    Outcome::Skipped { reason: e.to_string() }
                }
            };
            report.outcomes.push(InvocationReport {
                index,
                name: invocation.name.clone(),
                outcome,
            });
        }

        self.processed += invocations.len() as u64;
        log::info!("Agent batch of {}: {}", invocations.len(), report.summary());
        report
    }

    fn apply_one(&self, board: &mut Board, tool: &Tool, now: u64) -> Result<Applied, ToolError> {
        let mut out = Applied::default();
        match tool {
            Tool::CreateStickyNote(a) => self.create_note(board, a, now, &mut out)?,
            Tool::CreateShape(a) => self.create_shape(board, a, now, &mut out)?,
            Tool::CreateText(a) => self.create_text(board, a, now, &mut out)?,
            Tool::CreateFrame(a) => self.create_frame(board, a, now, &mut out)?,
            Tool::CreateConnector(a) => self.create_connector(board, a, now, &mut out)?,

            Tool::MoveObject(a) => {
                let to = Point::new(finite(tool.name(), "x", a.x)?, finite(tool.name(), "y", a.y)?);
                out.push(board.move_to(&a.object_id, to, now));
            }
            Tool::ResizeObject(a) => {
                let w = size_or(tool.name(), Some(a.width), 0.0)?;
                let h = size_or(tool.name(), Some(a.height), 0.0)?;
                out.push(board.resize(&a.object_id, w, h, now));
            }
            Tool::UpdateText(a) => {
                if let Some(element) = board.get(&a.object_id) {
                    if element.text().is_none() {
                        return Err(ToolError::invalid(
                            tool.name(),
                            format!("{} {} has no text", element.kind(), a.object_id),
                        ));
                    }
                    out.push(board.update(&a.object_id, &ElementPatch::text(a.new_text.clone()), now));
                }
            }
            Tool::ChangeColor(a) => {
                let color = resolve_color(&a.color)?;
                out.push(board.update(&a.object_id, &ElementPatch::color(color), now));
            }
            Tool::DeleteObjects(a) => {
                out.writes = board.delete_many(&a.object_ids, now);
            }
            Tool::DeleteFrameWithContents(a) => {
                if let Some(frame) = board.get(&a.frame_id) {
                    if frame.kind() != ElementKind::Frame {
                        return Err(ToolError::invalid(
                            tool.name(),
                            format!("{} is a {}, not a frame", a.frame_id, frame.kind()),
                        ));
                    }
                    let mut ids = vec![a.frame_id.clone()];
                    ids.extend(board.children_of(&a.frame_id).into_iter().map(|e| e.id.clone()));
                    out.writes = board.delete_many(&ids, now);
                }
            }

            Tool::ArrangeInGrid(a) => self.arrange_in_grid(board, a, now, &mut out)?,
            Tool::DistributeObjects(a) => self.distribute(board, a, now, &mut out)?,
            Tool::FitFrameToContents(a) => self.fit_frame(board, a, now, &mut out)?,

            Tool::CreateNoteGrid(a) => self.create_note_grid(board, a, now, &mut out)?,
            Tool::CreateFlowchart(a) => self.create_flowchart(board, a, now, &mut out)?,
            Tool::CreateJourneyMap(a) => self.create_journey_map(board, a, now, &mut out)?,
            Tool::CreateSwot(a) => self.create_swot(board, a, now, &mut out)?,

            Tool::GetBoardState(_) => {}
        }
        Ok(out)
    }

    // ───────────────────────────────────────────────────────────────────
    // Create tools
    // ───────────────────────────────────────────────────────────────────

    fn create_note(&self, board: &mut Board, a: &CreateStickyNote, now: u64, out: &mut Applied) -> Result<(), ToolError> {
        const TOOL: &str = "createStickyNote";
        let body = NoteBody {
            x: finite(TOOL, "x", a.x)?,
            y: finite(TOOL, "y", a.y)?,
            width: size_or(TOOL, a.width, NOTE_SIZE.0)?,
            height: size_or(TOOL, a.height, NOTE_SIZE.1)?,
            text: a.text.clone(),
            color: resolve_optional_color(a.color.as_deref())?.unwrap_or_else(|| NOTE_COLOR.to_string()),
        };
        let parent = known_frame(board, a.parent_frame_id.as_ref());
        create(board, ElementBody::Note(body), parent, now, out);
        Ok(())
    }

    fn create_shape(&self, board: &mut Board, a: &CreateShape, now: u64, out: &mut Applied) -> Result<(), ToolError> {
        const TOOL: &str = "createShape";
        let body = ShapeBody {
            x: finite(TOOL, "x", a.x)?,
            y: finite(TOOL, "y", a.y)?,
            width: size_or(TOOL, a.width, SHAPE_SIZE.0)?,
            height: size_or(TOOL, a.height, SHAPE_SIZE.1)?,
            shape_type: parse_shape_type(TOOL, &a.shape_type)?,
            fill: resolve_optional_color(a.color.as_deref())?.unwrap_or_else(|| SHAPE_FILL.to_string()),
            stroke: SHAPE_STROKE.to_string(),
        };
        let parent = known_frame(board, a.parent_frame_id.as_ref());
        create(board, ElementBody::Shape(body), parent, now, out);
        Ok(())
    }

    fn create_text(&self, board: &mut Board, a: &CreateText, now: u64, out: &mut Applied) -> Result<(), ToolError> {
        const TOOL: &str = "createText";
        let body = TextBody {
            x: finite(TOOL, "x", a.x)?,
            y: finite(TOOL, "y", a.y)?,
            width: TEXT_SIZE.0,
            height: TEXT_SIZE.1,
            text: a.text.clone(),
            font_size: size_or(TOOL, a.font_size, TEXT_FONT_SIZE)?,
            color: resolve_optional_color(a.color.as_deref())?.unwrap_or_else(|| TEXT_COLOR.to_string()),
        };
        let parent = known_frame(board, a.parent_frame_id.as_ref());
        create(board, ElementBody::Text(body), parent, now, out);
        Ok(())
    }

    fn create_frame(&self, board: &mut Board, a: &CreateFrame, now: u64, out: &mut Applied) -> Result<(), ToolError> {
        const TOOL: &str = "createFrame";
        let body = FrameBody {
            x: finite(TOOL, "x", a.x)?,
            y: finite(TOOL, "y", a.y)?,
            width: size_or(TOOL, a.width, FRAME_SIZE.0)?,
            height: size_or(TOOL, a.height, FRAME_SIZE.1)?,
            title: a.title.clone().unwrap_or_else(|| FRAME_TITLE.to_string()),
            fill: resolve_optional_color(a.color.as_deref())?.unwrap_or_else(|| FRAME_FILL.to_string()),
        };
        create(board, ElementBody::Frame(body), None, now, out);
        Ok(())
    }

    fn create_connector(&self, board: &mut Board, a: &CreateConnector, now: u64, out: &mut Applied) -> Result<(), ToolError> {
        const TOOL: &str = "createConnector";
        let endpoint = parse_endpoint(TOOL, a.style.as_deref())?;
        let color = resolve_optional_color(a.color.as_deref())?;
        if a.from_id == a.to_id {
            return Err(ToolError::invalid(TOOL, "a connector needs two different ends"));
        }
        if !board.contains(&a.from_id) || !board.contains(&a.to_id) {
            return Ok(());
        }
        let mut body = ConnectorBody::between(a.from_id.clone(), a.to_id.clone());
        body.endpoint = endpoint;
        if let Some(color) = color {
            body.color = color;
        }
        create(board, ElementBody::Connector(body), None, now, out);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────
    // Arrangement tools
    // ───────────────────────────────────────────────────────────────────

    fn arrange_in_grid(&self, board: &mut Board, a: &ArrangeInGrid, now: u64, out: &mut Applied) -> Result<(), ToolError> {
        const TOOL: &str = "arrangeInGrid";
        if a.columns == Some(0) {
            return Err(ToolError::invalid(TOOL, "columns must be at least 1"));
        }
        let spacing = self.spacing_or(TOOL, a.spacing)?;
        let placed = placeable(board, &a.object_ids);
        if placed.is_empty() {
            return Ok(());
        }

        let columns = a.columns.map_or_else(|| layout::default_columns(placed.len()), |c| c as usize);
        let cell = placed
            .iter()
            .fold((0.0_f64, 0.0_f64), |(w, h), (_, r)| (w.max(r.width), h.max(r.height)));
        let origin = Point::new(
            a.start_x.unwrap_or_else(|| placed.iter().map(|(_, r)| r.x).fold(f64::INFINITY, f64::min)),
            a.start_y.unwrap_or_else(|| placed.iter().map(|(_, r)| r.y).fold(f64::INFINITY, f64::min)),
        );

        let cells = layout::grid(origin, placed.len(), columns, cell, spacing);
        let moves: Vec<(ElementId, Point)> = placed.into_iter().map(|(id, _)| id).zip(cells).collect();
        out.writes = board.move_many(&moves, now);
        Ok(())
    }

    fn distribute(&self, board: &mut Board, a: &DistributeObjects, now: u64, out: &mut Applied) -> Result<(), ToolError> {
        let spacing = self.spacing_or("distributeObjects", a.spacing)?;
        let mut placed = placeable(board, &a.object_ids);
        if placed.len() < 2 {
            return Ok(());
        }
        placed.sort_by(|(ia, ra), (ib, rb)| {
            let (ka, kb) = match a.direction {
                Direction::Horizontal => (ra.x, rb.x),
                Direction::Vertical => (ra.y, rb.y),
            };
            ka.total_cmp(&kb).then_with(|| ia.cmp(ib))
        });
        let rects: Vec<Rect> = placed.iter().map(|(_, r)| *r).collect();
        let positions = layout::distribute(&rects, a.direction, spacing);
        let moves: Vec<(ElementId, Point)> = placed.into_iter().map(|(id, _)| id).zip(positions).collect();
        out.writes = board.move_many(&moves, now);
        Ok(())
    }

    fn fit_frame(&self, board: &mut Board, a: &FitFrameToContents, now: u64, out: &mut Applied) -> Result<(), ToolError> {
        const TOOL: &str = "fitFrameToContents";
        let padding = self.spacing_or(TOOL, a.padding)?;
        let Some(frame) = board.get(&a.frame_id) else {
            return Ok(());
        };
        if frame.kind() != ElementKind::Frame {
            return Err(ToolError::invalid(TOOL, format!("{} is not a frame", a.frame_id)));
        }
        let children: Vec<Rect> = board
            .children_of(&a.frame_id)
            .into_iter()
            .filter_map(|e| e.bounds())
            .collect();
        let Some(bounds) = layout::fit_frame(&children, padding) else {
            return Ok(());
        };
        let patch = ElementPatch {
            position: Some(Point::new(bounds.x, bounds.y)),
            size: Some((bounds.width, bounds.height)),
            ..ElementPatch::default()
        };
        out.push(board.update(&a.frame_id, &patch, now));
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────
    // Templates
    // ───────────────────────────────────────────────────────────────────

    fn create_note_grid(&self, board: &mut Board, a: &CreateNoteGrid, now: u64, out: &mut Applied) -> Result<(), ToolError> {
        const TOOL: &str = "createNoteGrid";
        let count = (a.rows as usize).saturating_mul(a.columns as usize);
        check_count(TOOL, count)?;
        let spacing = self.spacing_or(TOOL, a.spacing)?;
        let color = resolve_optional_color(a.color.as_deref())?.unwrap_or_else(|| NOTE_COLOR.to_string());
        let origin = Point::new(finite(TOOL, "x", a.x)?, finite(TOOL, "y", a.y)?);
        let parent = known_frame(board, a.parent_frame_id.as_ref());

        let cells = layout::grid(origin, count, a.columns as usize, NOTE_SIZE, spacing);
        for (i, p) in cells.into_iter().enumerate() {
            let body = NoteBody {
                x: p.x,
                y: p.y,
                text: a.texts.get(i).cloned().unwrap_or_default(),
                color: color.clone(),
                ..NoteBody::default()
            };
            create(board, ElementBody::Note(body), parent.clone(), now, out);
        }
        Ok(())
    }

    fn create_flowchart(&self, board: &mut Board, a: &CreateFlowchart, now: u64, out: &mut Applied) -> Result<(), ToolError> {
        const TOOL: &str = "createFlowchart";
        check_count(TOOL, a.steps.len().saturating_mul(3))?;
        let spacing = self.spacing_or(TOOL, a.spacing)?;
        let origin = Point::new(finite(TOOL, "x", a.x)?, finite(TOOL, "y", a.y)?);

        let cells = layout::chain(origin, a.steps.len(), SHAPE_SIZE, spacing, a.direction);
        let mut nodes = Vec::with_capacity(cells.len());
        for (step, p) in a.steps.iter().zip(cells) {
            let shape = ShapeBody {
                x: p.x,
                y: p.y,
                shape_type: ShapeType::Rectangle,
                ..ShapeBody::default()
            };
            nodes.push(create(board, ElementBody::Shape(shape), None, now, out));
            let label = TextBody {
                x: p.x,
                y: p.y + (SHAPE_SIZE.1 - TEXT_SIZE.1) / 2.0,
                width: SHAPE_SIZE.0,
                text: step.clone(),
                ..TextBody::default()
            };
            create(board, ElementBody::Text(label), None, now, out);
        }
        for pair in nodes.windows(2) {
            let body = ConnectorBody::between(pair[0].clone(), pair[1].clone());
            create(board, ElementBody::Connector(body), None, now, out);
        }
        Ok(())
    }

    fn create_journey_map(&self, board: &mut Board, a: &CreateJourneyMap, now: u64, out: &mut Applied) -> Result<(), ToolError> {
        const TOOL: &str = "createJourneyMap";
        check_count(TOOL, a.stages.len().saturating_mul(2))?;
        let origin = Point::new(finite(TOOL, "x", a.x)?, finite(TOOL, "y", a.y)?);

        let slots = layout::journey(origin, a.stages.len(), self.spacing);
        for (stage, slot) in a.stages.iter().zip(slots) {
            let frame = FrameBody {
                x: slot.frame.x,
                y: slot.frame.y,
                width: slot.frame.width,
                height: slot.frame.height,
                title: stage.clone(),
                ..FrameBody::default()
            };
            let frame_id = create(board, ElementBody::Frame(frame), None, now, out);
            let header = NoteBody {
                x: slot.header.x,
                y: slot.header.y,
                text: stage.clone(),
                ..NoteBody::default()
            };
            create(board, ElementBody::Note(header), Some(frame_id), now, out);
        }
        Ok(())
    }

    fn create_swot(&self, board: &mut Board, a: &CreateSwot, now: u64, out: &mut Applied) -> Result<(), ToolError> {
        const TOOL: &str = "createSwot";
        let origin = Point::new(finite(TOOL, "x", a.x)?, finite(TOOL, "y", a.y)?);
        for (title, r) in layout::swot(origin, self.spacing) {
            let frame = FrameBody {
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
                title: title.to_string(),
                ..FrameBody::default()
            };
            create(board, ElementBody::Frame(frame), None, now, out);
        }
        Ok(())
    }

    fn spacing_or(&self, tool: &str, value: Option<f64>) -> Result<f64, ToolError> {
        match value {
            None => Ok(self.spacing),
            Some(v) if v.is_finite() && v >= 0.0 => Ok(v),
            Some(v) => Err(ToolError::invalid(tool, format!("spacing must be non-negative, got {v}"))),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Helpers
// ───────────────────────────────────────────────────────────────────

fn create(board: &mut Board, body: ElementBody, parent: Option<ElementId>, now: u64, out: &mut Applied) -> ElementId {
    let (id, write) = board.create(body, parent, now);
    out.created.push(id.clone());
    out.writes.push(write);
    id
}

/// `id` if it names a frame on the board.
fn known_frame(board: &Board, id: Option<&ElementId>) -> Option<ElementId> {
    let id = id?;
    match board.get(id) {
        Some(e) if e.kind() == ElementKind::Frame => Some(id.clone()),
        _ => {
            log::debug!("Ignoring unknown parent frame {id}");
            None
        }
    }
}

/// Known, positioned elements among `ids`, first occurrence only.
fn placeable(board: &Board, ids: &[ElementId]) -> Vec<(ElementId, Rect)> {
    let mut out: Vec<(ElementId, Rect)> = Vec::with_capacity(ids.len());
    for id in ids {
        if out.iter().any(|(seen, _)| seen == id) {
            continue;
        }
        if let Some(bounds) = board.get(id).and_then(|e| e.bounds()) {
            out.push((id.clone(), bounds));
        }
    }
    out
}

fn check_count(tool: &str, count: usize) -> Result<(), ToolError> {
    if count == 0 {
        return Err(ToolError::invalid(tool, "nothing to create"));
    }
    if count > MAX_TEMPLATE_ITEMS {
        return Err(ToolError::invalid(
            tool,
            format!("{count} elements exceeds the limit of {MAX_TEMPLATE_ITEMS}"),
        ));
    }
    Ok(())
}
