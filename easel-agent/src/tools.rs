//! Tool schema for agent-issued board mutations.
//!
//! An invocation arrives as `{ "name": ..., "args": { ... } }`. The pair is
//! decoded in one step into [`Tool`], an adjacently tagged enum, so every
//! argument shape is checked by serde. Unknown names, missing required
//! fields and wrong types all surface as a [`ToolError`]; the bridge turns
//! that into a skipped invocation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use easel_core::{ElementId, EndpointStyle, ShapeType};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArgs { tool: String, reason: String },

    #[error("Invalid color: {0}")]
    InvalidColor(String),
}

impl ToolError {
    pub(crate) fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        ToolError::InvalidArgs {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}

/// One raw tool call as produced by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Decode into a typed [`Tool`].
    pub fn decode(&self) -> Result<Tool, ToolError> {
        if !Tool::NAMES.contains(&self.name.as_str()) {
            return Err(ToolError::UnknownTool(self.name.clone()));
        }
        let args = match &self.args {
            Value::Null => json!({}),
            Value::Object(_) => self.args.clone(),
            other => {
                return Err(ToolError::invalid(
                    &self.name,
                    format!("expected an object, got {other}"),
                ))
            }
        };
        serde_json::from_value(json!({ "name": self.name, "args": args }))
            .map_err(|e| ToolError::invalid(&self.name, e.to_string()))
    }
}

// ───────────────────────────────────────────────────────────────────
// Tools
// ───────────────────────────────────────────────────────────────────

/// Every tool the agent may call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "camelCase")]
pub enum Tool {
    CreateStickyNote(CreateStickyNote),
    CreateShape(CreateShape),
    CreateText(CreateText),
    CreateFrame(CreateFrame),
    CreateConnector(CreateConnector),
    MoveObject(MoveObject),
    ResizeObject(ResizeObject),
    UpdateText(UpdateText),
    ChangeColor(ChangeColor),
    DeleteObjects(DeleteObjects),
    DeleteFrameWithContents(DeleteFrameWithContents),
    ArrangeInGrid(ArrangeInGrid),
    DistributeObjects(DistributeObjects),
    FitFrameToContents(FitFrameToContents),
    CreateNoteGrid(CreateNoteGrid),
    CreateFlowchart(CreateFlowchart),
    CreateJourneyMap(CreateJourneyMap),
    CreateSwot(CreateSwot),
    GetBoardState(GetBoardState),
}

impl Tool {
    pub const NAMES: [&'static str; 19] = [
        "createStickyNote",
        "createShape",
        "createText",
        "createFrame",
        "createConnector",
        "moveObject",
        "resizeObject",
        "updateText",
        "changeColor",
        "deleteObjects",
        "deleteFrameWithContents",
        "arrangeInGrid",
        "distributeObjects",
        "fitFrameToContents",
        "createNoteGrid",
        "createFlowchart",
        "createJourneyMap",
        "createSwot",
        "getBoardState",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::CreateStickyNote(_) => "createStickyNote",
            Tool::CreateShape(_) => "createShape",
            Tool::CreateText(_) => "createText",
            Tool::CreateFrame(_) => "createFrame",
            Tool::CreateConnector(_) => "createConnector",
            Tool::MoveObject(_) => "moveObject",
            Tool::ResizeObject(_) => "resizeObject",
            Tool::UpdateText(_) => "updateText",
            Tool::ChangeColor(_) => "changeColor",
            Tool::DeleteObjects(_) => "deleteObjects",
            Tool::DeleteFrameWithContents(_) => "deleteFrameWithContents",
            Tool::ArrangeInGrid(_) => "arrangeInGrid",
            Tool::DistributeObjects(_) => "distributeObjects",
            Tool::FitFrameToContents(_) => "fitFrameToContents",
            Tool::CreateNoteGrid(_) => "createNoteGrid",
            Tool::CreateFlowchart(_) => "createFlowchart",
            Tool::CreateJourneyMap(_) => "createJourneyMap",
            Tool::CreateSwot(_) => "createSwot",
            Tool::GetBoardState(_) => "getBoardState",
        }
    }

    /// Whether this tool only reads the board.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Tool::GetBoardState(_))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStickyNote {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub color: Option<String>,
    pub parent_frame_id: Option<ElementId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShape {
    pub shape_type: String,
    pub x: f64,
    pub y: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub color: Option<String>,
    pub parent_frame_id: Option<ElementId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateText {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font_size: Option<f64>,
    pub color: Option<String>,
    pub parent_frame_id: Option<ElementId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFrame {
    pub title: Option<String>,
    pub x: f64,
    pub y: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnector {
    pub from_id: ElementId,
    pub to_id: ElementId,
    /// `none`, `arrow` or `double-arrow`
    pub style: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveObject {
    pub object_id: ElementId,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeObject {
    pub object_id: ElementId,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateText {
    pub object_id: ElementId,
    pub new_text: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeColor {
    pub object_id: ElementId,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteObjects {
    pub object_ids: Vec<ElementId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFrameWithContents {
    pub frame_id: ElementId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrangeInGrid {
    pub object_ids: Vec<ElementId>,
    /// Defaults to the smallest square grid that fits.
    pub columns: Option<u32>,
    /// Defaults to the top-left corner of the arranged objects.
    pub start_x: Option<f64>,
    pub start_y: Option<f64>,
    pub spacing: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeObjects {
    pub object_ids: Vec<ElementId>,
    #[serde(default)]
    pub direction: Direction,
    pub spacing: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitFrameToContents {
    pub frame_id: ElementId,
    pub padding: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNoteGrid {
    pub x: f64,
    pub y: f64,
    pub rows: u32,
    pub columns: u32,
    /// Row-major note texts; missing entries are left blank.
    #[serde(default)]
    pub texts: Vec<String>,
    pub color: Option<String>,
    pub spacing: Option<f64>,
    pub parent_frame_id: Option<ElementId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlowchart {
    pub steps: Vec<String>,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub direction: Direction,
    pub spacing: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJourneyMap {
    pub stages: Vec<String>,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSwot {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct GetBoardState {}

// ───────────────────────────────────────────────────────────────────
// Argument helpers
// ───────────────────────────────────────────────────────────────────

const NAMED_COLORS: [(&str, &str); 12] = [
    ("yellow", "#fef08a"),
    ("pink", "#fbcfe8"),
    ("blue", "#bfdbfe"),
    ("green", "#bbf7d0"),
    ("orange", "#fed7aa"),
    ("purple", "#e9d5ff"),
    ("red", "#fecaca"),
    ("teal", "#99f6e4"),
    ("gray", "#e5e7eb"),
    ("grey", "#e5e7eb"),
    ("white", "#ffffff"),
    ("black", "#111827"),
];

/// Resolve a color name or `#rgb`/`#rrggbb` literal to a lowercase hex
/// string.
pub fn resolve_color(input: &str) -> Result<String, ToolError> {
    let trimmed = input.trim().to_ascii_lowercase();
    if let Some((_, hex)) = NAMED_COLORS.iter().find(|(name, _)| *name == trimmed) {
        return Ok((*hex).to_string());
    }
    let digits = trimmed.strip_prefix('#').unwrap_or(&trimmed);
    let valid = matches!(digits.len(), 3 | 6) && digits.chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(format!("#{digits}"))
    } else {
        Err(ToolError::InvalidColor(input.to_string()))
    }
}

pub(crate) fn resolve_optional_color(input: Option<&str>) -> Result<Option<String>, ToolError> {
    input.map(resolve_color).transpose()
}

pub(crate) fn parse_shape_type(tool: &str, input: &str) -> Result<ShapeType, ToolError> {
    ShapeType::parse_lenient(input)
        .ok_or_else(|| ToolError::invalid(tool, format!("unknown shape type '{input}'")))
}

pub(crate) fn parse_endpoint(tool: &str, input: Option<&str>) -> Result<EndpointStyle, ToolError> {
    match input {
        None => Ok(EndpointStyle::Arrow),
        Some(s) => EndpointStyle::parse_lenient(s)
            .ok_or_else(|| ToolError::invalid(tool, format!("unknown connector style '{s}'"))),
    }
}

/// Positive, finite size or a default.
pub(crate) fn size_or(tool: &str, value: Option<f64>, default: f64) -> Result<f64, ToolError> {
    match value {
        None => Ok(default),
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        Some(v) => Err(ToolError::invalid(tool, format!("size must be positive, got {v}"))),
    }
}

pub(crate) fn finite(tool: &str, field: &str, value: f64) -> Result<f64, ToolError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ToolError::invalid(tool, format!("{field} must be finite")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(name: &str, args: Value) -> Result<Tool, ToolError> {
        ToolInvocation::new(name, args).decode()
    }

    // ── Decode tests ──

    #[test]
    fn test_decode_sticky_note() {
        let tool = decode(
            "createStickyNote",
            json!({"text": "Hi", "x": 10, "y": 20.5, "color": "pink"}),
        )
        .unwrap();
        match tool {
            Tool::CreateStickyNote(a) => {
                assert_eq!(a.text, "Hi");
                assert_eq!((a.x, a.y), (10.0, 20.5));
                assert_eq!(a.color.as_deref(), Some("pink"));
                assert!(a.width.is_none());
                assert!(a.parent_frame_id.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_tool() {
        assert_eq!(
            decode("launchRocket", json!({})),
            Err(ToolError::UnknownTool("launchRocket".into()))
        );
    }

    #[test]
    fn test_missing_required_field_is_invalid() {
        let err = decode("moveObject", json!({"objectId": "a", "x": 1})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs { ref tool, .. } if tool == "moveObject"));
    }

    #[test]
    fn test_wrong_type_is_invalid() {
        let err = decode("moveObject", json!({"objectId": "a", "x": "10", "y": 1})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs { .. }));
    }

    #[test]
    fn test_non_object_args_are_invalid() {
        assert!(matches!(
            decode("deleteObjects", json!(["a", "b"])),
            Err(ToolError::InvalidArgs { .. })
        ));
    }

    #[test]
    fn test_null_args_for_read_only_tool() {
        let tool = decode("getBoardState", Value::Null).unwrap();
        assert!(tool.is_read_only());
        assert_eq!(tool.name(), "getBoardState");
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let tool = decode("createSwot", json!({"x": 0, "y": 0, "mood": "optimistic"})).unwrap();
        assert_eq!(tool, Tool::CreateSwot(CreateSwot { x: 0.0, y: 0.0 }));
    }

    #[test]
    fn test_direction_defaults_horizontal() {
        let tool = decode("distributeObjects", json!({"objectIds": ["a", "b"]})).unwrap();
        match tool {
            Tool::DistributeObjects(a) => assert_eq!(a.direction, Direction::Horizontal),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_every_name_is_decodable_shape() {
        for name in Tool::NAMES {
            let err = decode(name, json!({"__unknown": true}));
            if let Err(ToolError::UnknownTool(n)) = err {
                panic!("{n} is listed but not decodable");
            }
        }
    }

    // ── Helper tests ──

    #[test]
    fn test_resolve_color() {
        assert_eq!(resolve_color("Yellow").unwrap(), "#fef08a");
        assert_eq!(resolve_color("#ABC").unwrap(), "#abc");
        assert_eq!(resolve_color("12ab34").unwrap(), "#12ab34");
        assert!(resolve_color("chartreuse-ish").is_err());
        assert!(resolve_color("#12345").is_err());
    }

    #[test]
    fn test_size_or() {
        assert_eq!(size_or("t", None, 5.0).unwrap(), 5.0);
        assert_eq!(size_or("t", Some(7.0), 5.0).unwrap(), 7.0);
        assert!(size_or("t", Some(0.0), 5.0).is_err());
        assert!(size_or("t", Some(f64::NAN), 5.0).is_err());
    }

    #[test]
    fn test_endpoint_and_shape_parsing() {
        assert_eq!(parse_endpoint("t", None).unwrap(), EndpointStyle::Arrow);
        assert_eq!(parse_endpoint("t", Some("both")).unwrap(), EndpointStyle::DoubleArrow);
        assert!(parse_endpoint("t", Some("squiggle")).is_err());
        assert_eq!(parse_shape_type("t", "circle").unwrap(), ShapeType::Ellipse);
        assert!(parse_shape_type("t", "hexagon").is_err());
    }
}
