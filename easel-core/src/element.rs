//! Typed board elements.
//!
//! Every element shares a common header (`id`, author, logical timestamps,
//! optional frame membership) and carries a kind-specific [`ElementBody`].
//! Connectors have no intrinsic bounds; their geometry is derived from the
//! elements they reference.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::geometry::{Point, Rect};
use crate::DecodeError;

// ───────────────────────────────────────────────────────────────────
// Identifiers
// ───────────────────────────────────────────────────────────────────

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Opaque element identifier, unique per board.
    ElementId
);
string_id!(
    /// Authenticated user identifier (issued by the auth provider).
    UserId
);
string_id!(
    /// Board identifier.
    BoardId
);

impl ElementId {
    /// Mint a fresh, globally unique id.
    pub fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

// ───────────────────────────────────────────────────────────────────
// Kinds
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Note,
    Shape,
    Text,
    Frame,
    Connector,
}

impl ElementKind {
    pub const ALL: [ElementKind; 5] = [
        ElementKind::Note,
        ElementKind::Shape,
        ElementKind::Text,
        ElementKind::Frame,
        ElementKind::Connector,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Note => "note",
            ElementKind::Shape => "shape",
            ElementKind::Text => "text",
            ElementKind::Frame => "frame",
            ElementKind::Connector => "connector",
        }
    }

    /// Dense index for per-kind arrays.
    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "note" | "sticky" | "stickynote" => Ok(ElementKind::Note),
            "shape" => Ok(ElementKind::Shape),
            "text" => Ok(ElementKind::Text),
            "frame" => Ok(ElementKind::Frame),
            "connector" | "line" | "arrow" => Ok(ElementKind::Connector),
            _ => Err(DecodeError::UnknownKind(s.to_string())),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Defaults
// ───────────────────────────────────────────────────────────────────

pub const NOTE_SIZE: (f64, f64) = (160.0, 120.0);
pub const SHAPE_SIZE: (f64, f64) = (120.0, 80.0);
pub const TEXT_SIZE: (f64, f64) = (200.0, 40.0);
pub const FRAME_SIZE: (f64, f64) = (320.0, 200.0);
/// Height of the title strip drawn at the top of every frame.
pub const FRAME_TITLE_BAR: f64 = 28.0;

pub const NOTE_COLOR: &str = "#fef08a";
pub const SHAPE_FILL: &str = "#93c5fd";
pub const SHAPE_STROKE: &str = "#1e3a8a";
pub const TEXT_COLOR: &str = "#111827";
pub const FRAME_FILL: &str = "#f8fafc";
pub const CONNECTOR_COLOR: &str = "#334155";
pub const TEXT_FONT_SIZE: f64 = 16.0;
pub const CONNECTOR_STROKE_WIDTH: f64 = 2.0;
pub const FRAME_TITLE: &str = "Frame";

// ───────────────────────────────────────────────────────────────────
// Bodies
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteBody {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub text: String,
    pub color: String,
}

impl Default for NoteBody {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: NOTE_SIZE.0,
            height: NOTE_SIZE.1,
            text: String::new(),
            color: NOTE_COLOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    #[default]
    Rectangle,
    Ellipse,
    Triangle,
    Diamond,
}

impl ShapeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeType::Rectangle => "rectangle",
            ShapeType::Ellipse => "ellipse",
            ShapeType::Triangle => "triangle",
            ShapeType::Diamond => "diamond",
        }
    }

    /// Lenient parse used for remote documents; accepts common synonyms.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rectangle" | "rect" | "square" => Some(ShapeType::Rectangle),
            "ellipse" | "circle" | "oval" => Some(ShapeType::Ellipse),
            "triangle" => Some(ShapeType::Triangle),
            "diamond" | "rhombus" => Some(ShapeType::Diamond),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeBody {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub shape_type: ShapeType,
    pub fill: String,
    pub stroke: String,
}

impl Default for ShapeBody {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: SHAPE_SIZE.0,
            height: SHAPE_SIZE.1,
            shape_type: ShapeType::Rectangle,
            fill: SHAPE_FILL.to_string(),
            stroke: SHAPE_STROKE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBody {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub text: String,
    pub font_size: f64,
    pub color: String,
}

impl Default for TextBody {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: TEXT_SIZE.0,
            height: TEXT_SIZE.1,
            text: String::new(),
            font_size: TEXT_FONT_SIZE,
            color: TEXT_COLOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameBody {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub title: String,
    pub fill: String,
}

impl Default for FrameBody {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: FRAME_SIZE.0,
            height: FRAME_SIZE.1,
            title: FRAME_TITLE.to_string(),
            fill: FRAME_FILL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointStyle {
    None,
    #[default]
    Arrow,
    DoubleArrow,
}

impl EndpointStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointStyle::None => "none",
            EndpointStyle::Arrow => "arrow",
            EndpointStyle::DoubleArrow => "double-arrow",
        }
    }

    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "none" | "line" | "plain" => Some(EndpointStyle::None),
            "arrow" | "single" => Some(EndpointStyle::Arrow),
            "double-arrow" | "double" | "both" => Some(EndpointStyle::DoubleArrow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorBody {
    pub from_id: ElementId,
    pub to_id: ElementId,
    pub endpoint: EndpointStyle,
    pub color: String,
    pub stroke_width: f64,
}

impl ConnectorBody {
    pub fn between(from_id: ElementId, to_id: ElementId) -> Self {
        Self {
            from_id,
            to_id,
            endpoint: EndpointStyle::Arrow,
            color: CONNECTOR_COLOR.to_string(),
            stroke_width: CONNECTOR_STROKE_WIDTH,
        }
    }
}

/// Kind-specific content of an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementBody {
    Note(NoteBody),
    Shape(ShapeBody),
    Text(TextBody),
    Frame(FrameBody),
    Connector(ConnectorBody),
}

impl ElementBody {
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementBody::Note(_) => ElementKind::Note,
            ElementBody::Shape(_) => ElementKind::Shape,
            ElementBody::Text(_) => ElementKind::Text,
            ElementBody::Frame(_) => ElementKind::Frame,
            ElementBody::Connector(_) => ElementKind::Connector,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Element
// ───────────────────────────────────────────────────────────────────

/// A single board element with its common header.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: ElementId,
    pub created_by: UserId,
    /// Logical milliseconds; defines z-order.
    pub created_at: u64,
    /// Logical milliseconds; drives last-write-wins.
    pub updated_at: u64,
    pub parent_frame_id: Option<ElementId>,
    #[serde(flatten)]
    pub body: ElementBody,
}

impl Element {
    pub fn new(id: ElementId, created_by: UserId, timestamp: u64, body: ElementBody) -> Self {
        Self {
            id,
            created_by,
            created_at: timestamp,
            updated_at: timestamp,
            parent_frame_id: None,
            body,
        }
    }

    pub fn with_parent(mut self, parent_frame_id: Option<ElementId>) -> Self {
        self.parent_frame_id = parent_frame_id;
        self
    }

    pub fn kind(&self) -> ElementKind {
        self.body.kind()
    }

    /// Top-left position; `None` for connectors.
    pub fn position(&self) -> Option<Point> {
        self.bounds().map(|b| Point::new(b.x, b.y))
    }

    /// Intrinsic bounds; `None` for connectors.
    pub fn bounds(&self) -> Option<Rect> {
        match &self.body {
            ElementBody::Note(b) => Some(Rect::new(b.x, b.y, b.width, b.height)),
            ElementBody::Shape(b) => Some(Rect::new(b.x, b.y, b.width, b.height)),
            ElementBody::Text(b) => Some(Rect::new(b.x, b.y, b.width, b.height)),
            ElementBody::Frame(b) => Some(Rect::new(b.x, b.y, b.width, b.height)),
            ElementBody::Connector(_) => None,
        }
    }

    /// Move the element; returns `false` for connectors.
    pub fn set_position(&mut self, p: Point) -> bool {
        match &mut self.body {
            ElementBody::Note(b) => (b.x, b.y) = (p.x, p.y),
            ElementBody::Shape(b) => (b.x, b.y) = (p.x, p.y),
            ElementBody::Text(b) => (b.x, b.y) = (p.x, p.y),
            ElementBody::Frame(b) => (b.x, b.y) = (p.x, p.y),
            ElementBody::Connector(_) => return false,
        }
        true
    }

    /// Resize the element; returns `false` for connectors.
    pub fn set_size(&mut self, width: f64, height: f64) -> bool {
        match &mut self.body {
            ElementBody::Note(b) => (b.width, b.height) = (width, height),
            ElementBody::Shape(b) => (b.width, b.height) = (width, height),
            ElementBody::Text(b) => (b.width, b.height) = (width, height),
            ElementBody::Frame(b) => (b.width, b.height) = (width, height),
            ElementBody::Connector(_) => return false,
        }
        true
    }

    /// Primary text: note/text content or frame title.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            ElementBody::Note(b) => Some(&b.text),
            ElementBody::Text(b) => Some(&b.text),
            ElementBody::Frame(b) => Some(&b.title),
            ElementBody::Shape(_) | ElementBody::Connector(_) => None,
        }
    }

    pub fn set_text(&mut self, text: &str) -> bool {
        match &mut self.body {
            ElementBody::Note(b) => b.text = text.to_string(),
            ElementBody::Text(b) => b.text = text.to_string(),
            ElementBody::Frame(b) => b.title = text.to_string(),
            ElementBody::Shape(_) | ElementBody::Connector(_) => return false,
        }
        true
    }

    /// Primary color: note color, shape/frame fill, text/connector color.
    pub fn color(&self) -> &str {
        match &self.body {
            ElementBody::Note(b) => &b.color,
            ElementBody::Shape(b) => &b.fill,
            ElementBody::Text(b) => &b.color,
            ElementBody::Frame(b) => &b.fill,
            ElementBody::Connector(b) => &b.color,
        }
    }

    pub fn set_color(&mut self, color: &str) {
        let color = color.to_string();
        match &mut self.body {
            ElementBody::Note(b) => b.color = color,
            ElementBody::Shape(b) => b.fill = color,
            ElementBody::Text(b) => b.color = color,
            ElementBody::Frame(b) => b.fill = color,
            ElementBody::Connector(b) => b.color = color,
        }
    }

    /// Ids this element points at (connector endpoints).
    pub fn references(&self) -> Option<(&ElementId, &ElementId)> {
        match &self.body {
            ElementBody::Connector(c) => Some((&c.from_id, &c.to_id)),
            _ => None,
        }
    }
}

/// Field-level patch applied by the mutation API.
///
/// `None` leaves a field untouched. `parent_frame_id: Some(None)` detaches
/// the element from its frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementPatch {
    pub position: Option<Point>,
    pub size: Option<(f64, f64)>,
    pub text: Option<String>,
    pub color: Option<String>,
    pub parent_frame_id: Option<Option<ElementId>>,
}

impl ElementPatch {
    pub fn position(p: Point) -> Self {
        Self { position: Some(p), ..Self::default() }
    }

    pub fn size(width: f64, height: f64) -> Self {
        Self { size: Some((width, height)), ..Self::default() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Self::default() }
    }

    pub fn color(color: impl Into<String>) -> Self {
        Self { color: Some(color.into()), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to `element`. Returns `false` if any requested field does not
    /// exist on this kind; applicable fields are still written.
    pub fn apply(&self, element: &mut Element) -> bool {
        let mut complete = true;
        if let Some(p) = self.position {
            complete &= element.set_position(p);
        }
        if let Some((w, h)) = self.size {
            complete &= element.set_size(w, h);
        }
        if let Some(text) = &self.text {
            complete &= element.set_text(text);
        }
        if let Some(color) = &self.color {
            element.set_color(color);
        }
        if let Some(parent) = &self.parent_frame_id {
            element.parent_frame_id = parent.clone();
        }
        complete
    }
}
