//! Stored document ↔ [`Element`] conversion.
//!
//! Stored shape: `{type, ...kind fields, createdBy, createdAt, updatedAt,
//! parentFrameId?}` with camelCase keys. Decoding is lenient: every field
//! that is missing or has the wrong type falls back to the kind default
//! instead of rejecting the whole document.

use serde_json::{json, Map, Value};

use crate::element::{
    ConnectorBody, Element, ElementBody, ElementId, ElementKind, EndpointStyle, FrameBody,
    NoteBody, ShapeBody, ShapeType, TextBody, UserId,
};
use crate::timestamp;
use crate::DecodeError;

/// Author recorded when a document does not carry one.
pub const UNKNOWN_AUTHOR: &str = "unknown";

// ───────────────────────────────────────────────────────────────────
// Field readers
// ───────────────────────────────────────────────────────────────────

fn num(map: &Map<String, Value>, key: &str, default: f64) -> f64 {
    match map.get(key) {
        Some(Value::Number(n)) => n.as_f64().filter(|f| f.is_finite()).unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).unwrap_or(default),
        _ => default,
    }
}

/// Like [`num`] but also rejects non-positive values (sizes, font sizes).
fn positive(map: &Map<String, Value>, key: &str, default: f64) -> f64 {
    let v = num(map, key, default);
    if v > 0.0 {
        v
    } else {
        default
    }
}

fn string(map: &Map<String, Value>, key: &str, default: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => default.to_string(),
    }
}

fn non_empty(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

// ───────────────────────────────────────────────────────────────────
// Decode
// ───────────────────────────────────────────────────────────────────

/// Decode a document whose kind is already known (e.g. from the
/// subscription it arrived on). Total: never fails.
pub fn decode_element(kind: ElementKind, id: ElementId, value: &Value) -> Element {
    let empty = Map::new();
    let map = value.as_object().unwrap_or(&empty);

    let created_at = map.get("createdAt").and_then(timestamp::normalize).unwrap_or(0);
    let updated_at = map
        .get("updatedAt")
        .and_then(timestamp::normalize)
        .unwrap_or(created_at);
    let created_by = non_empty(map, "createdBy").unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
    let parent_frame_id = non_empty(map, "parentFrameId").map(ElementId::from);

    let body = match kind {
        ElementKind::Note => {
            let d = NoteBody::default();
            ElementBody::Note(NoteBody {
                x: num(map, "x", d.x),
                y: num(map, "y", d.y),
                width: positive(map, "width", d.width),
                height: positive(map, "height", d.height),
                text: string(map, "text", &d.text),
                color: string(map, "color", &d.color),
            })
        }
        ElementKind::Shape => {
            let d = ShapeBody::default();
            let shape_type = map
                .get("shapeType")
                .and_then(Value::as_str)
                .and_then(ShapeType::parse_lenient)
                .unwrap_or(d.shape_type);
            ElementBody::Shape(ShapeBody {
                x: num(map, "x", d.x),
                y: num(map, "y", d.y),
                width: positive(map, "width", d.width),
                height: positive(map, "height", d.height),
                shape_type,
                fill: string(map, "fill", &d.fill),
                stroke: string(map, "stroke", &d.stroke),
            })
        }
        ElementKind::Text => {
            let d = TextBody::default();
            ElementBody::Text(TextBody {
                x: num(map, "x", d.x),
                y: num(map, "y", d.y),
                width: positive(map, "width", d.width),
                height: positive(map, "height", d.height),
                text: string(map, "text", &d.text),
                font_size: positive(map, "fontSize", d.font_size),
                color: string(map, "color", &d.color),
            })
        }
        ElementKind::Frame => {
            let d = FrameBody::default();
            ElementBody::Frame(FrameBody {
                x: num(map, "x", d.x),
                y: num(map, "y", d.y),
                width: positive(map, "width", d.width),
                height: positive(map, "height", d.height),
                title: string(map, "title", &d.title),
                fill: string(map, "fill", &d.fill),
            })
        }
        ElementKind::Connector => {
            let mut c = ConnectorBody::between(
                ElementId::from(string(map, "fromId", "")),
                ElementId::from(string(map, "toId", "")),
            );
            if let Some(style) = map
                .get("endpoint")
                .and_then(Value::as_str)
                .and_then(EndpointStyle::parse_lenient)
            {
                c.endpoint = style;
            }
            c.color = string(map, "color", &c.color);
            c.stroke_width = positive(map, "strokeWidth", c.stroke_width);
            ElementBody::Connector(c)
        }
    };

    Element {
        id,
        created_by: UserId::from(created_by),
        created_at,
        updated_at,
        parent_frame_id,
        body,
    }
}

/// Decode a document routed by its own `type` field.
pub fn decode_document(id: ElementId, value: &Value) -> Result<Element, DecodeError> {
    let map = value.as_object().ok_or(DecodeError::NotAnObject)?;
    let kind = map
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingKind)?
        .parse::<ElementKind>()?;
    Ok(decode_element(kind, id, value))
}

/// Parse raw JSON bytes into an element.
pub fn decode_slice(id: ElementId, bytes: &[u8]) -> Result<Element, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    decode_document(id, &value)
}

// ───────────────────────────────────────────────────────────────────
// Encode
// ───────────────────────────────────────────────────────────────────

/// Encode an element to its stored document shape. The id is the
/// document key and is not repeated in the body.
pub fn encode_element(element: &Element) -> Value {
    let mut doc = match &element.body {
        ElementBody::Note(b) => json!({
            "x": b.x, "y": b.y, "width": b.width, "height": b.height,
            "text": b.text, "color": b.color,
        }),
        ElementBody::Shape(b) => json!({
            "x": b.x, "y": b.y, "width": b.width, "height": b.height,
            "shapeType": b.shape_type.as_str(), "fill": b.fill, "stroke": b.stroke,
        }),
        ElementBody::Text(b) => json!({
            "x": b.x, "y": b.y, "width": b.width, "height": b.height,
            "text": b.text, "fontSize": b.font_size, "color": b.color,
        }),
        ElementBody::Frame(b) => json!({
            "x": b.x, "y": b.y, "width": b.width, "height": b.height,
            "title": b.title, "fill": b.fill,
        }),
        ElementBody::Connector(b) => json!({
            "fromId": b.from_id.as_str(), "toId": b.to_id.as_str(),
            "endpoint": b.endpoint.as_str(), "color": b.color,
            "strokeWidth": b.stroke_width,
        }),
    };

    if let Value::Object(map) = &mut doc {
        map.insert("type".into(), json!(element.kind().as_str()));
        map.insert("createdBy".into(), json!(element.created_by.as_str()));
        map.insert("createdAt".into(), json!(element.created_at));
        map.insert("updatedAt".into(), json!(element.updated_at));
        if let Some(parent) = &element.parent_frame_id {
            map.insert("parentFrameId".into(), json!(parent.as_str()));
        }
    }
    doc
}
