//! # easel-core — Board model and reconciliation engine
//!
//! Sans-IO core of the Easel collaborative canvas. Every time-dependent
//! operation takes an explicit `now` in milliseconds; nothing here spawns,
//! sleeps or touches the network.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  decode   ┌─────────────┐   merge    ┌──────────────┐
//! │ documents  │ ────────► │  Element    │ ─────────► │    Board     │
//! │ (JSON)     │ ◄──────── │  (typed)    │            │ (reconciler) │
//! └────────────┘  encode   └─────────────┘            └──────┬───────┘
//!                                                            │
//!                                   ┌──────────────┬─────────┴────┐
//!                                   ▼              ▼              ▼
//!                             DragLinger      UndoStack      BoardView
//! ```
//!
//! ## Modules
//!
//! - [`element`] — Typed elements, ids and field defaults
//! - [`timestamp`] — Timestamp normalization at the storage seam
//! - [`document`] — Lenient document decode, canonical encode
//! - [`reconcile`] — Pure per-kind merge of durable/remote/optimistic
//! - [`board`] — Mutation API, inputs, reads, export
//! - [`linger`] — Drag hand-off anti-flicker
//! - [`history`] — Undo/redo snapshot stack

pub mod board;
pub mod document;
pub mod element;
mod error;
pub mod geometry;
pub mod history;
pub mod linger;
pub mod reconcile;
pub mod timestamp;

pub use board::{
    Board, BoardSnapshot, BoardView, ConnectorLine, ExportedElement, SelectionOutline, WriteIntent,
};
pub use document::{decode_document, decode_element, encode_element};
pub use element::{
    BoardId, ConnectorBody, Element, ElementBody, ElementId, ElementKind, ElementPatch,
    EndpointStyle, FrameBody, NoteBody, ShapeBody, ShapeType, TextBody, UserId,
};
pub use error::DecodeError;
pub use geometry::{Point, Rect};
pub use history::{HistoryConfig, UndoStack};
pub use linger::{DragLingerResolver, LingerConfig};
pub use reconcile::{merge, Pending, RemoteDrag};
