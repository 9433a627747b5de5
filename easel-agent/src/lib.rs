//! # easel-agent — AI agent mutation bridge
//!
//! Turns batches of agent tool calls into board mutations. The agent sees
//! the board through [`context::board_context`], answers with a list of
//! `{name, args}` invocations, and [`AgentBridge`] applies them in order
//! through the same [`easel_core::Board`] API the UI uses.
//!
//! ```text
//!   Board ──board_context──► agent ──[{name, args}]──► AgentBridge ──► Board
//!                                                          │
//!                                                          └──► BatchReport
//!                                                               (writes, summary)
//! ```
//!
//! ## Modules
//!
//! - [`tools`] — Tool schema, argument decoding, color and enum parsing
//! - [`bridge`] — Sequential, isolated batch execution
//! - [`layout`] — Deterministic grid, chain and template geometry
//! - [`context`] — Board description handed to the agent

pub mod bridge;
pub mod context;
pub mod layout;
pub mod tools;

pub use bridge::{AgentBridge, BatchReport, InvocationReport, Outcome};
pub use context::{board_context, BoardContext};
pub use tools::{resolve_color, Direction, Tool, ToolError, ToolInvocation};
