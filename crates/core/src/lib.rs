#![deny(unsafe_code)]

//! Script flow model.
//!
//! One script's messages are projected two ways: a list ordered by `order` and a
//! map whose edges come from `parent_message_id`. This crate owns both
//! projections, the reconciliation of edits back into the message store, and
//! the JSON exchange formats.

/// Dual view controller and shared snapshot container.
pub mod controller;
pub mod error;
/// Script export and import (native and playbook documents).
pub mod exchange;
/// Graph builder and canvas auto-layout.
pub mod graph;
/// Sequence and adjacency indexes over one message set.
pub mod index;
pub mod placeholder;
pub mod positions;
/// Order reconciler.
pub mod reorder;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_support;

pub use controller::{
    DeletePolicy, FlowOptions, FlowSnapshot, FlowSubscription, Placement, ScriptFlow, ViewMode,
};
pub use error::{FlowError, FlowResult};
pub use exchange::{
    EXPORT_FORMAT, EXPORT_VERSION, ImportPlan, ImportReport, ImportSource, ImportWarning,
    ScriptDocument, export_script, import_as_new_script, import_into_script, parse_document,
};
pub use graph::{
    CanvasPoint, EdgeColor, EdgeStyle, FlowGraph, GraphEdge, GraphNode, NodeData, NodeHandles,
    auto_layout, build_graph, edge_style,
};
pub use index::{AdjacencyIndex, SequenceIndex};
pub use placeholder::{placeholders, render};
pub use positions::PositionBuffer;
pub use reorder::{normalize, order_updates, reorder};
pub use validate::{MessageDraft, MessageEdit};
