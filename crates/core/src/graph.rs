use std::collections::{HashMap, HashSet};

use scriptflow_storage::{MessageCondition, MessageId, MessageKind, MessageRecord, PositionUpdate};

use crate::index::AdjacencyIndex;

/// Horizontal distance between sibling columns in [`auto_layout`].
pub const LAYOUT_COLUMN_GAP: f64 = 280.0;
/// Vertical distance between tree depths in [`auto_layout`].
pub const LAYOUT_ROW_GAP: f64 = 160.0;

pub const SOURCE_HANDLE: &str = "bottom";
pub const TARGET_HANDLE: &str = "top";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasPoint {
    pub x: f64,
    pub y: f64,
}

/// Content snapshot carried by one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    pub title: String,
    pub content: Option<String>,
    pub kind: MessageKind,
    pub image_url: Option<String>,
    pub condition: Option<MessageCondition>,
    pub order: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeHandles {
    pub target_connected: bool,
    pub source_connected: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: MessageId,
    pub position: CanvasPoint,
    pub data: NodeData,
    pub handles: NodeHandles,
    pub is_root: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeColor {
    Standard,
    Media,
    Conditional,
}

impl EdgeColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Media => "media",
            Self::Conditional => "conditional",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeStyle {
    pub color: EdgeColor,
    pub animated: bool,
    pub label: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub id: String,
    pub source: MessageId,
    pub target: MessageId,
    pub source_handle: &'static str,
    pub target_handle: &'static str,
    pub style: EdgeStyle,
}

/// Map view of one script.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlowGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// `(child, missing parent)` pairs that produced no edge.
    pub dangling: Vec<(MessageId, MessageId)>,
    /// Messages whose parent chain loops back onto itself.
    pub cycles: Vec<MessageId>,
}

impl FlowGraph {
    pub fn node(&self, id: MessageId) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn inbound(&self, id: MessageId) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |edge| edge.target == id)
    }

    pub fn outbound(&self, id: MessageId) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |edge| edge.source == id)
    }

    pub fn roots(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(|node| node.is_root)
    }
}

/// Edge treatment is decided by the child message alone.
pub fn edge_style(kind: MessageKind, condition: Option<MessageCondition>) -> EdgeStyle {
    match kind {
        MessageKind::Text => EdgeStyle {
            color: EdgeColor::Standard,
            animated: false,
            label: None,
        },
        MessageKind::Image => EdgeStyle {
            color: EdgeColor::Media,
            animated: false,
            label: None,
        },
        MessageKind::Conditional => EdgeStyle {
            color: EdgeColor::Conditional,
            animated: true,
            label: condition.map(|condition| condition.label()),
        },
    }
}

/// Builds one node per message and one parent→child edge per message whose
/// parent is present in `messages`.
pub fn build_graph(messages: &[MessageRecord]) -> FlowGraph {
    let adjacency = AdjacencyIndex::build(messages);
    build_graph_with(messages, &adjacency)
}

pub(crate) fn build_graph_with(
    messages: &[MessageRecord],
    adjacency: &AdjacencyIndex,
) -> FlowGraph {
    let mut edges = Vec::new();
    for message in messages {
        if let Some(parent_id) = adjacency.parent_of(message.id) {
            edges.push(GraphEdge {
                id: format!("edge-{parent_id}-{}", message.id),
                source: parent_id,
                target: message.id,
                source_handle: SOURCE_HANDLE,
                target_handle: TARGET_HANDLE,
                style: edge_style(message.kind, message.condition),
            });
        }
    }

    let nodes = messages
        .iter()
        .map(|message| GraphNode {
            id: message.id,
            position: CanvasPoint {
                x: message.position_x,
                y: message.position_y,
            },
            data: NodeData {
                title: message.title.clone(),
                content: message.content.clone(),
                kind: message.kind,
                image_url: message.image_url.clone(),
                condition: message.condition,
                order: message.order,
            },
            handles: NodeHandles {
                target_connected: adjacency.parent_of(message.id).is_some(),
                source_connected: !adjacency.children_of(message.id).is_empty(),
            },
            is_root: adjacency.parent_of(message.id).is_none(),
        })
        .collect();

    let graph = FlowGraph {
        nodes,
        edges,
        dangling: adjacency.dangling().to_vec(),
        cycles: adjacency.cycle_members(),
    };
    tracing::debug!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        dangling = graph.dangling.len(),
        cycles = graph.cycles.len(),
        "built flow graph"
    );
    graph
}

/// Tidy top-down placement: leaves take consecutive columns, parents sit above
/// the middle of their children, depth picks the row.
///
/// Messages that only belong to a parent cycle are laid out as extra roots.
pub fn auto_layout(messages: &[MessageRecord]) -> Vec<PositionUpdate> {
    let adjacency = AdjacencyIndex::build(messages);
    let mut placed: Vec<Option<(f64, f64)>> = vec![None; messages.len()];
    let slots = messages
        .iter()
        .enumerate()
        .map(|(slot, message)| (message.id, slot))
        .collect::<HashMap<_, _>>();
    let mut visited = HashSet::new();
    let mut next_column = 0_usize;

    let mut starts = adjacency.roots().to_vec();
    starts.extend(messages.iter().map(|message| message.id));

    for start in starts {
        if visited.contains(&start) {
            continue;
        }
        place_subtree(
            start,
            0,
            &adjacency,
            &slots,
            &mut visited,
            &mut next_column,
            &mut placed,
        );
    }

    messages
        .iter()
        .zip(placed)
        .map(|(message, point)| {
            let (x, y) = point.unwrap_or((message.position_x, message.position_y));
            PositionUpdate {
                id: message.id,
                position_x: x,
                position_y: y,
            }
        })
        .collect()
}

fn place_subtree(
    id: MessageId,
    depth: usize,
    adjacency: &AdjacencyIndex,
    slots: &HashMap<MessageId, usize>,
    visited: &mut HashSet<MessageId>,
    next_column: &mut usize,
    placed: &mut [Option<(f64, f64)>],
) -> f64 {
    visited.insert(id);

    let mut child_columns = Vec::new();
    for child in adjacency.children_of(id) {
        if visited.contains(child) {
            continue;
        }
        child_columns.push(place_subtree(
            *child,
            depth + 1,
            adjacency,
            slots,
            visited,
            next_column,
            placed,
        ));
    }

    let column = if child_columns.is_empty() {
        let column = *next_column as f64;
        *next_column += 1;
        column
    } else {
        let first = child_columns[0];
        let last = child_columns[child_columns.len() - 1];
        (first + last) / 2.0
    };

    if let Some(slot) = slots.get(&id) {
        placed[*slot] = Some((column * LAYOUT_COLUMN_GAP, depth as f64 * LAYOUT_ROW_GAP));
    }
    column
}
