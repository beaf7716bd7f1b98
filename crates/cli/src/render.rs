//! Plain-text projections of a loaded script for stdout.

use std::collections::HashSet;
use std::fmt;

use scriptflow_core::{EdgeStyle, FlowGraph, FlowSnapshot, GraphNode, placeholders};
use scriptflow_storage::{MessageId, MessageKind, MessageRecord, ScriptRecord};

const CONTENT_PREVIEW_CHARS: usize = 60;

pub fn script_line(script: &ScriptRecord) -> String {
    match &script.description {
        Some(description) => format!("{}  {}  ({description})", script.id, script.name),
        None => format!("{}  {}", script.id, script.name),
    }
}

pub fn script_summary(script: &ScriptRecord, snapshot: &FlowSnapshot) -> String {
    ScriptSummary { script, snapshot }.to_string()
}

/// List view: one line per message in `order`.
pub fn list_view(snapshot: &FlowSnapshot) -> String {
    if snapshot.messages.is_empty() {
        return "(no messages)\n".to_string();
    }
    ListView(snapshot).to_string()
}

/// Map view: the parent/child forest, then whatever the forest cannot show.
pub fn map_view(graph: &FlowGraph) -> String {
    if graph.nodes.is_empty() {
        return "(no messages)\n".to_string();
    }
    MapView(graph).to_string()
}

struct ScriptSummary<'a> {
    script: &'a ScriptRecord,
    snapshot: &'a FlowSnapshot,
}

impl fmt::Display for ScriptSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { script, snapshot } = self;
        writeln!(f, "{}", script.name)?;
        writeln!(f, "id:          {}", script.id)?;
        if let Some(description) = &script.description {
            writeln!(f, "description: {description}")?;
        }
        writeln!(f, "messages:    {}", snapshot.messages.len())?;
        writeln!(f, "roots:       {}", snapshot.graph.roots().count())?;
        writeln!(f, "edges:       {}", snapshot.graph.edges.len())?;

        let mut variables = Vec::new();
        for message in &snapshot.messages {
            for name in placeholders(message.content.as_deref().unwrap_or_default()) {
                if !variables.contains(&name) {
                    variables.push(name);
                }
            }
        }
        if !variables.is_empty() {
            writeln!(f, "variables:   {}", variables.join(", "))?;
        }
        Ok(())
    }
}

struct ListView<'a>(&'a FlowSnapshot);

impl fmt::Display for ListView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.0;
        for message in &snapshot.messages {
            writeln!(
                f,
                "{:>3}. {}  {}",
                message.order,
                kind_tag(message),
                message.title
            )?;
            writeln!(f, "     id: {}", message.id)?;
            if let Some(parent_id) = message.parent_message_id {
                match snapshot.message(parent_id) {
                    Some(parent) => writeln!(f, "     after: {}", parent.title)?,
                    None => writeln!(f, "     after: missing message {parent_id}")?,
                }
            }
            if let Some(content) = message.content.as_deref() {
                writeln!(f, "     {}", preview(content))?;
            }
            if let Some(image_url) = message.image_url.as_deref() {
                writeln!(f, "     image: {image_url}")?;
            }
        }
        Ok(())
    }
}

struct MapView<'a>(&'a FlowGraph);

impl fmt::Display for MapView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.0;
        let mut visited = HashSet::new();
        for root in graph.roots() {
            writeln!(f, "{}", node_line(root, None))?;
            write_children(f, graph, root.id, "", &mut visited)?;
        }

        for (child, missing) in &graph.dangling {
            if let Some(node) = graph.node(*child) {
                writeln!(
                    f,
                    "! '{}' points at missing parent {missing}",
                    node.data.title
                )?;
            }
        }
        if !graph.cycles.is_empty() {
            let titles = graph
                .cycles
                .iter()
                .filter_map(|id| graph.node(*id))
                .map(|node| node.data.title.as_str())
                .collect::<Vec<_>>();
            writeln!(f, "! parent cycle: {}", titles.join(" -> "))?;
        }
        Ok(())
    }
}

fn write_children(
    f: &mut fmt::Formatter<'_>,
    graph: &FlowGraph,
    parent: MessageId,
    prefix: &str,
    visited: &mut HashSet<MessageId>,
) -> fmt::Result {
    if !visited.insert(parent) {
        return Ok(());
    }

    let edges = graph.outbound(parent).collect::<Vec<_>>();
    for (index, edge) in edges.iter().enumerate() {
        let Some(child) = graph.node(edge.target) else {
            continue;
        };
        let last = index + 1 == edges.len();
        let branch = if last { "└── " } else { "├── " };
        writeln!(f, "{prefix}{branch}{}", node_line(child, Some(&edge.style)))?;
        let next_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
        write_children(f, graph, child.id, &next_prefix, visited)?;
    }
    Ok(())
}

/// `edge` is the inbound edge style for nodes drawn under a parent.
fn node_line(node: &GraphNode, edge: Option<&EdgeStyle>) -> String {
    let kind = match (node.data.kind, edge.and_then(|style| style.label)) {
        (MessageKind::Text, _) => "text".to_string(),
        (MessageKind::Image, _) => "image".to_string(),
        (MessageKind::Conditional, Some(label)) => format!("conditional: {label}"),
        (MessageKind::Conditional, None) => "conditional".to_string(),
    };
    let line = format!(
        "{} [{kind}] #{} @({}, {})",
        node.data.title, node.data.order, node.position.x, node.position.y
    );
    match edge {
        Some(style) if style.animated => {
            format!("{line} ~ {} edge, animated", style.color.as_str())
        }
        Some(style) => format!("{line} ~ {} edge", style.color.as_str()),
        None => line,
    }
}

fn kind_tag(message: &MessageRecord) -> String {
    match (message.kind, message.condition) {
        (MessageKind::Conditional, Some(condition)) => {
            format!("[conditional: {}]", condition.label())
        }
        (kind, _) => format!("[{}]", kind.as_str()),
    }
}

fn preview(content: &str) -> String {
    let single_line = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= CONTENT_PREVIEW_CHARS {
        return single_line;
    }
    let cut = single_line
        .chars()
        .take(CONTENT_PREVIEW_CHARS)
        .collect::<String>();
    format!("{cut}…")
}
