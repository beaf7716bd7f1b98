use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use tokio::sync::watch;

use scriptflow_storage::{MessageId, MessagePatch, MessageRecord, ScriptId, Storage};

use crate::error::{
    CycleRejectedSnafu, FlowResult, NotLoadedSnafu, ScriptNotFoundSnafu, StoreSnafu,
    UnknownMessageSnafu,
};
use crate::graph::{
    CanvasPoint, FlowGraph, LAYOUT_COLUMN_GAP, LAYOUT_ROW_GAP, auto_layout, build_graph_with,
};
use crate::index::{AdjacencyIndex, SequenceIndex};
use crate::positions::PositionBuffer;
use crate::reorder::{normalize, order_updates, orders_changed, reorder};
use crate::validate::{MessageDraft, MessageEdit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    Map,
    List,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::List => "list",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "map" => Some(Self::Map),
            "list" => Some(Self::List),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Map => Self::List,
            Self::List => Self::Map,
        }
    }
}

/// Where a new message is attached in the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Parent is the current last message by order.
    #[default]
    AfterLast,
    ChildOf(MessageId),
    Root,
}

/// What happens to the children of a deleted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Children keep pointing at the deleted id and render as roots.
    #[default]
    KeepDangling,
    /// Children take over the deleted message's parent.
    ReparentToGrandparent,
}

impl DeletePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepDangling => "keep_dangling",
            Self::ReparentToGrandparent => "reparent_to_grandparent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "keep_dangling" => Some(Self::KeepDangling),
            "reparent_to_grandparent" => Some(Self::ReparentToGrandparent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowOptions {
    pub default_view: ViewMode,
    pub delete_policy: DeletePolicy,
}

/// Immutable state of one loaded script. Both views read from the same
/// message collection.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSnapshot {
    pub script_id: Option<ScriptId>,
    /// Sorted by `(order, id)`.
    pub messages: Vec<MessageRecord>,
    pub sequence: SequenceIndex,
    pub adjacency: AdjacencyIndex,
    pub graph: FlowGraph,
    pub view: ViewMode,
    pub selection: Option<MessageId>,
    pub revision: u64,
}

impl FlowSnapshot {
    fn empty(view: ViewMode) -> Self {
        Self::derive(None, Vec::new(), view, None, 0)
    }

    fn derive(
        script_id: Option<ScriptId>,
        mut messages: Vec<MessageRecord>,
        view: ViewMode,
        selection: Option<MessageId>,
        revision: u64,
    ) -> Self {
        messages.sort_by(|left, right| {
            left.order
                .cmp(&right.order)
                .then_with(|| left.id.cmp(&right.id))
        });
        let sequence = SequenceIndex::build(&messages);
        let adjacency = AdjacencyIndex::build(&messages);
        let graph = build_graph_with(&messages, &adjacency);
        let selection = selection.filter(|id| adjacency.contains(*id));

        Self {
            script_id,
            messages,
            sequence,
            adjacency,
            graph,
            view,
            selection,
            revision,
        }
    }

    pub fn message(&self, id: MessageId) -> Option<&MessageRecord> {
        self.sequence
            .position_of(id)
            .and_then(|index| self.messages.get(index))
    }

    pub fn list_view(&self) -> &[MessageRecord] {
        &self.messages
    }

    pub fn map_view(&self) -> &FlowGraph {
        &self.graph
    }
}

/// Receives a notification for every published snapshot.
pub struct FlowSubscription {
    receiver: watch::Receiver<u64>,
    state: Arc<ArcSwap<FlowSnapshot>>,
}

impl FlowSubscription {
    pub fn current(&self) -> Arc<FlowSnapshot> {
        self.state.load_full()
    }

    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// Marks the latest revision as seen and returns its snapshot.
    pub fn latest(&mut self) -> Arc<FlowSnapshot> {
        self.receiver.borrow_and_update();
        self.state.load_full()
    }

    /// Waits for the next publish. `None` once the controller is dropped.
    pub async fn changed(&mut self) -> Option<Arc<FlowSnapshot>> {
        self.receiver.changed().await.ok()?;
        Some(self.state.load_full())
    }
}

/// Dual view controller over one script.
///
/// Every mutation keeps the snapshot it started from. A failed store call
/// puts that snapshot back (or the store's current state, for commands that
/// issue several calls) before the error is returned.
pub struct ScriptFlow<S>
where
    S: Storage + ?Sized,
{
    store: Arc<S>,
    state: Arc<ArcSwap<FlowSnapshot>>,
    revisions: watch::Sender<u64>,
    positions: PositionBuffer,
    options: FlowOptions,
}

impl<S> ScriptFlow<S>
where
    S: Storage + ?Sized,
{
    pub fn new(store: Arc<S>, options: FlowOptions) -> Self {
        let (revisions, _) = watch::channel(0);
        Self {
            store,
            state: Arc::new(ArcSwap::from_pointee(FlowSnapshot::empty(options.default_view))),
            revisions,
            positions: PositionBuffer::default(),
            options,
        }
    }

    pub fn options(&self) -> FlowOptions {
        self.options
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<FlowSnapshot> {
        self.state.load_full()
    }

    pub fn subscribe(&self) -> FlowSubscription {
        FlowSubscription {
            receiver: self.revisions.subscribe(),
            state: Arc::clone(&self.state),
        }
    }

    pub fn list_view(&self) -> Vec<MessageRecord> {
        self.snapshot().list_view().to_vec()
    }

    pub fn map_view(&self) -> FlowGraph {
        self.snapshot().map_view().clone()
    }

    pub fn load(&mut self, script_id: ScriptId) -> FlowResult<Arc<FlowSnapshot>> {
        self.store
            .get_script(script_id)
            .context(StoreSnafu {
                stage: "flow-load-script",
            })?
            .context(ScriptNotFoundSnafu {
                stage: "flow-load-script",
                id: script_id,
            })?;
        let messages = self
            .store
            .list_messages_by_script(script_id)
            .context(StoreSnafu {
                stage: "flow-load-messages",
            })?;

        self.positions = PositionBuffer::from_messages(&messages);
        let view = self.snapshot().view;
        let snapshot = self.publish(Some(script_id), messages, view, None);
        tracing::info!(%script_id, messages = snapshot.messages.len(), "loaded script");
        Ok(snapshot)
    }

    /// Re-reads the store. Positions dragged but not saved are kept.
    pub fn refresh(&mut self) -> FlowResult<Arc<FlowSnapshot>> {
        let current = self.snapshot();
        let script_id = loaded_script(&current, "flow-refresh")?;
        let mut messages = self
            .store
            .list_messages_by_script(script_id)
            .context(StoreSnafu {
                stage: "flow-refresh-messages",
            })?;

        self.positions.sync(&messages);
        self.positions.overlay(&mut messages);
        Ok(self.publish(Some(script_id), messages, current.view, current.selection))
    }

    pub fn add_message(
        &mut self,
        draft: MessageDraft,
        placement: Placement,
    ) -> FlowResult<MessageRecord> {
        let current = self.snapshot();
        let script_id = loaded_script(&current, "flow-add")?;

        let parent = match placement {
            Placement::AfterLast => current.sequence.last(),
            Placement::ChildOf(parent_id) => {
                ensure_known(&current, parent_id, "flow-add-parent")?;
                Some(parent_id)
            }
            Placement::Root => None,
        };
        let order = current
            .messages
            .iter()
            .map(|message| message.order)
            .max()
            .unwrap_or(0)
            + 1;
        let position = initial_position(&current, parent);
        let input = draft.into_new_message(parent, order, position)?;

        let record = self
            .store
            .create_message(script_id, input)
            .context(StoreSnafu {
                stage: "flow-add-create",
            })?;

        let mut messages = current.messages.clone();
        messages.push(record.clone());
        self.positions.sync(&messages);
        self.publish(Some(script_id), messages, current.view, Some(record.id));
        tracing::info!(%script_id, message_id = %record.id, order = record.order, "added message");
        Ok(record)
    }

    pub fn edit_message(&mut self, id: MessageId, edit: MessageEdit) -> FlowResult<MessageRecord> {
        let previous = self.snapshot();
        let script_id = loaded_script(&previous, "flow-edit")?;
        let existing = ensure_known(&previous, id, "flow-edit-message")?.clone();

        if let Some(Some(parent_id)) = edit.parent_message_id {
            ensure_known(&previous, parent_id, "flow-edit-parent")?;
            if previous.adjacency.would_create_cycle(id, parent_id) {
                return CycleRejectedSnafu {
                    stage: "flow-edit-parent",
                    message_id: id,
                    parent_id,
                }
                .fail();
            }
        }

        let patch = edit.to_patch(&existing)?;
        if patch.is_empty() {
            return Ok(existing);
        }

        let mut optimistic = existing.clone();
        patch.apply_to(&mut optimistic);
        let messages = replace_record(&previous.messages, optimistic);
        self.publish(Some(script_id), messages, previous.view, previous.selection);

        let stored = match self.store.update_message(id, patch) {
            Ok(stored) => stored,
            Err(source) => {
                self.restore(&previous, "flow-edit-update");
                return Err(source).context(StoreSnafu {
                    stage: "flow-edit-update",
                });
            }
        };

        let stored = self.with_pending_position(stored);
        let current = self.snapshot();
        if current.message(id) != Some(&stored) {
            let messages = replace_record(&current.messages, stored.clone());
            self.publish(Some(script_id), messages, current.view, current.selection);
        }
        tracing::info!(%script_id, message_id = %id, "edited message");
        Ok(stored)
    }

    pub fn delete_message(&mut self, id: MessageId) -> FlowResult<()> {
        let previous = self.snapshot();
        let script_id = loaded_script(&previous, "flow-delete")?;
        let deleted = ensure_known(&previous, id, "flow-delete-message")?.clone();

        let mut reparented = Vec::new();
        let mut remaining = previous
            .messages
            .iter()
            .filter(|message| message.id != id)
            .cloned()
            .collect::<Vec<_>>();
        if self.options.delete_policy == DeletePolicy::ReparentToGrandparent {
            // Only a live grandparent that keeps the child acyclic is used;
            // otherwise the child becomes a root.
            let grandparent = previous.adjacency.parent_of(id);
            for message in &mut remaining {
                if message.parent_message_id == Some(id) {
                    let parent = grandparent.filter(|parent_id| {
                        !previous.adjacency.would_create_cycle(message.id, *parent_id)
                    });
                    message.parent_message_id = parent;
                    reparented.push((message.id, parent));
                }
            }
        }
        let before_renumber = remaining.clone();
        normalize(&mut remaining);
        let renumbered = orders_changed(&before_renumber, &remaining);

        let selection = previous.selection.filter(|selected| *selected != id);
        self.publish(Some(script_id), remaining.clone(), previous.view, selection);

        if let Err(error) = self.persist_delete(&deleted, &reparented, &remaining, renumbered) {
            self.recover(&previous, "flow-delete");
            return Err(error);
        }

        self.positions.sync(&remaining);
        tracing::info!(
            %script_id,
            message_id = %id,
            reparented = reparented.len(),
            policy = self.options.delete_policy.as_str(),
            "deleted message"
        );
        Ok(())
    }

    fn persist_delete(
        &self,
        deleted: &MessageRecord,
        reparented: &[(MessageId, Option<MessageId>)],
        remaining: &[MessageRecord],
        renumbered: bool,
    ) -> FlowResult<()> {
        for (child, parent) in reparented {
            let patch = MessagePatch {
                parent_message_id: Some(*parent),
                ..MessagePatch::default()
            };
            self.store.update_message(*child, patch).context(StoreSnafu {
                stage: "flow-delete-reparent",
            })?;
        }
        self.store.delete_message(deleted.id).context(StoreSnafu {
            stage: "flow-delete-apply",
        })?;
        if renumbered {
            self.store
                .batch_update_order(deleted.script_id, &order_updates(remaining))
                .context(StoreSnafu {
                    stage: "flow-delete-renumber",
                })?;
        }
        Ok(())
    }

    /// Server-side clone appended at the end; nothing else changes.
    pub fn duplicate_message(&mut self, id: MessageId) -> FlowResult<MessageRecord> {
        let current = self.snapshot();
        let script_id = loaded_script(&current, "flow-duplicate")?;
        ensure_known(&current, id, "flow-duplicate-message")?;

        let copy = self.store.duplicate_message(id).context(StoreSnafu {
            stage: "flow-duplicate-apply",
        })?;

        let mut messages = current.messages.clone();
        messages.push(copy.clone());
        self.positions.sync(&messages);
        self.publish(Some(script_id), messages, current.view, Some(copy.id));
        tracing::info!(%script_id, source_id = %id, message_id = %copy.id, "duplicated message");
        Ok(copy)
    }

    /// Moves the list entry at `from` to `to` and persists every order in one
    /// batch.
    pub fn reorder(&mut self, from: usize, to: usize) -> FlowResult<Arc<FlowSnapshot>> {
        let previous = self.snapshot();
        let script_id = loaded_script(&previous, "flow-reorder")?;
        let reordered = reorder(&previous.messages, from, to)?;

        if !orders_changed(&previous.messages, &reordered) {
            tracing::debug!(%script_id, from, to, "reorder left every order unchanged");
            return Ok(previous);
        }

        let snapshot = self.publish(
            Some(script_id),
            reordered.clone(),
            previous.view,
            previous.selection,
        );
        if let Err(source) = self
            .store
            .batch_update_order(script_id, &order_updates(&reordered))
        {
            self.restore(&previous, "flow-reorder-persist");
            return Err(source).context(StoreSnafu {
                stage: "flow-reorder-persist",
            });
        }

        tracing::info!(%script_id, from, to, "reordered messages");
        Ok(snapshot)
    }

    pub fn move_to(&mut self, id: MessageId, to: usize) -> FlowResult<Arc<FlowSnapshot>> {
        let current = self.snapshot();
        loaded_script(&current, "flow-move-to")?;
        let from = current
            .sequence
            .position_of(id)
            .context(UnknownMessageSnafu {
                stage: "flow-move-to",
                id,
            })?;
        self.reorder(from, to)
    }

    /// Canvas drag. Memory only; see [`Self::save_positions`].
    pub fn move_node(&mut self, id: MessageId, x: f64, y: f64) -> FlowResult<()> {
        let current = self.snapshot();
        let script_id = loaded_script(&current, "flow-move-node")?;
        let mut moved = ensure_known(&current, id, "flow-move-node")?.clone();

        self.positions.move_node(id, CanvasPoint { x, y });
        moved.position_x = x;
        moved.position_y = y;
        let messages = replace_record(&current.messages, moved);
        self.publish(Some(script_id), messages, current.view, current.selection);
        Ok(())
    }

    /// Places every node with [`auto_layout`]. Like a drag, the result stays
    /// unsaved until [`Self::save_positions`].
    pub fn apply_auto_layout(&mut self) -> FlowResult<usize> {
        let current = self.snapshot();
        let script_id = loaded_script(&current, "flow-auto-layout")?;

        let mut messages = current.messages.clone();
        let layout = auto_layout(&messages);
        for (message, update) in messages.iter_mut().zip(&layout) {
            self.positions.move_node(
                message.id,
                CanvasPoint {
                    x: update.position_x,
                    y: update.position_y,
                },
            );
            message.position_x = update.position_x;
            message.position_y = update.position_y;
        }
        self.publish(Some(script_id), messages, current.view, current.selection);
        Ok(layout.len())
    }

    /// Writes the position of every rendered node in one batch. On failure the
    /// pending positions stay in memory for a later retry.
    pub fn save_positions(&mut self) -> FlowResult<usize> {
        let current = self.snapshot();
        let script_id = loaded_script(&current, "flow-save-positions")?;
        let updates = self.positions.collect(&current.messages);
        if updates.is_empty() {
            return Ok(0);
        }

        if let Err(source) = self.store.batch_update_positions(script_id, &updates) {
            tracing::warn!(
                %script_id,
                pending = self.positions.unsaved_len(),
                error = %source,
                "saving positions failed; keeping them in memory"
            );
            return Err(source).context(StoreSnafu {
                stage: "flow-save-positions",
            });
        }

        self.positions.mark_saved(&updates);
        tracing::info!(%script_id, nodes = updates.len(), "saved canvas positions");
        Ok(updates.len())
    }

    pub fn has_unsaved_positions(&self) -> bool {
        self.positions.has_unsaved()
    }

    pub fn discard_unsaved_positions(&mut self) -> FlowResult<()> {
        let current = self.snapshot();
        let script_id = loaded_script(&current, "flow-discard-positions")?;
        if !self.positions.has_unsaved() {
            return Ok(());
        }

        let mut messages = current.messages.clone();
        self.positions.discard(&mut messages);
        self.publish(Some(script_id), messages, current.view, current.selection);
        Ok(())
    }

    pub fn set_view(&mut self, view: ViewMode) {
        let current = self.snapshot();
        if current.view == view {
            return;
        }
        self.publish(
            current.script_id,
            current.messages.clone(),
            view,
            current.selection,
        );
    }

    pub fn toggle_view(&mut self) -> ViewMode {
        let view = self.snapshot().view.toggled();
        self.set_view(view);
        view
    }

    pub fn select(&mut self, selection: Option<MessageId>) -> FlowResult<()> {
        let current = self.snapshot();
        if let Some(id) = selection {
            ensure_known(&current, id, "flow-select")?;
        }
        self.publish(
            current.script_id,
            current.messages.clone(),
            current.view,
            selection,
        );
        Ok(())
    }

    fn publish(
        &mut self,
        script_id: Option<ScriptId>,
        messages: Vec<MessageRecord>,
        view: ViewMode,
        selection: Option<MessageId>,
    ) -> Arc<FlowSnapshot> {
        let revision = self.state.load().revision + 1;
        let snapshot = Arc::new(FlowSnapshot::derive(
            script_id, messages, view, selection, revision,
        ));
        self.state.store(Arc::clone(&snapshot));
        self.revisions.send_replace(revision);
        snapshot
    }

    /// Puts a previous snapshot's content back under a new revision.
    fn restore(&mut self, previous: &FlowSnapshot, stage: &'static str) {
        tracing::warn!(stage, revision = previous.revision, "store call failed; rolling back");
        self.positions.sync(&previous.messages);
        self.publish(
            previous.script_id,
            previous.messages.clone(),
            previous.view,
            previous.selection,
        );
    }

    /// For commands with several store calls: adopt whatever the store holds
    /// now, or the previous snapshot if even that read fails.
    fn recover(&mut self, previous: &FlowSnapshot, stage: &'static str) {
        let Some(script_id) = previous.script_id else {
            self.restore(previous, stage);
            return;
        };

        match self.store.list_messages_by_script(script_id) {
            Ok(mut messages) => {
                tracing::warn!(stage, "store call failed; resynchronized from store");
                self.positions.sync(&messages);
                self.positions.overlay(&mut messages);
                self.publish(Some(script_id), messages, previous.view, previous.selection);
            }
            Err(error) => {
                tracing::warn!(stage, %error, "resynchronizing from store failed");
                self.restore(previous, stage);
            }
        }
    }

    fn with_pending_position(&self, mut record: MessageRecord) -> MessageRecord {
        self.positions.overlay(std::slice::from_mut(&mut record));
        record
    }
}

fn loaded_script(snapshot: &FlowSnapshot, stage: &'static str) -> FlowResult<ScriptId> {
    snapshot.script_id.context(NotLoadedSnafu { stage })
}

fn ensure_known<'a>(
    snapshot: &'a FlowSnapshot,
    id: MessageId,
    stage: &'static str,
) -> FlowResult<&'a MessageRecord> {
    snapshot.message(id).context(UnknownMessageSnafu { stage, id })
}

fn replace_record(messages: &[MessageRecord], record: MessageRecord) -> Vec<MessageRecord> {
    messages
        .iter()
        .map(|message| {
            if message.id == record.id {
                record.clone()
            } else {
                message.clone()
            }
        })
        .collect()
}

/// Below the parent, or in a new column on the top row for roots.
fn initial_position(snapshot: &FlowSnapshot, parent: Option<MessageId>) -> (f64, f64) {
    if let Some(parent) = parent.and_then(|id| snapshot.message(id)) {
        let siblings = snapshot.adjacency.children_of(parent.id).len() as f64;
        return (
            parent.position_x + siblings * LAYOUT_COLUMN_GAP,
            parent.position_y + LAYOUT_ROW_GAP,
        );
    }

    snapshot
        .messages
        .iter()
        .map(|message| message.position_x)
        .reduce(f64::max)
        .map_or((0.0, 0.0), |max_x| (max_x + LAYOUT_COLUMN_GAP, 0.0))
}

#[cfg(test)]
mod tests {
    use scriptflow_storage::{MessageCondition, MessageKind};

    use super::*;
    use crate::error::FlowError;
    use crate::test_support::{MemoryStore, message};

    fn titles(messages: &[MessageRecord]) -> Vec<(String, u32)> {
        messages
            .iter()
            .map(|message| (message.title.clone(), message.order))
            .collect()
    }

    fn seeded(
        records: &[MessageRecord],
        options: FlowOptions,
    ) -> (Arc<MemoryStore>, ScriptId, ScriptFlow<MemoryStore>) {
        let (store, script_id) = MemoryStore::with_script("Outreach");
        store.seed(script_id, records);
        let store = Arc::new(store);
        let mut flow = ScriptFlow::new(Arc::clone(&store), options);
        flow.load(script_id).unwrap();
        (store, script_id, flow)
    }

    fn abc() -> Vec<MessageRecord> {
        let a = message("A", 1, None);
        let b = message("B", 2, Some(a.id));
        let c = message("C", 3, Some(b.id));
        vec![a, b, c]
    }

    #[test]
    fn commands_require_a_loaded_script() {
        let mut flow = ScriptFlow::new(Arc::new(MemoryStore::default()), FlowOptions::default());
        assert!(matches!(
            flow.add_message(MessageDraft::text("Hi", ""), Placement::Root),
            Err(FlowError::NotLoaded { .. })
        ));
        assert!(matches!(flow.reorder(0, 0), Err(FlowError::NotLoaded { .. })));
        assert!(matches!(
            flow.load(ScriptId::new_v7()),
            Err(FlowError::ScriptNotFound { .. })
        ));
    }

    #[test]
    fn parent_edge_and_root_after_load() {
        let a = message("A", 1, None);
        let b = message("B", 2, Some(a.id));
        let (_, _, flow) = seeded(&[a.clone(), b.clone()], FlowOptions::default());

        let graph = flow.map_view();
        assert_eq!(graph.edges.len(), 1);
        assert_eq!((graph.edges[0].source, graph.edges[0].target), (a.id, b.id));
        assert_eq!(graph.inbound(a.id).count(), 0);
        assert_eq!(flow.snapshot().view, ViewMode::Map);
    }

    #[test]
    fn add_after_last_parents_to_last_and_appends() {
        let records = abc();
        let last = records[2].id;
        let (store, script_id, mut flow) = seeded(&records, FlowOptions::default());

        let added = flow
            .add_message(MessageDraft::text("D", "Oi {{name}}"), Placement::default())
            .unwrap();
        assert_eq!(added.parent_message_id, Some(last));
        assert_eq!(added.order, 4);

        let root = flow
            .add_message(
                MessageDraft::image("Menu", "https://cdn.example.com/m.png"),
                Placement::Root,
            )
            .unwrap();
        assert_eq!(root.parent_message_id, None);
        assert_eq!(root.kind, MessageKind::Image);

        let child = flow
            .add_message(
                MessageDraft::conditional(
                    "Nudge",
                    "Still there?",
                    MessageCondition::AfterNoResponse,
                ),
                Placement::ChildOf(records[0].id),
            )
            .unwrap();
        assert_eq!(child.parent_message_id, Some(records[0].id));

        let snapshot = flow.snapshot();
        assert_eq!(snapshot.selection, Some(child.id));
        assert_eq!(snapshot.messages, store.stored(script_id));
        assert_eq!(snapshot.graph.edges.len(), 4);
    }

    #[test]
    fn invalid_drafts_never_reach_the_store() {
        let (store, _, mut flow) = seeded(&abc(), FlowOptions::default());
        let before = flow.snapshot();

        let blank = flow.add_message(MessageDraft::text("  ", "body"), Placement::AfterLast);
        assert!(matches!(blank, Err(FlowError::Validation { field: "title", .. })));

        let unknown = flow.add_message(
            MessageDraft::text("X", "body"),
            Placement::ChildOf(MessageId::new_v7()),
        );
        assert!(matches!(unknown, Err(FlowError::UnknownMessage { .. })));

        assert_eq!(store.calls("create_message"), 0);
        assert_eq!(flow.snapshot().revision, before.revision);
    }

    #[test]
    fn reparenting_into_a_descendant_is_rejected() {
        let records = abc();
        let (store, _, mut flow) = seeded(&records, FlowOptions::default());

        let edit = MessageEdit {
            parent_message_id: Some(Some(records[2].id)),
            ..MessageEdit::default()
        };
        assert!(matches!(
            flow.edit_message(records[0].id, edit),
            Err(FlowError::CycleRejected { .. })
        ));

        let self_parent = MessageEdit {
            parent_message_id: Some(Some(records[1].id)),
            ..MessageEdit::default()
        };
        assert!(matches!(
            flow.edit_message(records[1].id, self_parent),
            Err(FlowError::CycleRejected { .. })
        ));
        assert_eq!(store.calls("update_message"), 0);
    }

    #[test]
    fn edits_are_applied_and_rolled_back_on_failure() {
        let records = abc();
        let (store, script_id, mut flow) = seeded(&records, FlowOptions::default());

        let edit = MessageEdit {
            title: Some("Greeting".to_string()),
            parent_message_id: Some(None),
            ..MessageEdit::default()
        };
        let edited = flow.edit_message(records[1].id, edit).unwrap();
        assert_eq!(edited.title, "Greeting");
        assert!(flow.snapshot().graph.node(records[1].id).unwrap().is_root);
        assert_eq!(flow.snapshot().messages, store.stored(script_id));

        let before = flow.snapshot();
        store.fail_on("update_message");
        let error = flow
            .edit_message(
                records[2].id,
                MessageEdit {
                    title: Some("Never".to_string()),
                    ..MessageEdit::default()
                },
            )
            .unwrap_err();
        assert!(matches!(error, FlowError::Store { .. }));

        let after = flow.snapshot();
        assert_eq!(after.messages, before.messages);
        assert_eq!(after.graph, before.graph);
        assert!(after.revision > before.revision);
    }

    #[test]
    fn deleting_keeps_dangling_children_by_default() {
        let records = abc();
        let (store, script_id, mut flow) = seeded(&records, FlowOptions::default());

        flow.delete_message(records[1].id).unwrap();

        let snapshot = flow.snapshot();
        let child = snapshot.message(records[2].id).unwrap();
        assert_eq!(child.parent_message_id, Some(records[1].id));
        assert_eq!(snapshot.graph.dangling, [(records[2].id, records[1].id)]);
        assert!(snapshot.graph.node(records[2].id).unwrap().is_root);
        assert_eq!(titles(&snapshot.messages), [("A".to_string(), 1), ("C".to_string(), 2)]);
        assert_eq!(snapshot.messages, store.stored(script_id));
    }

    #[test]
    fn grandparent_policy_reparents_children() {
        let records = abc();
        let (store, script_id, mut flow) = seeded(
            &records,
            FlowOptions {
                delete_policy: DeletePolicy::ReparentToGrandparent,
                ..FlowOptions::default()
            },
        );

        flow.delete_message(records[1].id).unwrap();

        let stored = store.stored(script_id);
        assert_eq!(stored[1].id, records[2].id);
        assert_eq!(stored[1].parent_message_id, Some(records[0].id));
        assert_eq!(flow.snapshot().graph.edges.len(), 1);
    }

    #[test]
    fn grandparent_policy_roots_children_of_a_dangling_parent() {
        let b = message("B", 1, Some(MessageId::new_v7()));
        let c = message("C", 2, Some(b.id));
        let (store, script_id, mut flow) = seeded(
            &[b.clone(), c.clone()],
            FlowOptions {
                delete_policy: DeletePolicy::ReparentToGrandparent,
                ..FlowOptions::default()
            },
        );

        flow.delete_message(b.id).unwrap();

        let stored = store.stored(script_id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, c.id);
        assert_eq!(stored[0].parent_message_id, None);
        assert_eq!(flow.snapshot().messages, stored);
    }

    #[test]
    fn grandparent_policy_breaks_stored_cycles() {
        let mut a = message("A", 1, None);
        let b = message("B", 2, Some(a.id));
        a.parent_message_id = Some(b.id);
        let (store, script_id, mut flow) = seeded(
            &[a.clone(), b.clone()],
            FlowOptions {
                delete_policy: DeletePolicy::ReparentToGrandparent,
                ..FlowOptions::default()
            },
        );

        flow.delete_message(b.id).unwrap();

        let stored = store.stored(script_id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].parent_message_id, None);
        assert!(flow.snapshot().graph.cycles.is_empty());
    }

    #[test]
    fn failed_delete_resynchronizes_with_the_store() {
        let records = abc();
        let (store, script_id, mut flow) = seeded(&records, FlowOptions::default());

        store.fail_on("delete_message");
        assert!(flow.delete_message(records[0].id).is_err());
        assert_eq!(flow.snapshot().messages, store.stored(script_id));
        assert_eq!(flow.snapshot().messages.len(), 3);

        store.heal();
        store.fail_on("batch_order");
        assert!(flow.delete_message(records[0].id).is_err());
        let snapshot = flow.snapshot();
        assert_eq!(snapshot.messages, store.stored(script_id));
        assert_eq!(snapshot.messages.len(), 2);
    }

    #[test]
    fn duplicate_leaves_every_other_message_alone() {
        let records = abc();
        let (store, script_id, mut flow) = seeded(&records, FlowOptions::default());
        let before = store.stored(script_id);

        let copy = flow.duplicate_message(records[1].id).unwrap();

        assert_ne!(copy.id, records[1].id);
        assert_eq!(copy.title, records[1].title);
        assert_eq!(copy.content, records[1].content);
        assert_eq!(copy.kind, records[1].kind);
        assert_eq!(copy.image_url, records[1].image_url);
        assert_eq!(copy.condition, records[1].condition);
        assert_eq!(copy.parent_message_id, records[1].parent_message_id);
        assert_eq!(copy.order, 4);

        let after = store.stored(script_id);
        assert_eq!(&after[..3], &before[..]);
        assert_eq!(flow.snapshot().messages, after);
        assert_eq!(flow.snapshot().selection, Some(copy.id));
    }

    #[test]
    fn dragging_c_before_a_persists_one_batch() {
        let records = vec![message("A", 1, None), message("B", 2, None), message("C", 3, None)];
        let (store, script_id, mut flow) = seeded(&records, FlowOptions::default());

        let snapshot = flow.reorder(2, 0).unwrap();

        let expected = [("C".to_string(), 1), ("A".to_string(), 2), ("B".to_string(), 3)];
        assert_eq!(titles(&snapshot.messages), expected);
        assert_eq!(titles(&store.stored(script_id)), expected);
        assert_eq!(store.calls("batch_order"), 1);

        flow.move_to(records[1].id, 0).unwrap();
        assert_eq!(
            titles(&flow.list_view()),
            [("B".to_string(), 1), ("C".to_string(), 2), ("A".to_string(), 3)]
        );
    }

    #[test]
    fn reorder_edge_cases() {
        let records = vec![message("A", 1, None), message("B", 2, None)];
        let (store, _, mut flow) = seeded(&records, FlowOptions::default());

        flow.reorder(1, 1).unwrap();
        assert_eq!(store.calls("batch_order"), 0);

        assert!(matches!(
            flow.reorder(0, 2),
            Err(FlowError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            flow.move_to(MessageId::new_v7(), 0),
            Err(FlowError::UnknownMessage { .. })
        ));

        let before = flow.snapshot();
        store.fail_on("batch_order");
        assert!(matches!(flow.reorder(1, 0), Err(FlowError::Store { .. })));
        assert_eq!(flow.snapshot().messages, before.messages);
    }

    #[test]
    fn failed_save_keeps_positions_for_retry() {
        let records = abc();
        let (store, script_id, mut flow) = seeded(&records, FlowOptions::default());

        flow.move_node(records[0].id, 400.0, 25.0).unwrap();
        assert!(flow.has_unsaved_positions());
        assert_eq!(store.calls("batch_positions"), 0);

        store.fail_on("batch_positions");
        assert!(flow.save_positions().is_err());
        assert!(flow.has_unsaved_positions());
        let node = flow.snapshot().graph.node(records[0].id).unwrap().position;
        assert_eq!((node.x, node.y), (400.0, 25.0));

        store.heal();
        assert_eq!(flow.save_positions().unwrap(), 3);
        assert!(!flow.has_unsaved_positions());
        let stored = store.stored(script_id);
        assert_eq!((stored[0].position_x, stored[0].position_y), (400.0, 25.0));
    }

    #[test]
    fn refresh_and_discard_respect_pending_positions() {
        let records = abc();
        let (_, _, mut flow) = seeded(&records, FlowOptions::default());

        flow.move_node(records[1].id, -50.0, 75.0).unwrap();
        flow.refresh().unwrap();
        let moved = flow.snapshot().message(records[1].id).cloned().unwrap();
        assert_eq!((moved.position_x, moved.position_y), (-50.0, 75.0));

        flow.discard_unsaved_positions().unwrap();
        let restored = flow.snapshot().message(records[1].id).cloned().unwrap();
        assert_eq!(
            (restored.position_x, restored.position_y),
            (records[1].position_x, records[1].position_y)
        );
        assert!(!flow.has_unsaved_positions());
    }

    #[test]
    fn auto_layout_marks_every_node_unsaved() {
        let records = abc();
        let (store, script_id, mut flow) = seeded(&records, FlowOptions::default());

        assert_eq!(flow.apply_auto_layout().unwrap(), 3);
        assert!(flow.has_unsaved_positions());
        flow.save_positions().unwrap();

        let stored = store.stored(script_id);
        assert_eq!(stored[0].position_y, 0.0);
        assert_eq!(stored[2].position_y, 2.0 * LAYOUT_ROW_GAP);
    }

    #[test]
    fn view_switches_do_not_refetch_and_notify_subscribers() {
        let (store, _, mut flow) = seeded(
            &abc(),
            FlowOptions {
                default_view: ViewMode::List,
                ..FlowOptions::default()
            },
        );
        let mut subscription = flow.subscribe();
        let reads = store.calls("list_messages");
        assert_eq!(flow.snapshot().view, ViewMode::List);

        assert_eq!(flow.toggle_view(), ViewMode::Map);
        assert!(subscription.has_changed());
        let latest = subscription.latest();
        assert_eq!(latest.view, ViewMode::Map);
        assert!(!subscription.has_changed());

        flow.set_view(ViewMode::Map);
        assert!(!subscription.has_changed());

        let first = latest.messages[0].id;
        flow.select(Some(first)).unwrap();
        assert_eq!(subscription.current().selection, Some(first));
        assert!(matches!(
            flow.select(Some(MessageId::new_v7())),
            Err(FlowError::UnknownMessage { .. })
        ));
        assert_eq!(store.calls("list_messages"), reads);
        assert_eq!(flow.list_view().len(), flow.map_view().nodes.len());
    }

    #[tokio::test]
    async fn subscribers_wake_on_the_next_publish() {
        let records = abc();
        let (_store, _, mut flow) = seeded(&records, FlowOptions::default());
        let mut subscription = flow.subscribe();

        flow.reorder(2, 0).unwrap();

        let snapshot = subscription.changed().await.unwrap();
        assert_eq!(snapshot.messages[0].id, records[2].id);
        assert_eq!(snapshot.revision, flow.snapshot().revision);
        assert!(!subscription.has_changed());
    }

    #[tokio::test]
    async fn subscription_ends_when_the_controller_is_dropped() {
        let (_store, _, flow) = seeded(&abc(), FlowOptions::default());
        let mut subscription = flow.subscribe();
        drop(flow);

        assert!(subscription.changed().await.is_none());
        assert_eq!(subscription.current().messages.len(), 3);
    }
}
