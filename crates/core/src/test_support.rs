//! Shared fixtures for unit tests: record builders and an in-memory store with
//! failure injection.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use scriptflow_storage::{
    DEFAULT_SCRIPT_NAME, MessageCondition, MessageId, MessageKind, MessagePatch, MessageRecord,
    MessageStore, NewMessage, NewScript, OrderUpdate, PositionUpdate, ScriptId, ScriptPatch,
    ScriptRecord, ScriptStore, StorageError, StorageResult,
};

const FIXTURE_SCRIPT_ID: &str = "01920000-0000-7000-8000-000000000001";
const DUPLICATE_OFFSET: f64 = 40.0;

pub(crate) fn fixture_script_id() -> ScriptId {
    ScriptId::parse(FIXTURE_SCRIPT_ID).unwrap()
}

pub(crate) fn message(title: &str, order: u32, parent: Option<MessageId>) -> MessageRecord {
    MessageRecord {
        id: MessageId::new_v7(),
        script_id: fixture_script_id(),
        title: title.to_string(),
        content: Some(format!("{title} body")),
        kind: MessageKind::Text,
        image_url: None,
        condition: None,
        parent_message_id: parent,
        order,
        position_x: f64::from(order) * 10.0,
        position_y: f64::from(order) * 20.0,
    }
}

pub(crate) fn conditional(
    title: &str,
    order: u32,
    parent: Option<MessageId>,
    condition: MessageCondition,
) -> MessageRecord {
    MessageRecord {
        kind: MessageKind::Conditional,
        condition: Some(condition),
        ..message(title, order, parent)
    }
}

#[derive(Default)]
struct MemoryState {
    scripts: Vec<ScriptRecord>,
    messages: Vec<MessageRecord>,
    /// Operation name -> number of calls allowed to succeed before failing.
    fail_after: HashMap<&'static str, usize>,
    calls: HashMap<&'static str, usize>,
}

impl MemoryState {
    fn enter(&mut self, operation: &'static str) -> StorageResult<()> {
        let count = self.calls.entry(operation).or_default();
        *count += 1;
        match self.fail_after.get(operation) {
            Some(allowed) if *count > *allowed => Err(StorageError::InvariantViolation {
                stage: operation,
                details: format!("injected failure for {operation}"),
            }),
            _ => Ok(()),
        }
    }

    fn script_exists(&self, script_id: ScriptId) -> bool {
        self.scripts.iter().any(|script| script.id == script_id)
    }

    fn message_index(&self, message_id: MessageId, stage: &'static str) -> StorageResult<usize> {
        self.messages
            .iter()
            .position(|message| message.id == message_id)
            .ok_or_else(|| StorageError::NotFound {
                stage,
                entity: "message",
                id: message_id.to_string(),
            })
    }

    fn next_order(&self, script_id: ScriptId) -> u32 {
        self.messages
            .iter()
            .filter(|message| message.script_id == script_id)
            .map(|message| message.order)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn ensure_parent_assignable(
        &self,
        record: &MessageRecord,
        parent_id: MessageId,
    ) -> StorageResult<()> {
        let conflict = |details: &str| StorageError::Conflict {
            stage: "memory-parent-check",
            entity: "message",
            details: details.to_string(),
        };
        if parent_id == record.id {
            return Err(conflict("a message cannot be its own parent"));
        }
        let parent = self
            .messages
            .iter()
            .find(|message| message.id == parent_id && message.script_id == record.script_id)
            .ok_or_else(|| conflict("parent is not part of the same script"))?;

        let mut seen = HashSet::new();
        let mut current = parent.parent_message_id;
        while let Some(ancestor) = current {
            if ancestor == record.id {
                return Err(conflict("reparenting would create a cycle"));
            }
            if !seen.insert(ancestor) {
                break;
            }
            current = self
                .messages
                .iter()
                .find(|message| message.id == ancestor)
                .and_then(|message| message.parent_message_id);
        }
        Ok(())
    }
}

/// In-memory `ScriptStore + MessageStore` mirroring the SQLite store's rules.
#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub(crate) fn with_script(name: &str) -> (Self, ScriptId) {
        let store = Self::default();
        let script = store
            .create_script(NewScript {
                name: name.to_string(),
                description: None,
            })
            .unwrap();
        (store, script.id)
    }

    /// Appends messages built by [`message`] to `script_id`, keeping their ids.
    pub(crate) fn seed(&self, script_id: ScriptId, records: &[MessageRecord]) {
        let mut state = self.state.lock().unwrap();
        state.messages.extend(records.iter().cloned().map(|record| MessageRecord {
            script_id,
            ..record
        }));
    }

    pub(crate) fn fail_on(&self, operation: &'static str) {
        self.fail_after(operation, 0);
    }

    pub(crate) fn fail_after(&self, operation: &'static str, successes: usize) {
        let mut state = self.state.lock().unwrap();
        let already = state.calls.get(operation).copied().unwrap_or(0);
        state.fail_after.insert(operation, already + successes);
    }

    pub(crate) fn heal(&self) {
        self.state.lock().unwrap().fail_after.clear();
    }

    pub(crate) fn calls(&self, operation: &'static str) -> usize {
        self.state.lock().unwrap().calls.get(operation).copied().unwrap_or(0)
    }

    pub(crate) fn stored(&self, script_id: ScriptId) -> Vec<MessageRecord> {
        let state = self.state.lock().unwrap();
        let mut messages = state
            .messages
            .iter()
            .filter(|message| message.script_id == script_id)
            .cloned()
            .collect::<Vec<_>>();
        messages.sort_by(|left, right| left.order.cmp(&right.order).then(left.id.cmp(&right.id)));
        messages
    }
}

impl ScriptStore for MemoryStore {
    fn create_script(&self, input: NewScript) -> StorageResult<ScriptRecord> {
        let mut state = self.state.lock().unwrap();
        state.enter("create_script")?;
        let name = input.name.trim();
        let record = ScriptRecord {
            id: ScriptId::new_v7(),
            name: if name.is_empty() {
                DEFAULT_SCRIPT_NAME.to_string()
            } else {
                name.to_string()
            },
            description: input.description,
            created_at_unix_seconds: 0,
            updated_at_unix_seconds: 0,
        };
        state.scripts.push(record.clone());
        Ok(record)
    }

    fn list_scripts(&self) -> StorageResult<Vec<ScriptRecord>> {
        let mut state = self.state.lock().unwrap();
        state.enter("list_scripts")?;
        Ok(state.scripts.clone())
    }

    fn get_script(&self, script_id: ScriptId) -> StorageResult<Option<ScriptRecord>> {
        let mut state = self.state.lock().unwrap();
        state.enter("get_script")?;
        Ok(state.scripts.iter().find(|script| script.id == script_id).cloned())
    }

    fn update_script(
        &self,
        script_id: ScriptId,
        patch: ScriptPatch,
    ) -> StorageResult<ScriptRecord> {
        let mut state = self.state.lock().unwrap();
        state.enter("update_script")?;
        let script = state
            .scripts
            .iter_mut()
            .find(|script| script.id == script_id)
            .ok_or_else(|| StorageError::NotFound {
                stage: "memory-update-script",
                entity: "script",
                id: script_id.to_string(),
            })?;
        if let Some(name) = patch.name {
            script.name = name;
        }
        if let Some(description) = patch.description {
            script.description = description;
        }
        Ok(script.clone())
    }

    fn delete_script(&self, script_id: ScriptId) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.enter("delete_script")?;
        state.scripts.retain(|script| script.id != script_id);
        state.messages.retain(|message| message.script_id != script_id);
        Ok(())
    }
}

impl MessageStore for MemoryStore {
    fn list_messages_by_script(&self, script_id: ScriptId) -> StorageResult<Vec<MessageRecord>> {
        self.state.lock().unwrap().enter("list_messages")?;
        Ok(self.stored(script_id))
    }

    fn get_message(&self, message_id: MessageId) -> StorageResult<Option<MessageRecord>> {
        let mut state = self.state.lock().unwrap();
        state.enter("get_message")?;
        Ok(state.messages.iter().find(|message| message.id == message_id).cloned())
    }

    fn create_message(
        &self,
        script_id: ScriptId,
        input: NewMessage,
    ) -> StorageResult<MessageRecord> {
        let mut state = self.state.lock().unwrap();
        state.enter("create_message")?;
        if !state.script_exists(script_id) {
            return Err(StorageError::NotFound {
                stage: "memory-create-message",
                entity: "script",
                id: script_id.to_string(),
            });
        }
        if input.title.trim().is_empty() {
            return Err(StorageError::Conflict {
                stage: "memory-create-message",
                entity: "message",
                details: "title is required".to_string(),
            });
        }
        if let Some(parent_id) = input.parent_message_id
            && !state
                .messages
                .iter()
                .any(|message| message.id == parent_id && message.script_id == script_id)
        {
            return Err(StorageError::Conflict {
                stage: "memory-create-message",
                entity: "message",
                details: "parent is not part of the same script".to_string(),
            });
        }

        let order = input.order.unwrap_or_else(|| state.next_order(script_id));
        let record = MessageRecord {
            id: MessageId::new_v7(),
            script_id,
            title: input.title.trim().to_string(),
            content: input.content,
            kind: input.kind,
            image_url: input.image_url,
            condition: input.condition,
            parent_message_id: input.parent_message_id,
            order,
            position_x: input.position_x,
            position_y: input.position_y,
        };
        state.messages.push(record.clone());
        Ok(record)
    }

    fn update_message(
        &self,
        message_id: MessageId,
        patch: MessagePatch,
    ) -> StorageResult<MessageRecord> {
        let mut state = self.state.lock().unwrap();
        state.enter("update_message")?;
        let index = state.message_index(message_id, "memory-update-message")?;
        let mut record = state.messages[index].clone();
        patch.apply_to(&mut record);
        if let Some(Some(parent_id)) = patch.parent_message_id {
            state.ensure_parent_assignable(&record, parent_id)?;
        }
        state.messages[index] = record.clone();
        Ok(record)
    }

    fn delete_message(&self, message_id: MessageId) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.enter("delete_message")?;
        let index = state.message_index(message_id, "memory-delete-message")?;
        state.messages.remove(index);
        Ok(())
    }

    fn duplicate_message(&self, message_id: MessageId) -> StorageResult<MessageRecord> {
        let mut state = self.state.lock().unwrap();
        state.enter("duplicate_message")?;
        let index = state.message_index(message_id, "memory-duplicate-message")?;
        let source = state.messages[index].clone();
        let copy = MessageRecord {
            id: MessageId::new_v7(),
            order: state.next_order(source.script_id),
            position_x: source.position_x + DUPLICATE_OFFSET,
            position_y: source.position_y + DUPLICATE_OFFSET,
            ..source
        };
        state.messages.push(copy.clone());
        Ok(copy)
    }

    fn batch_update_positions(
        &self,
        script_id: ScriptId,
        updates: &[PositionUpdate],
    ) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.enter("batch_positions")?;
        let mut next = state.messages.clone();
        for update in updates {
            let record = next
                .iter_mut()
                .find(|message| message.id == update.id && message.script_id == script_id)
                .ok_or_else(|| StorageError::NotFound {
                    stage: "memory-batch-positions",
                    entity: "message",
                    id: update.id.to_string(),
                })?;
            record.position_x = update.position_x;
            record.position_y = update.position_y;
        }
        state.messages = next;
        Ok(())
    }

    fn batch_update_order(
        &self,
        script_id: ScriptId,
        updates: &[OrderUpdate],
    ) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.enter("batch_order")?;
        let mut seen = HashSet::new();
        if updates.iter().any(|update| !seen.insert(update.order)) {
            return Err(StorageError::Conflict {
                stage: "memory-batch-order",
                entity: "message",
                details: "duplicate order".to_string(),
            });
        }
        let mut next = state.messages.clone();
        for update in updates {
            let record = next
                .iter_mut()
                .find(|message| message.id == update.id && message.script_id == script_id)
                .ok_or_else(|| StorageError::NotFound {
                    stage: "memory-batch-order",
                    entity: "message",
                    id: update.id.to_string(),
                })?;
            record.order = update.order;
        }
        state.messages = next;
        Ok(())
    }
}
