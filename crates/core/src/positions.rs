//! Canvas positions moved in memory but not yet written to the store.

use std::collections::{HashMap, HashSet};

use scriptflow_storage::{MessageId, MessageRecord, PositionUpdate};

use crate::graph::CanvasPoint;

/// Tracks the last persisted position of every node plus the set of nodes
/// dragged since. Positions only reach the store on an explicit save.
#[derive(Debug, Clone, Default)]
pub struct PositionBuffer {
    persisted: HashMap<MessageId, CanvasPoint>,
    dirty: HashMap<MessageId, CanvasPoint>,
}

impl PositionBuffer {
    pub fn from_messages(messages: &[MessageRecord]) -> Self {
        let mut buffer = Self::default();
        buffer.sync(messages);
        buffer
    }

    /// Takes positions of clean nodes as persisted and forgets nodes that are
    /// no longer present. Dirty nodes keep their pending position.
    pub fn sync(&mut self, messages: &[MessageRecord]) {
        let present = messages
            .iter()
            .map(|message| message.id)
            .collect::<HashSet<_>>();
        self.persisted.retain(|id, _| present.contains(id));
        self.dirty.retain(|id, _| present.contains(id));

        for message in messages {
            if !self.dirty.contains_key(&message.id) {
                self.persisted.insert(message.id, point_of(message));
            }
        }
    }

    pub fn move_node(&mut self, id: MessageId, point: CanvasPoint) {
        if self.persisted.get(&id) == Some(&point) {
            self.dirty.remove(&id);
        } else {
            self.dirty.insert(id, point);
        }
    }

    /// Writes pending positions onto freshly loaded records.
    pub fn overlay(&self, messages: &mut [MessageRecord]) {
        for message in messages {
            if let Some(point) = self.dirty.get(&message.id) {
                message.position_x = point.x;
                message.position_y = point.y;
            }
        }
    }

    /// One update per rendered node, pending positions included.
    pub fn collect(&self, messages: &[MessageRecord]) -> Vec<PositionUpdate> {
        messages
            .iter()
            .map(|message| {
                let point = self
                    .dirty
                    .get(&message.id)
                    .copied()
                    .unwrap_or_else(|| point_of(message));
                PositionUpdate {
                    id: message.id,
                    position_x: point.x,
                    position_y: point.y,
                }
            })
            .collect()
    }

    pub fn mark_saved(&mut self, updates: &[PositionUpdate]) {
        for update in updates {
            self.dirty.remove(&update.id);
            self.persisted.insert(
                update.id,
                CanvasPoint {
                    x: update.position_x,
                    y: update.position_y,
                },
            );
        }
    }

    /// Restores the persisted position of every dirty node.
    pub fn discard(&mut self, messages: &mut [MessageRecord]) {
        for message in messages {
            if self.dirty.remove(&message.id).is_some()
                && let Some(point) = self.persisted.get(&message.id)
            {
                message.position_x = point.x;
                message.position_y = point.y;
            }
        }
        self.dirty.clear();
    }

    pub fn has_unsaved(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn unsaved_len(&self) -> usize {
        self.dirty.len()
    }

    pub fn is_dirty(&self, id: MessageId) -> bool {
        self.dirty.contains_key(&id)
    }
}

fn point_of(message: &MessageRecord) -> CanvasPoint {
    CanvasPoint {
        x: message.position_x,
        y: message.position_y,
    }
}
