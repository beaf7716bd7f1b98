use std::collections::{HashMap, HashSet};

use scriptflow_storage::{MessageId, MessageRecord};

/// Linear order of one script: ids sorted by `(order, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequenceIndex {
    ids: Vec<MessageId>,
    positions: HashMap<MessageId, usize>,
}

impl SequenceIndex {
    pub fn build(messages: &[MessageRecord]) -> Self {
        let mut keyed = messages
            .iter()
            .map(|message| (message.order, message.id))
            .collect::<Vec<_>>();
        keyed.sort();

        let ids = keyed.into_iter().map(|(_, id)| id).collect::<Vec<_>>();
        let positions = ids
            .iter()
            .enumerate()
            .map(|(index, id)| (*id, index))
            .collect();

        Self { ids, positions }
    }

    pub fn ids(&self) -> &[MessageId] {
        &self.ids
    }

    pub fn position_of(&self, id: MessageId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn last(&self) -> Option<MessageId> {
        self.ids.last().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Parent/child structure of one script, built from `parent_message_id`.
///
/// A parent id that does not name a message in the set is dangling: the child
/// is treated as a root and the pair is kept in [`AdjacencyIndex::dangling`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdjacencyIndex {
    input_order: Vec<MessageId>,
    live_parents: HashMap<MessageId, MessageId>,
    children: HashMap<MessageId, Vec<MessageId>>,
    roots: Vec<MessageId>,
    dangling: Vec<(MessageId, MessageId)>,
}

impl AdjacencyIndex {
    pub fn build(messages: &[MessageRecord]) -> Self {
        let known = messages
            .iter()
            .map(|message| message.id)
            .collect::<HashSet<_>>();
        let mut index = Self {
            input_order: Vec::with_capacity(messages.len()),
            ..Self::default()
        };

        for message in messages {
            index.input_order.push(message.id);
            match message.parent_message_id {
                Some(parent_id) if known.contains(&parent_id) => {
                    index.live_parents.insert(message.id, parent_id);
                    index
                        .children
                        .entry(parent_id)
                        .or_default()
                        .push(message.id);
                }
                Some(parent_id) => {
                    index.dangling.push((message.id, parent_id));
                    index.roots.push(message.id);
                }
                None => index.roots.push(message.id),
            }
        }

        index
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.input_order.contains(&id)
    }

    /// Parent that exists in the set; dangling parents yield `None`.
    pub fn parent_of(&self, id: MessageId) -> Option<MessageId> {
        self.live_parents.get(&id).copied()
    }

    pub fn children_of(&self, id: MessageId) -> &[MessageId] {
        self.children.get(&id).map_or(&[], Vec::as_slice)
    }

    pub fn roots(&self) -> &[MessageId] {
        &self.roots
    }

    /// `(child, missing parent)` pairs.
    pub fn dangling(&self) -> &[(MessageId, MessageId)] {
        &self.dangling
    }

    /// Live ancestors from nearest to farthest. Stops when a cycle closes.
    pub fn ancestors(&self, id: MessageId) -> Vec<MessageId> {
        let mut seen = HashSet::from([id]);
        let mut chain = Vec::new();
        let mut current = id;

        while let Some(parent_id) = self.parent_of(current) {
            if !seen.insert(parent_id) {
                break;
            }
            chain.push(parent_id);
            current = parent_id;
        }

        chain
    }

    pub fn would_create_cycle(&self, message_id: MessageId, parent_id: MessageId) -> bool {
        message_id == parent_id || self.ancestors(parent_id).contains(&message_id)
    }

    /// Messages that sit on a parent cycle, in input order.
    pub fn cycle_members(&self) -> Vec<MessageId> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Visit {
            OnPath,
            Done,
        }

        let mut visits: HashMap<MessageId, Visit> = HashMap::with_capacity(self.input_order.len());
        let mut members = HashSet::new();

        for start in &self.input_order {
            let mut path = Vec::new();
            let mut current = Some(*start);

            while let Some(id) = current {
                match visits.get(&id) {
                    Some(Visit::Done) => break,
                    Some(Visit::OnPath) => {
                        if let Some(cycle_start) = path.iter().position(|entry| *entry == id) {
                            members.extend(path[cycle_start..].iter().copied());
                        }
                        break;
                    }
                    None => {
                        visits.insert(id, Visit::OnPath);
                        path.push(id);
                        current = self.parent_of(id);
                    }
                }
            }

            for id in path {
                visits.insert(id, Visit::Done);
            }
        }

        self.input_order
            .iter()
            .filter(|id| members.contains(*id))
            .copied()
            .collect()
    }
}
