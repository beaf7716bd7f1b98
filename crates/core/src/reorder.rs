use scriptflow_storage::{MessageRecord, OrderUpdate};

use crate::error::{FlowResult, IndexOutOfRangeSnafu};

/// Moves the element at `from` to `to` and renumbers every `order` to its
/// 1-based position.
///
/// `messages` must already be in list order. The input is left untouched so a
/// caller can keep it as the rollback snapshot.
pub fn reorder(
    messages: &[MessageRecord],
    from: usize,
    to: usize,
) -> FlowResult<Vec<MessageRecord>> {
    let len = messages.len();
    if from >= len {
        return IndexOutOfRangeSnafu {
            stage: "reorder-source-index",
            index: from,
            len,
        }
        .fail();
    }
    if to >= len {
        return IndexOutOfRangeSnafu {
            stage: "reorder-destination-index",
            index: to,
            len,
        }
        .fail();
    }

    let mut reordered = messages.to_vec();
    let moved = reordered.remove(from);
    reordered.insert(to, moved);
    renumber(&mut reordered);
    Ok(reordered)
}

/// Sorts by `(order, id)` and renumbers to a contiguous `1..=N`.
pub fn normalize(messages: &mut [MessageRecord]) {
    messages.sort_by(|left, right| {
        left.order
            .cmp(&right.order)
            .then_with(|| left.id.cmp(&right.id))
    });
    renumber(messages);
}

pub(crate) fn renumber(messages: &mut [MessageRecord]) {
    for (index, message) in messages.iter_mut().enumerate() {
        message.order = index as u32 + 1;
    }
}

/// Full `{id, order}` set for one batch write.
pub fn order_updates(messages: &[MessageRecord]) -> Vec<OrderUpdate> {
    messages
        .iter()
        .map(|message| OrderUpdate {
            id: message.id,
            order: message.order,
        })
        .collect()
}

pub(crate) fn orders_changed(before: &[MessageRecord], after: &[MessageRecord]) -> bool {
    before.len() != after.len()
        || before
            .iter()
            .zip(after)
            .any(|(left, right)| left.id != right.id || left.order != right.order)
}
