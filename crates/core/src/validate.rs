//! Input validation for message drafts and edits.
//!
//! Everything here runs before the store is touched; a rejected draft leaves
//! both the in-memory snapshot and the store unchanged.

use scriptflow_storage::{
    MessageCondition, MessageId, MessageKind, MessagePatch, MessageRecord, NewMessage,
};

use crate::error::{FlowResult, ValidationSnafu};

/// Fields a user fills in when creating a message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageDraft {
    pub title: String,
    pub content: Option<String>,
    pub kind: MessageKind,
    pub image_url: Option<String>,
    pub condition: Option<MessageCondition>,
}

impl MessageDraft {
    pub fn text(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn image(title: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            kind: MessageKind::Image,
            image_url: Some(image_url.into()),
            ..Self::default()
        }
    }

    pub fn conditional(
        title: impl Into<String>,
        content: impl Into<String>,
        condition: MessageCondition,
    ) -> Self {
        Self {
            title: title.into(),
            content: Some(content.into()),
            kind: MessageKind::Conditional,
            condition: Some(condition),
            ..Self::default()
        }
    }

    pub(crate) fn into_new_message(
        self,
        parent_message_id: Option<MessageId>,
        order: u32,
        position: (f64, f64),
    ) -> FlowResult<NewMessage> {
        let title = required_title(&self.title, "draft-validate-title")?;

        Ok(NewMessage {
            title,
            content: normalize_optional(self.content),
            kind: self.kind,
            image_url: if self.kind == MessageKind::Image {
                normalize_optional(self.image_url)
            } else {
                None
            },
            condition: if self.kind == MessageKind::Conditional {
                self.condition
            } else {
                None
            },
            parent_message_id,
            order: Some(order),
            position_x: position.0,
            position_y: position.1,
        })
    }
}

/// Field edits on an existing message. `None` keeps the current value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageEdit {
    pub title: Option<String>,
    pub content: Option<Option<String>>,
    pub kind: Option<MessageKind>,
    pub image_url: Option<Option<String>>,
    pub condition: Option<Option<MessageCondition>>,
    pub parent_message_id: Option<Option<MessageId>>,
}

impl MessageEdit {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Builds the store patch for `current`, dropping fields that the resulting
    /// kind does not use.
    pub(crate) fn to_patch(&self, current: &MessageRecord) -> FlowResult<MessagePatch> {
        let title = self
            .title
            .as_deref()
            .map(|title| required_title(title, "edit-validate-title"))
            .transpose()?;
        let kind = self.kind.unwrap_or(current.kind);

        let image_url = if kind == MessageKind::Image {
            self.image_url.clone().map(normalize_optional)
        } else if current.image_url.is_some() || self.image_url.is_some() {
            Some(None)
        } else {
            None
        };

        let condition = if kind == MessageKind::Conditional {
            self.condition
        } else if current.condition.is_some() || self.condition.is_some() {
            Some(None)
        } else {
            None
        };

        Ok(MessagePatch {
            title,
            content: self.content.clone().map(normalize_optional),
            kind: self.kind,
            image_url,
            condition,
            parent_message_id: self.parent_message_id,
            ..MessagePatch::default()
        })
    }
}

pub(crate) fn required_title(raw: &str, stage: &'static str) -> FlowResult<String> {
    let title = raw.trim();
    if title.is_empty() {
        return ValidationSnafu {
            stage,
            field: "title",
            details: "a message title is required".to_string(),
        }
        .fail();
    }

    Ok(title.to_string())
}

pub(crate) fn normalize_optional(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
