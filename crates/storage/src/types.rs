use super::ids::{MessageId, ScriptId};

/// Name used when a script is created or renamed with a blank name.
pub const DEFAULT_SCRIPT_NAME: &str = "Untitled Script";

/// Step kind of one script message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Conditional,
}

impl MessageKind {
    pub const ALL: [Self; 3] = [Self::Text, Self::Image, Self::Conditional];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Conditional => "conditional",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "conditional" => Some(Self::Conditional),
            _ => None,
        }
    }
}

/// Recipient-response category that gates a conditional message.
///
/// An empty condition is modelled as `None` on the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCondition {
    AfterPositiveResponse,
    AfterNegativeResponse,
    AfterNoResponse,
    Custom,
}

impl MessageCondition {
    pub const ALL: [Self; 4] = [
        Self::AfterPositiveResponse,
        Self::AfterNegativeResponse,
        Self::AfterNoResponse,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AfterPositiveResponse => "after_positive_response",
            Self::AfterNegativeResponse => "after_negative_response",
            Self::AfterNoResponse => "after_no_response",
            Self::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "after_positive_response" => Some(Self::AfterPositiveResponse),
            "after_negative_response" => Some(Self::AfterNegativeResponse),
            "after_no_response" => Some(Self::AfterNoResponse),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Parses an optional condition where blank text means "no condition".
    pub fn parse_optional(raw: &str) -> Option<Option<Self>> {
        if raw.trim().is_empty() {
            return Some(None);
        }
        Self::parse(raw).map(Some)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AfterPositiveResponse => "After positive response",
            Self::AfterNegativeResponse => "After negative response",
            Self::AfterNoResponse => "After no response",
            Self::Custom => "Custom condition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRecord {
    pub id: ScriptId,
    pub name: String,
    pub description: Option<String>,
    pub created_at_unix_seconds: u64,
    pub updated_at_unix_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScript {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub script_id: ScriptId,
    pub title: String,
    pub content: Option<String>,
    pub kind: MessageKind,
    pub image_url: Option<String>,
    pub condition: Option<MessageCondition>,
    pub parent_message_id: Option<MessageId>,
    pub order: u32,
    pub position_x: f64,
    pub position_y: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewMessage {
    pub title: String,
    pub content: Option<String>,
    pub kind: MessageKind,
    pub image_url: Option<String>,
    pub condition: Option<MessageCondition>,
    pub parent_message_id: Option<MessageId>,
    /// Appended after the current last message when unset.
    pub order: Option<u32>,
    pub position_x: f64,
    pub position_y: f64,
}

/// Field-level edit. Outer `None` keeps the stored value; nullable columns use
/// `Some(None)` to clear.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessagePatch {
    pub title: Option<String>,
    pub content: Option<Option<String>>,
    pub kind: Option<MessageKind>,
    pub image_url: Option<Option<String>>,
    pub condition: Option<Option<MessageCondition>>,
    pub parent_message_id: Option<Option<MessageId>>,
    pub order: Option<u32>,
    pub position_x: Option<f64>,
    pub position_y: Option<f64>,
}

impl MessagePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the patch to an in-memory record without touching identity fields.
    pub fn apply_to(&self, record: &mut MessageRecord) {
        if let Some(title) = &self.title {
            record.title = title.clone();
        }
        if let Some(content) = &self.content {
            record.content = content.clone();
        }
        if let Some(kind) = self.kind {
            record.kind = kind;
        }
        if let Some(image_url) = &self.image_url {
            record.image_url = image_url.clone();
        }
        if let Some(condition) = self.condition {
            record.condition = condition;
        }
        if let Some(parent_message_id) = self.parent_message_id {
            record.parent_message_id = parent_message_id;
        }
        if let Some(order) = self.order {
            record.order = order;
        }
        if let Some(position_x) = self.position_x {
            record.position_x = position_x;
        }
        if let Some(position_y) = self.position_y {
            record.position_y = position_y;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    pub id: MessageId,
    pub position_x: f64,
    pub position_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderUpdate {
    pub id: MessageId,
    pub order: u32,
}
