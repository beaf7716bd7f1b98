pub mod error;
pub mod ids;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{MessageId, ScriptId};
pub use sqlite::SqliteStorage;
pub use types::{
    DEFAULT_SCRIPT_NAME, MessageCondition, MessageKind, MessagePatch, MessageRecord, NewMessage,
    NewScript, OrderUpdate, PositionUpdate, ScriptPatch, ScriptRecord,
};

pub trait ScriptStore: Send + Sync {
    fn create_script(&self, input: NewScript) -> StorageResult<ScriptRecord>;
    fn list_scripts(&self) -> StorageResult<Vec<ScriptRecord>>;
    fn get_script(&self, script_id: ScriptId) -> StorageResult<Option<ScriptRecord>>;
    fn update_script(&self, script_id: ScriptId, patch: ScriptPatch)
    -> StorageResult<ScriptRecord>;
    /// Removes the script together with all of its messages.
    fn delete_script(&self, script_id: ScriptId) -> StorageResult<()>;
}

pub trait MessageStore: Send + Sync {
    fn list_messages_by_script(&self, script_id: ScriptId) -> StorageResult<Vec<MessageRecord>>;
    fn get_message(&self, message_id: MessageId) -> StorageResult<Option<MessageRecord>>;
    fn create_message(
        &self,
        script_id: ScriptId,
        input: NewMessage,
    ) -> StorageResult<MessageRecord>;
    fn update_message(
        &self,
        message_id: MessageId,
        patch: MessagePatch,
    ) -> StorageResult<MessageRecord>;
    /// Deletes one message. Children keep their `parent_message_id`.
    fn delete_message(&self, message_id: MessageId) -> StorageResult<()>;
    /// Clones a message under a new id, appended after the last message.
    /// The parent reference is copied as-is.
    fn duplicate_message(&self, message_id: MessageId) -> StorageResult<MessageRecord>;
    fn batch_update_positions(
        &self,
        script_id: ScriptId,
        updates: &[PositionUpdate],
    ) -> StorageResult<()>;
    fn batch_update_order(&self, script_id: ScriptId, updates: &[OrderUpdate])
    -> StorageResult<()>;
}

/// Both store halves; the bound the flow layer is generic over.
pub trait Storage: ScriptStore + MessageStore {}

impl<T> Storage for T where T: ScriptStore + MessageStore + ?Sized {}
