use scriptflow_storage::{MessageId, ScriptId, StorageError};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FlowError {
    #[snafu(display("invalid {field} on `{stage}`: {details}"))]
    Validation {
        stage: &'static str,
        field: &'static str,
        details: String,
    },
    #[snafu(display("message '{id}' is not part of the loaded script"))]
    UnknownMessage { stage: &'static str, id: MessageId },
    #[snafu(display("no script is loaded (`{stage}`)"))]
    NotLoaded { stage: &'static str },
    #[snafu(display("script '{id}' was not found"))]
    ScriptNotFound { stage: &'static str, id: ScriptId },
    #[snafu(display("index {index} is out of range for {len} messages"))]
    IndexOutOfRange {
        stage: &'static str,
        index: usize,
        len: usize,
    },
    #[snafu(display("making '{parent_id}' the parent of '{message_id}' would create a cycle"))]
    CycleRejected {
        stage: &'static str,
        message_id: MessageId,
        parent_id: MessageId,
    },
    #[snafu(display("message store call failed at {stage}: {source}"))]
    Store {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("import document is not valid JSON: {source}"))]
    ImportParse {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("import document rejected on `{stage}`: {details}"))]
    ImportFormat {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to serialize export document: {source}"))]
    ExportSerialize {
        stage: &'static str,
        source: serde_json::Error,
    },
}

impl FlowError {
    /// True for errors raised before any store call was attempted.
    pub fn is_recoverable_input(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::NotLoaded { .. }
                | Self::UnknownMessage { .. }
                | Self::IndexOutOfRange { .. }
                | Self::CycleRejected { .. }
                | Self::ImportParse { .. }
                | Self::ImportFormat { .. }
        )
    }
}

pub type FlowResult<T> = Result<T, FlowError>;
