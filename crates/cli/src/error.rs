use std::path::PathBuf;

use scriptflow_core::FlowError;
use scriptflow_storage::StorageError;
use snafu::Snafu;

use crate::settings::SettingsError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("{source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to initialize runtime on `{stage}`: {source}"))]
    RuntimeInit {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to open database '{database_path}': {source}"))]
    OpenStorage {
        stage: &'static str,
        database_path: String,
        source: StorageError,
    },
    #[snafu(display("storage call failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("{source}"))]
    Flow {
        stage: &'static str,
        source: FlowError,
    },
    #[snafu(display("invalid argument: {details}"))]
    InvalidArgument {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to read {path:?}: {source}"))]
    ReadFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write {path:?}: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type CliResult<T> = Result<T, CliError>;
