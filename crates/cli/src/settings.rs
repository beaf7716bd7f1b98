use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use scriptflow_core::{DeletePolicy, FlowOptions, ViewMode};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "scriptflow";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "scriptflow.db";
pub const ENV_PREFIX: &str = "SCRIPTFLOW_";
pub const DEFAULT_LOG_FILTER: &str = "warn,scriptflow=info,scriptflow_core=info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliSettings {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub default_view: ViewMode,
    #[serde(default)]
    pub delete_policy: DeletePolicy,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            default_view: ViewMode::default(),
            delete_policy: DeletePolicy::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl CliSettings {
    pub fn normalized(mut self) -> Self {
        self.database_path = if self.database_path.trim().is_empty() {
            default_database_path()
        } else {
            self.database_path.trim().to_string()
        };
        self.log_filter = if self.log_filter.trim().is_empty() {
            default_log_filter()
        } else {
            self.log_filter.trim().to_string()
        };
        self
    }

    pub fn flow_options(&self) -> FlowOptions {
        FlowOptions {
            default_view: self.default_view,
            delete_policy: self.delete_policy,
        }
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<CliSettings>>,
    config_path: PathBuf,
    load_warning: Option<String>,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".scriptflow"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let (settings, load_warning) = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
            load_warning,
        }
    }

    pub fn load(config_path: Option<PathBuf>) -> Self {
        Self::new(config_path.unwrap_or_else(Self::default_config_path))
    }

    pub fn settings(&self) -> Arc<CliSettings> {
        self.settings.load_full()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Why the file on disk was ignored, if it was. Logged once tracing is up.
    pub fn load_warning(&self) -> Option<&str> {
        self.load_warning.as_deref()
    }

    /// Overrides the database location for this process only.
    pub fn override_database_path(&self, database_path: String) {
        let mut settings = (*self.settings()).clone();
        settings.database_path = database_path;
        self.settings.store(Arc::new(settings.normalized()));
    }

    pub fn update(&self, settings: CliSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> (CliSettings, Option<String>) {
        let mut figment = Figment::from(Serialized::defaults(CliSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<CliSettings>() {
            Ok(settings) => (settings.normalized(), None),
            Err(error) => (
                CliSettings::default(),
                Some(format!(
                    "failed to parse settings from {}: {error}. using defaults",
                    path.display()
                )),
            ),
        }
    }

    fn persist(&self, settings: &CliSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".scriptflow"))
        .join(DATABASE_FILE_NAME)
        .to_string_lossy()
        .into_owned()
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}
