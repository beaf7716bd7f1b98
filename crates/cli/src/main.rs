use std::process::ExitCode;

use clap::Parser;
use scriptflow::cli::Cli;
use scriptflow::settings::SettingsStore;
use scriptflow::{commands, logging};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = SettingsStore::load(cli.config.clone());
    if let Some(database_path) = cli.database.clone() {
        settings.override_database_path(database_path);
    }

    logging::init(&settings.settings().log_filter);
    if let Some(warning) = settings.load_warning() {
        tracing::warn!(path = %settings.config_path().display(), "{warning}");
    }

    match commands::run(cli.command, &settings) {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::debug!(?error, "command failed");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
