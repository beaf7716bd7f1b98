use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use scriptflow_core::{
    FlowOptions, ImportPlan, ImportReport, ImportWarning, MessageDraft, MessageEdit, Placement,
    ScriptFlow, ViewMode, export_script, import_as_new_script, import_into_script,
    parse_document, placeholders, render,
};
use scriptflow_storage::{
    MessageId, MessageRecord, MessageStore, NewScript, ScriptId, ScriptPatch, ScriptRecord,
    ScriptStore, SqliteStorage,
};
use snafu::{OptionExt, ResultExt};

use crate::cli::{Command, ConfigCommand, MessageCommand, ScriptCommand};
use crate::error::{
    CliResult, FlowSnafu, InvalidArgumentSnafu, OpenStorageSnafu, ReadFileSnafu, RuntimeInitSnafu,
    SettingsSnafu, StorageSnafu, WriteFileSnafu,
};
use crate::render::{list_view, map_view, script_line, script_summary};
use crate::settings::SettingsStore;

/// Migrated database plus the flow options every command uses.
pub struct AppContext {
    storage: Arc<SqliteStorage>,
    options: FlowOptions,
}

impl AppContext {
    pub fn open(database_path: &str, options: FlowOptions) -> CliResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context(RuntimeInitSnafu {
                stage: "cli-open-runtime",
            })?;
        let storage = runtime
            .block_on(SqliteStorage::open(database_path))
            .context(OpenStorageSnafu {
                stage: "cli-open-storage",
                database_path: database_path.to_string(),
            })?;
        tracing::debug!(database_url = storage.database_url(), "opened script database");

        Ok(Self {
            storage: Arc::new(storage),
            options,
        })
    }

    fn flow(&self, script_id: ScriptId) -> CliResult<ScriptFlow<SqliteStorage>> {
        let mut flow = ScriptFlow::new(Arc::clone(&self.storage), self.options);
        flow.load(script_id).context(FlowSnafu {
            stage: "cli-load-script",
        })?;
        Ok(flow)
    }
}

/// Runs one command and returns what goes to stdout.
pub fn run(command: Command, settings: &SettingsStore) -> CliResult<String> {
    if let Command::Config(config) = command {
        return run_config(config, settings);
    }

    let current = settings.settings();
    let context = AppContext::open(&current.database_path, current.flow_options())?;
    execute(command, &context)
}

fn run_config(command: ConfigCommand, settings: &SettingsStore) -> CliResult<String> {
    match command {
        ConfigCommand::Show => {
            let current = settings.settings();
            Ok(format!(
                "database_path = {}\ndefault_view  = {}\n\
                 delete_policy = {}\nlog_filter    = {}\n",
                current.database_path,
                current.default_view.as_str(),
                current.delete_policy.as_str(),
                current.log_filter
            ))
        }
        ConfigCommand::Path => Ok(format!("{}\n", settings.config_path().display())),
        ConfigCommand::Init => {
            settings
                .update((*settings.settings()).clone())
                .context(SettingsSnafu {
                    stage: "cli-config-init",
                })?;
            Ok(format!("wrote {}\n", settings.config_path().display()))
        }
    }
}

pub fn execute(command: Command, context: &AppContext) -> CliResult<String> {
    let store = context.storage.as_ref();
    match command {
        Command::Script(command) => run_script(command, context),
        Command::Msg(command) => run_message(command, context),
        Command::Reorder { script, from, to } => {
            let script = resolve_script(store, &script)?;
            let (from, to) = (list_index(from, "from")?, list_index(to, "to")?);
            let mut flow = context.flow(script.id)?;
            let snapshot = flow.reorder(from, to).context(FlowSnafu {
                stage: "cli-reorder",
            })?;
            Ok(list_view(&snapshot))
        }
        Command::Move { message, x, y } => {
            let message = resolve_message(store, &message)?;
            let mut flow = context.flow(message.script_id)?;
            flow.move_node(message.id, x, y).context(FlowSnafu {
                stage: "cli-move-node",
            })?;
            let saved = flow.save_positions().context(FlowSnafu {
                stage: "cli-move-save",
            })?;
            Ok(format!("moved '{}' to ({x}, {y}); saved {saved} positions\n", message.title))
        }
        Command::Layout { script } => {
            let script = resolve_script(store, &script)?;
            let mut flow = context.flow(script.id)?;
            flow.apply_auto_layout().context(FlowSnafu {
                stage: "cli-layout",
            })?;
            flow.save_positions().context(FlowSnafu {
                stage: "cli-layout-save",
            })?;
            Ok(map_view(flow.snapshot().map_view()))
        }
        Command::List { script } => show_view(context, &script, ViewMode::List),
        Command::Map { script } => show_view(context, &script, ViewMode::Map),
        Command::Export { script, output } => {
            let script = resolve_script(store, &script)?;
            let document = export_script(store, script.id).context(FlowSnafu {
                stage: "cli-export",
            })?;
            let json = document.to_json_pretty().context(FlowSnafu {
                stage: "cli-export-serialize",
            })?;
            match output {
                Some(path) => {
                    std::fs::write(&path, format!("{json}\n")).context(WriteFileSnafu {
                        stage: "cli-export-write",
                        path: path.clone(),
                    })?;
                    Ok(format!(
                        "exported {} messages to {}\n",
                        document.messages.len(),
                        path.display()
                    ))
                }
                None => Ok(format!("{json}\n")),
            }
        }
        Command::Import {
            file,
            into,
            dry_run,
        } => run_import(store, &file, into.as_deref(), dry_run),
        Command::Render { message, values } => {
            let message = resolve_message(store, &message)?;
            let content = message.content.unwrap_or_default();
            let values = values.into_iter().collect::<HashMap<_, _>>();
            let unresolved = placeholders(&content)
                .into_iter()
                .filter(|name| !values.contains_key(name))
                .collect::<Vec<_>>();
            if !unresolved.is_empty() {
                tracing::warn!(
                    placeholders = %unresolved.join(", "),
                    "placeholders left unresolved"
                );
            }
            Ok(format!("{}\n", render(&content, &values)))
        }
        Command::Config(_) => InvalidArgumentSnafu {
            stage: "cli-execute",
            details: "config commands do not use the database".to_string(),
        }
        .fail(),
    }
}

fn run_script(command: ScriptCommand, context: &AppContext) -> CliResult<String> {
    let store = context.storage.as_ref();
    match command {
        ScriptCommand::New { name, description } => {
            let script = store
                .create_script(NewScript { name, description })
                .context(StorageSnafu {
                    stage: "cli-script-new",
                })?;
            tracing::info!(script_id = %script.id, "created script");
            Ok(format!("{}\n", script_line(&script)))
        }
        ScriptCommand::List => {
            let scripts = store.list_scripts().context(StorageSnafu {
                stage: "cli-script-list",
            })?;
            if scripts.is_empty() {
                return Ok("(no scripts)\n".to_string());
            }
            Ok(scripts
                .iter()
                .map(|script| format!("{}\n", script_line(script)))
                .collect())
        }
        ScriptCommand::Show { script } => {
            let script = resolve_script(store, &script)?;
            let flow = context.flow(script.id)?;
            let snapshot = flow.snapshot();
            let view = match snapshot.view {
                ViewMode::List => list_view(&snapshot),
                ViewMode::Map => map_view(snapshot.map_view()),
            };
            Ok(format!("{}\n{view}", script_summary(&script, &snapshot)))
        }
        ScriptCommand::Rename { script, name } => {
            let script = resolve_script(store, &script)?;
            let renamed = store
                .update_script(
                    script.id,
                    ScriptPatch {
                        name: Some(name),
                        ..ScriptPatch::default()
                    },
                )
                .context(StorageSnafu {
                    stage: "cli-script-rename",
                })?;
            Ok(format!("{}\n", script_line(&renamed)))
        }
        ScriptCommand::Delete { script } => {
            let script = resolve_script(store, &script)?;
            store.delete_script(script.id).context(StorageSnafu {
                stage: "cli-script-delete",
            })?;
            tracing::info!(script_id = %script.id, "deleted script");
            Ok(format!("deleted script '{}'\n", script.name))
        }
    }
}

fn run_message(command: MessageCommand, context: &AppContext) -> CliResult<String> {
    let store = context.storage.as_ref();
    match command {
        MessageCommand::Add {
            script,
            title,
            content,
            kind,
            image_url,
            condition,
            parent,
            root,
        } => {
            let script = resolve_script(store, &script)?;
            let placement = match (parent, root) {
                (Some(parent), _) => Placement::ChildOf(parse_message_id(&parent)?),
                (None, true) => Placement::Root,
                (None, false) => Placement::AfterLast,
            };
            let draft = MessageDraft {
                title,
                content,
                kind,
                image_url,
                condition: condition.and_then(|choice| choice.0),
            };

            let mut flow = context.flow(script.id)?;
            let added = flow.add_message(draft, placement).context(FlowSnafu {
                stage: "cli-message-add",
            })?;
            Ok(format!("{}\n", message_line(&added)))
        }
        MessageCommand::Edit {
            message,
            title,
            content,
            kind,
            image_url,
            condition,
            parent,
            detach,
        } => {
            let message = resolve_message(store, &message)?;
            let parent_message_id = match (parent, detach) {
                (Some(parent), _) => Some(Some(parse_message_id(&parent)?)),
                (None, true) => Some(None),
                (None, false) => None,
            };
            let edit = MessageEdit {
                title,
                content: content.map(Some),
                kind,
                image_url: image_url.map(Some),
                condition: condition.map(|choice| choice.0),
                parent_message_id,
            };
            if edit.is_empty() {
                return InvalidArgumentSnafu {
                    stage: "cli-message-edit",
                    details: "nothing to change".to_string(),
                }
                .fail();
            }

            let mut flow = context.flow(message.script_id)?;
            let edited = flow.edit_message(message.id, edit).context(FlowSnafu {
                stage: "cli-message-edit",
            })?;
            Ok(format!("{}\n", message_line(&edited)))
        }
        MessageCommand::Delete { message } => {
            let message = resolve_message(store, &message)?;
            let mut flow = context.flow(message.script_id)?;
            flow.delete_message(message.id).context(FlowSnafu {
                stage: "cli-message-delete",
            })?;
            Ok(format!("deleted '{}'\n", message.title))
        }
        MessageCommand::Duplicate { message } => {
            let message = resolve_message(store, &message)?;
            let mut flow = context.flow(message.script_id)?;
            let copy = flow.duplicate_message(message.id).context(FlowSnafu {
                stage: "cli-message-duplicate",
            })?;
            Ok(format!("{}\n", message_line(&copy)))
        }
    }
}

fn run_import(
    store: &SqliteStorage,
    file: &Path,
    into: Option<&str>,
    dry_run: bool,
) -> CliResult<String> {
    let raw = std::fs::read_to_string(file).context(ReadFileSnafu {
        stage: "cli-import-read",
        path: file.to_path_buf(),
    })?;
    let plan = parse_document(&raw).context(FlowSnafu {
        stage: "cli-import-parse",
    })?;

    if dry_run {
        return Ok(plan_summary(&plan));
    }

    let report = match into {
        Some(script) => {
            let script = resolve_script(store, script)?;
            import_into_script(store, script.id, &plan)
        }
        None => import_as_new_script(store, &plan),
    }
    .context(FlowSnafu {
        stage: "cli-import-apply",
    })?;
    Ok(report_summary(&report))
}

fn plan_summary(plan: &ImportPlan) -> String {
    let headline = format!(
        "{} document '{}' with {} messages is valid",
        plan.source.as_str(),
        plan.name,
        plan.len()
    );
    with_warnings(headline, &plan.warnings)
}

fn report_summary(report: &ImportReport) -> String {
    let headline = format!(
        "imported {} messages from a {} document into {}",
        report.created.len(),
        report.source.as_str(),
        report.script_id
    );
    with_warnings(headline, &report.warnings)
}

fn with_warnings(headline: String, warnings: &[ImportWarning]) -> String {
    let mut out = headline;
    out.push('\n');
    for warning in warnings {
        out.push_str(&format!("warning: {warning}\n"));
    }
    out
}

fn show_view(context: &AppContext, script: &str, view: ViewMode) -> CliResult<String> {
    let script = resolve_script(context.storage.as_ref(), script)?;
    let mut flow = context.flow(script.id)?;
    flow.set_view(view);
    let snapshot = flow.snapshot();
    Ok(match snapshot.view {
        ViewMode::List => list_view(&snapshot),
        ViewMode::Map => map_view(snapshot.map_view()),
    })
}

/// Accepts a script id or an exact (case-insensitive) script name.
fn resolve_script<S>(store: &S, raw: &str) -> CliResult<ScriptRecord>
where
    S: ScriptStore + ?Sized,
{
    if let Ok(script_id) = ScriptId::parse(raw) {
        return store
            .get_script(script_id)
            .context(StorageSnafu {
                stage: "cli-resolve-script-id",
            })?
            .context(InvalidArgumentSnafu {
                stage: "cli-resolve-script-id",
                details: format!("no script with id {script_id}"),
            });
    }

    let wanted = raw.trim().to_lowercase();
    let mut matches = store
        .list_scripts()
        .context(StorageSnafu {
            stage: "cli-resolve-script-name",
        })?
        .into_iter()
        .filter(|script| script.name.to_lowercase() == wanted)
        .collect::<Vec<_>>();

    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => InvalidArgumentSnafu {
            stage: "cli-resolve-script-name",
            details: format!("no script named '{raw}'"),
        }
        .fail(),
        count => InvalidArgumentSnafu {
            stage: "cli-resolve-script-name",
            details: format!("{count} scripts are named '{raw}'; use the id"),
        }
        .fail(),
    }
}

fn resolve_message<S>(store: &S, raw: &str) -> CliResult<MessageRecord>
where
    S: MessageStore + ?Sized,
{
    let message_id = parse_message_id(raw)?;
    store
        .get_message(message_id)
        .context(StorageSnafu {
            stage: "cli-resolve-message",
        })?
        .context(InvalidArgumentSnafu {
            stage: "cli-resolve-message",
            details: format!("no message with id {message_id}"),
        })
}

fn parse_message_id(raw: &str) -> CliResult<MessageId> {
    MessageId::parse(raw).map_err(|error| {
        InvalidArgumentSnafu {
            stage: "cli-parse-message-id",
            details: error.to_string(),
        }
        .build()
    })
}

fn list_index(position: usize, name: &str) -> CliResult<usize> {
    position.checked_sub(1).context(InvalidArgumentSnafu {
        stage: "cli-list-position",
        details: format!("{name} is a 1-based list position"),
    })
}

fn message_line(message: &MessageRecord) -> String {
    format!(
        "{}  #{} [{}] {}",
        message.id,
        message.order,
        message.kind.as_str(),
        message.title
    )
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn run_line(context: &AppContext, args: &[&str]) -> CliResult<String> {
        let cli = Cli::parse_from(std::iter::once("scriptflow").chain(args.iter().copied()));
        execute(cli.command, context)
    }

    fn first_token(line: &str) -> String {
        line.split_whitespace().next().unwrap().to_string()
    }

    #[test]
    fn authoring_session_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join("cli.db");
        let context =
            AppContext::open(database.to_str().unwrap(), FlowOptions::default()).unwrap();

        run_line(&context, &["script", "new", "Outreach"]).unwrap();
        let a = first_token(
            &run_line(
                &context,
                &["msg", "add", "outreach", "--title", "A", "--content", "Oi {{name}}"],
            )
            .unwrap(),
        );
        run_line(&context, &["msg", "add", "Outreach", "--title", "B"]).unwrap();
        run_line(&context, &["msg", "add", "Outreach", "--title", "C", "--root"]).unwrap();

        let reordered = run_line(&context, &["reorder", "Outreach", "3", "1"]).unwrap();
        let order = reordered
            .lines()
            .filter(|line| line.contains(". ["))
            .map(|line| line.rsplit("  ").next().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(order, ["C", "A", "B"]);

        let map = run_line(&context, &["map", "Outreach"]).unwrap();
        assert!(map.contains("└── B [text]"));

        let rendered = run_line(&context, &["render", a.as_str(), "--set", "name=Ana"]).unwrap();
        assert_eq!(rendered, "Oi Ana\n");

        let export_path = dir.path().join("outreach.json");
        run_line(
            &context,
            &["export", "Outreach", "--output", export_path.to_str().unwrap()],
        )
        .unwrap();
        let imported = run_line(&context, &["import", export_path.to_str().unwrap()]).unwrap();
        assert!(imported.starts_with("imported 3 messages from a scriptflow document"));

        // The import created a second script with the same name.
        let ambiguous = run_line(&context, &["script", "show", "Outreach"]);
        assert!(ambiguous.is_err());
    }

    #[test]
    fn bad_arguments_are_reported_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join("cli.db");
        let context =
            AppContext::open(database.to_str().unwrap(), FlowOptions::default()).unwrap();
        run_line(&context, &["script", "new", "Only"]).unwrap();

        assert!(run_line(&context, &["reorder", "Only", "0", "1"]).is_err());
        assert!(run_line(&context, &["list", "Missing"]).is_err());
        assert!(run_line(&context, &["msg", "add", "Only", "--title", "  "]).is_err());
        assert_eq!(run_line(&context, &["list", "Only"]).unwrap(), "(no messages)\n");

        let in_memory = AppContext::open(":memory:", FlowOptions::default());
        assert!(in_memory.is_err());
    }
}
