use std::path::PathBuf;

use clap::{Parser, Subcommand};
use scriptflow_storage::{MessageCondition, MessageKind};

#[derive(Debug, Parser)]
#[command(name = "scriptflow")]
#[command(
    about = "Author outreach scripts as an ordered list and a message map",
    long_about = None
)]
pub struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path, overriding settings
    #[arg(long, global = true)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create, inspect and remove scripts
    #[command(subcommand)]
    Script(ScriptCommand),

    /// Add, edit, delete and duplicate messages
    #[command(subcommand)]
    Msg(MessageCommand),

    /// Move the message at list position FROM to position TO (1-based)
    Reorder {
        script: String,
        from: usize,
        to: usize,
    },

    /// Place a message on the canvas and save positions
    Move {
        message: String,
        #[arg(allow_negative_numbers = true)]
        x: f64,
        #[arg(allow_negative_numbers = true)]
        y: f64,
    },

    /// Lay out the whole map automatically and save positions
    Layout { script: String },

    /// Print the list view (ordered by position)
    List { script: String },

    /// Print the map view (parent/child tree)
    Map { script: String },

    /// Write a script as a JSON document
    Export {
        script: String,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Read a scriptflow export or a playbook document
    Import {
        file: PathBuf,

        /// Append to an existing script instead of creating one
        #[arg(long)]
        into: Option<String>,

        /// Validate and summarize without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Fill `{{variable}}` placeholders of one message
    Render {
        message: String,

        /// Placeholder value as NAME=VALUE; repeatable
        #[arg(long = "set", value_parser = parse_assignment)]
        values: Vec<(String, String)>,
    },

    /// Inspect or initialize the settings file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ScriptCommand {
    New {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    List,
    /// Summary followed by the configured default view
    Show { script: String },
    Rename { script: String, name: String },
    Delete { script: String },
}

#[derive(Debug, Subcommand)]
pub enum MessageCommand {
    Add {
        script: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        content: Option<String>,

        #[arg(long = "type", value_parser = parse_kind, default_value = "text")]
        kind: MessageKind,

        #[arg(long)]
        image_url: Option<String>,

        #[arg(long, value_parser = parse_condition)]
        condition: Option<ConditionChoice>,

        /// Parent message id; defaults to the last message by order
        #[arg(long, conflicts_with = "root")]
        parent: Option<String>,

        /// Add without a parent
        #[arg(long)]
        root: bool,
    },
    Edit {
        message: String,

        #[arg(long)]
        title: Option<String>,

        /// New content; an empty value clears it
        #[arg(long)]
        content: Option<String>,

        #[arg(long = "type", value_parser = parse_kind)]
        kind: Option<MessageKind>,

        /// New image URL; an empty value clears it
        #[arg(long)]
        image_url: Option<String>,

        /// Condition name, or `none` to clear
        #[arg(long, value_parser = parse_condition)]
        condition: Option<ConditionChoice>,

        #[arg(long, conflicts_with = "detach")]
        parent: Option<String>,

        /// Remove the parent link
        #[arg(long)]
        detach: bool,
    },
    Delete {
        message: String,
    },
    Duplicate {
        message: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective settings
    Show,
    /// Print the settings file location
    Path,
    /// Write the effective settings to the settings file
    Init,
}

/// Parsed `--condition`; `none` clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionChoice(pub Option<MessageCondition>);

fn parse_kind(raw: &str) -> Result<MessageKind, String> {
    MessageKind::parse(raw).ok_or_else(|| {
        let known = MessageKind::ALL
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>();
        format!("expected one of: {}", known.join(", "))
    })
}

fn parse_condition(raw: &str) -> Result<ConditionChoice, String> {
    if raw.trim().eq_ignore_ascii_case("none") {
        return Ok(ConditionChoice(None));
    }
    MessageCondition::parse_optional(raw)
        .map(ConditionChoice)
        .ok_or_else(|| {
            let known = MessageCondition::ALL
                .iter()
                .map(|condition| condition.as_str())
                .collect::<Vec<_>>();
            format!("expected `none` or one of: {}", known.join(", "))
        })
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| "expected NAME=VALUE".to_string())?;
    let name = name.trim();
    if name.is_empty() {
        return Err("placeholder name is empty".to_string());
    }
    Ok((name.to_string(), value.to_string()))
}
