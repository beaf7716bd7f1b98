use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};

use scriptflow_storage::{
    MessageCondition, MessageId, MessageKind, MessagePatch, MessageRecord, MessageStore,
    NewScript, ScriptId, Storage,
};

use crate::error::{
    ExportSerializeSnafu, FlowResult, ImportFormatSnafu, ImportParseSnafu, ScriptNotFoundSnafu,
    StoreSnafu,
};
use crate::graph::auto_layout;
use crate::index::AdjacencyIndex;
use crate::reorder::{normalize, order_updates, orders_changed};
use crate::validate::{MessageDraft, normalize_optional, required_title};

pub const EXPORT_FORMAT: &str = "scriptflow";
pub const EXPORT_VERSION: &str = "1.0";

/// Native export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDocument {
    pub format: String,
    pub version: String,
    #[serde(default)]
    pub exported_at: u64,
    pub script: ScriptHeader,
    pub messages: Vec<ExportedMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptHeader {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedMessage {
    #[serde(rename = "ref")]
    pub reference: String,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub parent_ref: Option<String>,
    pub order: u32,
    #[serde(default)]
    pub position_x: Option<f64>,
    #[serde(default)]
    pub position_y: Option<f64>,
}

impl ScriptDocument {
    pub fn to_json_pretty(&self) -> FlowResult<String> {
        serde_json::to_string_pretty(self).context(ExportSerializeSnafu {
            stage: "export-serialize-document",
        })
    }
}

#[derive(Debug, Deserialize)]
struct PlaybookDocument {
    playbook_title: String,
    #[serde(default)]
    playbook_description: Option<String>,
    nodes: Vec<PlaybookNode>,
}

#[derive(Debug, Deserialize)]
struct PlaybookNode {
    id: NodeRef,
    title: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    parent_id: Option<NodeRef>,
    #[serde(default)]
    position: Option<PlaybookPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NodeRef {
    Text(String),
    Number(serde_json::Number),
}

impl NodeRef {
    fn into_key(self) -> String {
        match self {
            Self::Text(text) => text.trim().to_string(),
            Self::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct PlaybookPosition {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportSource {
    Native,
    Playbook,
}

impl ImportSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "scriptflow",
            Self::Playbook => "playbook",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportWarning {
    /// The parent reference names no message in the document; the message is
    /// imported as a root.
    UnknownParent { reference: String, parent_ref: String },
    /// Canvas positions were missing and generated by auto-layout.
    PositionsGenerated { count: usize },
}

impl fmt::Display for ImportWarning {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownParent {
                reference,
                parent_ref,
            } => write!(
                formatter,
                "message '{reference}' references unknown parent '{parent_ref}'; imported as a root"
            ),
            Self::PositionsGenerated { count } => {
                write!(formatter, "generated canvas positions for {count} messages")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedMessage {
    reference: String,
    draft: MessageDraft,
    /// Index of the parent inside the plan.
    parent: Option<usize>,
    position: (f64, f64),
}

/// A fully validated import. Building one touches no store.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportPlan {
    pub source: ImportSource,
    pub name: String,
    pub description: Option<String>,
    pub warnings: Vec<ImportWarning>,
    entries: Vec<PlannedMessage>,
}

impl ImportPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.reference.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub script_id: ScriptId,
    pub source: ImportSource,
    /// New ids in document order.
    pub created: Vec<MessageId>,
    pub warnings: Vec<ImportWarning>,
}

/// Serializes one script with document-local refs in place of ids.
pub fn export_script<S>(store: &S, script_id: ScriptId) -> FlowResult<ScriptDocument>
where
    S: Storage + ?Sized,
{
    let script = store
        .get_script(script_id)
        .context(StoreSnafu {
            stage: "export-load-script",
        })?
        .context(ScriptNotFoundSnafu {
            stage: "export-load-script",
            id: script_id,
        })?;
    let messages = store
        .list_messages_by_script(script_id)
        .context(StoreSnafu {
            stage: "export-load-messages",
        })?;

    let refs = messages
        .iter()
        .enumerate()
        .map(|(index, message)| (message.id, format!("msg-{}", index + 1)))
        .collect::<HashMap<_, _>>();

    let exported = messages
        .iter()
        .enumerate()
        .map(|(index, message)| ExportedMessage {
            reference: format!("msg-{}", index + 1),
            title: message.title.clone(),
            content: message.content.clone(),
            kind: message.kind.as_str().to_string(),
            image_url: message.image_url.clone(),
            condition: message.condition.map(|condition| condition.as_str().to_string()),
            parent_ref: message
                .parent_message_id
                .and_then(|parent_id| refs.get(&parent_id).cloned()),
            order: message.order,
            position_x: Some(message.position_x),
            position_y: Some(message.position_y),
        })
        .collect::<Vec<_>>();

    tracing::info!(%script_id, messages = exported.len(), "exported script");
    Ok(ScriptDocument {
        format: EXPORT_FORMAT.to_string(),
        version: EXPORT_VERSION.to_string(),
        exported_at: unix_timestamp_seconds(),
        script: ScriptHeader {
            name: script.name,
            description: script.description,
        },
        messages: exported,
    })
}

/// Parses and validates a native or playbook document, picked by shape.
pub fn parse_document(raw: &str) -> FlowResult<ImportPlan> {
    let value: serde_json::Value = serde_json::from_str(raw).context(ImportParseSnafu {
        stage: "import-parse-json",
    })?;
    let Some(object) = value.as_object() else {
        return ImportFormatSnafu {
            stage: "import-detect-shape",
            details: "document must be a JSON object".to_string(),
        }
        .fail();
    };

    if object.contains_key("format") {
        let document: ScriptDocument =
            serde_json::from_value(value).context(ImportParseSnafu {
                stage: "import-parse-native",
            })?;
        plan_native(document)
    } else if object.contains_key("playbook_title") || object.contains_key("nodes") {
        let document: PlaybookDocument =
            serde_json::from_value(value).context(ImportParseSnafu {
                stage: "import-parse-playbook",
            })?;
        plan_playbook(document)
    } else {
        ImportFormatSnafu {
            stage: "import-detect-shape",
            details: "expected a scriptflow export or a playbook document".to_string(),
        }
        .fail()
    }
}

struct RawEntry {
    reference: String,
    title: String,
    content: Option<String>,
    kind: Option<String>,
    image_url: Option<String>,
    condition: Option<String>,
    parent_ref: Option<String>,
    position: Option<(f64, f64)>,
}

fn plan_native(document: ScriptDocument) -> FlowResult<ImportPlan> {
    if document.format != EXPORT_FORMAT {
        return ImportFormatSnafu {
            stage: "import-native-format",
            details: format!("unsupported format '{}'", document.format),
        }
        .fail();
    }
    let major = document.version.split('.').next().unwrap_or_default();
    if major != "1" {
        return ImportFormatSnafu {
            stage: "import-native-version",
            details: format!("unsupported version '{}'", document.version),
        }
        .fail();
    }

    let mut messages = document.messages;
    // Stable: equal orders keep document order.
    messages.sort_by_key(|message| message.order);

    let entries = messages
        .into_iter()
        .map(|message| RawEntry {
            reference: message.reference.trim().to_string(),
            title: message.title,
            content: message.content,
            kind: Some(message.kind),
            image_url: message.image_url,
            condition: message.condition,
            parent_ref: message.parent_ref,
            position: message.position_x.zip(message.position_y),
        })
        .collect();

    build_plan(
        ImportSource::Native,
        document.script.name,
        document.script.description,
        entries,
    )
}

fn plan_playbook(document: PlaybookDocument) -> FlowResult<ImportPlan> {
    let entries = document
        .nodes
        .into_iter()
        .map(|node| RawEntry {
            reference: node.id.into_key(),
            title: node.title,
            content: node.content.or(node.message),
            kind: node.kind,
            image_url: node.image_url,
            condition: node.condition,
            parent_ref: node.parent_id.map(NodeRef::into_key),
            position: node.position.map(|position| (position.x, position.y)),
        })
        .collect();

    build_plan(
        ImportSource::Playbook,
        document.playbook_title,
        document.playbook_description,
        entries,
    )
}

fn build_plan(
    source: ImportSource,
    name: String,
    description: Option<String>,
    raw_entries: Vec<RawEntry>,
) -> FlowResult<ImportPlan> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(raw_entries.len());
    for (index, entry) in raw_entries.iter().enumerate() {
        if entry.reference.is_empty() {
            return ImportFormatSnafu {
                stage: "import-validate-ref",
                details: format!("message #{} has no ref", index + 1),
            }
            .fail();
        }
        if slots.insert(entry.reference.clone(), index).is_some() {
            return ImportFormatSnafu {
                stage: "import-validate-ref",
                details: format!("ref '{}' is used more than once", entry.reference),
            }
            .fail();
        }
    }

    let mut warnings = Vec::new();
    let mut entries = Vec::with_capacity(raw_entries.len());
    let mut given_positions = Vec::with_capacity(raw_entries.len());

    for entry in raw_entries {
        let title = required_title(&entry.title, "import-validate-title").map_err(|_| {
            ImportFormatSnafu {
                stage: "import-validate-title",
                details: format!("message '{}' has a blank title", entry.reference),
            }
            .build()
        })?;
        let kind = parse_kind(entry.kind.as_deref(), &entry.reference)?;
        let condition = parse_condition(entry.condition.as_deref(), &entry.reference)?;

        let parent = match normalize_optional(entry.parent_ref) {
            Some(parent_ref) => match slots.get(&parent_ref) {
                Some(slot) => Some(*slot),
                None => {
                    tracing::warn!(
                        reference = %entry.reference,
                        %parent_ref,
                        "dropping unknown parent ref"
                    );
                    warnings.push(ImportWarning::UnknownParent {
                        reference: entry.reference.clone(),
                        parent_ref,
                    });
                    None
                }
            },
            None => None,
        };

        given_positions.push(entry.position);
        entries.push(PlannedMessage {
            reference: entry.reference,
            draft: MessageDraft {
                title,
                content: entry.content,
                kind,
                image_url: entry.image_url,
                condition,
            },
            parent,
            position: entry.position.unwrap_or((0.0, 0.0)),
        });
    }

    let preview = preview_records(&entries);
    let cycle = AdjacencyIndex::build(&preview).cycle_members();
    if !cycle.is_empty() {
        let refs = cycle
            .iter()
            .filter_map(|id| preview.iter().position(|record| record.id == *id))
            .map(|slot| entries[slot].reference.as_str())
            .collect::<Vec<_>>();
        return ImportFormatSnafu {
            stage: "import-validate-parents",
            details: format!("parent refs form a cycle: {}", refs.join(" -> ")),
        }
        .fail();
    }

    let missing_positions = given_positions.iter().filter(|given| given.is_none()).count();
    if missing_positions > 0 {
        // Layout covers the whole set so generated positions follow the tree shape.
        let layout = auto_layout(&preview);
        for ((entry, given), generated) in entries.iter_mut().zip(&given_positions).zip(&layout) {
            if given.is_none() {
                entry.position = (generated.position_x, generated.position_y);
            }
        }
        warnings.push(ImportWarning::PositionsGenerated {
            count: missing_positions,
        });
    }

    Ok(ImportPlan {
        source,
        name,
        description: normalize_optional(description),
        warnings,
        entries,
    })
}

/// Throwaway records with provisional ids, used for cycle checks and layout.
fn preview_records(entries: &[PlannedMessage]) -> Vec<MessageRecord> {
    let ids = entries.iter().map(|_| MessageId::new_v7()).collect::<Vec<_>>();
    let script_id = ScriptId::new_v7();
    entries
        .iter()
        .enumerate()
        .map(|(slot, entry)| MessageRecord {
            id: ids[slot],
            script_id,
            title: entry.draft.title.clone(),
            content: None,
            kind: entry.draft.kind,
            image_url: None,
            condition: None,
            parent_message_id: entry.parent.map(|parent| ids[parent]),
            order: slot as u32 + 1,
            position_x: entry.position.0,
            position_y: entry.position.1,
        })
        .collect()
}

fn parse_kind(raw: Option<&str>, reference: &str) -> FlowResult<MessageKind> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(MessageKind::Text),
        Some(raw) => MessageKind::parse(raw).context(ImportFormatSnafu {
            stage: "import-validate-type",
            details: format!("message '{reference}' has unknown type '{raw}'"),
        }),
    }
}

fn parse_condition(raw: Option<&str>, reference: &str) -> FlowResult<Option<MessageCondition>> {
    match raw {
        None => Ok(None),
        Some(raw) => MessageCondition::parse_optional(raw).context(ImportFormatSnafu {
            stage: "import-validate-condition",
            details: format!("message '{reference}' has unknown condition '{raw}'"),
        }),
    }
}

/// Appends the plan to an existing script: messages first, parents second,
/// then the script's orders are closed up to `1..=N`.
///
/// A store failure deletes every message this call created before the error
/// is returned.
pub fn import_into_script<S>(
    store: &S,
    script_id: ScriptId,
    plan: &ImportPlan,
) -> FlowResult<ImportReport>
where
    S: Storage + ?Sized,
{
    store
        .get_script(script_id)
        .context(StoreSnafu {
            stage: "import-load-script",
        })?
        .context(ScriptNotFoundSnafu {
            stage: "import-load-script",
            id: script_id,
        })?;
    let existing = store
        .list_messages_by_script(script_id)
        .context(StoreSnafu {
            stage: "import-load-messages",
        })?;
    let base_order = existing.iter().map(|message| message.order).max().unwrap_or(0);

    let mut created = Vec::with_capacity(plan.entries.len());
    for (slot, entry) in plan.entries.iter().enumerate() {
        let input = entry
            .draft
            .clone()
            .into_new_message(None, base_order + slot as u32 + 1, entry.position)?;
        match store.create_message(script_id, input) {
            Ok(record) => created.push(record.id),
            Err(source) => {
                compensate(store, &created);
                return Err(source).context(StoreSnafu {
                    stage: "import-create-message",
                });
            }
        }
    }

    for (slot, entry) in plan.entries.iter().enumerate() {
        let Some(parent) = entry.parent else {
            continue;
        };
        let patch = MessagePatch {
            parent_message_id: Some(Some(created[parent])),
            ..MessagePatch::default()
        };
        if let Err(source) = store.update_message(created[slot], patch) {
            compensate(store, &created);
            return Err(source).context(StoreSnafu {
                stage: "import-wire-parent",
            });
        }
    }

    if let Err(error) = close_order_gaps(store, script_id) {
        compensate(store, &created);
        return Err(error);
    }

    for warning in &plan.warnings {
        tracing::warn!(%script_id, %warning, "import warning");
    }
    tracing::info!(
        %script_id,
        source = plan.source.as_str(),
        messages = created.len(),
        "imported messages"
    );

    Ok(ImportReport {
        script_id,
        source: plan.source,
        created,
        warnings: plan.warnings.clone(),
    })
}

/// Creates a script named after the document and imports into it. The script
/// is removed again if the import fails.
pub fn import_as_new_script<S>(store: &S, plan: &ImportPlan) -> FlowResult<ImportReport>
where
    S: Storage + ?Sized,
{
    let script = store
        .create_script(NewScript {
            name: plan.name.clone(),
            description: plan.description.clone(),
        })
        .context(StoreSnafu {
            stage: "import-create-script",
        })?;

    match import_into_script(store, script.id, plan) {
        Ok(report) => Ok(report),
        Err(error) => {
            if let Err(cleanup) = store.delete_script(script.id) {
                tracing::warn!(
                    script_id = %script.id,
                    error = %cleanup,
                    "failed to remove partially imported script"
                );
            }
            Err(error)
        }
    }
}

fn close_order_gaps<S>(store: &S, script_id: ScriptId) -> FlowResult<()>
where
    S: MessageStore + ?Sized,
{
    let stored = store
        .list_messages_by_script(script_id)
        .context(StoreSnafu {
            stage: "import-normalize-load",
        })?;
    let mut normalized = stored.clone();
    normalize(&mut normalized);
    if orders_changed(&stored, &normalized) {
        store
            .batch_update_order(script_id, &order_updates(&normalized))
            .context(StoreSnafu {
                stage: "import-normalize-order",
            })?;
    }
    Ok(())
}

fn compensate<S>(store: &S, created: &[MessageId])
where
    S: MessageStore + ?Sized,
{
    tracing::warn!(messages = created.len(), "rolling back partial import");
    for id in created.iter().rev() {
        if let Err(error) = store.delete_message(*id) {
            tracing::warn!(message_id = %id, %error, "failed to remove imported message");
        }
    }
}

fn unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;
    use crate::test_support::{MemoryStore, conditional, message};

    fn titles(messages: &[MessageRecord]) -> Vec<&str> {
        messages.iter().map(|message| message.title.as_str()).collect()
    }

    #[test]
    fn export_then_import_reproduces_structure() {
        let (store, script_id) = MemoryStore::with_script("Outreach");
        let a = message("Intro", 1, None);
        let b = conditional("Follow up", 2, Some(a.id), MessageCondition::AfterNoResponse);
        let c = MessageRecord {
            kind: MessageKind::Image,
            image_url: Some("https://cdn.example.com/menu.png".to_string()),
            ..message("Menu", 3, Some(a.id))
        };
        store.seed(script_id, &[a, b, c]);

        let document = export_script(&store, script_id).unwrap();
        let json = document.to_json_pretty().unwrap();
        let plan = parse_document(&json).unwrap();
        assert_eq!(plan.source, ImportSource::Native);
        assert!(plan.warnings.is_empty());

        let report = import_as_new_script(&store, &plan).unwrap();
        let original = store.stored(script_id);
        let imported = store.stored(report.script_id);

        assert_eq!(imported.len(), original.len());
        assert_eq!(titles(&imported), titles(&original));
        for (left, right) in original.iter().zip(&imported) {
            assert_ne!(left.id, right.id);
            assert_eq!(left.content, right.content);
            assert_eq!(left.kind, right.kind);
            assert_eq!(left.condition, right.condition);
            assert_eq!(left.image_url, right.image_url);
            assert_eq!((left.position_x, left.position_y), (right.position_x, right.position_y));
        }
        assert_eq!(imported[0].parent_message_id, None);
        assert_eq!(imported[1].parent_message_id, Some(imported[0].id));
        assert_eq!(imported[2].parent_message_id, Some(imported[0].id));
    }

    #[test]
    fn playbook_documents_are_detected_and_laid_out() {
        let raw = r#"{
            "playbook_title": "Reactivation",
            "nodes": [
                {"id": 1, "title": "Hello", "message": "Oi {{name}}"},
                {"id": 2, "title": "Nudge", "type": "conditional", "condition": "after_no_response", "parent_id": 1},
                {"id": 3, "title": "Orphan", "parent_id": 99}
            ]
        }"#;

        let plan = parse_document(raw).unwrap();
        assert_eq!(plan.source, ImportSource::Playbook);
        assert_eq!(plan.name, "Reactivation");
        assert_eq!(plan.references().collect::<Vec<_>>(), ["1", "2", "3"]);
        assert!(plan.warnings.contains(&ImportWarning::UnknownParent {
            reference: "3".to_string(),
            parent_ref: "99".to_string(),
        }));
        assert!(plan
            .warnings
            .contains(&ImportWarning::PositionsGenerated { count: 3 }));

        let store = MemoryStore::default();
        let report = import_as_new_script(&store, &plan).unwrap();
        let imported = store.stored(report.script_id);
        assert_eq!(imported[0].content.as_deref(), Some("Oi {{name}}"));
        assert_eq!(imported[1].parent_message_id, Some(imported[0].id));
        assert_eq!(imported[1].condition, Some(MessageCondition::AfterNoResponse));
        assert_eq!(imported[2].parent_message_id, None);
        assert!(imported[1].position_y > imported[0].position_y);
    }

    #[test]
    fn invalid_documents_are_rejected_before_any_write() {
        let cases = [
            r#"{"unexpected": true}"#,
            r#"{"playbook_title": "x", "nodes": [{"id": "a", "title": "  "}]}"#,
            r#"{"playbook_title": "x", "nodes": [{"id": "a", "title": "A", "type": "video"}]}"#,
            r#"{"playbook_title": "x", "nodes": [{"id": "a", "title": "A", "condition": "maybe"}]}"#,
            r#"{"playbook_title": "x", "nodes": [{"id": "a", "title": "A"}, {"id": "a", "title": "B"}]}"#,
            r#"{"playbook_title": "x", "nodes": [{"id": "a", "title": "A", "parent_id": "b"}, {"id": "b", "title": "B", "parent_id": "a"}]}"#,
            r#"{"format": "other", "version": "1.0", "script": {"name": "x"}, "messages": []}"#,
        ];

        for raw in cases {
            let error = parse_document(raw).unwrap_err();
            assert!(
                matches!(error, FlowError::ImportFormat { .. }),
                "unexpected error for {raw}: {error}"
            );
        }
        assert!(matches!(
            parse_document("not json"),
            Err(FlowError::ImportParse { .. })
        ));
    }

    #[test]
    fn store_failure_mid_import_removes_created_messages() {
        let (store, script_id) = MemoryStore::with_script("Target");
        store.seed(script_id, &[message("Existing", 1, None)]);
        let raw = r#"{"playbook_title": "x", "nodes": [
            {"id": "a", "title": "A"},
            {"id": "b", "title": "B", "parent_id": "a"},
            {"id": "c", "title": "C"}
        ]}"#;
        let plan = parse_document(raw).unwrap();

        store.fail_after("create_message", 2);
        let error = import_into_script(&store, script_id, &plan).unwrap_err();
        assert!(matches!(error, FlowError::Store { .. }));
        assert_eq!(titles(&store.stored(script_id)), ["Existing"]);

        store.heal();
        store.fail_on("update_message");
        import_into_script(&store, script_id, &plan).unwrap_err();
        assert_eq!(store.stored(script_id).len(), 1);

        store.heal();
        let report = import_into_script(&store, script_id, &plan).unwrap();
        let stored = store.stored(script_id);
        assert_eq!(report.created.len(), 3);
        assert_eq!(
            stored.iter().map(|message| message.order).collect::<Vec<_>>(),
            [1, 2, 3, 4]
        );
    }

    #[test]
    fn import_closes_gaps_in_the_target_order() {
        let (store, script_id) = MemoryStore::with_script("Target");
        store.seed(
            script_id,
            &[message("First", 2, None), message("Second", 5, None)],
        );
        let plan = parse_document(
            r#"{"playbook_title": "x", "nodes": [{"id": 1, "title": "Imported"}]}"#,
        )
        .unwrap();

        import_into_script(&store, script_id, &plan).unwrap();

        let stored = store.stored(script_id);
        assert_eq!(titles(&stored), ["First", "Second", "Imported"]);
        assert_eq!(
            stored.iter().map(|message| message.order).collect::<Vec<_>>(),
            [1, 2, 3]
        );
        assert_eq!(store.calls("batch_order"), 1);
    }

    #[test]
    fn failed_renumber_after_import_removes_created_messages() {
        let (store, script_id) = MemoryStore::with_script("Target");
        store.seed(script_id, &[message("Existing", 3, None)]);
        let plan = parse_document(
            r#"{"playbook_title": "x", "nodes": [{"id": 1, "title": "Imported"}]}"#,
        )
        .unwrap();

        store.fail_on("batch_order");
        let error = import_into_script(&store, script_id, &plan).unwrap_err();

        assert!(matches!(error, FlowError::Store { .. }));
        assert_eq!(titles(&store.stored(script_id)), ["Existing"]);
    }
}
