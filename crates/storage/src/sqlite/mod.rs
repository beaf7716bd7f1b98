use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::{OptionExt, ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, FromRow, SqliteConnection};

use super::error::{
    ConflictSnafu, InvariantViolationSnafu, NotFoundSnafu, SqliteQuerySnafu,
    SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu, StorageError,
};
use super::error::{
    CreateSqliteDirectorySnafu, InMemoryDatabaseSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu, StorageResult,
};
use super::ids::{MessageId, ScriptId};
use super::types::{
    DEFAULT_SCRIPT_NAME, MessageCondition, MessageKind, MessagePatch, MessageRecord, NewMessage,
    NewScript, OrderUpdate, PositionUpdate, ScriptPatch, ScriptRecord,
};
use super::{MessageStore, ScriptStore};

/// Canvas offset applied to a duplicated message so it does not cover its source.
pub const DUPLICATE_POSITION_OFFSET: f64 = 40.0;

/// Every store call opens its own connection, so the database must be a file
/// that all of those connections share.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        let database_url = normalize_database_url(database_location);
        ensure!(
            !is_in_memory(&database_url),
            InMemoryDatabaseSnafu {
                stage: "sqlite-open-reject-memory",
                database_url: database_url.clone(),
            }
        );
        ensure_database_directory(database_location)?;
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        // Migrations are applied; later calls connect on their own.
        pool.close().await;

        Ok(Self { database_url })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // Store traits are sync, so each call executes on a dedicated worker thread
        // with its own current-thread runtime to avoid nested-runtime blocking panics.
        let worker = std::thread::Builder::new()
            .name(format!("sqlite-store-{stage}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(SqliteRuntimeInitSnafu {
                        stage: "sqlite-store-runtime-build",
                    })?;
                runtime.block_on(op)
            })
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-store-spawn-worker",
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker thread panicked".to_string(),
            }
            .fail(),
        }
    }
}

impl ScriptStore for SqliteStorage {
    fn create_script(&self, input: NewScript) -> StorageResult<ScriptRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("script-create", async move {
            let mut connection = connect_store_connection(&database_url, "script-create-connect").await?;
            let script_id = ScriptId::new_v7();
            let name = normalize_script_name(&input.name);
            let description = normalize_optional_text(input.description);
            let now = unix_timestamp_seconds();

            sqlx::query(
                "INSERT INTO scripts (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(script_id.to_string())
            .bind(name.clone())
            .bind(description.clone())
            .bind(now)
            .bind(now)
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "script-create-insert",
            })?;

            Ok(ScriptRecord {
                id: script_id,
                name,
                description,
                created_at_unix_seconds: i64_to_u64(now, "script-create-created-at")?,
                updated_at_unix_seconds: i64_to_u64(now, "script-create-updated-at")?,
            })
        })
    }

    fn list_scripts(&self) -> StorageResult<Vec<ScriptRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("script-list", async move {
            let mut connection = connect_store_connection(&database_url, "script-list-connect").await?;
            let rows = sqlx::query_as::<_, ScriptRow>(
                "SELECT id, name, description, created_at, updated_at FROM scripts ORDER BY updated_at DESC, id DESC",
            )
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "script-list-query",
            })?;

            rows.into_iter().map(script_row_to_record).collect()
        })
    }

    fn get_script(&self, script_id: ScriptId) -> StorageResult<Option<ScriptRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("script-get", async move {
            let mut connection = connect_store_connection(&database_url, "script-get-connect").await?;
            let row = load_script_row(&mut connection, script_id, "script-get-query").await?;
            row.map(script_row_to_record).transpose()
        })
    }

    fn update_script(
        &self,
        script_id: ScriptId,
        patch: ScriptPatch,
    ) -> StorageResult<ScriptRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("script-update", async move {
            let mut connection = connect_store_connection(&database_url, "script-update-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "script-update-begin",
            })?;

            let row = load_script_row(&mut tx, script_id, "script-update-load")
                .await?
                .context(NotFoundSnafu {
                    stage: "script-update-missing",
                    entity: "script",
                    id: script_id.to_string(),
                })?;
            let mut record = script_row_to_record(row)?;
            if let Some(name) = patch.name {
                record.name = normalize_script_name(&name);
            }
            if let Some(description) = patch.description {
                record.description = normalize_optional_text(description);
            }

            let now = unix_timestamp_seconds();
            sqlx::query("UPDATE scripts SET name = ?, description = ?, updated_at = ? WHERE id = ?")
                .bind(record.name.clone())
                .bind(record.description.clone())
                .bind(now)
                .bind(script_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "script-update-apply",
                })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "script-update-commit",
            })?;

            record.updated_at_unix_seconds = i64_to_u64(now, "script-update-updated-at")?;
            Ok(record)
        })
    }

    fn delete_script(&self, script_id: ScriptId) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        self.run_db_call("script-delete", async move {
            let mut connection = connect_store_connection(&database_url, "script-delete-connect").await?;
            let result = sqlx::query("DELETE FROM scripts WHERE id = ?")
                .bind(script_id.to_string())
                .execute(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "script-delete-apply",
                })?;

            if result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "script-delete-missing",
                    entity: "script",
                    id: script_id.to_string(),
                }
                .fail();
            }

            Ok(())
        })
    }
}

impl MessageStore for SqliteStorage {
    fn list_messages_by_script(&self, script_id: ScriptId) -> StorageResult<Vec<MessageRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-list", async move {
            let mut connection = connect_store_connection(&database_url, "message-list-connect").await?;
            ensure_script_in_scope(&mut connection, script_id, "message-list-ensure-script").await?;

            let rows = sqlx::query_as::<_, MessageRow>(
                "SELECT id, script_id, title, content, kind, image_url, condition, parent_message_id, sort_order, position_x, position_y FROM script_messages WHERE script_id = ? ORDER BY sort_order ASC, id ASC",
            )
            .bind(script_id.to_string())
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-list-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        })
    }

    fn get_message(&self, message_id: MessageId) -> StorageResult<Option<MessageRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-get", async move {
            let mut connection = connect_store_connection(&database_url, "message-get-connect").await?;
            let row = load_message_row(&mut connection, message_id, "message-get-query").await?;
            row.map(message_row_to_record).transpose()
        })
    }

    fn create_message(
        &self,
        script_id: ScriptId,
        input: NewMessage,
    ) -> StorageResult<MessageRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-create", async move {
            let mut connection = connect_store_connection(&database_url, "message-create-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "message-create-begin",
            })?;

            ensure_script_in_scope(&mut tx, script_id, "message-create-ensure-script").await?;
            validate_title(&input.title, "message-create-validate-title")?;
            if let Some(parent_id) = input.parent_message_id {
                ensure_message_in_script(&mut tx, script_id, parent_id, "message-create-ensure-parent")
                    .await?;
            }

            let order = match input.order {
                Some(order) => order,
                None => next_sort_order(&mut tx, script_id, "message-create-next-order").await?,
            };

            let record = MessageRecord {
                id: MessageId::new_v7(),
                script_id,
                title: input.title.trim().to_string(),
                content: input.content,
                kind: input.kind,
                image_url: input.image_url,
                condition: input.condition,
                parent_message_id: input.parent_message_id,
                order,
                position_x: input.position_x,
                position_y: input.position_y,
            };
            let now = unix_timestamp_seconds();
            insert_message_row(&mut tx, &record, now, "message-create-insert").await?;
            touch_script(&mut tx, script_id, now, "message-create-touch-script").await?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-create-commit",
            })?;

            Ok(record)
        })
    }

    fn update_message(
        &self,
        message_id: MessageId,
        patch: MessagePatch,
    ) -> StorageResult<MessageRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-update", async move {
            let mut connection = connect_store_connection(&database_url, "message-update-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "message-update-begin",
            })?;

            let row = load_message_row(&mut tx, message_id, "message-update-load")
                .await?
                .context(NotFoundSnafu {
                    stage: "message-update-missing",
                    entity: "message",
                    id: message_id.to_string(),
                })?;
            let mut record = message_row_to_record(row)?;
            patch.apply_to(&mut record);
            record.title = record.title.trim().to_string();
            validate_title(&record.title, "message-update-validate-title")?;

            // Only a reparent is checked; untouched dangling parents stay as they are.
            if let Some(Some(parent_id)) = patch.parent_message_id {
                ensure_parent_assignable(&mut tx, &record, parent_id).await?;
            }

            let now = unix_timestamp_seconds();
            sqlx::query(
                "UPDATE script_messages SET title = ?, content = ?, kind = ?, image_url = ?, condition = ?, parent_message_id = ?, sort_order = ?, position_x = ?, position_y = ?, updated_at = ? WHERE id = ?",
            )
            .bind(record.title.clone())
            .bind(record.content.clone())
            .bind(record.kind.as_str())
            .bind(record.image_url.clone())
            .bind(record.condition.map(|condition| condition.as_str()))
            .bind(record.parent_message_id.map(|parent| parent.to_string()))
            .bind(i64::from(record.order))
            .bind(record.position_x)
            .bind(record.position_y)
            .bind(now)
            .bind(message_id.to_string())
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-update-apply",
            })?;
            touch_script(&mut tx, record.script_id, now, "message-update-touch-script").await?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-update-commit",
            })?;

            Ok(record)
        })
    }

    fn delete_message(&self, message_id: MessageId) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-delete", async move {
            let mut connection = connect_store_connection(&database_url, "message-delete-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "message-delete-begin",
            })?;

            let row = load_message_row(&mut tx, message_id, "message-delete-load")
                .await?
                .context(NotFoundSnafu {
                    stage: "message-delete-missing",
                    entity: "message",
                    id: message_id.to_string(),
                })?;
            let script_id = ScriptId::parse(&row.script_id)?;

            sqlx::query("DELETE FROM script_messages WHERE id = ?")
                .bind(message_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-delete-apply",
                })?;
            touch_script(&mut tx, script_id, unix_timestamp_seconds(), "message-delete-touch-script")
                .await?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-delete-commit",
            })?;

            Ok(())
        })
    }

    fn duplicate_message(&self, message_id: MessageId) -> StorageResult<MessageRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-duplicate", async move {
            let mut connection =
                connect_store_connection(&database_url, "message-duplicate-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "message-duplicate-begin",
            })?;

            let row = load_message_row(&mut tx, message_id, "message-duplicate-load-source")
                .await?
                .context(NotFoundSnafu {
                    stage: "message-duplicate-source-missing",
                    entity: "message",
                    id: message_id.to_string(),
                })?;
            let source = message_row_to_record(row)?;
            let order =
                next_sort_order(&mut tx, source.script_id, "message-duplicate-next-order").await?;

            let copy = MessageRecord {
                id: MessageId::new_v7(),
                order,
                position_x: source.position_x + DUPLICATE_POSITION_OFFSET,
                position_y: source.position_y + DUPLICATE_POSITION_OFFSET,
                ..source
            };
            let now = unix_timestamp_seconds();
            insert_message_row(&mut tx, &copy, now, "message-duplicate-insert").await?;
            touch_script(&mut tx, copy.script_id, now, "message-duplicate-touch-script").await?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-duplicate-commit",
            })?;

            Ok(copy)
        })
    }

    fn batch_update_positions(
        &self,
        script_id: ScriptId,
        updates: &[PositionUpdate],
    ) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        let updates = updates.to_vec();
        self.run_db_call("message-batch-positions", async move {
            let mut connection =
                connect_store_connection(&database_url, "message-batch-positions-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "message-batch-positions-begin",
            })?;

            ensure_script_in_scope(&mut tx, script_id, "message-batch-positions-ensure-script")
                .await?;

            // One transaction: a missing id aborts the whole batch.
            let now = unix_timestamp_seconds();
            for update in updates {
                let result = sqlx::query(
                    "UPDATE script_messages SET position_x = ?, position_y = ?, updated_at = ? WHERE id = ? AND script_id = ?",
                )
                .bind(update.position_x)
                .bind(update.position_y)
                .bind(now)
                .bind(update.id.to_string())
                .bind(script_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-batch-positions-apply",
                })?;

                if result.rows_affected() == 0 {
                    return NotFoundSnafu {
                        stage: "message-batch-positions-missing",
                        entity: "message",
                        id: update.id.to_string(),
                    }
                    .fail();
                }
            }
            touch_script(&mut tx, script_id, now, "message-batch-positions-touch-script").await?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-batch-positions-commit",
            })?;

            Ok(())
        })
    }

    fn batch_update_order(
        &self,
        script_id: ScriptId,
        updates: &[OrderUpdate],
    ) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        let updates = updates.to_vec();
        self.run_db_call("message-batch-order", async move {
            let mut seen_orders = HashSet::with_capacity(updates.len());
            if let Some(duplicate) = updates.iter().find(|update| !seen_orders.insert(update.order)) {
                return ConflictSnafu {
                    stage: "message-batch-order-duplicate",
                    entity: "message",
                    details: format!("order {} is assigned more than once", duplicate.order),
                }
                .fail();
            }

            let mut connection =
                connect_store_connection(&database_url, "message-batch-order-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "message-batch-order-begin",
            })?;

            ensure_script_in_scope(&mut tx, script_id, "message-batch-order-ensure-script").await?;

            let now = unix_timestamp_seconds();
            for update in updates {
                let result = sqlx::query(
                    "UPDATE script_messages SET sort_order = ?, updated_at = ? WHERE id = ? AND script_id = ?",
                )
                .bind(i64::from(update.order))
                .bind(now)
                .bind(update.id.to_string())
                .bind(script_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-batch-order-apply",
                })?;

                if result.rows_affected() == 0 {
                    return NotFoundSnafu {
                        stage: "message-batch-order-missing",
                        entity: "message",
                        id: update.id.to_string(),
                    }
                    .fail();
                }
            }
            touch_script(&mut tx, script_id, now, "message-batch-order-touch-script").await?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-batch-order-commit",
            })?;

            Ok(())
        })
    }
}

#[derive(Debug, FromRow)]
struct ScriptRow {
    id: String,
    name: String,
    description: Option<String>,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    script_id: String,
    title: String,
    content: Option<String>,
    kind: String,
    image_url: Option<String>,
    condition: Option<String>,
    parent_message_id: Option<String>,
    sort_order: i64,
    position_x: f64,
    position_y: f64,
}

fn script_row_to_record(row: ScriptRow) -> StorageResult<ScriptRecord> {
    Ok(ScriptRecord {
        id: ScriptId::parse(&row.id)?,
        name: row.name,
        description: row.description,
        created_at_unix_seconds: i64_to_u64(row.created_at, "script-row-created-at")?,
        updated_at_unix_seconds: i64_to_u64(row.updated_at, "script-row-updated-at")?,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        script_id: ScriptId::parse(&row.script_id)?,
        title: row.title,
        content: row.content,
        kind: kind_from_sql(&row.kind)?,
        image_url: row.image_url,
        condition: row.condition.as_deref().map(condition_from_sql).transpose()?,
        parent_message_id: row
            .parent_message_id
            .as_deref()
            .map(MessageId::parse)
            .transpose()?,
        order: i64_to_u32(row.sort_order, "message-row-sort-order")?,
        position_x: row.position_x,
        position_y: row.position_y,
    })
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let mut connection =
        SqliteConnection::connect(database_url)
            .await
            .context(SqliteConnectSnafu {
                stage,
                database_url: database_url.to_string(),
            })?;

    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-foreign-keys",
            pragma: "foreign_keys",
        })?;
    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-busy-timeout",
            pragma: "busy_timeout",
        })?;

    Ok(connection)
}

async fn load_script_row(
    connection: &mut SqliteConnection,
    script_id: ScriptId,
    stage: &'static str,
) -> StorageResult<Option<ScriptRow>> {
    sqlx::query_as::<_, ScriptRow>(
        "SELECT id, name, description, created_at, updated_at FROM scripts WHERE id = ?",
    )
    .bind(script_id.to_string())
    .fetch_optional(&mut *connection)
    .await
    .context(SqliteQuerySnafu { stage })
}

async fn load_message_row(
    connection: &mut SqliteConnection,
    message_id: MessageId,
    stage: &'static str,
) -> StorageResult<Option<MessageRow>> {
    sqlx::query_as::<_, MessageRow>(
        "SELECT id, script_id, title, content, kind, image_url, condition, parent_message_id, sort_order, position_x, position_y FROM script_messages WHERE id = ?",
    )
    .bind(message_id.to_string())
    .fetch_optional(&mut *connection)
    .await
    .context(SqliteQuerySnafu { stage })
}

async fn insert_message_row(
    connection: &mut SqliteConnection,
    record: &MessageRecord,
    now: i64,
    stage: &'static str,
) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO script_messages (id, script_id, title, content, kind, image_url, condition, parent_message_id, sort_order, position_x, position_y, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.id.to_string())
    .bind(record.script_id.to_string())
    .bind(record.title.clone())
    .bind(record.content.clone())
    .bind(record.kind.as_str())
    .bind(record.image_url.clone())
    .bind(record.condition.map(|condition| condition.as_str()))
    .bind(record.parent_message_id.map(|parent| parent.to_string()))
    .bind(i64::from(record.order))
    .bind(record.position_x)
    .bind(record.position_y)
    .bind(now)
    .bind(now)
    .execute(&mut *connection)
    .await
    .context(SqliteQuerySnafu { stage })?;

    Ok(())
}

async fn next_sort_order(
    connection: &mut SqliteConnection,
    script_id: ScriptId,
    stage: &'static str,
) -> StorageResult<u32> {
    let next = sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM script_messages WHERE script_id = ?",
    )
    .bind(script_id.to_string())
    .fetch_one(&mut *connection)
    .await
    .context(SqliteQuerySnafu { stage })?;

    i64_to_u32(next, stage)
}

async fn touch_script(
    connection: &mut SqliteConnection,
    script_id: ScriptId,
    now: i64,
    stage: &'static str,
) -> StorageResult<()> {
    sqlx::query("UPDATE scripts SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(script_id.to_string())
        .execute(&mut *connection)
        .await
        .context(SqliteQuerySnafu { stage })?;

    Ok(())
}

async fn script_exists(
    connection: &mut SqliteConnection,
    script_id: ScriptId,
) -> StorageResult<bool> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT 1 FROM scripts WHERE id = ? LIMIT 1")
        .bind(script_id.to_string())
        .fetch_optional(&mut *connection)
        .await
        .context(SqliteQuerySnafu {
            stage: "script-exists-query",
        })?;

    Ok(existing.is_some())
}

async fn ensure_script_in_scope(
    connection: &mut SqliteConnection,
    script_id: ScriptId,
    stage: &'static str,
) -> StorageResult<()> {
    let exists = script_exists(connection, script_id).await?;
    if !exists {
        return NotFoundSnafu {
            stage,
            entity: "script",
            id: script_id.to_string(),
        }
        .fail();
    }

    Ok(())
}

async fn ensure_message_in_script(
    connection: &mut SqliteConnection,
    script_id: ScriptId,
    message_id: MessageId,
    stage: &'static str,
) -> StorageResult<()> {
    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM script_messages WHERE script_id = ? AND id = ? LIMIT 1",
    )
    .bind(script_id.to_string())
    .bind(message_id.to_string())
    .fetch_optional(&mut *connection)
    .await
    .context(SqliteQuerySnafu {
        stage: "message-exists-in-script-query",
    })?;

    if existing.is_none() {
        return NotFoundSnafu {
            stage,
            entity: "message",
            id: message_id.to_string(),
        }
        .fail();
    }

    Ok(())
}

async fn ensure_parent_assignable(
    connection: &mut SqliteConnection,
    record: &MessageRecord,
    parent_id: MessageId,
) -> StorageResult<()> {
    if parent_id == record.id {
        return ConflictSnafu {
            stage: "message-update-self-parent",
            entity: "message",
            details: format!("message '{}' cannot be its own parent", record.id),
        }
        .fail();
    }

    ensure_message_in_script(
        connection,
        record.script_id,
        parent_id,
        "message-update-ensure-parent",
    )
    .await?;

    // UNION deduplicates visited ids, so pre-existing cycles still terminate.
    let cycles = sqlx::query_scalar::<_, i64>(
        "WITH RECURSIVE ancestors(id) AS (
            SELECT parent_message_id FROM script_messages WHERE id = ?
            UNION
            SELECT m.parent_message_id FROM script_messages m JOIN ancestors a ON m.id = a.id
        )
        SELECT COUNT(*) FROM ancestors WHERE id = ?",
    )
    .bind(parent_id.to_string())
    .bind(record.id.to_string())
    .fetch_one(&mut *connection)
    .await
    .context(SqliteQuerySnafu {
        stage: "message-update-ancestor-query",
    })?;

    if cycles > 0 {
        return ConflictSnafu {
            stage: "message-update-cycle",
            entity: "message",
            details: format!(
                "parent '{parent_id}' descends from '{}'; reparenting would create a cycle",
                record.id
            ),
        }
        .fail();
    }

    Ok(())
}

fn validate_title(title: &str, stage: &'static str) -> StorageResult<()> {
    if title.trim().is_empty() {
        return ConflictSnafu {
            stage,
            entity: "message",
            details: "title must not be blank".to_string(),
        }
        .fail();
    }

    Ok(())
}

fn normalize_script_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_SCRIPT_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

fn normalize_optional_text(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn kind_from_sql(raw: &str) -> StorageResult<MessageKind> {
    MessageKind::parse(raw).context(InvariantViolationSnafu {
        stage: "message-kind-from-sql",
        details: format!("unknown message kind '{raw}'"),
    })
}

fn condition_from_sql(raw: &str) -> StorageResult<MessageCondition> {
    MessageCondition::parse(raw).context(InvariantViolationSnafu {
        stage: "message-condition-from-sql",
        details: format!("unknown message condition '{raw}'"),
    })
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_secs() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn i64_to_u32(value: i64, stage: &'static str) -> StorageResult<u32> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("sqlite integer '{value}' cannot map to u32"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:")
        || database_url.contains("mode=memory")
        || database_url.trim_start_matches("sqlite:").trim_start_matches("//") == ":memory:"
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
