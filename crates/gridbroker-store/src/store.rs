//! Queue store operations.
//!
//! Every operation runs inside a scoped `conn.call` closure; statements
//! and transactions are dropped on every exit path. Mutations that must
//! not race with a concurrent claim or update use immediate (write)
//! transactions, and `busy_timeout` bounds how long any caller waits for
//! the write lock.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, TransactionBehavior};
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use gridbroker_core::{Command, CommandAction, CommandStatus, TaskFile, TaskRecord, WAITING_STATUS};

use crate::error::StoreError;
use crate::schema::init_schema;

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

/// Lock-wait bound for the underlying database.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Column list shared by every command query.
const COMMAND_COLUMNS: &str =
    "task_id, target_id, target, action, status, target_status, retry, \
     creation, last_change, check_ts, action_info";

/// Predicate restricting queue scans to recognized actions, so a corrupt
/// or forward-incompatible row is never claimed or mutated.
const KNOWN_ACTIONS: &str = "action IN ('SUBMIT', 'GETSTATUS', 'GETOUTPUT', 'JOBCANCEL')";

/// An audit row from `runtime_data`.
#[derive(Debug, Clone)]
pub struct RuntimeDataRow {
    /// Per-task sequence number.
    pub data_id: i64,
    /// Key name.
    pub name: String,
    /// Key value.
    pub value: String,
    /// Optional description.
    pub desc: Option<String>,
}

/// A command row before enum/timestamp decoding.
struct RawCommand {
    task_id: i64,
    target_id: Option<String>,
    target: String,
    action: String,
    status: String,
    target_status: Option<String>,
    retry: i64,
    creation: String,
    last_change: String,
    check_ts: String,
    action_info: String,
}

/// SQLite-backed command queue store.
pub struct QueueStore {
    conn: Connection,
}

impl QueueStore {
    /// Open a file-backed store, creating the schema if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(path)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::init(conn).await
    }

    /// Open an in-memory store (tests and single-process use).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            init_schema(conn)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { conn })
    }

    /// Current schema patch level.
    pub async fn schema_version(&self) -> Result<i64, StoreError> {
        self.conn
            .call(|conn| {
                let version =
                    conn.query_row("SELECT MAX(version) FROM schema_patch", [], |row| row.get(0))?;
                Ok(version)
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    /// Seed a new task with its child records. Returns the task id.
    ///
    /// This is the request-intake write path; the task starts in the
    /// WAITING mirror state until its first command update.
    pub async fn insert_task(
        &self,
        input_files: Vec<TaskFile>,
        output_files: Vec<TaskFile>,
        arguments: Vec<String>,
    ) -> Result<i64, StoreError> {
        let now = now_str();
        self.conn
            .call(move |conn| {
                let tx =
                    conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                tx.execute(
                    "INSERT INTO task (status, last_change) VALUES (?1, ?2)",
                    params![WAITING_STATUS, now],
                )?;
                let task_id = tx.last_insert_rowid();

                for f in &input_files {
                    tx.execute(
                        "INSERT INTO task_input_file (task_id, name, path) VALUES (?1, ?2, ?3)",
                        params![task_id, f.name, f.path],
                    )?;
                }
                for f in &output_files {
                    tx.execute(
                        "INSERT INTO task_output_file (task_id, name, path) VALUES (?1, ?2, ?3)",
                        params![task_id, f.name, f.path],
                    )?;
                }
                for arg in &arguments {
                    tx.execute(
                        "INSERT INTO task_arguments (task_id, argument) VALUES (?1, ?2)",
                        params![task_id, arg],
                    )?;
                }

                tx.commit()?;
                Ok(task_id)
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    /// Enqueue a command row (request-intake write path).
    pub async fn insert_command(&self, command: &Command) -> Result<(), StoreError> {
        let c = command.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO command (task_id, target_id, target, action, status, \
                     target_status, retry, creation, last_change, check_ts, action_info) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        c.task_id,
                        c.target_id,
                        c.target,
                        c.action.as_str(),
                        c.status.as_str(),
                        c.target_status,
                        c.retry,
                        ts(&c.creation),
                        ts(&c.last_change),
                        ts(&c.check_ts),
                        c.action_info,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        debug!("Enqueued command: {}", command);
        Ok(())
    }

    /// Claim up to `max_commands` QUEUED commands, oldest first.
    ///
    /// The claim is a single conditional update: rows are selected and
    /// marked PROCESSING in one statement, so concurrent claimers (in
    /// this process or another sharing the database) can never take the
    /// same row. Returned records carry the marked state.
    pub async fn claim_queued(&self, max_commands: u32) -> Result<Vec<Command>, StoreError> {
        let now = now_str();
        let sql = format!(
            "UPDATE command SET status = 'PROCESSING', last_change = ?1 \
             WHERE rowid IN (\
                 SELECT rowid FROM command \
                 WHERE status = 'QUEUED' AND {KNOWN_ACTIONS} \
                 ORDER BY last_change ASC LIMIT ?2) \
             RETURNING {COMMAND_COLUMNS}"
        );

        let raw = self
            .conn
            .call(move |conn| {
                let tx =
                    conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let rows = {
                    let mut stmt = tx.prepare(&sql)?;
                    let rows = stmt
                        .query_map(params![now, max_commands], read_raw)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                };
                tx.commit()?;
                Ok(rows)
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let commands = decode_all(raw);
        if !commands.is_empty() {
            debug!("Claimed {} queued command(s)", commands.len());
        }
        Ok(commands)
    }

    /// Select up to `max_commands` in-flight (PROCESSING or PROCESSED)
    /// commands, least recently checked first. Read-only.
    pub async fn scan_in_flight(&self, max_commands: u32) -> Result<Vec<Command>, StoreError> {
        let sql = format!(
            "SELECT {COMMAND_COLUMNS} FROM command \
             WHERE status IN ('PROCESSING', 'PROCESSED') AND {KNOWN_ACTIONS} \
             ORDER BY check_ts ASC LIMIT ?1"
        );

        let raw = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![max_commands], read_raw)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(decode_all(raw))
    }

    /// Overwrite the command's target id, status and target status, and
    /// propagate the status mirror to the owning task.
    ///
    /// Both writes happen in one transaction, so the command and task
    /// tables can never be observed disagreeing, even across a crash
    /// mid-propagation.
    pub async fn update(&self, command: &Command) -> Result<(), StoreError> {
        let c = command.clone();
        let now = now_str();
        self.conn
            .call(move |conn| {
                let tx =
                    conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                tx.execute(
                    "UPDATE command SET target_id = ?1, status = ?2, target_status = ?3, \
                     last_change = ?4 WHERE task_id = ?5 AND action = ?6",
                    params![
                        c.target_id,
                        c.status.as_str(),
                        c.target_status,
                        now,
                        c.task_id,
                        c.action.as_str(),
                    ],
                )?;

                let task_status = c.target_status.as_deref().unwrap_or(WAITING_STATUS);
                tx.execute(
                    "UPDATE task SET status = ?1, last_change = ?2 WHERE id = ?3",
                    params![task_status, now, c.task_id],
                )?;

                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        debug!("Updated command and task mirror: {}", command);
        Ok(())
    }

    /// Record that the controller examined this command without changing
    /// its status.
    pub async fn touch_check_ts(&self, command: &Command) -> Result<(), StoreError> {
        let (task_id, action) = (command.task_id, command.action);
        let now = now_str();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE command SET check_ts = ?1 WHERE task_id = ?2 AND action = ?3",
                    params![now, task_id, action.as_str()],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    /// Send the command back to QUEUED for another attempt.
    ///
    /// Resets creation and last_change to now and increments the retry
    /// counter by exactly one. The retry budget is enforced by the
    /// callers, never here.
    ///
    /// Conditional like the claim: only an in-flight row requeues, so a
    /// stale caller whose row was concurrently requeued or finalized is
    /// a no-op instead of a lost or doubled increment.
    pub async fn retry(&self, command: &Command) -> Result<(), StoreError> {
        let (task_id, action, next_retry) = (command.task_id, command.action, command.retry + 1);
        let now = now_str();
        let affected = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE command SET status = 'QUEUED', creation = ?1, last_change = ?1, \
                     retry = ?2 WHERE task_id = ?3 AND action = ?4 \
                     AND status IN ('PROCESSING', 'PROCESSED')",
                    params![now, next_retry, task_id, action.as_str()],
                )?;
                Ok(n)
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        if affected == 0 {
            debug!("Retry skipped for task {}: row no longer in flight", command.task_id);
        } else {
            debug!(
                "Retried command for task {} (attempt {})",
                command.task_id, next_retry
            );
        }
        Ok(())
    }

    /// Mark the command FAILED. Terminal: neither loop re-selects a
    /// FAILED row.
    ///
    /// Conditional like retry: a row that already left the in-flight
    /// states (requeued by a concurrent retry, or finalized) is left
    /// alone, so a stale trash can never fail a QUEUED command.
    pub async fn trash(&self, command: &Command) -> Result<(), StoreError> {
        let (task_id, action) = (command.task_id, command.action);
        let now = now_str();
        let affected = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE command SET status = 'FAILED', last_change = ?1 \
                     WHERE task_id = ?2 AND action = ?3 \
                     AND status IN ('PROCESSING', 'PROCESSED')",
                    params![now, task_id, action.as_str()],
                )?;
                Ok(n)
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        if affected == 0 {
            debug!("Trash skipped for task {}: row no longer in flight", command.task_id);
        } else {
            debug!("Trashed command for task {}", command.task_id);
        }
        Ok(())
    }

    /// Remove every row tied to `task_id`, leaf-to-root: output files,
    /// input files, arguments, command, task.
    ///
    /// Deliberately not one atomic multi-table transaction; the order
    /// guarantees a concurrent reader never observes a task whose
    /// command rows were still pending deletion.
    pub async fn delete_all(&self, task_id: i64) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM task_output_file WHERE task_id = ?1", [task_id])?;
                conn.execute("DELETE FROM task_input_file WHERE task_id = ?1", [task_id])?;
                conn.execute("DELETE FROM task_arguments WHERE task_id = ?1", [task_id])?;
                conn.execute("DELETE FROM command WHERE task_id = ?1", [task_id])?;
                conn.execute("DELETE FROM task WHERE id = ?1", [task_id])?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        debug!("Removed all entries for task {}", task_id);
        Ok(())
    }

    /// Append an audit row scoped to the command's task. Purely
    /// additive; there is no update or delete counterpart.
    pub async fn record_runtime_data(
        &self,
        name: &str,
        value: &str,
        desc: Option<&str>,
        command: &Command,
    ) -> Result<(), StoreError> {
        let task_id = command.task_id;
        let (name, value) = (name.to_string(), value.to_string());
        let desc = desc.map(str::to_string);
        let now = now_str();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO runtime_data \
                     (task_id, data_id, data_name, data_value, data_desc, creation, last_change) \
                     VALUES (?1, \
                        (SELECT COALESCE(MAX(data_id), 0) + 1 FROM runtime_data WHERE task_id = ?1), \
                        ?2, ?3, ?4, ?5, ?5)",
                    params![task_id, name, value, desc, now],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    /// Audit rows for a task, in sequence order.
    pub async fn runtime_data(&self, task_id: i64) -> Result<Vec<RuntimeDataRow>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT data_id, data_name, data_value, data_desc \
                     FROM runtime_data WHERE task_id = ?1 ORDER BY data_id ASC",
                )?;
                let rows = stmt
                    .query_map([task_id], |row| {
                        Ok(RuntimeDataRow {
                            data_id: row.get(0)?,
                            name: row.get(1)?,
                            value: row.get(2)?,
                            desc: row.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    /// Rewrite the task's output file paths under
    /// `{action_info}/{output_dir}` once the executor reports where the
    /// output landed.
    pub async fn update_output_paths(
        &self,
        command: &Command,
        output_dir: &str,
    ) -> Result<(), StoreError> {
        let task_id = command.task_id;
        let path = format!("{}/{}", command.action_info, output_dir);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE task_output_file SET path = ?1 WHERE task_id = ?2",
                    params![path, task_id],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    /// Look up a single command by its correlation key.
    pub async fn command(
        &self,
        task_id: i64,
        action: CommandAction,
    ) -> Result<Option<Command>, StoreError> {
        let sql = format!(
            "SELECT {COMMAND_COLUMNS} FROM command WHERE task_id = ?1 AND action = ?2"
        );
        let raw = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![task_id, action.as_str()], read_raw)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(decode_all(raw).into_iter().next())
    }

    /// Mirrored task status (the synchronous GETSTATUS read view).
    pub async fn task_status(&self, task_id: i64) -> Result<Option<String>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT status FROM task WHERE id = ?1")?;
                let mut rows = stmt.query_map([task_id], |row| row.get::<_, String>(0))?;
                Ok(rows.next().transpose()?)
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    /// Load a task with its child records (the GETOUTPUT read view).
    pub async fn load_task(&self, task_id: i64) -> Result<Option<TaskRecord>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT id, status, last_change FROM task WHERE id = ?1")?;
                let mut rows = stmt.query_map([task_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;
                let Some(head) = rows.next().transpose()? else {
                    return Ok(None);
                };
                drop(rows);
                drop(stmt);

                let input_files = load_files(conn, "task_input_file", task_id)?;
                let output_files = load_files(conn, "task_output_file", task_id)?;

                let mut stmt = conn.prepare(
                    "SELECT argument FROM task_arguments WHERE task_id = ?1",
                )?;
                let arguments = stmt
                    .query_map([task_id], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;

                Ok(Some(TaskRecord {
                    id: head.0,
                    status: head.1,
                    last_change: parse_ts(&head.2),
                    input_files,
                    output_files,
                    arguments,
                }))
            })
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }
}

fn load_files(
    conn: &rusqlite::Connection,
    table: &str,
    task_id: i64,
) -> rusqlite::Result<Vec<TaskFile>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT name, path FROM {table} WHERE task_id = ?1"
    ))?;
    let files = stmt
        .query_map([task_id], |row| {
            Ok(TaskFile {
                name: row.get(0)?,
                path: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(files)
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCommand> {
    Ok(RawCommand {
        task_id: row.get(0)?,
        target_id: row.get(1)?,
        target: row.get(2)?,
        action: row.get(3)?,
        status: row.get(4)?,
        target_status: row.get(5)?,
        retry: row.get(6)?,
        creation: row.get(7)?,
        last_change: row.get(8)?,
        check_ts: row.get(9)?,
        action_info: row.get(10)?,
    })
}

/// Decode raw rows, skipping (with a warning) any row whose action or
/// status no longer parses. A corrupt row must not be silently lost or
/// trashed, only left alone.
fn decode_all(raw: Vec<RawCommand>) -> Vec<Command> {
    raw.into_iter().filter_map(decode).collect()
}

fn decode(raw: RawCommand) -> Option<Command> {
    let action = match CommandAction::from_str(&raw.action) {
        Ok(a) => a,
        Err(e) => {
            warn!("Skipping command row for task {}: {}", raw.task_id, e);
            return None;
        }
    };
    let status = match CommandStatus::from_str(&raw.status) {
        Ok(s) => s,
        Err(e) => {
            warn!("Skipping command row for task {}: {}", raw.task_id, e);
            return None;
        }
    };

    Some(Command {
        task_id: raw.task_id,
        target_id: raw.target_id,
        target: raw.target,
        action,
        status,
        target_status: raw.target_status,
        retry: raw.retry.max(0) as u32,
        creation: parse_ts(&raw.creation),
        last_change: parse_ts(&raw.last_change),
        check_ts: parse_ts(&raw.check_ts),
        action_info: raw.action_info,
    })
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
            // Substituting now() distorts claim and scan ordering for
            // this row, so the corruption must be visible in the log.
            warn!("Unparseable stored timestamp {s:?}: {e}; substituting current time");
            Utc::now()
        }
    }
}
