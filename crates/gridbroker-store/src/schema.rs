//! Database schema management.

use rusqlite::Connection;
use tokio_rusqlite::Error;

/// Current schema patch level, recorded in `schema_patch`.
pub const SCHEMA_VERSION: i64 = 1;

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(SCHEMA)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_patch (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;
    Ok(())
}

const SCHEMA: &str = r#"
-- Logical task units; status is mirrored from the owning command
CREATE TABLE IF NOT EXISTS task (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL,
    last_change TEXT NOT NULL
);

-- Command queue; one row per queued operation, keyed (task_id, action)
CREATE TABLE IF NOT EXISTS command (
    task_id INTEGER NOT NULL,
    target_id TEXT,
    target TEXT NOT NULL,
    action TEXT NOT NULL,
    status TEXT NOT NULL,
    target_status TEXT,
    retry INTEGER NOT NULL DEFAULT 0,
    creation TEXT NOT NULL,
    last_change TEXT NOT NULL,
    check_ts TEXT NOT NULL,
    action_info TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (task_id, action),
    FOREIGN KEY (task_id) REFERENCES task(id)
);

-- Task-owned child rows, removed together with the task
CREATE TABLE IF NOT EXISTS task_input_file (
    task_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    path TEXT,
    FOREIGN KEY (task_id) REFERENCES task(id)
);

CREATE TABLE IF NOT EXISTS task_output_file (
    task_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    path TEXT,
    FOREIGN KEY (task_id) REFERENCES task(id)
);

CREATE TABLE IF NOT EXISTS task_arguments (
    task_id INTEGER NOT NULL,
    argument TEXT NOT NULL,
    FOREIGN KEY (task_id) REFERENCES task(id)
);

-- Append-only audit trail; data_id is sequential per task
CREATE TABLE IF NOT EXISTS runtime_data (
    task_id INTEGER NOT NULL,
    data_id INTEGER NOT NULL,
    data_name TEXT NOT NULL,
    data_value TEXT NOT NULL,
    data_desc TEXT,
    creation TEXT NOT NULL,
    last_change TEXT NOT NULL,
    PRIMARY KEY (task_id, data_id)
);

-- Applied schema patches
CREATE TABLE IF NOT EXISTS schema_patch (
    version INTEGER PRIMARY KEY
);

-- Indexes backing the two loop scans
CREATE INDEX IF NOT EXISTS idx_command_status_change ON command(status, last_change);
CREATE INDEX IF NOT EXISTS idx_command_status_check ON command(status, check_ts);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creation() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        for table in ["task", "command", "task_input_file", "task_output_file", "task_arguments", "runtime_data"] {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")
                .unwrap();
            assert!(stmt.exists([table]).unwrap(), "missing table {table}");
        }
    }

    #[test]
    fn test_schema_version_seeded() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        // Re-running init must not duplicate the patch row.
        init_schema(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_patch", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
