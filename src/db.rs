//! Local SQLite database layer for the cash register.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, settings helpers
//! and the shared connection state used by the SQLite store and notifier.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{storage, ReconcileError, Result};

/// Shared database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ReconcileError::LockPoisoned)
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

const OPEN_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Initialize the database at `{data_dir}/register.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. An open failure is retried once after a
/// short pause; the file is never deleted since it holds the closure log.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir).map_err(storage("create data dir"))?;

    let db_path = data_dir.join("register.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!("Database open failed ({first_err}), retrying once");
            std::thread::sleep(OPEN_RETRY_DELAY);
            open_and_configure(&db_path).map_err(|e| {
                ReconcileError::Storage(format!("database open failed after retry: {e}"))
            })?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Migrated in-memory database, for embedding and tests.
pub fn open_in_memory() -> Result<DbState> {
    let conn = Connection::open_in_memory().map_err(storage("sqlite open"))?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .map_err(storage("pragma setup"))?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(storage("sqlite open"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(storage("pragma setup"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(storage("create schema_version"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: settings, sales ledger and the append-only closure log.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- Amounts are decimal strings; instants are fixed-width RFC 3339 UTC
        -- (nanosecond precision) so text ordering matches time ordering.
        CREATE TABLE IF NOT EXISTS sales (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            total TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (tenant_id, id)
        );
        CREATE INDEX IF NOT EXISTS idx_sales_tenant_completed
            ON sales(tenant_id, completed_at);

        CREATE TABLE IF NOT EXISTS cash_closures (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            closure_date TEXT NOT NULL,
            shift_label TEXT NOT NULL,
            responsible_id TEXT NOT NULL,
            responsible_name TEXT NOT NULL,
            window_start TEXT NOT NULL,
            sale_count INTEGER NOT NULL DEFAULT 0,
            system_total TEXT NOT NULL,
            manual_cash TEXT NOT NULL,
            difference TEXT NOT NULL,
            observations TEXT,
            status TEXT NOT NULL DEFAULT 'CLOSED' CHECK (status = 'CLOSED'),
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cash_closures_tenant_day
            ON cash_closures(tenant_id, closure_date, created_at);

        CREATE TRIGGER IF NOT EXISTS cash_closures_no_update
            BEFORE UPDATE ON cash_closures
        BEGIN
            SELECT RAISE(ABORT, 'cash_closures is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS cash_closures_no_delete
            BEFORE DELETE ON cash_closures
        BEGIN
            SELECT RAISE(ABORT, 'cash_closures is append-only');
        END;

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        ReconcileError::Storage(format!("migration v1: {e}"))
    })?;

    info!("Applied migration v1 (settings, sales, cash_closures)");
    Ok(())
}

/// Migration v2: outbox for closure notifications.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS notification_outbox (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            message TEXT NOT NULL,
            payload TEXT NOT NULL,
            idempotency_key TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'sent')),
            attempts INTEGER NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now')),
            sent_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_notification_outbox_status
            ON notification_outbox(status, id);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        ReconcileError::Storage(format!("migration v2: {e}"))
    })?;

    info!("Applied migration v2 (notification_outbox)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(storage("set_setting"))?;
    Ok(())
}

/// Delete all settings in a category.
pub fn delete_all_settings(conn: &Connection, category: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1",
        params![category],
    )
    .map_err(storage("delete_all_settings"))?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
