//! Sales ledger and closure store seams, with their SQLite implementation.
//!
//! Neither trait has an update or delete operation: sales come from the
//! ledger as they are, and closures are only ever appended.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::error::{storage, ReconcileError, Result};
use crate::model::{ClosureRecord, ClosureStatus, SaleRecord, ShiftLabel};

/// Read side of the sales ledger, already scoped to one tenant.
pub trait SalesLedger {
    /// Sales finalized strictly after `since`.
    fn sales_since(&self, since: DateTime<Utc>) -> Result<Vec<SaleRecord>>;
}

/// Append-only log of confirmed closures, already scoped to one tenant.
pub trait ClosureStore {
    fn closures_for_day(&self, date: NaiveDate) -> Result<Vec<ClosureRecord>>;

    /// Closures with `closure_date` in `from..=to`, oldest first.
    fn closures_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ClosureRecord>>;

    fn append_closure(&self, record: &ClosureRecord) -> Result<AppendOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The identical record was already stored, e.g. by a retried append
    /// whose first attempt did commit.
    AlreadyStored,
}

/// SQLite-backed ledger and closure store for one tenant.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<DbState>,
    tenant_id: String,
}

impl SqliteStore {
    pub fn new(db: Arc<DbState>, tenant_id: impl Into<String>) -> Self {
        Self {
            db,
            tenant_id: tenant_id.into(),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// The underlying database, for components that share it (e.g. the
    /// notification outbox).
    pub fn database(&self) -> Arc<DbState> {
        Arc::clone(&self.db)
    }

    /// Append a finalized sale to the ledger. Re-recording the same id is a
    /// no-op.
    pub fn record_sale(&self, sale: &SaleRecord) -> Result<()> {
        let conn = self.db.lock()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO sales (id, tenant_id, completed_at, total)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    sale.id,
                    self.tenant_id,
                    format_instant(&sale.timestamp),
                    sale.total.to_string(),
                ],
            )
            .map_err(storage("insert sale"))?;
        if inserted == 0 {
            warn!(sale_id = %sale.id, "Sale already recorded, ignoring");
        }
        Ok(())
    }

    fn find_closure(&self, conn: &Connection, id: Uuid) -> Result<Option<ClosureRecord>> {
        conn.query_row(
            &format!("SELECT {CLOSURE_COLUMNS} FROM cash_closures WHERE tenant_id = ?1 AND id = ?2"),
            params![self.tenant_id, id.to_string()],
            map_closure_row,
        )
        .optional()
        .map_err(storage("load closure"))
    }

    fn query_closures(&self, sql: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<ClosureRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(sql).map_err(storage("prepare closure query"))?;
        let rows = stmt
            .query_map(
                params![self.tenant_id, from.to_string(), to.to_string()],
                map_closure_row,
            )
            .map_err(storage("query closures"))?;
        let closures = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage("read closure row"))?;
        Ok(closures)
    }
}

impl SalesLedger for SqliteStore {
    fn sales_since(&self, since: DateTime<Utc>) -> Result<Vec<SaleRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, completed_at, total FROM sales
                 WHERE tenant_id = ?1 AND completed_at > ?2
                 ORDER BY completed_at ASC",
            )
            .map_err(storage("prepare sales query"))?;
        let rows = stmt
            .query_map(params![self.tenant_id, format_instant(&since)], |row| {
                Ok(SaleRecord {
                    id: row.get(0)?,
                    timestamp: instant_at(row, 1)?,
                    total: decimal_at(row, 2)?,
                })
            })
            .map_err(storage("query sales"))?;
        let sales = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage("read sale row"))?;
        Ok(sales)
    }
}

impl ClosureStore for SqliteStore {
    fn closures_for_day(&self, date: NaiveDate) -> Result<Vec<ClosureRecord>> {
        self.closures_between(date, date)
    }

    fn closures_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ClosureRecord>> {
        self.query_closures(
            &format!(
                "SELECT {CLOSURE_COLUMNS} FROM cash_closures
                 WHERE tenant_id = ?1 AND closure_date BETWEEN ?2 AND ?3
                 ORDER BY created_at ASC"
            ),
            from,
            to,
        )
    }

    /// Append `record` inside an immediate transaction.
    ///
    /// Fails with [`ReconcileError::OverlappingClosure`] when another closure
    /// of the same day was confirmed after the record's window started.
    fn append_closure(&self, record: &ClosureRecord) -> Result<AppendOutcome> {
        let conn = self.db.lock()?;

        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(storage("begin transaction"))?;

        let result = (|| -> Result<AppendOutcome> {
            if let Some(existing) = self.find_closure(&conn, record.id)? {
                if existing == *record {
                    return Ok(AppendOutcome::AlreadyStored);
                }
                return Err(ReconcileError::Storage(format!(
                    "closure id {} already used by a different record",
                    record.id
                )));
            }

            let latest: Option<String> = conn
                .query_row(
                    "SELECT MAX(created_at) FROM cash_closures
                     WHERE tenant_id = ?1 AND closure_date = ?2",
                    params![self.tenant_id, record.closure_date.to_string()],
                    |row| row.get(0),
                )
                .map_err(storage("read latest closure"))?;
            if let Some(latest) = latest {
                let latest = parse_instant(&latest).map_err(storage("read latest closure"))?;
                if latest > record.window_start {
                    return Err(ReconcileError::OverlappingClosure {
                        closure_date: record.closure_date,
                        window_start: record.window_start,
                    });
                }
            }

            conn.execute(
                "INSERT INTO cash_closures (
                    id, tenant_id, closure_date, shift_label, responsible_id, responsible_name,
                    window_start, sale_count, system_total, manual_cash, difference,
                    observations, status, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.id.to_string(),
                    self.tenant_id,
                    record.closure_date.to_string(),
                    record.shift_label.as_str(),
                    record.responsible_id,
                    record.responsible_name,
                    format_instant(&record.window_start),
                    record.sale_count as i64,
                    record.system_total.to_string(),
                    record.manual_cash.to_string(),
                    record.difference.to_string(),
                    record.observations,
                    record.status.as_str(),
                    format_instant(&record.created_at),
                ],
            )
            .map_err(storage("insert closure"))?;

            Ok(AppendOutcome::Appended)
        })();

        match result {
            Ok(outcome) => {
                if let Err(e) = conn.execute_batch("COMMIT") {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(storage("commit")(e));
                }
                if outcome == AppendOutcome::Appended {
                    info!(
                        closure_id = %record.id,
                        tenant_id = %self.tenant_id,
                        shift = %record.shift_label,
                        difference = %record.difference,
                        "Closure appended"
                    );
                }
                Ok(outcome)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}

const CLOSURE_COLUMNS: &str = "id, closure_date, shift_label, responsible_id, responsible_name,
    window_start, sale_count, system_total, manual_cash, difference, observations, status,
    created_at";

fn map_closure_row(row: &Row) -> rusqlite::Result<ClosureRecord> {
    let id: String = row.get(0)?;
    let closure_date: String = row.get(1)?;
    let shift_label: String = row.get(2)?;
    let status: String = row.get(11)?;
    let sale_count: i64 = row.get(6)?;

    Ok(ClosureRecord {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
        closure_date: NaiveDate::from_str(&closure_date).map_err(|e| conversion_error(1, e))?,
        shift_label: ShiftLabel::parse(&shift_label)
            .ok_or_else(|| conversion_error(2, format!("unknown shift label {shift_label:?}")))?,
        responsible_id: row.get(3)?,
        responsible_name: row.get(4)?,
        window_start: instant_at(row, 5)?,
        sale_count: usize::try_from(sale_count).map_err(|e| conversion_error(6, e))?,
        system_total: decimal_at(row, 7)?,
        manual_cash: decimal_at(row, 8)?,
        difference: decimal_at(row, 9)?,
        observations: row.get(10)?,
        status: match status.as_str() {
            "CLOSED" => ClosureStatus::Closed,
            other => return Err(conversion_error(11, format!("unknown status {other:?}"))),
        },
        created_at: instant_at(row, 12)?,
    })
}

/// Fixed-width UTC text so that SQL string comparison orders by time.
fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_instant(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|dt| dt.with_timezone(&Utc))
}

fn instant_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_instant(&text).map_err(|e| conversion_error(idx, e))
}

fn decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}
