//! Closure notifications.
//!
//! A notification goes out after the closure is persisted and never undoes
//! it. `OutboxNotifier` queues the summary in SQLite for whatever delivers
//! e-mail or in-app alerts.

use std::sync::Arc;

use chrono::NaiveDate;
use rusqlite::params;
use rusqlite::types::Type;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::DbState;
use crate::error::{storage, ReconcileError, Result};
use crate::model::{ClosureRecord, ShiftLabel};

/// Human-readable summary of a persisted closure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureSummary {
    pub closure_id: Uuid,
    pub closure_date: NaiveDate,
    pub shift_label: ShiftLabel,
    pub responsible_name: String,
    pub system_total: Decimal,
    pub manual_cash: Decimal,
    pub difference: Decimal,
}

impl ClosureSummary {
    pub fn from_record(record: &ClosureRecord) -> Self {
        Self {
            closure_id: record.id(),
            closure_date: record.closure_date(),
            shift_label: record.shift_label(),
            responsible_name: record.responsible_name().to_string(),
            system_total: record.system_total(),
            manual_cash: record.manual_cash(),
            difference: record.difference(),
        }
    }

    /// One-line text, e.g.
    /// `Afternoon Shift closed on 2026-03-10 by Ana: system 180.00, declared 150.00, difference -30.00 (shortfall)`.
    pub fn message(&self) -> String {
        let verdict = if self.difference.is_zero() {
            "balanced"
        } else if self.difference.is_sign_negative() {
            "shortfall"
        } else {
            "surplus"
        };
        format!(
            "{} closed on {} by {}: system {}, declared {}, difference {} ({verdict})",
            self.shift_label,
            self.closure_date,
            self.responsible_name,
            self.system_total,
            self.manual_cash,
            self.difference,
        )
    }
}

pub trait ClosureNotifier {
    fn notify(&self, summary: &ClosureSummary) -> Result<()>;
}

/// Queues summaries in `notification_outbox`. Enqueuing the same closure
/// twice keeps a single entry.
#[derive(Clone)]
pub struct OutboxNotifier {
    db: Arc<DbState>,
}

/// An outbox entry not yet delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingNotification {
    pub id: i64,
    pub closure_id: String,
    pub message: String,
    pub payload: serde_json::Value,
    pub attempts: i64,
}

impl OutboxNotifier {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }

    /// Undelivered entries, oldest first.
    pub fn pending_notifications(&self, limit: usize) -> Result<Vec<PendingNotification>> {
        let conn = self.db.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, entity_id, message, payload, attempts
                 FROM notification_outbox
                 WHERE status = 'pending'
                 ORDER BY id ASC
                 LIMIT ?1",
            )
            .map_err(storage("prepare outbox query"))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let payload: String = row.get(3)?;
                Ok(PendingNotification {
                    id: row.get(0)?,
                    closure_id: row.get(1)?,
                    message: row.get(2)?,
                    payload: serde_json::from_str(&payload).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
                    })?,
                    attempts: row.get(4)?,
                })
            })
            .map_err(storage("query outbox"))?;
        let pending = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage("read outbox row"))?;
        Ok(pending)
    }

    /// Record a delivery attempt; a delivered entry leaves the pending list.
    pub fn record_attempt(&self, id: i64, delivered: bool) -> Result<()> {
        let conn = self.db.lock()?;
        let updated = conn
            .execute(
                "UPDATE notification_outbox SET
                    attempts = attempts + 1,
                    status = CASE WHEN ?2 THEN 'sent' ELSE status END,
                    sent_at = CASE WHEN ?2 THEN datetime('now') ELSE sent_at END
                 WHERE id = ?1",
                params![id, delivered],
            )
            .map_err(storage("update outbox"))?;
        if updated == 0 {
            return Err(ReconcileError::Storage(format!(
                "notification {id} not found"
            )));
        }
        debug!(notification_id = id, delivered, "Outbox attempt recorded");
        Ok(())
    }
}

impl ClosureNotifier for OutboxNotifier {
    fn notify(&self, summary: &ClosureSummary) -> Result<()> {
        let payload = serde_json::to_string(summary)
            .map_err(|e| ReconcileError::Notify(format!("serialize summary: {e}")))?;
        let idempotency_key = format!("closure:{}", summary.closure_id);

        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO notification_outbox (entity_type, entity_id, message, payload, idempotency_key)
             VALUES ('cash_closure', ?1, ?2, ?3, ?4)
             ON CONFLICT(idempotency_key) DO NOTHING",
            params![
                summary.closure_id.to_string(),
                summary.message(),
                payload,
                idempotency_key,
            ],
        )
        .map_err(|e| ReconcileError::Notify(format!("enqueue notification: {e}")))?;

        info!(closure_id = %summary.closure_id, "Closure notification queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::tests::test_store;
    use crate::model::ShiftWindow;
    use crate::window::tests::{at, closure_at, tz};
    use rust_decimal_macros::dec;

    fn summary(cash: Decimal, system_total: Decimal) -> ClosureSummary {
        let window = ShiftWindow {
            label: ShiftLabel::Afternoon,
            start: at(12, 0),
            closure_date: at(12, 0).with_timezone(&tz()).date_naive(),
        };
        ClosureSummary::from_record(&closure_at(&window, at(18, 0), cash, system_total))
    }

    #[test]
    fn message_names_label_totals_and_verdict() {
        assert_eq!(
            summary(dec!(150.00), dec!(180.00)).message(),
            "Afternoon Shift closed on 2026-03-10 by Ana: system 180.00, declared 150.00, difference -30.00 (shortfall)"
        );
        assert!(summary(dec!(200), dec!(180)).message().ends_with("(surplus)"));
        assert!(summary(dec!(180), dec!(180)).message().ends_with("(balanced)"));
    }

    #[test]
    fn summary_serializes_camel_case() {
        let json = serde_json::to_value(summary(dec!(150.00), dec!(180.00))).unwrap();
        assert_eq!(json["shiftLabel"], "Afternoon Shift");
        assert_eq!(json["closureDate"], "2026-03-10");
        assert_eq!(json["difference"], "-30.00");
    }

    #[test]
    fn outbox_keeps_one_entry_per_closure() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let notifier = OutboxNotifier::new(db);
        let summary = summary(dec!(150.00), dec!(180.00));

        notifier.notify(&summary).unwrap();
        notifier.notify(&summary).unwrap();

        let pending = notifier.pending_notifications(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].closure_id, summary.closure_id.to_string());
        assert_eq!(pending[0].message, summary.message());
        assert_eq!(pending[0].payload["manualCash"], "150.00");
    }

    #[test]
    fn delivered_entries_leave_the_pending_list() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let notifier = OutboxNotifier::new(db);
        notifier.notify(&summary(dec!(1), dec!(2))).unwrap();
        let id = notifier.pending_notifications(10).unwrap()[0].id;

        notifier.record_attempt(id, false).unwrap();
        let pending = notifier.pending_notifications(10).unwrap();
        assert_eq!(pending[0].attempts, 1);

        notifier.record_attempt(id, true).unwrap();
        assert!(notifier.pending_notifications(10).unwrap().is_empty());
        assert!(notifier.record_attempt(999, true).is_err());
    }

    #[test]
    fn corrupt_payload_is_a_storage_error() {
        let db = Arc::new(db::open_in_memory().unwrap());
        db.lock()
            .unwrap()
            .execute(
                "INSERT INTO notification_outbox (entity_type, entity_id, message, payload, idempotency_key)
                 VALUES ('cash_closure', 'c-1', 'closed', '{not json', 'closure:c-1')",
                [],
            )
            .unwrap();

        let err = OutboxNotifier::new(db).pending_notifications(10).unwrap_err();
        assert!(matches!(err, ReconcileError::Storage(_)), "got {err:?}");
    }

    #[test]
    fn store_and_notifier_can_share_a_database() {
        let store = test_store();
        let notifier = OutboxNotifier::new(store.database());
        notifier.notify(&summary(dec!(1), dec!(1))).unwrap();
        assert_eq!(notifier.pending_notifications(10).unwrap().len(), 1);
    }
}
