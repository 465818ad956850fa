//! Cash register service.
//!
//! Wires the pure shift pieces to a sales ledger, a closure store and a
//! notifier. Every confirmation on one register goes through a single lock:
//! the window is resolved, the sales summed and the record appended while it
//! is held, so two closes on the same register cannot claim the same sales.
//! Registers on different processes sharing a database are kept apart by the
//! store, which refuses a closure whose window was overtaken.

use std::sync::Mutex;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::aggregate::aggregate_between;
use crate::closure::{ClosureConfirmer, DeclaredCash};
use crate::config::RegisterConfig;
use crate::error::{ReconcileError, Result};
use crate::model::{ClosureRecord, Operator, ShiftSalesTotals, ShiftWindow};
use crate::notify::{ClosureNotifier, ClosureSummary};
use crate::report::{self, DivergenceSummary, WindowSummary};
use crate::store::{AppendOutcome, ClosureStore, SalesLedger};
use crate::window::{resolve_next_shift, start_of_day};

/// The open shift as the close screen shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftPreview {
    pub window: ShiftWindow,
    pub totals: ShiftSalesTotals,
    /// Closures already confirmed today, oldest first.
    pub todays_closures: Vec<ClosureRecord>,
}

/// Result of a close that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Saved(ClosureRecord),
    /// The closure is stored; only the notification failed.
    SavedNotificationFailed {
        record: ClosureRecord,
        reason: String,
    },
}

impl CloseOutcome {
    pub fn record(&self) -> &ClosureRecord {
        match self {
            Self::Saved(record) => record,
            Self::SavedNotificationFailed { record, .. } => record,
        }
    }

    pub fn notification_failed(&self) -> bool {
        matches!(self, Self::SavedNotificationFailed { .. })
    }
}

pub struct CashRegister<L, S, N, Tz: TimeZone = Local> {
    ledger: L,
    store: S,
    notifier: N,
    config: RegisterConfig,
    tz: Tz,
    confirm_lock: Mutex<()>,
}

impl<L, S, N> CashRegister<L, S, N, Local>
where
    L: SalesLedger,
    S: ClosureStore,
    N: ClosureNotifier,
{
    /// A register on the machine's local time zone.
    pub fn new(ledger: L, store: S, notifier: N, config: RegisterConfig) -> Self {
        Self::with_time_zone(ledger, store, notifier, config, Local)
    }
}

impl<L, S, N, Tz> CashRegister<L, S, N, Tz>
where
    L: SalesLedger,
    S: ClosureStore,
    N: ClosureNotifier,
    Tz: TimeZone,
{
    pub fn with_time_zone(ledger: L, store: S, notifier: N, config: RegisterConfig, tz: Tz) -> Self {
        Self {
            ledger,
            store,
            notifier,
            config,
            tz,
            confirm_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RegisterConfig {
        &self.config
    }

    /// Today's closures, the window the next close would cover and the sales
    /// it would reconcile. Nothing is written.
    ///
    /// Sales stamped after `now` are left to the next window, so a closure
    /// never claims a sale its successor will also count.
    pub fn preview(&self, now: DateTime<Utc>) -> Result<ShiftPreview> {
        let local_now = now.with_timezone(&self.tz);
        let mut todays_closures = self.store.closures_for_day(local_now.date_naive())?;
        todays_closures.sort_by_key(ClosureRecord::created_at);

        let window = resolve_next_shift(&todays_closures, &local_now);
        let sales = self.ledger.sales_since(window.start)?;
        let totals = aggregate_between(&sales, window.start, now, window.closure_date, &self.tz);

        debug!(
            shift = %window.label,
            window_start = %window.start,
            sale_count = totals.count,
            system_total = %totals.total,
            "Shift previewed"
        );

        Ok(ShiftPreview {
            window,
            totals,
            todays_closures,
        })
    }

    /// Close the open shift with the cash the operator counted.
    ///
    /// `declared_cash` is the raw text typed at the register; the configured
    /// policy decides whether unusable input counts as zero or is refused.
    /// A store failure returns [`ReconcileError::Persist`] carrying the
    /// computed record for [`CashRegister::retry_append`].
    pub fn close_shift(
        &self,
        operator: &Operator,
        declared_cash: &str,
        observations: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CloseOutcome> {
        let _guard = self
            .confirm_lock
            .lock()
            .map_err(|_| ReconcileError::LockPoisoned)?;

        let cash = DeclaredCash::parse(declared_cash, self.config.cash_parse_policy)?;
        let preview = self.preview(now)?;

        info!(
            operator_id = %operator.id,
            shift = %preview.window.label,
            closure_date = %preview.window.closure_date,
            "Closing shift"
        );

        let record = ClosureConfirmer::new(self.config.currency_scale).confirm(
            &preview.window,
            &preview.totals,
            cash,
            observations,
            operator,
            now,
        );
        self.persist_and_notify(record)
    }

    /// Append a record handed back by a failed close. Appending a record the
    /// store already holds succeeds without a duplicate.
    pub fn retry_append(&self, record: ClosureRecord) -> Result<CloseOutcome> {
        let _guard = self
            .confirm_lock
            .lock()
            .map_err(|_| ReconcileError::LockPoisoned)?;
        info!(closure_id = %record.id(), "Retrying closure append");
        self.persist_and_notify(record)
    }

    /// Closures of `now`'s local day, oldest first.
    pub fn todays_closures(&self, now: DateTime<Utc>) -> Result<Vec<ClosureRecord>> {
        let today = now.with_timezone(&self.tz).date_naive();
        let mut closures = self.store.closures_for_day(today)?;
        closures.sort_by_key(ClosureRecord::created_at);
        Ok(closures)
    }

    /// Net and split divergence of the closures dated `from..=to`.
    pub fn period_divergence(&self, from: NaiveDate, to: NaiveDate) -> Result<DivergenceSummary> {
        let closures = self.store.closures_between(from, to)?;
        Ok(report::summarize_divergence(&closures))
    }

    /// Every window of `day`, closed ones first and the open shift last.
    pub fn day_breakdown(&self, day: NaiveDate) -> Result<Vec<WindowSummary>> {
        let closures = self.store.closures_for_day(day)?;
        let sales = self.ledger.sales_since(start_of_day(&self.tz, day))?;
        Ok(report::day_breakdown(&sales, &closures, day, &self.tz))
    }

    fn persist_and_notify(&self, record: ClosureRecord) -> Result<CloseOutcome> {
        match self.store.append_closure(&record) {
            Ok(AppendOutcome::Appended) => {}
            Ok(AppendOutcome::AlreadyStored) => {
                debug!(closure_id = %record.id(), "Closure was already stored");
            }
            Err(err @ ReconcileError::OverlappingClosure { .. }) => {
                warn!(closure_id = %record.id(), error = %err, "Closure rejected");
                return Err(err);
            }
            Err(err) => {
                error!(closure_id = %record.id(), error = %err, "Closure not saved");
                return Err(ReconcileError::Persist {
                    reason: err.to_string(),
                    record: Box::new(record),
                });
            }
        }

        if !self.config.notify_on_close {
            return Ok(CloseOutcome::Saved(record));
        }

        match self.notifier.notify(&ClosureSummary::from_record(&record)) {
            Ok(()) => Ok(CloseOutcome::Saved(record)),
            Err(err) => {
                warn!(closure_id = %record.id(), error = %err, "Closure saved but notification failed");
                Ok(CloseOutcome::SavedNotificationFailed {
                    reason: err.to_string(),
                    record,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::CashParsePolicy;
    use crate::model::{SaleRecord, ShiftLabel};
    use crate::notify::OutboxNotifier;
    use crate::store::tests::test_store;
    use crate::store::SqliteStore;
    use crate::window::local_date;
    use crate::window::tests::{at, tz};
    use chrono::FixedOffset;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FailingNotifier;

    impl ClosureNotifier for FailingNotifier {
        fn notify(&self, _summary: &ClosureSummary) -> Result<()> {
            Err(ReconcileError::Notify("smtp unreachable".into()))
        }
    }

    /// Fails the next append while `fail_next` is set.
    struct FlakyStore {
        inner: SqliteStore,
        fail_next: AtomicBool,
    }

    impl ClosureStore for FlakyStore {
        fn closures_for_day(&self, date: NaiveDate) -> Result<Vec<ClosureRecord>> {
            self.inner.closures_for_day(date)
        }

        fn closures_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ClosureRecord>> {
            self.inner.closures_between(from, to)
        }

        fn append_closure(&self, record: &ClosureRecord) -> Result<AppendOutcome> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ReconcileError::Storage("database is locked".into()));
            }
            self.inner.append_closure(record)
        }
    }

    type SqliteRegister<N> = CashRegister<SqliteStore, SqliteStore, N, FixedOffset>;

    fn config() -> RegisterConfig {
        RegisterConfig {
            tenant_id: "store-1".into(),
            ..RegisterConfig::default()
        }
    }

    fn register_with<N: ClosureNotifier>(
        store: &SqliteStore,
        notifier: N,
        config: RegisterConfig,
    ) -> SqliteRegister<N> {
        CashRegister::with_time_zone(store.clone(), store.clone(), notifier, config, tz())
    }

    fn outbox_register(store: &SqliteStore) -> SqliteRegister<OutboxNotifier> {
        register_with(store, OutboxNotifier::new(store.database()), config())
    }

    fn sell(store: &SqliteStore, id: &str, at: DateTime<Utc>, total: Decimal) {
        store.record_sale(&SaleRecord::new(id, at, total)).unwrap();
    }

    fn operator() -> Operator {
        Operator::new("op-7", "Bruna")
    }

    fn day() -> NaiveDate {
        local_date(&tz(), &at(12, 0))
    }

    #[test]
    fn two_shifts_in_a_day() {
        let store = test_store();
        let register = outbox_register(&store);
        sell(&store, "s-1", at(9, 0), dec!(100.00));

        let preview = register.preview(at(11, 0)).unwrap();
        assert_eq!(preview.window.label, ShiftLabel::Morning);
        assert_eq!(preview.window.start, start_of_day(&tz(), day()));
        assert_eq!(preview.totals.total, dec!(100.00));
        assert!(preview.todays_closures.is_empty());

        let morning = register
            .close_shift(&operator(), "R$ 120,00", Some(" troco extra "), at(12, 0))
            .unwrap();
        assert!(!morning.notification_failed());
        let morning = morning.record().clone();
        assert_eq!(morning.shift_label(), ShiftLabel::Morning);
        assert_eq!(morning.difference(), dec!(20.00));
        assert_eq!(morning.observations(), Some("troco extra"));

        sell(&store, "s-2", at(14, 0), dec!(50.00));
        let preview = register.preview(at(18, 0)).unwrap();
        assert_eq!(preview.window.label, ShiftLabel::Afternoon);
        assert_eq!(preview.window.start, at(12, 0));
        assert_eq!(preview.totals.total, dec!(50.00));
        assert_eq!(preview.totals.count, 1);
        assert_eq!(preview.todays_closures, vec![morning.clone()]);

        let afternoon = register
            .close_shift(&operator(), "20", None, at(18, 0))
            .unwrap()
            .record()
            .clone();
        assert_eq!(afternoon.system_total(), dec!(50.00));
        assert_eq!(afternoon.difference(), dec!(-30.00));

        let closures = register.todays_closures(at(20, 0)).unwrap();
        assert_eq!(closures, vec![morning, afternoon]);

        let summary = register.period_divergence(day(), day()).unwrap();
        assert_eq!(summary.closure_count, 2);
        assert_eq!(summary.total_divergence, dec!(-10.00));

        let notifier = OutboxNotifier::new(store.database());
        assert_eq!(notifier.pending_notifications(10).unwrap().len(), 2);

        assert_eq!(
            register.preview(at(20, 0)).unwrap().window.label,
            ShiftLabel::Extra
        );
    }

    #[test]
    fn closing_an_empty_shift_records_the_declared_cash_as_surplus() {
        let store = test_store();
        let register = outbox_register(&store);

        let record = register
            .close_shift(&operator(), "15", None, at(8, 0))
            .unwrap()
            .record()
            .clone();
        assert_eq!(record.sale_count(), 0);
        assert_eq!(record.system_total(), Decimal::ZERO);
        assert_eq!(record.difference(), dec!(15));
    }

    #[test]
    fn notifier_failure_keeps_the_closure() {
        let store = test_store();
        let register = register_with(&store, FailingNotifier, config());
        sell(&store, "s-1", at(9, 0), dec!(30));

        let outcome = register.close_shift(&operator(), "30", None, at(12, 0)).unwrap();
        assert!(outcome.notification_failed());
        match &outcome {
            CloseOutcome::SavedNotificationFailed { reason, .. } => {
                assert!(reason.contains("smtp unreachable"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            store.closures_for_day(day()).unwrap(),
            vec![outcome.record().clone()]
        );
    }

    #[test]
    fn notifications_can_be_switched_off() {
        let store = test_store();
        let register = register_with(
            &store,
            FailingNotifier,
            RegisterConfig {
                notify_on_close: false,
                ..config()
            },
        );

        let outcome = register.close_shift(&operator(), "0", None, at(12, 0)).unwrap();
        assert!(matches!(outcome, CloseOutcome::Saved(_)));
    }

    #[test]
    fn failed_append_hands_back_the_record_for_retry() {
        let store = test_store();
        let flaky = FlakyStore {
            inner: store.clone(),
            fail_next: AtomicBool::new(true),
        };
        let register = CashRegister::with_time_zone(
            store.clone(),
            flaky,
            OutboxNotifier::new(store.database()),
            config(),
            tz(),
        );
        sell(&store, "s-1", at(9, 0), dec!(80));

        let err = register
            .close_shift(&operator(), "75", None, at(12, 0))
            .unwrap_err();
        let record = match err {
            ReconcileError::Persist { record, reason } => {
                assert!(reason.contains("database is locked"));
                *record
            }
            other => panic!("unexpected error {other:?}"),
        };
        assert!(store.closures_for_day(day()).unwrap().is_empty());
        assert_eq!(record.difference(), dec!(-5));

        let outcome = register.retry_append(record.clone()).unwrap();
        assert_eq!(outcome.record(), &record);

        // a second retry of the same record is a no-op
        register.retry_append(record.clone()).unwrap();
        assert_eq!(store.closures_for_day(day()).unwrap(), vec![record]);
    }

    #[test]
    fn stale_record_from_another_register_is_refused() {
        let store = test_store();
        let counter = outbox_register(&store);
        let office = outbox_register(&store);
        sell(&store, "s-1", at(9, 0), dec!(40));

        let stale = counter.preview(at(11, 0)).unwrap();
        let stale_record = ClosureConfirmer::default().confirm(
            &stale.window,
            &stale.totals,
            DeclaredCash::new(dec!(40)).unwrap(),
            None,
            &operator(),
            at(11, 0),
        );

        office.close_shift(&operator(), "40", None, at(12, 0)).unwrap();

        let err = counter.retry_append(stale_record).unwrap_err();
        assert!(matches!(err, ReconcileError::OverlappingClosure { .. }));
        assert_eq!(store.closures_for_day(day()).unwrap().len(), 1);
    }

    #[test]
    fn cash_policy_decides_what_unusable_input_means() {
        let store = test_store();
        sell(&store, "s-1", at(9, 0), dec!(10));

        let strict = register_with(
            &store,
            OutboxNotifier::new(store.database()),
            RegisterConfig {
                cash_parse_policy: CashParsePolicy::Reject,
                ..config()
            },
        );
        let err = strict
            .close_shift(&operator(), "dez reais", None, at(12, 0))
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidCash { .. }));
        assert!(store.closures_for_day(day()).unwrap().is_empty());

        let lenient = outbox_register(&store);
        let record = lenient
            .close_shift(&operator(), "dez reais", None, at(12, 0))
            .unwrap()
            .record()
            .clone();
        assert_eq!(record.manual_cash(), Decimal::ZERO);
        assert_eq!(record.difference(), dec!(-10));
    }

    #[test]
    fn sale_stamped_after_the_close_goes_to_the_next_shift() {
        let store = test_store();
        let register = outbox_register(&store);
        sell(&store, "s-1", at(9, 0), dec!(100));
        // another terminal with a clock ahead of this one
        sell(&store, "s-2", at(12, 30), dec!(50));

        let first = register
            .close_shift(&operator(), "100", None, at(12, 0))
            .unwrap()
            .record()
            .clone();
        assert_eq!(first.system_total(), dec!(100));
        assert_eq!(first.sale_count(), 1);

        let second = register
            .close_shift(&operator(), "50", None, at(18, 0))
            .unwrap()
            .record()
            .clone();
        assert_eq!(second.system_total(), dec!(50));
        assert_eq!(second.sale_count(), 1);

        let windows = register.day_breakdown(day()).unwrap();
        assert_eq!(windows[0].totals.total, first.system_total());
        assert_eq!(windows[1].totals.total, second.system_total());
        assert_eq!(
            first.system_total() + second.system_total(),
            dec!(150),
            "each sale is counted by exactly one closure"
        );
    }

    #[test]
    fn breakdown_splits_the_day_at_each_closure() {
        let store = test_store();
        let register = outbox_register(&store);
        sell(&store, "s-1", at(9, 0), dec!(100));
        register.close_shift(&operator(), "100", None, at(12, 0)).unwrap();
        sell(&store, "s-2", at(14, 0), dec!(50));

        let windows = register.day_breakdown(day()).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].label, ShiftLabel::Morning);
        assert_eq!(windows[0].totals.total, dec!(100));
        assert_eq!(windows[1].label, ShiftLabel::Afternoon);
        assert_eq!(windows[1].end, None);
        assert_eq!(windows[1].totals.total, dec!(50));
    }
}
