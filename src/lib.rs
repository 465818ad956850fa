//! Cash Register - shift-based cash reconciliation
//!
//! Closes a store's cash register once per shift. Each closure reconciles the
//! sales recorded since the previous closure of the day against the cash the
//! operator counted, and is kept as an append-only audit record.
//!
//! The pure pieces (`window`, `aggregate`, `closure`, `report`) work on
//! already-fetched collections. `register::CashRegister` wires them to a
//! sales ledger, a closure store and a notifier; `store` ships SQLite
//! implementations of those seams.

pub mod aggregate;
pub mod closure;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod notify;
pub mod register;
pub mod report;
pub mod store;
pub mod window;

pub use aggregate::{aggregate_between, aggregate_shift_sales};
pub use closure::{CashParsePolicy, ClosureConfirmer, DeclaredCash};
pub use config::RegisterConfig;
pub use error::{ReconcileError, Result};
pub use model::{
    ClosureRecord, ClosureStatus, Operator, SaleRecord, ShiftLabel, ShiftSalesTotals, ShiftWindow,
};
pub use notify::{ClosureNotifier, ClosureSummary, OutboxNotifier};
pub use register::{CashRegister, CloseOutcome, ShiftPreview};
pub use report::{day_breakdown, summarize_divergence, total_divergence, DivergenceSummary};
pub use store::{AppendOutcome, ClosureStore, SalesLedger, SqliteStore};
pub use window::{resolve_next_shift, start_of_day};
