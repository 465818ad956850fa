//! Error type shared by the reconciliation engine and its SQLite adapters.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::model::ClosureRecord;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid declared cash {input:?}: {reason}")]
    InvalidCash { input: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    /// The append failed. The computed record is handed back so the operator
    /// can retry the identical closure instead of re-deriving a window.
    #[error("closure {} was not saved: {reason}", record.id())]
    Persist {
        record: Box<ClosureRecord>,
        reason: String,
    },

    #[error("a closure for {closure_date} was confirmed after {window_start}; reload the shift before closing")]
    OverlappingClosure {
        closure_date: NaiveDate,
        window_start: DateTime<Utc>,
    },

    #[error("notification failed: {0}")]
    Notify(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("register lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// `map_err` adapter that prefixes a storage failure with what was being done,
/// e.g. `.map_err(storage("insert closure"))`.
pub(crate) fn storage<E: std::fmt::Display>(
    context: &'static str,
) -> impl FnOnce(E) -> ReconcileError {
    move |e| ReconcileError::Storage(format!("{context}: {e}"))
}
