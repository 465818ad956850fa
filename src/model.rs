//! Records exchanged between the ledger, the engine and the closure store.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A completed sale as read from the sales ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub total: Decimal,
}

impl SaleRecord {
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>, total: Decimal) -> Self {
        Self {
            id: id.into(),
            timestamp,
            total,
        }
    }
}

/// Shift name derived from how many closures the day already has.
///
/// Every closure after the second is an `Extra` shift; only `created_at`
/// tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShiftLabel {
    #[serde(rename = "Morning Shift")]
    Morning,
    #[serde(rename = "Afternoon Shift")]
    Afternoon,
    #[serde(rename = "Extra Shift")]
    Extra,
}

impl ShiftLabel {
    pub fn for_prior_closures(prior: usize) -> Self {
        match prior {
            0 => ShiftLabel::Morning,
            1 => ShiftLabel::Afternoon,
            _ => ShiftLabel::Extra,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftLabel::Morning => "Morning Shift",
            ShiftLabel::Afternoon => "Afternoon Shift",
            ShiftLabel::Extra => "Extra Shift",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Morning Shift" => Some(ShiftLabel::Morning),
            "Afternoon Shift" => Some(ShiftLabel::Afternoon),
            "Extra Shift" => Some(ShiftLabel::Extra),
            _ => None,
        }
    }
}

impl fmt::Display for ShiftLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A closure has no draft state: it exists as `Closed` or not at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosureStatus {
    #[serde(rename = "CLOSED")]
    Closed,
}

impl ClosureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClosureStatus::Closed => "CLOSED",
        }
    }
}

/// Identity of the operator confirming a closure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub name: String,
}

impl Operator {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The currently open shift: its label and the exclusive lower bound of its
/// sales window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftWindow {
    pub label: ShiftLabel,
    pub start: DateTime<Utc>,
    pub closure_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftSalesTotals {
    pub total: Decimal,
    pub count: usize,
}

/// Immutable audit record of one shift reconciliation.
///
/// Built by [`crate::closure::ClosureConfirmer`] or loaded back from a store.
/// Fields are only readable from outside the crate; a correction is a new
/// record, never an edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureRecord {
    pub(crate) id: Uuid,
    pub(crate) closure_date: NaiveDate,
    pub(crate) shift_label: ShiftLabel,
    pub(crate) responsible_id: String,
    pub(crate) responsible_name: String,
    pub(crate) window_start: DateTime<Utc>,
    pub(crate) sale_count: usize,
    pub(crate) system_total: Decimal,
    pub(crate) manual_cash: Decimal,
    pub(crate) difference: Decimal,
    pub(crate) observations: Option<String>,
    pub(crate) status: ClosureStatus,
    pub(crate) created_at: DateTime<Utc>,
}

impl ClosureRecord {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn closure_date(&self) -> NaiveDate {
        self.closure_date
    }

    pub fn shift_label(&self) -> ShiftLabel {
        self.shift_label
    }

    pub fn responsible_id(&self) -> &str {
        &self.responsible_id
    }

    pub fn responsible_name(&self) -> &str {
        &self.responsible_name
    }

    /// Exclusive lower bound of the sales window this closure reconciled.
    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn sale_count(&self) -> usize {
        self.sale_count
    }

    pub fn system_total(&self) -> Decimal {
        self.system_total
    }

    pub fn manual_cash(&self) -> Decimal {
        self.manual_cash
    }

    /// `manual_cash - system_total`. Negative is a shortfall.
    pub fn difference(&self) -> Decimal {
        self.difference
    }

    pub fn observations(&self) -> Option<&str> {
        self.observations.as_deref()
    }

    pub fn status(&self) -> ClosureStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
