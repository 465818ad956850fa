//! Closure confirmation: declared cash in, immutable `ClosureRecord` out.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ReconcileError, Result};
use crate::model::{ClosureRecord, ClosureStatus, Operator, ShiftSalesTotals, ShiftWindow};

/// Minor-unit precision used when no configuration says otherwise (cents).
pub const DEFAULT_CURRENCY_SCALE: u32 = 2;

const CURRENCY_MARKERS: &[&str] = &["R$", "US$", "$", "€"];

/// What to do with declared cash that is empty, unparsable or negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashParsePolicy {
    /// Count it as zero and log a warning. The closure still goes through and
    /// the full system total shows up as a shortfall.
    #[default]
    CoerceToZero,
    /// Refuse the closure with [`ReconcileError::InvalidCash`].
    Reject,
}

impl CashParsePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashParsePolicy::CoerceToZero => "coerce_to_zero",
            CashParsePolicy::Reject => "reject",
        }
    }
}

impl FromStr for CashParsePolicy {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "coerce_to_zero" => Ok(CashParsePolicy::CoerceToZero),
            "reject" => Ok(CashParsePolicy::Reject),
            other => Err(ReconcileError::Config(format!(
                "unknown cash parse policy {other:?}"
            ))),
        }
    }
}

/// Physical cash counted by the operator. Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredCash(Decimal);

impl DeclaredCash {
    pub fn new(amount: Decimal) -> Result<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ReconcileError::InvalidCash {
                input: amount.to_string(),
                reason: "negative amount".into(),
            });
        }
        Ok(Self(amount))
    }

    /// Parse the free-text amount typed by the operator.
    ///
    /// Accepts `150`, `150.5`, `150,50`, `1.234,56` and `1,234.56`, with an
    /// optional leading currency marker. A lone separator followed by three
    /// digits (`1.234`) is read as a decimal separator.
    pub fn parse(input: &str, policy: CashParsePolicy) -> Result<Self> {
        match parse_amount(input) {
            Ok(amount) => Ok(Self(amount)),
            Err(reason) => match policy {
                CashParsePolicy::CoerceToZero => {
                    warn!(input = %input, reason = %reason, "Declared cash not usable, counting it as zero");
                    Ok(Self(Decimal::ZERO))
                }
                CashParsePolicy::Reject => Err(ReconcileError::InvalidCash {
                    input: input.to_string(),
                    reason,
                }),
            },
        }
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }
}

fn parse_amount(input: &str) -> std::result::Result<Decimal, String> {
    let mut text = input.trim();
    for marker in CURRENCY_MARKERS {
        if let Some(rest) = text.strip_prefix(marker) {
            text = rest.trim_start();
            break;
        }
    }
    if text.is_empty() {
        return Err("empty amount".into());
    }

    let normalized = normalize_separators(text);
    let amount = Decimal::from_str(&normalized).map_err(|e| format!("not a number ({e})"))?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err("negative amount".into());
    }
    Ok(amount)
}

/// Rewrite locale-formatted digits into `Decimal::from_str` syntax.
fn normalize_separators(text: &str) -> String {
    let decimal_sep = match (text.rfind(','), text.rfind('.')) {
        (Some(comma), Some(dot)) => Some(if comma > dot { ',' } else { '.' }),
        (Some(_), None) => (text.matches(',').count() == 1).then_some(','),
        (None, Some(_)) => (text.matches('.').count() == 1).then_some('.'),
        (None, None) => None,
    };

    text.chars()
        .filter_map(|ch| match ch {
            ',' | '.' if Some(ch) == decimal_sep => Some('.'),
            ',' | '.' | ' ' | '\u{a0}' => None,
            other => Some(other),
        })
        .collect()
}

fn round_money(amount: Decimal, scale: u32) -> Decimal {
    amount.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Builds closure records. Holds the currency precision the difference is
/// rounded to.
#[derive(Debug, Clone, Copy)]
pub struct ClosureConfirmer {
    currency_scale: u32,
}

impl Default for ClosureConfirmer {
    fn default() -> Self {
        Self::new(DEFAULT_CURRENCY_SCALE)
    }
}

impl ClosureConfirmer {
    pub fn new(currency_scale: u32) -> Self {
        Self { currency_scale }
    }

    /// Reconcile `declared_cash` against the window's system total.
    ///
    /// The difference is signed and never clamped. Persisting the record and
    /// notifying anyone about it is the caller's job.
    pub fn confirm(
        &self,
        window: &ShiftWindow,
        totals: &ShiftSalesTotals,
        declared_cash: DeclaredCash,
        observations: Option<&str>,
        operator: &Operator,
        now: DateTime<Utc>,
    ) -> ClosureRecord {
        let manual_cash = round_money(declared_cash.amount(), self.currency_scale);
        let difference = round_money(manual_cash - totals.total, self.currency_scale);

        let record = ClosureRecord {
            id: Uuid::new_v4(),
            closure_date: window.closure_date,
            shift_label: window.label,
            responsible_id: operator.id.clone(),
            responsible_name: operator.name.clone(),
            window_start: window.start,
            sale_count: totals.count,
            system_total: totals.total,
            manual_cash,
            difference,
            observations: observations
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string),
            status: ClosureStatus::Closed,
            created_at: now,
        };

        debug!(
            closure_id = %record.id,
            shift = %record.shift_label,
            system_total = %record.system_total,
            manual_cash = %record.manual_cash,
            difference = %record.difference,
            "Closure confirmed"
        );

        record
    }
}
