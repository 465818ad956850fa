//! Register configuration, stored in `local_settings` under the
//! `cash_register` category.

use rusqlite::Connection;

use crate::closure::{CashParsePolicy, DEFAULT_CURRENCY_SCALE};
use crate::db;
use crate::error::{ReconcileError, Result};

pub const SETTINGS_CATEGORY: &str = "cash_register";

const KEY_TENANT_ID: &str = "tenant_id";
const KEY_CASH_PARSE_POLICY: &str = "cash_parse_policy";
const KEY_CURRENCY_SCALE: &str = "currency_scale";
const KEY_NOTIFY_ON_CLOSE: &str = "notify_on_close";

/// Currencies in use have at most four minor-unit digits.
const MAX_CURRENCY_SCALE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterConfig {
    pub tenant_id: String,
    pub cash_parse_policy: CashParsePolicy,
    /// Minor-unit digits the divergence is rounded to.
    pub currency_scale: u32,
    pub notify_on_close: bool,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            tenant_id: "default".to_string(),
            cash_parse_policy: CashParsePolicy::default(),
            currency_scale: DEFAULT_CURRENCY_SCALE,
            notify_on_close: true,
        }
    }
}

impl RegisterConfig {
    /// Read the stored configuration. Missing keys fall back to defaults;
    /// present but invalid values are an error.
    pub fn load(conn: &Connection) -> Result<Self> {
        let defaults = Self::default();
        let get = |key| db::get_setting(conn, SETTINGS_CATEGORY, key);

        let tenant_id = match get(KEY_TENANT_ID) {
            Some(id) if id.trim().is_empty() => {
                return Err(ReconcileError::Config("tenant_id is empty".into()))
            }
            Some(id) => id.trim().to_string(),
            None => defaults.tenant_id,
        };

        let cash_parse_policy = match get(KEY_CASH_PARSE_POLICY) {
            Some(raw) => raw.parse::<CashParsePolicy>()?,
            None => defaults.cash_parse_policy,
        };

        let currency_scale = match get(KEY_CURRENCY_SCALE) {
            Some(raw) => parse_scale(&raw)?,
            None => defaults.currency_scale,
        };

        let notify_on_close = match get(KEY_NOTIFY_ON_CLOSE) {
            Some(raw) => parse_flag(&raw)?,
            None => defaults.notify_on_close,
        };

        Ok(Self {
            tenant_id,
            cash_parse_policy,
            currency_scale,
            notify_on_close,
        })
    }

    pub fn save(&self, conn: &Connection) -> Result<()> {
        if self.currency_scale > MAX_CURRENCY_SCALE {
            return Err(ReconcileError::Config(format!(
                "currency_scale {} exceeds {MAX_CURRENCY_SCALE}",
                self.currency_scale
            )));
        }
        db::set_setting(conn, SETTINGS_CATEGORY, KEY_TENANT_ID, &self.tenant_id)?;
        db::set_setting(
            conn,
            SETTINGS_CATEGORY,
            KEY_CASH_PARSE_POLICY,
            self.cash_parse_policy.as_str(),
        )?;
        db::set_setting(
            conn,
            SETTINGS_CATEGORY,
            KEY_CURRENCY_SCALE,
            &self.currency_scale.to_string(),
        )?;
        db::set_setting(
            conn,
            SETTINGS_CATEGORY,
            KEY_NOTIFY_ON_CLOSE,
            if self.notify_on_close { "true" } else { "false" },
        )?;
        Ok(())
    }

    /// Drop every stored key so the next `load` returns the defaults.
    pub fn reset(conn: &Connection) -> Result<()> {
        db::delete_all_settings(conn, SETTINGS_CATEGORY)
    }
}

fn parse_scale(raw: &str) -> Result<u32> {
    let scale: u32 = raw
        .trim()
        .parse()
        .map_err(|e| ReconcileError::Config(format!("currency_scale {raw:?}: {e}")))?;
    if scale > MAX_CURRENCY_SCALE {
        return Err(ReconcileError::Config(format!(
            "currency_scale {scale} exceeds {MAX_CURRENCY_SCALE}"
        )));
    }
    Ok(scale)
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ReconcileError::Config(format!(
            "notify_on_close {other:?} is not a boolean"
        ))),
    }
}
