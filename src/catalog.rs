//! Catalog file (§6): a structured document mapping `instrumentId →
//! InstrumentConfig`, loaded once at run start and treated as read-only
//! thereafter.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::VortexError;
use crate::models::instrument::MonthCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Stock,
    Forex,
    Future,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentConfig {
    pub code: String,
    pub asset_class: AssetClass,
    #[serde(default)]
    pub periods: Option<Vec<String>>,
    /// `None` means the key was absent (null) — an error for a future,
    /// ignored otherwise. `Some(String::new())` means an explicitly empty
    /// cycle, which disables the instrument entirely (§4.7).
    #[serde(default)]
    pub cycle: Option<String>,
    #[serde(default)]
    pub tick_date: Option<NaiveDate>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub days_count: Option<i64>,
    #[serde(default = "default_tz")]
    pub tz: String,
}

fn default_tz() -> String {
    "America/New_York".to_string()
}

impl InstrumentConfig {
    /// Resolves `cycle` into month codes per §4.7's requirement: empty
    /// cycle means skip the instrument, null cycle on a future is fatal.
    pub fn resolved_cycle(&self, instrument_id: &str) -> crate::error::Result<CycleOutcome> {
        match (&self.asset_class, &self.cycle) {
            (AssetClass::Future, None) => Err(VortexError::config(format!(
                "future instrument {instrument_id} has no cycle configured"
            ))),
            (_, None) => Ok(CycleOutcome::NotApplicable),
            (_, Some(s)) if s.is_empty() => Ok(CycleOutcome::Disabled),
            (_, Some(s)) => Ok(CycleOutcome::Codes(MonthCode::parse_cycle(s))),
        }
    }
}

pub enum CycleOutcome {
    NotApplicable,
    Disabled,
    Codes(Vec<MonthCode>),
}

pub type Catalog = HashMap<String, InstrumentConfig>;

/// Loads the catalog document from `path`. Encoding is TOML, consistent
/// with the configuration document (§6 specifies "any standard encoding").
pub fn load(path: &Path) -> crate::error::Result<Catalog> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| VortexError::config(format!("failed to read catalog {}: {e}", path.display())))?;
    toml::from_str(&text)
        .map_err(|e| VortexError::config(format!("failed to parse catalog {}: {e}", path.display())))
}
