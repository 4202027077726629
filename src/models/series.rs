//! PriceSeries (C3): a UTC-indexed OHLCV table plus its sidecar `Metadata`.

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorContext, VortexError};
use crate::models::period::Period;

pub const TIMESTAMP_COL: &str = "timestamp";
pub const OPEN_COL: &str = "Open";
pub const HIGH_COL: &str = "High";
pub const LOW_COL: &str = "Low";
pub const CLOSE_COL: &str = "Close";
pub const VOLUME_COL: &str = "Volume";

pub const REQUIRED_COLUMNS: [&str; 5] = [OPEN_COL, HIGH_COL, LOW_COL, CLOSE_COL, VOLUME_COL];

/// Value record persisted alongside every bar file (§3, §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub symbol: String,
    pub period: String,
    pub requested_start: DateTime<Utc>,
    pub requested_end: DateTime<Utc>,
    pub first_row_ts: Option<DateTime<Utc>>,
    pub last_row_ts: Option<DateTime<Utc>>,
    pub provider: String,
    pub expiration_ts: Option<DateTime<Utc>>,
    pub created_ts: DateTime<Utc>,
}

impl Metadata {
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        self.expiration_ts.is_some()
    }

    /// `true` and `created_ts` compared structurally elsewhere; this equality
    /// ignores `created_ts` per the idempotence property (spec §8 #14: "byte
    /// identical ... modulo metadata `createdTs`").
    #[must_use]
    pub fn eq_ignoring_created_ts(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.period == other.period
            && self.requested_start == other.requested_start
            && self.requested_end == other.requested_end
            && self.first_row_ts == other.first_row_ts
            && self.last_row_ts == other.last_row_ts
            && self.provider == other.provider
            && self.expiration_ts == other.expiration_ts
    }
}

/// A time-indexed OHLCV table. Invariants (enforced by `sort_dedup`, checked
/// by validation elsewhere): the `timestamp` column is strictly increasing
/// and timezone-aware UTC after a merge.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    df: DataFrame,
}

impl PriceSeries {
    #[must_use]
    pub fn empty() -> Self {
        let df = DataFrame::new(vec![
            Column::new(
                TIMESTAMP_COL.into(),
                Vec::<i64>::new(),
            )
            .cast(&DataType::Datetime(TimeUnit::Microseconds, Some("UTC".into())))
            .unwrap(),
            Series::new(OPEN_COL.into(), Vec::<f64>::new()).into(),
            Series::new(HIGH_COL.into(), Vec::<f64>::new()).into(),
            Series::new(LOW_COL.into(), Vec::<f64>::new()).into(),
            Series::new(CLOSE_COL.into(), Vec::<f64>::new()).into(),
            Series::new(VOLUME_COL.into(), Vec::<f64>::new()).into(),
        ])
        .expect("static empty schema is always valid");
        Self { df }
    }

    #[must_use]
    pub fn from_dataframe(df: DataFrame) -> Self {
        Self { df }
    }

    #[must_use]
    pub fn into_dataframe(self) -> DataFrame {
        self.df
    }

    #[must_use]
    pub const fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn first_ts(&self) -> crate::error::Result<Option<DateTime<Utc>>> {
        self.ts_at(0)
    }

    pub fn last_ts(&self) -> crate::error::Result<Option<DateTime<Utc>>> {
        if self.df.height() == 0 {
            return Ok(None);
        }
        self.ts_at(self.df.height() - 1)
    }

    fn ts_at(&self, idx: usize) -> crate::error::Result<Option<DateTime<Utc>>> {
        if self.df.height() == 0 {
            return Ok(None);
        }
        let col = self.df.column(TIMESTAMP_COL).map_err(|e| {
            VortexError::storage(
                format!("missing {TIMESTAMP_COL} column: {e}"),
                ErrorContext::new(),
            )
        })?;
        let micros = col
            .datetime()
            .map_err(|e| VortexError::storage(e.to_string(), ErrorContext::new()))?
            .get(idx);
        Ok(micros.map(|us| {
            DateTime::from_timestamp_micros(us).expect("in-range microsecond timestamp")
        }))
    }

    /// Stacks `other`'s rows beneath `self`'s, unsorted and undeduplicated —
    /// callers merging two series must follow with `sort_dedup`.
    pub fn concat(self, other: Self) -> crate::error::Result<Self> {
        let df = self
            .df
            .vstack(&other.df)
            .map_err(|e| VortexError::storage(e.to_string(), ErrorContext::new()))?;
        Ok(Self { df })
    }

    /// Sort ascending by timestamp and deduplicate keeping the last
    /// occurrence per timestamp — the load-bearing "new wins" invariant
    /// from spec §4.9 step 6 / §9 ("Deduplication semantics").
    pub fn sort_dedup(self) -> crate::error::Result<Self> {
        if self.df.height() == 0 {
            return Ok(self);
        }
        let sorted = self
            .df
            .lazy()
            .sort([TIMESTAMP_COL], SortMultipleOptions::default())
            .collect()
            .map_err(|e| VortexError::storage(e.to_string(), ErrorContext::new()))?;
        let deduped = sorted
            .unique::<String, String>(
                Some(&[TIMESTAMP_COL.to_string()]),
                UniqueKeepStrategy::Last,
                None,
            )
            .map_err(|e| VortexError::storage(e.to_string(), ErrorContext::new()))?
            .lazy()
            .sort([TIMESTAMP_COL], SortMultipleOptions::default())
            .collect()
            .map_err(|e| VortexError::storage(e.to_string(), ErrorContext::new()))?;
        Ok(Self { df: deduped })
    }

    /// Some providers write a two-row sentinel dated 1970-01-01 to mean
    /// "confirmed no data here" rather than leaving the file absent. We
    /// treat that the same as an empty series rather than real data.
    pub fn is_placeholder_for_no_data(&self) -> crate::error::Result<bool> {
        if self.df.height() == 0 {
            return Ok(false);
        }
        let epoch = DateTime::from_timestamp(0, 0).unwrap();
        for idx in 0..self.df.height() {
            match self.ts_at(idx)? {
                Some(ts) if ts == epoch => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Required-column presence check from spec §4.11. Case-insensitive
    /// match against the canonical OHLCV names.
    pub fn validate_required_columns(&self) -> crate::error::Result<()> {
        let schema = self.df.schema();
        let lower: Vec<String> = schema.iter_names().map(|n| n.to_lowercase()).collect();
        for required in REQUIRED_COLUMNS {
            if !lower.contains(&required.to_lowercase()) {
                return Err(VortexError::validation(
                    format!("missing required column: {required}"),
                    ErrorContext::new(),
                ));
            }
        }
        Ok(())
    }
}
