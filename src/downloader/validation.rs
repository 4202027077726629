//! Validation of fetched data (§4.11), run before metadata is built. Only
//! the required-column check is fatal; everything else is logged and the
//! row is kept, per spec.

use polars::prelude::*;

use crate::error::Result;
use crate::models::series::{CLOSE_COL, HIGH_COL, LOW_COL, OPEN_COL, PriceSeries, VOLUME_COL};

/// Validates `series` in place (logging only — never mutates rows).
/// Returns `Err` only for the one fatal condition: a missing required
/// column. Negative prices/volume and OHLC incoherence are logged as
/// warnings and the row is kept.
pub fn validate(series: &PriceSeries) -> Result<()> {
    series.validate_required_columns()?;

    let df = series.dataframe();
    warn_on_negative(df, OPEN_COL)?;
    warn_on_negative(df, HIGH_COL)?;
    warn_on_negative(df, LOW_COL)?;
    warn_on_negative(df, CLOSE_COL)?;
    warn_on_negative(df, VOLUME_COL)?;
    warn_on_ohlc_incoherence(df)?;
    Ok(())
}

fn warn_on_negative(df: &DataFrame, column: &str) -> Result<()> {
    let Ok(col) = df.column(column) else {
        return Ok(());
    };
    let Ok(values) = col.f64() else {
        return Ok(());
    };
    let negatives = values.into_iter().flatten().filter(|v| *v < 0.0).count();
    if negatives > 0 {
        tracing::warn!(column, negatives, "negative values in fetched data");
    }
    Ok(())
}

fn warn_on_ohlc_incoherence(df: &DataFrame) -> Result<()> {
    let (Ok(open), Ok(high), Ok(low), Ok(close)) = (
        df.column(OPEN_COL).and_then(|c| c.f64()),
        df.column(HIGH_COL).and_then(|c| c.f64()),
        df.column(LOW_COL).and_then(|c| c.f64()),
        df.column(CLOSE_COL).and_then(|c| c.f64()),
    ) else {
        return Ok(());
    };

    let mut violations = 0usize;
    for i in 0..df.height() {
        let (Some(o), Some(h), Some(l), Some(c)) =
            (open.get(i), high.get(i), low.get(i), close.get(i))
        else {
            continue;
        };
        let body_high = o.max(c);
        let body_low = o.min(c);
        if !(l <= body_low && body_low <= body_high && body_high <= h) {
            violations += 1;
        }
    }
    if violations > 0 {
        tracing::warn!(violations, "OHLC coherence violated in fetched data");
    }
    Ok(())
}

/// §4.11's final bullet: empty after validation is treated as no data, not
/// a distinct error — callers map this to `DataNotFound`.
#[must_use]
pub fn is_empty_after_validation(series: &PriceSeries) -> bool {
    series.is_empty()
}
