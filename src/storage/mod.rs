//! Storage interface (C4): persist/load `PriceSeries` plus sidecar metadata
//! through pluggable backends sharing one path convention and one
//! temp-write-then-rename atomicity scheme.

pub mod csv_backend;
pub mod file_storage;
pub mod parquet_backend;

pub use csv_backend::CsvStorage;
pub use file_storage::FileStorage;
pub use parquet_backend::ParquetStorage;

use std::path::PathBuf;

use crate::models::instrument::Instrument;
use crate::models::period::Period;
use crate::models::series::{Metadata, PriceSeries};

/// Required of any backend. Path layout is a pure function of
/// `(instrument, period)` so repeated runs reach the same file (§4.2).
pub trait Storage: Send + Sync {
    /// File extension this backend writes, e.g. `"csv"` or `"parquet"`.
    fn extension(&self) -> &'static str;

    /// Writes bars + sidecar metadata atomically from a consumer's
    /// viewpoint. In dry-run mode this validates the would-be path and
    /// returns without writing.
    fn persist(
        &self,
        series: &PriceSeries,
        metadata: &Metadata,
        instrument: &Instrument,
        period: Period,
    ) -> crate::error::Result<()>;

    /// Fails with `VortexError::DataNotFound` if either the bar file or the
    /// sidecar metadata is absent.
    fn load(
        &self,
        instrument: &Instrument,
        period: Period,
    ) -> crate::error::Result<(PriceSeries, Metadata)>;

    /// The bars file path for `(instrument, period)`, for callers that need
    /// it without performing I/O (e.g. dry-run logging).
    fn bars_path(&self, instrument: &Instrument, period: Period) -> PathBuf;
}

/// `<base>/{futures,stocks,forex}/<period>/...`, per spec §4.2.
pub fn bars_path(base: &std::path::Path, instrument: &Instrument, period: Period, ext: &str) -> PathBuf {
    match instrument {
        Instrument::Stock { id, .. } => base
            .join("stocks")
            .join(period.code())
            .join(format!("{id}.{ext}")),
        Instrument::Forex { id, .. } => base
            .join("forex")
            .join(period.code())
            .join(format!("{id}.{ext}")),
        Instrument::Future {
            id, year, month_code, ..
        } => base
            .join("futures")
            .join(period.code())
            .join(id)
            .join(format!(
                "{id}_{year:04}{:02}00.{ext}",
                month_code.calendar_month()
            )),
    }
}

/// Sidecar metadata path: same stem, `.json` suffix, alongside the bar file.
pub fn sidecar_path(bars_path: &std::path::Path) -> PathBuf {
    let mut path = bars_path.to_path_buf();
    let stem = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    path.set_file_name(format!("{stem}.json"));
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::instrument::MonthCode;

    #[test]
    fn stock_path_layout() {
        let base = std::path::Path::new("/data");
        let instrument = Instrument::Stock {
            id: "AAPL".into(),
            symbol: "AAPL".into(),
        };
        let path = bars_path(base, &instrument, Period::OneDay, "csv");
        assert_eq!(path, std::path::PathBuf::from("/data/stocks/1d/AAPL.csv"));
    }

    #[test]
    fn future_path_layout() {
        let base = std::path::Path::new("/data");
        let instrument = Instrument::Future {
            id: "GC".into(),
            root: "GC".into(),
            year: 2024,
            month_code: MonthCode::G,
            tick_date: None,
            days_count: 180,
        };
        let path = bars_path(base, &instrument, Period::OneDay, "parquet");
        assert_eq!(
            path,
            std::path::PathBuf::from("/data/futures/1d/GC/GC_20240200.parquet")
        );
    }

    #[test]
    fn sidecar_next_to_bars_file() {
        let path = std::path::PathBuf::from("/data/stocks/1d/AAPL.csv");
        assert_eq!(
            sidecar_path(&path),
            std::path::PathBuf::from("/data/stocks/1d/AAPL.csv.json")
        );
    }
}
