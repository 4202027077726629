//! Row-oriented text backend: ISO-8601 timestamps, header row.

use std::io::Cursor;

use polars::prelude::*;

use crate::error::{ErrorContext, VortexError};
use crate::models::instrument::Instrument;
use crate::models::period::Period;
use crate::models::series::{Metadata, PriceSeries, TIMESTAMP_COL};

use super::file_storage::FileStorage;
use super::Storage;

pub struct CsvStorage {
    files: FileStorage,
}

impl CsvStorage {
    #[must_use]
    pub fn new(files: FileStorage) -> Self {
        Self { files }
    }

    fn ctx(instrument: &Instrument, period: Period) -> ErrorContext {
        ErrorContext::new()
            .with_instrument(instrument.id())
            .with_period(period.code())
    }
}

impl Storage for CsvStorage {
    fn extension(&self) -> &'static str {
        "csv"
    }

    fn bars_path(&self, instrument: &Instrument, period: Period) -> std::path::PathBuf {
        self.files.bars_path(instrument, period, self.extension())
    }

    fn persist(
        &self,
        series: &PriceSeries,
        metadata: &Metadata,
        instrument: &Instrument,
        period: Period,
    ) -> crate::error::Result<()> {
        let path = self.bars_path(instrument, period);
        self.files.ensure_parent_dir(&path, instrument, period)?;

        let mut df = series.dataframe().clone();
        let mut buf = Vec::new();
        CsvWriter::new(&mut buf)
            .include_header(true)
            .with_datetime_format(Some("%Y-%m-%dT%H:%M:%S%.fZ".to_string()))
            .finish(&mut df)
            .map_err(|e| VortexError::storage(e.to_string(), Self::ctx(instrument, period)))?;

        self.files.atomic_write(&path, &buf, instrument, period)?;
        self.files.write_sidecar(&path, metadata, instrument, period)
    }

    fn load(
        &self,
        instrument: &Instrument,
        period: Period,
    ) -> crate::error::Result<(PriceSeries, Metadata)> {
        let path = self.bars_path(instrument, period);
        if !self.files.exists(&path) {
            return Err(VortexError::DataNotFound {
                ctx: Self::ctx(instrument, period),
            });
        }
        let metadata = self.files.read_sidecar(&path, instrument, period)?;

        let file = std::fs::File::open(&path)
            .map_err(|e| VortexError::storage(e.to_string(), Self::ctx(instrument, period)))?;
        let raw = CsvReadOptions::default()
            .with_has_header(true)
            .into_reader_with_file_handle(file)
            .finish()
            .map_err(|e| VortexError::storage(e.to_string(), Self::ctx(instrument, period)))?;

        let df = raw
            .lazy()
            .with_column(
                col(TIMESTAMP_COL)
                    .str()
                    .to_datetime(
                        Some(TimeUnit::Microseconds),
                        Some("UTC".into()),
                        StrptimeOptions::default(),
                        lit("raise"),
                    )
                    .alias(TIMESTAMP_COL),
            )
            .collect()
            .map_err(|e| VortexError::storage(e.to_string(), Self::ctx(instrument, period)))?;

        Ok((PriceSeries::from_dataframe(df), metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::series::{CLOSE_COL, HIGH_COL, LOW_COL, OPEN_COL, VOLUME_COL};
    use chrono::{DateTime, TimeZone, Utc};

    fn sample_series() -> PriceSeries {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let micros = vec![t0.timestamp_micros(), t1.timestamp_micros()];
        let df = df! {
            TIMESTAMP_COL => &micros,
            OPEN_COL => &[100.0, 101.0],
            HIGH_COL => &[102.0, 103.0],
            LOW_COL => &[99.0, 100.0],
            CLOSE_COL => &[101.0, 102.0],
            VOLUME_COL => &[1000.0, 1100.0],
        }
        .unwrap()
        .lazy()
        .with_column(
            col(TIMESTAMP_COL).cast(DataType::Datetime(TimeUnit::Microseconds, Some("UTC".into()))),
        )
        .collect()
        .unwrap();
        PriceSeries::from_dataframe(df)
    }

    fn sample_metadata() -> Metadata {
        Metadata {
            symbol: "AAPL".into(),
            period: "1d".into(),
            requested_start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            requested_end: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            first_row_ts: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            last_row_ts: Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()),
            provider: "test".into(),
            expiration_ts: None,
            created_ts: Utc::now(),
        }
    }

    #[test]
    fn persist_then_load_round_trips_row_count_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CsvStorage::new(FileStorage::new(dir.path(), false));
        let instrument = Instrument::Stock {
            id: "AAPL".into(),
            symbol: "AAPL".into(),
        };
        let series = sample_series();
        let metadata = sample_metadata();
        storage
            .persist(&series, &metadata, &instrument, Period::OneDay)
            .unwrap();

        let (loaded, loaded_meta) = storage.load(&instrument, Period::OneDay).unwrap();
        assert_eq!(loaded.height(), 2);
        assert!(loaded_meta.eq_ignoring_created_ts(&metadata));
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CsvStorage::new(FileStorage::new(dir.path(), false));
        let instrument = Instrument::Stock {
            id: "GOOG".into(),
            symbol: "GOOG".into(),
        };
        let err = storage.load(&instrument, Period::OneDay).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataNotFound);
    }
}
