//! Columnar backend built on Parquet, grounded in the same
//! temp-write-then-rename + `ParquetWriter`/`scan_parquet` pattern the
//! teacher uses for its options cache.

use polars::prelude::*;

use crate::error::{ErrorContext, VortexError};
use crate::models::instrument::Instrument;
use crate::models::period::Period;
use crate::models::series::{Metadata, PriceSeries};

use super::file_storage::FileStorage;
use super::Storage;

pub struct ParquetStorage {
    files: FileStorage,
}

impl ParquetStorage {
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

impl Storage for ParquetStorage {
    fn extension(&self) -> &'static str {
        "parquet"
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

        if self.files.is_dry_run() {
            return Ok(());
        }

        let mut df = series.dataframe().clone();
        let tmp_path = path.with_extension("parquet.tmp");
        let file = std::fs::File::create(&tmp_path)
            .map_err(|e| VortexError::storage(e.to_string(), Self::ctx(instrument, period)))?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .map_err(|e| VortexError::storage(e.to_string(), Self::ctx(instrument, period)))?;
        std::fs::rename(&tmp_path, &path)
            .map_err(|e| VortexError::storage(e.to_string(), Self::ctx(instrument, period)))?;

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

        let path_str = path.to_string_lossy().to_string();
        let df = LazyFrame::scan_parquet(path_str.as_str().into(), ScanArgsParquet::default())
            .map_err(|e| VortexError::storage(e.to_string(), Self::ctx(instrument, period)))?
            .collect()
            .map_err(|e| VortexError::storage(e.to_string(), Self::ctx(instrument, period)))?;

        Ok((PriceSeries::from_dataframe(df), metadata))
    }
}
