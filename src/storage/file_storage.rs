//! Shared skeleton centralizing path construction, directory creation,
//! metadata sidecar handling, and atomic-write error wrapping. Backends
//! (`CsvStorage`, `ParquetStorage`) embed one of these and only implement
//! bar (de)serialization themselves, mirroring the teacher's `ParquetStore`
//! path/IO conventions generalized to two formats plus a sidecar.

use std::path::{Path, PathBuf};

use crate::error::{ErrorContext, VortexError};
use crate::models::instrument::Instrument;
use crate::models::period::Period;
use crate::models::series::Metadata;

use super::{bars_path, sidecar_path};

#[derive(Debug, Clone)]
pub struct FileStorage {
    base: PathBuf,
    dry_run: bool,
}

impl FileStorage {
    #[must_use]
    pub fn new(base: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            base: base.into(),
            dry_run,
        }
    }

    #[must_use]
    pub fn bars_path(&self, instrument: &Instrument, period: Period, ext: &str) -> PathBuf {
        bars_path(&self.base, instrument, period, ext)
    }

    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn ctx(instrument: &Instrument, period: Period) -> ErrorContext {
        ErrorContext::new()
            .with_instrument(instrument.id())
            .with_period(period.code())
    }

    /// Ensures the parent directory exists. No-op in dry-run mode, since
    /// dry-run only validates the would-be path.
    pub fn ensure_parent_dir(&self, path: &Path, instrument: &Instrument, period: Period) -> crate::error::Result<()> {
        if self.dry_run {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                VortexError::storage(
                    format!("failed to create directory {}: {e}", parent.display()),
                    Self::ctx(instrument, period),
                )
            })?;
        }
        Ok(())
    }

    /// Writes `bytes` to `path` via a temp file + rename so a reader never
    /// observes a partially written file.
    pub fn atomic_write(
        &self,
        path: &Path,
        bytes: &[u8],
        instrument: &Instrument,
        period: Period,
    ) -> crate::error::Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let tmp_path = path.with_extension(format!(
            "{}.tmp",
            path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
        ));
        std::fs::write(&tmp_path, bytes).map_err(|e| {
            VortexError::storage(
                format!("failed to write {}: {e}", tmp_path.display()),
                Self::ctx(instrument, period),
            )
        })?;
        std::fs::rename(&tmp_path, path).map_err(|e| {
            VortexError::storage(
                format!(
                    "failed to rename {} -> {}: {e}",
                    tmp_path.display(),
                    path.display()
                ),
                Self::ctx(instrument, period),
            )
        })?;
        Ok(())
    }

    pub fn write_sidecar(
        &self,
        bars_path: &Path,
        metadata: &Metadata,
        instrument: &Instrument,
        period: Period,
    ) -> crate::error::Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(metadata).map_err(|e| {
            VortexError::storage(
                format!("failed to serialize metadata: {e}"),
                Self::ctx(instrument, period),
            )
        })?;
        self.atomic_write(&sidecar_path(bars_path), &json, instrument, period)
    }

    pub fn read_sidecar(
        &self,
        bars_path: &Path,
        instrument: &Instrument,
        period: Period,
    ) -> crate::error::Result<Metadata> {
        let path = sidecar_path(bars_path);
        let bytes = std::fs::read(&path).map_err(|_| VortexError::DataNotFound {
            ctx: Self::ctx(instrument, period),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            VortexError::storage(
                format!("failed to parse metadata sidecar {}: {e}", path.display()),
                Self::ctx(instrument, period),
            )
        })
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::instrument::Instrument;
    use chrono::{TimeZone, Utc};

    fn sample_metadata() -> Metadata {
        Metadata {
            symbol: "AAPL".into(),
            period: "1d".into(),
            requested_start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            requested_end: Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
            first_row_ts: None,
            last_row_ts: None,
            provider: "test".into(),
            expiration_ts: None,
            created_ts: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn sidecar_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileStorage::new(dir.path(), false);
        let instrument = Instrument::Stock {
            id: "AAPL".into(),
            symbol: "AAPL".into(),
        };
        let bars = fs.bars_path(&instrument, Period::OneDay, "csv");
        fs.ensure_parent_dir(&bars, &instrument, Period::OneDay).unwrap();
        let metadata = sample_metadata();
        fs.write_sidecar(&bars, &metadata, &instrument, Period::OneDay)
            .unwrap();
        let loaded = fs.read_sidecar(&bars, &instrument, Period::OneDay).unwrap();
        assert_eq!(loaded, metadata);
    }

    #[test]
    fn missing_sidecar_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileStorage::new(dir.path(), false);
        let instrument = Instrument::Stock {
            id: "MSFT".into(),
            symbol: "MSFT".into(),
        };
        let bars = fs.bars_path(&instrument, Period::OneDay, "csv");
        let err = fs.read_sidecar(&bars, &instrument, Period::OneDay).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataNotFound);
    }

    #[test]
    fn dry_run_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileStorage::new(dir.path(), true);
        let instrument = Instrument::Stock {
            id: "TSLA".into(),
            symbol: "TSLA".into(),
        };
        let bars = fs.bars_path(&instrument, Period::OneDay, "csv");
        fs.atomic_write(&bars, b"data", &instrument, Period::OneDay)
            .unwrap();
        assert!(!bars.exists());
    }
}
