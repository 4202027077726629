//! Updating downloader (C11) — the incremental merge core, spec §4.9.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::constants::{expiration_threshold, low_data_threshold};
use crate::correlation::Operation;
use crate::error::{ErrorContext, Result, VortexError};
use crate::models::job::DownloadJob;
use crate::models::series::{Metadata, PriceSeries};
use crate::provider::DataProvider;

use super::{merge, validation, Downloader};

/// Minimum row count below which a non-empty, wide-window fetch is treated
/// as suspiciously thin rather than legitimate (the provider-specific
/// "too few bars" signal named but left unspecified by §4.8).
const MIN_PLAUSIBLE_ROWS: usize = 2;

fn ctx(job: &DownloadJob, op: &Operation) -> ErrorContext {
    ErrorContext::new()
        .with_correlation(op.id())
        .with_provider(job.provider_name.clone())
        .with_instrument(job.instrument.id())
        .with_period(job.period.code())
}

/// Load existing bars (§4.9 step 1): primary first, falling back to backup
/// if primary fails and a backup is configured. Absent data either way is
/// not an error here — it just means there's nothing to merge against.
fn load_existing(dl: &Downloader, job: &DownloadJob) -> Option<(PriceSeries, Metadata)> {
    match dl.primary.load(&job.instrument, job.period) {
        Ok(found) => Some(found),
        Err(_) => dl
            .backup
            .as_ref()
            .and_then(|backup| backup.load(&job.instrument, job.period).ok()),
    }
}

/// §4.9 step 2: is the existing coverage sufficient to skip a fetch
/// entirely?
fn coverage_is_sufficient(
    metadata: &Metadata,
    req_start: DateTime<Utc>,
    req_end: DateTime<Utc>,
    tolerance: ChronoDuration,
) -> bool {
    if let Some(last) = metadata.last_row_ts {
        if metadata.requested_end - last > expiration_threshold() {
            return true;
        }
    }
    (metadata.requested_start - tolerance) <= req_start && req_end <= (metadata.requested_end + tolerance)
}

/// §4.9 step 3: narrow `[reqStart, reqEnd]` against existing coverage so
/// the fetch only spans what's actually missing.
fn narrow_request(
    metadata: &Metadata,
    mut req_start: DateTime<Utc>,
    mut req_end: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    if req_start >= metadata.requested_start {
        if let Some(last) = metadata.last_row_ts {
            req_start = last - low_data_threshold();
        }
    }
    if req_end < metadata.requested_start {
        req_end = metadata.requested_start;
    }
    (req_start, req_end)
}

fn build_metadata(
    job: &DownloadJob,
    series: &PriceSeries,
    req_start: DateTime<Utc>,
    req_end: DateTime<Utc>,
) -> Result<Metadata> {
    let first_row_ts = series.first_ts()?;
    let last_row_ts = series.last_ts()?;
    let expiration_ts = last_volume_is_zero(series)?.then(|| Utc::now());
    Ok(Metadata {
        symbol: job.instrument.symbol(),
        period: job.period.code().to_string(),
        requested_start: req_start,
        requested_end: req_end,
        first_row_ts,
        last_row_ts,
        provider: job.provider_name.clone(),
        expiration_ts,
        created_ts: Utc::now(),
    })
}

/// §3 Metadata invariant: `expirationTs` is set iff the last bar has
/// volume = 0.
fn last_volume_is_zero(series: &PriceSeries) -> Result<bool> {
    if series.is_empty() {
        return Ok(false);
    }
    let volume = series
        .dataframe()
        .column(crate::models::series::VOLUME_COL)
        .map_err(|e| VortexError::storage(e.to_string(), ErrorContext::new()))?
        .f64()
        .map_err(|e| VortexError::storage(e.to_string(), ErrorContext::new()))?;
    Ok(volume.get(series.height() - 1) == Some(0.0))
}

pub async fn run(
    dl: &Downloader,
    provider: &dyn DataProvider,
    job: &DownloadJob,
    op: &Operation,
) -> Result<()> {
    let existing = load_existing(dl, job);
    let tolerance = ChronoDuration::from_std(job.period.bar_duration()).unwrap_or_default();

    let (mut req_start, mut req_end) = (job.start, job.end);
    let mut coverage_start = job.start;
    let mut coverage_end = job.end;

    if let Some((existing_series, metadata)) = &existing {
        coverage_start = metadata.requested_start.min(job.start);
        coverage_end = metadata.requested_end.max(job.end);
        if coverage_is_sufficient(metadata, req_start, req_end, tolerance) {
            if dl_force_backup(dl) {
                if let Some(backup) = &dl.backup {
                    backup.persist(existing_series, metadata, &job.instrument, job.period)?;
                }
            }
            return Ok(());
        }
        let (narrowed_start, narrowed_end) = narrow_request(metadata, req_start, req_end);
        req_start = narrowed_start;
        req_end = narrowed_end;
    }

    dl.rate_smoothing_sleep().await;

    let fetch_op = op.child();
    let provider_name = job.provider_name.clone();
    let fetched = dl
        .guarded_call(&provider_name, &fetch_op, || {
            provider.fetch_bars(&job.instrument, job.period, req_start, req_end, &fetch_op)
        })
        .await?;

    if let Err(validation_err) = validation::validate(&fetched) {
        tracing::warn!(
            correlation_id = %op.id(),
            instrument = job.instrument.id(),
            period = %job.period,
            error = %validation_err,
            "fetched data failed validation, skipping persist"
        );
        return Err(VortexError::DataNotFound { ctx: ctx(job, op) });
    }

    if validation::is_empty_after_validation(&fetched) || fetched.is_placeholder_for_no_data()? {
        return Err(VortexError::DataNotFound { ctx: ctx(job, op) });
    }

    let span = req_end - req_start;
    if fetched.height() < MIN_PLAUSIBLE_ROWS && span > low_data_threshold() {
        return Err(VortexError::LowData {
            count: fetched.height(),
            ctx: ctx(job, op),
        });
    }

    let existing_series = existing.map(|(series, _)| series);
    let merged = merge::merge(existing_series, fetched)?;
    let metadata = build_metadata(job, &merged, coverage_start, coverage_end)?;

    dl.primary.persist(&merged, &metadata, &job.instrument, job.period)?;
    if job.use_backup {
        if let Some(backup) = &dl.backup {
            backup.persist(&merged, &metadata, &job.instrument, job.period)?;
        }
    }
    Ok(())
}

fn dl_force_backup(dl: &Downloader) -> bool {
    dl.force_backup
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::instrument::Instrument;
    use crate::models::period::Period;
    use crate::models::series::{CLOSE_COL, HIGH_COL, LOW_COL, OPEN_COL, TIMESTAMP_COL, VOLUME_COL};
    use crate::resilience::circuit_breaker::BreakerRegistry;
    use crate::resilience::retry::RetryConfig;
    use crate::scheduler::JobExecutor;
    use crate::storage::file_storage::FileStorage;
    use crate::storage::CsvStorage;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use polars::prelude::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn series_with(ts: &[DateTime<Utc>], open: &[f64]) -> PriceSeries {
        let micros: Vec<i64> = ts.iter().map(DateTime::timestamp_micros).collect();
        let df = df! {
            TIMESTAMP_COL => &micros,
            OPEN_COL => open,
            HIGH_COL => open,
            LOW_COL => open,
            CLOSE_COL => open,
            VOLUME_COL => &vec![100.0; open.len()],
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

    struct StubProvider {
        periods: Vec<Period>,
        series: PriceSeries,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DataProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }
        fn supported_periods(&self) -> &[Period] {
            &self.periods
        }
        fn max_window(&self, _period: Period) -> Option<std::time::Duration> {
            None
        }
        fn min_start(&self, _period: Period) -> Option<DateTime<Utc>> {
            None
        }
        async fn fetch_bars(
            &self,
            _instrument: &Instrument,
            _period: Period,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _op: &Operation,
        ) -> Result<PriceSeries> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.series.clone())
        }
    }

    fn test_downloader(mode: super::super::Mode, provider: Arc<dyn DataProvider>) -> (Downloader, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn crate::storage::Storage> =
            Arc::new(CsvStorage::new(FileStorage::new(dir.path(), false)));
        let mut providers: HashMap<String, Arc<dyn DataProvider>> = HashMap::new();
        providers.insert("stub".to_string(), provider);
        let dl = Downloader::new(
            providers,
            storage,
            None,
            Arc::new(BreakerRegistry::new(Default::default())),
            RetryConfig::default(),
            0,
            false,
            mode,
        );
        (dl, dir)
    }

    fn job(start: DateTime<Utc>, end: DateTime<Utc>) -> DownloadJob {
        DownloadJob::new(
            "stub",
            Instrument::Stock {
                id: "AAPL".into(),
                symbol: "AAPL".into(),
            },
            Period::OneDay,
            start,
            end,
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn first_run_persists_fetched_data_verbatim() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let provider = Arc::new(StubProvider {
            periods: vec![Period::OneDay],
            series: series_with(&[t0, t1], &[100.0, 105.0]),
            calls: AtomicUsize::new(0),
        });
        let (dl, _dir) = test_downloader(super::super::Mode::Updating, provider.clone());
        let j = job(t0, t1);
        let op = Operation::new();
        dl.execute(&j, &op).await.unwrap();

        let (loaded, _) = dl.primary.load(&j.instrument, j.period).unwrap();
        assert_eq!(loaded.height(), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_run_merges_with_existing_rather_than_overwriting() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap();
        let provider = Arc::new(StubProvider {
            periods: vec![Period::OneDay],
            series: series_with(&[t1, t2], &[999.0, 2.0]),
            calls: AtomicUsize::new(0),
        });
        let (dl, _dir) = test_downloader(super::super::Mode::Updating, provider.clone());

        // Seed a prior run's output directly.
        let seed = series_with(&[t0, t1], &[1.0, 2.0]);
        let seed_meta = Metadata {
            symbol: "AAPL".into(),
            period: "1d".into(),
            requested_start: t0,
            requested_end: t1,
            first_row_ts: Some(t0),
            last_row_ts: Some(t1),
            provider: "stub".into(),
            expiration_ts: None,
            created_ts: t0,
        };
        let j = job(t0, t2);
        dl.primary
            .persist(&seed, &seed_meta, &j.instrument, j.period)
            .unwrap();

        let op = Operation::new();
        dl.execute(&j, &op).await.unwrap();

        let (loaded, _) = dl.primary.load(&j.instrument, j.period).unwrap();
        // t0 from the seed, t1 overwritten by the new fetch, t2 newly added.
        assert_eq!(loaded.height(), 3);
    }

    #[tokio::test]
    async fn sufficient_coverage_skips_the_fetch_entirely() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let provider = Arc::new(StubProvider {
            periods: vec![Period::OneDay],
            series: series_with(&[t0, t1], &[1.0, 2.0]),
            calls: AtomicUsize::new(0),
        });
        let (dl, _dir) = test_downloader(super::super::Mode::Updating, provider.clone());

        let seed = series_with(&[t0, t1], &[1.0, 2.0]);
        let seed_meta = Metadata {
            symbol: "AAPL".into(),
            period: "1d".into(),
            requested_start: t0,
            requested_end: t1,
            first_row_ts: Some(t0),
            last_row_ts: Some(t1),
            provider: "stub".into(),
            expiration_ts: None,
            created_ts: t0,
        };
        let j = job(t0, t1);
        dl.primary
            .persist(&seed, &seed_meta, &j.instrument, j.period)
            .unwrap();

        let op = Operation::new();
        dl.execute(&j, &op).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sparse_fetch_over_a_wide_span_is_reported_as_low_data() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let provider = Arc::new(StubProvider {
            periods: vec![Period::OneDay],
            series: series_with(&[t0], &[100.0]),
            calls: AtomicUsize::new(0),
        });
        let (dl, _dir) = test_downloader(super::super::Mode::Updating, provider);
        let j = job(t0, t1);
        let op = Operation::new();
        let err = dl.execute(&j, &op).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::LowData);
    }

    #[tokio::test]
    async fn empty_fetch_is_reported_as_data_not_found() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let provider = Arc::new(StubProvider {
            periods: vec![Period::OneDay],
            series: PriceSeries::empty(),
            calls: AtomicUsize::new(0),
        });
        let (dl, _dir) = test_downloader(super::super::Mode::Updating, provider);
        let j = job(t0, t1);
        let op = Operation::new();
        let err = dl.execute(&j, &op).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataNotFound);
    }
}
