//! Backfill downloader (C12) — the simpler variant, spec §4.10: always fetch
//! the full job window and persist it unconditionally, with no coverage
//! check, no narrowing, and no merge against whatever is already on disk.
//! Used for seeding a fresh store or deliberately overwriting one.

use chrono::Utc;

use crate::correlation::Operation;
use crate::error::{ErrorContext, Result, VortexError};
use crate::models::job::DownloadJob;
use crate::models::series::{Metadata, PriceSeries};
use crate::provider::DataProvider;

use super::{validation, Downloader};

fn ctx(job: &DownloadJob, op: &Operation) -> ErrorContext {
    ErrorContext::new()
        .with_correlation(op.id())
        .with_provider(job.provider_name.clone())
        .with_instrument(job.instrument.id())
        .with_period(job.period.code())
}

fn build_metadata(job: &DownloadJob, series: &PriceSeries) -> Result<Metadata> {
    Ok(Metadata {
        symbol: job.instrument.symbol(),
        period: job.period.code().to_string(),
        requested_start: job.start,
        requested_end: job.end,
        first_row_ts: series.first_ts()?,
        last_row_ts: series.last_ts()?,
        provider: job.provider_name.clone(),
        expiration_ts: None,
        created_ts: Utc::now(),
    })
}

pub async fn run(
    dl: &Downloader,
    provider: &dyn DataProvider,
    job: &DownloadJob,
    op: &Operation,
) -> Result<()> {
    dl.rate_smoothing_sleep().await;

    let fetch_op = op.child();
    let provider_name = job.provider_name.clone();
    let fetched = dl
        .guarded_call(&provider_name, &fetch_op, || {
            provider.fetch_bars(&job.instrument, job.period, job.start, job.end, &fetch_op)
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

    let metadata = build_metadata(job, &fetched)?;
    dl.primary.persist(&fetched, &metadata, &job.instrument, job.period)?;
    if job.use_backup {
        if let Some(backup) = &dl.backup {
            backup.persist(&fetched, &metadata, &job.instrument, job.period)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::Operation;
    use crate::models::instrument::Instrument;
    use crate::models::period::Period;
    use crate::models::series::{CLOSE_COL, HIGH_COL, LOW_COL, OPEN_COL, TIMESTAMP_COL, VOLUME_COL};
    use crate::resilience::circuit_breaker::BreakerRegistry;
    use crate::resilience::retry::RetryConfig;
    use crate::scheduler::JobExecutor;
    use crate::storage::file_storage::FileStorage;
    use crate::storage::CsvStorage;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
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

    fn test_downloader(provider: Arc<dyn DataProvider>) -> (Downloader, tempfile::TempDir) {
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
            super::super::Mode::Backfill,
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
    async fn backfill_overwrites_existing_data_without_merging() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let provider = Arc::new(StubProvider {
            periods: vec![Period::OneDay],
            series: series_with(&[t1], &[42.0]),
            calls: AtomicUsize::new(0),
        });
        let (dl, _dir) = test_downloader(provider.clone());
        let j = job(t0, t1);

        let seed = series_with(&[t0], &[1.0]);
        let seed_meta = build_metadata(&j, &seed).unwrap();
        dl.primary
            .persist(&seed, &seed_meta, &j.instrument, j.period)
            .unwrap();

        let op = Operation::new();
        dl.execute(&j, &op).await.unwrap();

        let (loaded, _) = dl.primary.load(&j.instrument, j.period).unwrap();
        // Only the fresh fetch survives; the seeded row is gone entirely.
        assert_eq!(loaded.height(), 1);
        let open = loaded.dataframe().column(OPEN_COL).unwrap().f64().unwrap();
        assert_eq!(open.get(0), Some(42.0));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
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
        let (dl, _dir) = test_downloader(provider);
        let j = job(t0, t1);
        let op = Operation::new();
        let err = dl.execute(&j, &op).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataNotFound);
    }
}
