//! Scheduler (C10): drains the planned job list in round-robin order across
//! instruments rather than front-to-back, so one heavily chunked instrument
//! never starves the rest of the catalog for an entire run.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;

use crate::catalog::Catalog;
use crate::correlation::Operation;
use crate::error::{ErrorKind, Result, VortexError};
use crate::models::instrument::{Instrument, MonthCode};
use crate::models::job::DownloadJob;

/// Executes one planned job. Implemented by the downloader; stubbed by tests.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &DownloadJob, op: &Operation) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub skipped: usize,
    pub stopped_early: bool,
}

/// Batch size drained from one instrument's queue per round: futures with a
/// longer delivery cycle get more jobs per visit so a thin-cycle instrument
/// (one or two contracts a year) doesn't wait behind it for many rounds.
fn batch_size(instrument: &Instrument, catalog: &Catalog) -> usize {
    let Instrument::Future { id, .. } = instrument else {
        return 1;
    };
    let cycle_len = catalog
        .get(id)
        .and_then(|entry| entry.cycle.as_deref())
        .map_or(0, |c| MonthCode::parse_cycle(c).len());
    if cycle_len > 10 {
        3
    } else if cycle_len > 7 {
        2
    } else {
        1
    }
}

/// Round-robin queue keyed by instrument id, preserving first-seen order.
struct RoundRobin {
    order: VecDeque<String>,
    queues: HashMap<String, VecDeque<DownloadJob>>,
}

impl RoundRobin {
    fn from_jobs(jobs: Vec<DownloadJob>) -> Self {
        let mut order = VecDeque::new();
        let mut queues: HashMap<String, VecDeque<DownloadJob>> = HashMap::new();
        for job in jobs {
            let id = job.instrument.id().to_string();
            if !queues.contains_key(&id) {
                order.push_back(id.clone());
            }
            queues.entry(id).or_default().push_back(job);
        }
        Self { order, queues }
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Pops up to `n` jobs from the front instrument's queue, rotating that
    /// instrument to the back unless it is now drained.
    fn next_batch(&mut self, n: usize) -> Vec<DownloadJob> {
        let Some(id) = self.order.pop_front() else {
            return Vec::new();
        };
        let queue = self.queues.get_mut(&id).expect("queue tracked in order");
        let mut batch = Vec::with_capacity(n);
        for _ in 0..n {
            match queue.pop_front() {
                Some(job) => batch.push(job),
                None => break,
            }
        }
        if queue.is_empty() {
            self.queues.remove(&id);
        } else {
            self.order.push_back(id);
        }
        batch
    }
}

/// Runs every job in `jobs` to completion (or until a fatal error), visiting
/// instruments round-robin. Per spec §4.10 failure handling:
/// - `DataNotFound` / `LowData` are logged and the run continues.
/// - `AllowanceExceeded` stops the run gracefully, preserving work already
///   done.
/// - everything else propagates and aborts the run.
pub async fn run(
    jobs: Vec<DownloadJob>,
    catalog: &Catalog,
    executor: &dyn JobExecutor,
) -> Result<RunSummary> {
    let mut queue = RoundRobin::from_jobs(jobs);
    let mut summary = RunSummary::default();
    let root_op = Operation::new();

    while !queue.is_empty() {
        let Some(peek_instrument) = queue
            .order
            .front()
            .and_then(|id| queue.queues.get(id))
            .and_then(|q| q.front())
            .map(|job| job.instrument.clone())
        else {
            break;
        };
        let n = batch_size(&peek_instrument, catalog);
        let batch = queue.next_batch(n);
        if batch.is_empty() {
            continue;
        }

        for job in batch {
            let op = root_op.child();
            match executor.execute(&job, &op).await {
                Ok(()) => summary.completed += 1,
                Err(err) => match err.kind() {
                    ErrorKind::DataNotFound | ErrorKind::LowData => {
                        tracing::info!(
                            instrument = job.instrument.id(),
                            period = %job.period,
                            %err,
                            "skipping job"
                        );
                        summary.skipped += 1;
                    }
                    ErrorKind::AllowanceExceeded => {
                        tracing::warn!(%err, "allowance exhausted, stopping run");
                        summary.stopped_early = true;
                        return Ok(summary);
                    }
                    _ => return Err(err),
                },
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AssetClass, InstrumentConfig};
    use crate::error::ErrorContext;
    use crate::models::period::Period;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    fn job(instrument_id: &str, n: i64) -> DownloadJob {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::days(n);
        DownloadJob::new(
            "stub",
            Instrument::Stock {
                id: instrument_id.to_string(),
                symbol: instrument_id.to_string(),
            },
            Period::OneDay,
            start,
            end,
            false,
        )
        .unwrap()
    }

    struct RecordingExecutor {
        seen: Mutex<Vec<String>>,
        fail_on: Option<(String, ErrorKind)>,
    }

    #[async_trait]
    impl JobExecutor for RecordingExecutor {
        async fn execute(&self, job: &DownloadJob, _op: &Operation) -> Result<()> {
            self.seen.lock().push(job.instrument.id().to_string());
            if let Some((id, kind)) = &self.fail_on {
                if job.instrument.id() == id {
                    let ctx = ErrorContext::new().with_instrument(id.clone());
                    return Err(match kind {
                        ErrorKind::DataNotFound => VortexError::DataNotFound { ctx },
                        ErrorKind::LowData => VortexError::LowData { count: 0, ctx },
                        ErrorKind::AllowanceExceeded => {
                            VortexError::AllowanceExceeded { message: "quota".into(), ctx }
                        }
                        _ => VortexError::connection("boom", ctx),
                    });
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn visits_instruments_round_robin() {
        let jobs = vec![job("AAPL", 1), job("AAPL", 2), job("MSFT", 1)];
        let catalog = Catalog::new();
        let executor = RecordingExecutor {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        };
        let summary = run(jobs, &catalog, &executor).await.unwrap();
        assert_eq!(summary.completed, 3);
        let seen = executor.seen.lock();
        assert_eq!(*seen, vec!["AAPL", "MSFT", "AAPL"]);
    }

    #[tokio::test]
    async fn data_not_found_is_skipped_not_fatal() {
        let jobs = vec![job("AAPL", 1), job("MSFT", 1)];
        let catalog = Catalog::new();
        let executor = RecordingExecutor {
            seen: Mutex::new(Vec::new()),
            fail_on: Some(("AAPL".to_string(), ErrorKind::DataNotFound)),
        };
        let summary = run(jobs, &catalog, &executor).await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.stopped_early);
    }

    #[tokio::test]
    async fn allowance_exceeded_stops_gracefully() {
        let jobs = vec![job("AAPL", 1), job("AAPL", 2), job("MSFT", 1)];
        let catalog = Catalog::new();
        let executor = RecordingExecutor {
            seen: Mutex::new(Vec::new()),
            fail_on: Some(("AAPL".to_string(), ErrorKind::AllowanceExceeded)),
        };
        let summary = run(jobs, &catalog, &executor).await.unwrap();
        assert!(summary.stopped_early);
        assert_eq!(summary.completed, 0);
    }

    #[tokio::test]
    async fn connection_error_propagates() {
        let jobs = vec![job("AAPL", 1)];
        let catalog = Catalog::new();
        let executor = RecordingExecutor {
            seen: Mutex::new(Vec::new()),
            fail_on: Some(("AAPL".to_string(), ErrorKind::Connection)),
        };
        let result = run(jobs, &catalog, &executor).await;
        assert!(result.is_err());
    }

    #[test]
    fn futures_with_long_cycle_batch_by_three() {
        let mut catalog = Catalog::new();
        catalog.insert(
            "CL".into(),
            InstrumentConfig {
                code: "CL".into(),
                asset_class: AssetClass::Future,
                periods: None,
                cycle: Some("FGHJKMNQUVXZ".into()),
                tick_date: None,
                start_date: None,
                days_count: Some(180),
                tz: "America/New_York".into(),
            },
        );
        let instrument = Instrument::Future {
            id: "CL".into(),
            root: "CL".into(),
            year: 2024,
            month_code: MonthCode::F,
            tick_date: None,
            days_count: 180,
        };
        assert_eq!(batch_size(&instrument, &catalog), 3);
    }
}
