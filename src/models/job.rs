//! `DownloadJob` — an immutable, stateless fetch request (§3).
//!
//! The planner emits these; the scheduler queues and drains them; the
//! downloader executes them. A job names its provider by id rather than
//! embedding a trait object so it stays `Clone` and cheap to hold in queues;
//! the downloader resolves the provider (and primary/backup storage) from
//! its own registries at execution time.

use chrono::{DateTime, Utc};

use crate::error::{ErrorContext, VortexError};
use crate::models::instrument::Instrument;
use crate::models::period::Period;

#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub provider_name: String,
    pub instrument: Instrument,
    pub period: Period,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Whether this job's downloader run should also persist to a configured
    /// backup storage, mirroring `general.backupEnabled`.
    pub use_backup: bool,
}

impl DownloadJob {
    pub fn new(
        provider_name: impl Into<String>,
        instrument: Instrument,
        period: Period,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        use_backup: bool,
    ) -> crate::error::Result<Self> {
        if start > end {
            return Err(VortexError::validation(
                format!("inverted job range: start {start} > end {end}"),
                ErrorContext::new()
                    .with_instrument(instrument.id())
                    .with_period(period.code()),
            ));
        }
        Ok(Self {
            provider_name: provider_name.into(),
            instrument,
            period,
            start,
            end,
            use_backup,
        })
    }

    #[must_use]
    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::instrument::Instrument;
    use chrono::TimeZone;

    #[test]
    fn rejects_inverted_range() {
        let instrument = Instrument::Stock {
            id: "AAPL".into(),
            symbol: "AAPL".into(),
        };
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let job = DownloadJob::new("eodhd", instrument, Period::OneDay, start, end, false);
        assert!(job.is_err());
    }
}
