//! DataProvider interface (C5) and the two representative families named in
//! spec §6: credential-less HTTP+CSV, and cookie-authenticated HTTP+CSRF
//! with a quota allowance.

pub mod free_csv;
pub mod premium;

pub use free_csv::FreeCsvProvider;
pub use premium::PremiumProvider;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::correlation::Operation;
use crate::models::instrument::Instrument;
use crate::models::period::Period;
use crate::models::series::PriceSeries;

/// Current usage against a provider's daily download quota (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowance {
    pub used: u32,
    pub limit: u32,
}

impl Allowance {
    #[must_use]
    pub const fn would_exceed(self, additional: u32) -> bool {
        self.used + additional > self.limit
    }
}

/// A historical-bar source. Implementors receive pre-validated inputs from
/// the planner (`period` supported, `start <= end`, window within
/// `max_window`, `start >= min_start`) but must still validate defensively,
/// since `fetch_bars` may also be called directly in tests.
#[async_trait]
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Idempotent; a no-op for credential-less providers.
    async fn login(&self, op: &Operation) -> crate::error::Result<()> {
        let _ = op;
        Ok(())
    }

    /// Idempotent; a no-op for credential-less providers.
    async fn logout(&self, op: &Operation) -> crate::error::Result<()> {
        let _ = op;
        Ok(())
    }

    fn supported_periods(&self) -> &[Period];

    fn max_window(&self, period: Period) -> Option<Duration>;

    fn min_start(&self, period: Period) -> Option<DateTime<Utc>>;

    /// Bounded fetch. An empty result is returned as an empty `PriceSeries`,
    /// never as an error — the caller decides whether that means
    /// `DataNotFound`.
    async fn fetch_bars(
        &self,
        instrument: &Instrument,
        period: Period,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        op: &Operation,
    ) -> crate::error::Result<PriceSeries>;

    /// Quota pre-flight check (§4.3). Providers without a quota report an
    /// effectively unbounded allowance.
    async fn check_allowance(&self, op: &Operation) -> crate::error::Result<Allowance> {
        let _ = op;
        Ok(Allowance {
            used: 0,
            limit: u32::MAX,
        })
    }
}

pub fn validate_request(
    provider: &dyn DataProvider,
    period: Period,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> crate::error::Result<()> {
    use crate::error::{ErrorContext, VortexError};

    let ctx = || ErrorContext::new().with_provider(provider.name()).with_period(period.code());

    if !provider.supported_periods().contains(&period) {
        return Err(VortexError::validation(
            format!("{} does not support period {period}", provider.name()),
            ctx(),
        ));
    }
    if start > end {
        return Err(VortexError::validation(
            format!("inverted range: start {start} > end {end}"),
            ctx(),
        ));
    }
    if let Some(window) = provider.max_window(period) {
        let span = (end - start).to_std().unwrap_or_default();
        if span > window {
            return Err(VortexError::validation(
                format!("window {span:?} exceeds max_window {window:?}"),
                ctx(),
            ));
        }
    }
    if let Some(min_start) = provider.min_start(period) {
        if start < min_start {
            return Err(VortexError::validation(
                format!("start {start} precedes min_start {min_start}"),
                ctx(),
            ));
        }
    }
    Ok(())
}
