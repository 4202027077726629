//! Downloader (C11/C12): executes one `DownloadJob` against its named
//! provider and storage, either incrementally merging with existing data
//! (the "updating" mode, §4.9) or overwriting unconditionally (the
//! "backfill" mode, §4.10).

pub mod backfill;
pub mod merge;
pub mod updating;
pub mod validation;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use crate::correlation::Operation;
use crate::error::{ErrorContext, Result, VortexError};
use crate::provider::DataProvider;
use crate::resilience::circuit_breaker::BreakerRegistry;
use crate::resilience::retry::RetryConfig;
use crate::scheduler::JobExecutor;
use crate::storage::Storage;
use crate::models::job::DownloadJob;

/// Whether a job is executed incrementally (load, narrow, merge, persist)
/// or unconditionally (always fetch the full window and overwrite).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Updating,
    Backfill,
}

/// Everything a job needs that isn't carried on the job itself: the named
/// provider and storage registries, the shared breaker, retry policy, and
/// the general run settings that affect every job identically.
pub struct Downloader {
    providers: HashMap<String, Arc<dyn DataProvider>>,
    primary: Arc<dyn Storage>,
    backup: Option<Arc<dyn Storage>>,
    breaker: Arc<BreakerRegistry>,
    retry_config: RetryConfig,
    random_sleep_max_secs: u64,
    force_backup: bool,
    mode: Mode,
}

impl Downloader {
    #[must_use]
    pub fn new(
        providers: HashMap<String, Arc<dyn DataProvider>>,
        primary: Arc<dyn Storage>,
        backup: Option<Arc<dyn Storage>>,
        breaker: Arc<BreakerRegistry>,
        retry_config: RetryConfig,
        random_sleep_max_secs: u64,
        force_backup: bool,
        mode: Mode,
    ) -> Self {
        Self {
            providers,
            primary,
            backup,
            breaker,
            retry_config,
            random_sleep_max_secs,
            force_backup,
            mode,
        }
    }

    fn provider_for(&self, job: &DownloadJob) -> Result<Arc<dyn DataProvider>> {
        self.providers.get(&job.provider_name).cloned().ok_or_else(|| {
            VortexError::config(format!("unknown provider: {}", job.provider_name))
        })
    }

    /// Rate-smoothing sleep (§4.9 step 4): a uniformly random wait before
    /// the network call, configured off by a zero max.
    async fn rate_smoothing_sleep(&self) {
        if self.random_sleep_max_secs == 0 {
            return;
        }
        let secs = rand::rng().random_range(1..=self.random_sleep_max_secs);
        tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
    }

    /// Runs `call` through the circuit breaker and retry manager together:
    /// a tripped breaker rejects immediately without invoking `call`, and a
    /// successful/failed attempt feeds back into the breaker's consecutive
    /// failure count (§4.4, §4.5).
    async fn guarded_call<T, F, Fut>(&self, provider_name: &str, op: &Operation, call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if self.breaker.is_open(provider_name) {
            return Err(VortexError::CircuitOpen {
                ctx: ErrorContext::new()
                    .with_correlation(op.id())
                    .with_provider(provider_name),
            });
        }
        let result = crate::resilience::retry::retry_call(op, self.retry_config, call).await;
        self.breaker
            .record_outcome(provider_name, result.as_ref().err().map(VortexError::kind));
        result
    }
}

#[async_trait]
impl JobExecutor for Downloader {
    async fn execute(&self, job: &DownloadJob, op: &Operation) -> Result<()> {
        let provider = self.provider_for(job)?;
        match self.mode {
            Mode::Updating => {
                updating::run(self, provider.as_ref(), job, op).await
            }
            Mode::Backfill => backfill::run(self, provider.as_ref(), job, op).await,
        }
    }
}
