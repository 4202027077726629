//! Credential-less HTTP+CSV provider family (§6): stateless GET-by-symbol
//! against a free quote service. `login`/`logout` are no-ops (trait
//! defaults). Retry/backoff on 429 and 5xx mirrors the teacher's
//! `EodhdProvider::throttled_get`.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polars::prelude::*;
use reqwest::Client;

use crate::correlation::Operation;
use crate::error::{ErrorContext, VortexError};
use crate::models::instrument::Instrument;
use crate::models::period::Period;
use crate::models::series::{PriceSeries, TIMESTAMP_COL};

use super::DataProvider;

const MAX_RETRIES: u32 = 5;

pub struct FreeCsvProvider {
    name: String,
    base_url: String,
    client: Client,
    max_window: Duration,
}

impl FreeCsvProvider {
    #[must_use]
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, max_window: Duration) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("static TLS config is always buildable"),
            max_window,
        }
    }

    fn ctx(&self, instrument: &Instrument, period: Period) -> ErrorContext {
        ErrorContext::new()
            .with_provider(self.name())
            .with_instrument(instrument.id())
            .with_period(period.code())
    }

    /// Rate-limited GET with exponential backoff on 429/5xx, same shape as
    /// the teacher's `throttled_get`.
    async fn throttled_get(
        &self,
        url: &str,
        params: &[(&str, String)],
        ctx: &ErrorContext,
    ) -> crate::error::Result<String> {
        for attempt in 0..=MAX_RETRIES {
            let resp = self
                .client
                .get(url)
                .query(params)
                .send()
                .await
                .map_err(|e| VortexError::connection(e.to_string(), ctx.clone()))?;

            let status = resp.status().as_u16();

            if status == 429 || status >= 500 {
                if attempt == MAX_RETRIES {
                    return Err(VortexError::connection(
                        format!("{} gave up after {status} responses", self.name()),
                        ctx.clone(),
                    ));
                }
                let wait = 2u64.pow(attempt + 1);
                tracing::warn!(provider = %self.name(), status, wait, attempt, "backing off");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if !resp.status().is_success() {
                return Err(VortexError::connection(
                    format!("unexpected status {status}"),
                    ctx.clone(),
                ));
            }

            return resp
                .text()
                .await
                .map_err(|e| VortexError::connection(e.to_string(), ctx.clone()));
        }
        unreachable!("loop always returns or errors within MAX_RETRIES")
    }
}

#[async_trait]
impl DataProvider for FreeCsvProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_periods(&self) -> &[Period] {
        &[Period::OneDay, Period::OneWeek, Period::OneMonth]
    }

    fn max_window(&self, _period: Period) -> Option<Duration> {
        Some(self.max_window)
    }

    fn min_start(&self, _period: Period) -> Option<DateTime<Utc>> {
        None
    }

    async fn fetch_bars(
        &self,
        instrument: &Instrument,
        period: Period,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        op: &Operation,
    ) -> crate::error::Result<PriceSeries> {
        super::validate_request(self, period, start, end)?;
        let ctx = self.ctx(instrument, period).with_correlation(op.id());

        let url = format!("{}/{}", self.base_url, instrument.symbol());
        let params = [
            ("period", period.code().to_string()),
            ("from", start.format("%Y-%m-%d").to_string()),
            ("to", end.format("%Y-%m-%d").to_string()),
        ];
        let body = self.throttled_get(&url, &params, &ctx).await?;

        if body.trim().is_empty() {
            return Ok(PriceSeries::empty());
        }

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .into_reader_with_file_handle(Cursor::new(body))
            .finish()
            .map_err(|e| VortexError::connection(format!("CSV parse error: {e}"), ctx.clone()))?;

        let df = df
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
            .map_err(|e| VortexError::connection(e.to_string(), ctx))?;

        Ok(PriceSeries::from_dataframe(df))
    }
}
