//! Cookie-authenticated HTTP+CSRF provider family (§6): login harvests a
//! CSRF token from a meta tag on the home page, the session cookie jar is
//! then reused for form-POST downloads and the allowance pre-flight check.
//! One re-login is attempted transparently on session expiry; a second
//! failure surfaces `AuthenticationError` per §4.3.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use polars::prelude::*;
use reqwest::Client;

use crate::correlation::Operation;
use crate::error::{ErrorContext, VortexError};
use crate::models::instrument::Instrument;
use crate::models::period::Period;
use crate::models::series::{PriceSeries, TIMESTAMP_COL};

use super::{Allowance, DataProvider};

#[derive(Debug, Clone, Default)]
struct Session {
    csrf_token: Option<String>,
}

pub struct PremiumProvider {
    name: String,
    base_url: String,
    username: String,
    password: String,
    client: Client,
    session: Arc<RwLock<Session>>,
}

impl PremiumProvider {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            client: Client::builder()
                .cookie_store(true)
                .timeout(Duration::from_secs(30))
                .build()
                .expect("static TLS config is always buildable"),
            session: Arc::new(RwLock::new(Session::default())),
        }
    }

    fn ctx(&self) -> ErrorContext {
        ErrorContext::new().with_provider(self.name())
    }

    fn is_logged_in(&self) -> bool {
        self.session.read().csrf_token.is_some()
    }

    /// Harvest `<meta name="csrf-token" content="...">` from the home page.
    fn extract_csrf_token(html: &str) -> Option<String> {
        let marker = "name=\"csrf-token\" content=\"";
        let start = html.find(marker)? + marker.len();
        let end = html[start..].find('"')? + start;
        Some(html[start..end].to_string())
    }

    async fn do_login(&self) -> crate::error::Result<()> {
        let login_url = format!("{}/login", self.base_url);
        self.client
            .post(&login_url)
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await
            .map_err(|e| VortexError::Authentication {
                message: e.to_string(),
                ctx: self.ctx(),
            })?;

        let home_url = format!("{}/", self.base_url);
        let home = self
            .client
            .get(&home_url)
            .send()
            .await
            .map_err(|e| VortexError::Authentication {
                message: e.to_string(),
                ctx: self.ctx(),
            })?
            .text()
            .await
            .map_err(|e| VortexError::Authentication {
                message: e.to_string(),
                ctx: self.ctx(),
            })?;

        let token = Self::extract_csrf_token(&home).ok_or_else(|| VortexError::Authentication {
            message: "csrf-token meta tag not found on home page".into(),
            ctx: self.ctx(),
        })?;

        self.session.write().csrf_token = Some(token);
        Ok(())
    }
}

#[async_trait]
impl DataProvider for PremiumProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn login(&self, _op: &Operation) -> crate::error::Result<()> {
        if self.is_logged_in() {
            return Ok(());
        }
        self.do_login().await
    }

    async fn logout(&self, _op: &Operation) -> crate::error::Result<()> {
        self.session.write().csrf_token = None;
        Ok(())
    }

    fn supported_periods(&self) -> &[Period] {
        &[Period::OneDay]
    }

    fn max_window(&self, _period: Period) -> Option<Duration> {
        None
    }

    fn min_start(&self, _period: Period) -> Option<DateTime<Utc>> {
        None
    }

    /// Pre-flight allowance check (§4.3): a GET to the provider's quota
    /// endpoint using the authenticated session.
    async fn check_allowance(&self, op: &Operation) -> crate::error::Result<Allowance> {
        self.login(op).await?;
        let token = self
            .session
            .read()
            .csrf_token
            .clone()
            .ok_or_else(|| VortexError::Authentication {
                message: "no active session".into(),
                ctx: self.ctx(),
            })?;

        let url = format!("{}/allowance", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("X-CSRF-Token", token)
            .send()
            .await
            .map_err(|e| VortexError::connection(e.to_string(), self.ctx()))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(VortexError::Authentication {
                message: "session rejected by allowance endpoint".into(),
                ctx: self.ctx(),
            });
        }

        #[derive(serde::Deserialize)]
        struct AllowanceResponse {
            used: u32,
            limit: u32,
        }
        let body: AllowanceResponse = resp
            .json()
            .await
            .map_err(|e| VortexError::connection(e.to_string(), self.ctx()))?;
        Ok(Allowance {
            used: body.used,
            limit: body.limit,
        })
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

        let allowance = self.check_allowance(op).await?;
        if allowance.would_exceed(1) {
            return Err(VortexError::AllowanceExceeded {
                message: format!("{}/{} downloads used today", allowance.used, allowance.limit),
                ctx: self.ctx().with_instrument(instrument.id()),
            });
        }

        let token = self
            .session
            .read()
            .csrf_token
            .clone()
            .expect("check_allowance above guarantees a session");

        let mut attempted_relogin = false;
        loop {
            let url = format!("{}/download", self.base_url);
            let resp = self
                .client
                .post(&url)
                .header("X-CSRF-Token", token.clone())
                .form(&[
                    ("symbol", instrument.symbol()),
                    ("period", period.code().to_string()),
                    ("from", start.format("%Y-%m-%d").to_string()),
                    ("to", end.format("%Y-%m-%d").to_string()),
                ])
                .send()
                .await
                .map_err(|e| VortexError::connection(e.to_string(), self.ctx()))?;

            if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
                if attempted_relogin {
                    return Err(VortexError::Authentication {
                        message: "session refused after re-login".into(),
                        ctx: self.ctx(),
                    });
                }
                self.session.write().csrf_token = None;
                self.do_login().await?;
                attempted_relogin = true;
                continue;
            }

            let body = resp
                .text()
                .await
                .map_err(|e| VortexError::connection(e.to_string(), self.ctx()))?;

            if body.trim().is_empty() {
                return Ok(PriceSeries::empty());
            }

            let df = CsvReadOptions::default()
                .with_has_header(true)
                .into_reader_with_file_handle(std::io::Cursor::new(body))
                .finish()
                .map_err(|e| VortexError::connection(format!("CSV parse error: {e}"), self.ctx()))?;

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
                .map_err(|e| VortexError::connection(e.to_string(), self.ctx()))?;

            return Ok(PriceSeries::from_dataframe(df));
        }
    }
}
