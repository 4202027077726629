// float_cmp: only in tests where assert_eq! on f64 is intentional.
#![cfg_attr(test, allow(clippy::float_cmp))]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use vortex::catalog::{self, Catalog};
use vortex::config::Config;
use vortex::downloader::{Downloader, Mode};
use vortex::error::VortexError;
use vortex::provider::{DataProvider, FreeCsvProvider, PremiumProvider};
use vortex::resilience::circuit_breaker::{BreakerConfig, BreakerRegistry};
use vortex::resilience::retry::RetryConfig;
use vortex::storage::{CsvStorage, FileStorage, ParquetStorage, Storage};
use vortex::{planner, scheduler};

/// Out of scope per spec: flag parsing, help text, shell completion. We only
/// read the two fixed document paths (overridable by env, like every other
/// config key) and a mode switch, mirroring the teacher's environment-driven
/// bring-up in `main.rs` rather than building an argument parser.
fn catalog_path() -> PathBuf {
    std::env::var("VORTEX_CATALOG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./catalog.toml"))
}

fn config_path() -> Option<PathBuf> {
    std::env::var("VORTEX_CONFIG_PATH").ok().map(PathBuf::from)
}

fn run_mode() -> Mode {
    match std::env::var("VORTEX_MODE").as_deref() {
        Ok("backfill") => Mode::Backfill,
        _ => Mode::Updating,
    }
}

/// Builds the provider registry from `providers.<name>.*` config entries.
/// Each entry must carry a `type` of `"free_csv"` or `"premium"`; anything
/// else is a config error rather than a silent skip, since a planned job
/// naming an unresolvable provider would otherwise fail much later.
fn build_providers(config: &Config) -> Result<HashMap<String, Arc<dyn DataProvider>>, VortexError> {
    let mut providers: HashMap<String, Arc<dyn DataProvider>> = HashMap::new();
    for (name, value) in &config.providers {
        let table = value
            .as_table()
            .ok_or_else(|| VortexError::config(format!("providers.{name} must be a table")))?;
        let kind = table
            .get("type")
            .and_then(toml::Value::as_str)
            .ok_or_else(|| VortexError::config(format!("providers.{name}.type is required")))?;

        let provider: Arc<dyn DataProvider> = match kind {
            "free_csv" => {
                let base_url = table
                    .get("baseUrl")
                    .and_then(toml::Value::as_str)
                    .ok_or_else(|| VortexError::config(format!("providers.{name}.baseUrl is required")))?;
                let max_window_days = table
                    .get("maxWindowDays")
                    .and_then(toml::Value::as_integer)
                    .unwrap_or(365);
                Arc::new(FreeCsvProvider::new(
                    name.clone(),
                    base_url,
                    Duration::from_secs(max_window_days as u64 * 86_400),
                ))
            }
            "premium" => {
                let base_url = table
                    .get("baseUrl")
                    .and_then(toml::Value::as_str)
                    .ok_or_else(|| VortexError::config(format!("providers.{name}.baseUrl is required")))?;
                let username = table
                    .get("username")
                    .and_then(toml::Value::as_str)
                    .ok_or_else(|| VortexError::config(format!("providers.{name}.username is required")))?;
                let password = table
                    .get("password")
                    .and_then(toml::Value::as_str)
                    .ok_or_else(|| VortexError::config(format!("providers.{name}.password is required")))?;
                Arc::new(PremiumProvider::new(name.clone(), base_url, username, password))
            }
            other => {
                return Err(VortexError::config(format!(
                    "providers.{name}: unrecognized type {other}"
                )))
            }
        };
        providers.insert(name.clone(), provider);
    }
    Ok(providers)
}

fn build_storage(config: &Config, dry_run: bool) -> Arc<dyn Storage> {
    let file_storage = FileStorage::new(config.general.output_directory.clone(), dry_run);
    Arc::new(CsvStorage::new(file_storage))
}

fn build_backup_storage(config: &Config, dry_run: bool) -> Option<Arc<dyn Storage>> {
    if !config.general.backup_enabled {
        return None;
    }
    let backup_dir = config.general.output_directory.join("backup");
    let file_storage = FileStorage::new(backup_dir, dry_run);
    Some(Arc::new(ParquetStorage::new(file_storage)))
}

async fn try_main() -> Result<(), VortexError> {
    let config = Config::load(config_path().as_deref())?;
    let catalog: Catalog = catalog::load(&catalog_path())?;

    let providers = build_providers(&config)?;
    if providers.is_empty() {
        return Err(VortexError::config(
            "no providers configured under providers.<name>".to_string(),
        ));
    }

    let primary = build_storage(&config, config.general.dry_run);
    let backup = build_backup_storage(&config, config.general.dry_run);
    let breaker = Arc::new(BreakerRegistry::new(BreakerConfig::default()));

    let downloader = Downloader::new(
        providers.clone(),
        primary,
        backup,
        breaker,
        RetryConfig::default(),
        config.general.random_sleep_max,
        config.general.force_backup,
        run_mode(),
    );

    let now_year = chrono::Utc::now().format("%Y").to_string().parse().unwrap_or(config.date_range.start_year);
    let end_year = config.effective_end_year(now_year);

    let mut jobs = Vec::new();
    for provider in providers.values() {
        jobs.extend(planner::plan_catalog(
            &catalog,
            provider.as_ref(),
            config.date_range.start_year,
            end_year,
            config.general.backup_enabled,
        )?);
    }

    tracing::info!(jobs = jobs.len(), "plan complete, starting run");
    let summary = scheduler::run(jobs, &catalog, &downloader).await?;
    tracing::info!(
        completed = summary.completed,
        skipped = summary.skipped,
        stopped_early = summary.stopped_early,
        "run complete"
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = try_main().await {
        tracing::error!(%err, exit_code = err.exit_code(), "run failed");
        std::process::exit(err.exit_code());
    }
}
