//! Configuration (§6, §10.3): a `toml` document deserialized with `serde`,
//! overridable by `VORTEX_`-prefixed environment variables. The key set is
//! small and fully enumerated in spec §6, so overrides are applied
//! explicitly rather than through implicit env-to-struct derivation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::VortexError;

fn default_output_directory() -> PathBuf {
    PathBuf::from("./data")
}

fn default_random_sleep_max() -> u64 {
    10
}

fn default_start_year() -> i32 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralConfig {
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    #[serde(default)]
    pub backup_enabled: bool,
    #[serde(default)]
    pub force_backup: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_random_sleep_max")]
    pub random_sleep_max: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_directory: default_output_directory(),
            backup_enabled: false,
            force_backup: false,
            dry_run: false,
            random_sleep_max: default_random_sleep_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeConfig {
    #[serde(default = "default_start_year")]
    pub start_year: i32,
    pub end_year: Option<i32>,
}

impl Default for DateRangeConfig {
    fn default() -> Self {
        Self {
            start_year: default_start_year(),
            end_year: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default, rename = "dateRange")]
    pub date_range: DateRangeConfig,
    #[serde(default)]
    pub providers: std::collections::HashMap<String, toml::Value>,
}

impl Config {
    /// Load from `path` (default `./vortex.toml`), then apply `VORTEX_`
    /// environment variable overrides for the recognized keys in §6.
    pub fn load(path: Option<&Path>) -> crate::error::Result<Self> {
        let default_path = PathBuf::from("./vortex.toml");
        let path = path.unwrap_or(&default_path);

        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| VortexError::config(format!("failed to read {}: {e}", path.display())))?;
            toml::from_str(&text)
                .map_err(|e| VortexError::config(format!("failed to parse {}: {e}", path.display())))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> crate::error::Result<()> {
        if let Ok(v) = std::env::var("VORTEX_GENERAL_OUTPUT_DIRECTORY") {
            self.general.output_directory = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("VORTEX_GENERAL_BACKUP_ENABLED") {
            self.general.backup_enabled = parse_bool(&v)?;
        }
        if let Ok(v) = std::env::var("VORTEX_GENERAL_FORCE_BACKUP") {
            self.general.force_backup = parse_bool(&v)?;
        }
        if let Ok(v) = std::env::var("VORTEX_GENERAL_DRY_RUN") {
            self.general.dry_run = parse_bool(&v)?;
        }
        if let Ok(v) = std::env::var("VORTEX_GENERAL_RANDOM_SLEEP_MAX") {
            self.general.random_sleep_max = v
                .parse()
                .map_err(|_| VortexError::config(format!("invalid VORTEX_GENERAL_RANDOM_SLEEP_MAX: {v}")))?;
        }
        if let Ok(v) = std::env::var("VORTEX_DATERANGE_STARTYEAR") {
            self.date_range.start_year = v
                .parse()
                .map_err(|_| VortexError::config(format!("invalid VORTEX_DATERANGE_STARTYEAR: {v}")))?;
        }
        if let Ok(v) = std::env::var("VORTEX_DATERANGE_ENDYEAR") {
            self.date_range.end_year = Some(
                v.parse()
                    .map_err(|_| VortexError::config(format!("invalid VORTEX_DATERANGE_ENDYEAR: {v}")))?,
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn effective_end_year(&self, now_year: i32) -> i32 {
        self.date_range.end_year.unwrap_or(now_year)
    }
}

fn parse_bool(v: &str) -> crate::error::Result<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(VortexError::config(format!("invalid boolean: {other}"))),
    }
}
