//! TOML-конфигурация модели и хранилища: все поля необязательны и накладываются на значения по умолчанию.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::forecast::{CombinationPolicy, EnsembleConfig, ForecastConfig, LinearConfig};

pub const DEFAULT_CONFIG_PATH: &str = "config/forecast.toml";
pub const DEFAULT_URL_ENV: &str = "FLIGHTCAST_DB_URL";
pub const DEFAULT_KEY_ENV: &str = "FLIGHTCAST_DB_KEY";
const DEFAULT_TABLE: &str = "flights";
const DEFAULT_PAGE_SIZE: usize = 1000;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    forecast: Option<ForecastSection>,
    linear: Option<LinearSection>,
    ensemble: Option<EnsembleSection>,
    database: Option<DatabaseSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ForecastSection {
    policy: Option<String>,
    test_fraction: Option<f64>,
    max_horizon_days: Option<usize>,
    lags: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinearSection {
    max_iters: Option<u64>,
    history: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnsembleSection {
    #[serde(alias = "trees")]
    n_estimators: Option<usize>,
    seed: Option<u64>,
    max_depth: Option<usize>,
    min_samples_split: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseSection {
    url_env: Option<String>,
    key_env: Option<String>,
    table: Option<String>,
    page_size: Option<usize>,
    max_retries: Option<u32>,
    retry_delay_secs: Option<u64>,
}

/// Откуда и как читать таблицу рейсов. Сами адрес и ключ живут в переменных окружения.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url_env: String,
    pub key_env: String,
    pub table: String,
    pub page_size: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url_env: DEFAULT_URL_ENV.to_string(),
            key_env: DEFAULT_KEY_ENV.to_string(),
            table: DEFAULT_TABLE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedConfig {
    pub policy: CombinationPolicy,
    pub forecast: ForecastConfig,
    pub database: DatabaseConfig,
}

fn resolve(file: ConfigFile) -> Result<ResolvedConfig, String> {
    let mut cfg = ResolvedConfig::default();

    if let Some(section) = file.forecast {
        if let Some(policy) = section.policy {
            cfg.policy = policy.parse()?;
        }
        if let Some(test_fraction) = section.test_fraction {
            cfg.forecast.test_fraction = test_fraction;
        }
        if let Some(max_horizon_days) = section.max_horizon_days {
            cfg.forecast.max_horizon_days = max_horizon_days;
        }
        if let Some(lags) = section.lags {
            cfg.forecast.lags = lags;
        }
    }
    if let Some(section) = file.linear {
        let defaults = LinearConfig::default();
        cfg.forecast.linear = LinearConfig {
            max_iters: section.max_iters.unwrap_or(defaults.max_iters),
            history: section.history.unwrap_or(defaults.history),
        };
    }
    if let Some(section) = file.ensemble {
        let defaults = EnsembleConfig::default();
        cfg.forecast.ensemble = EnsembleConfig {
            n_estimators: section.n_estimators.unwrap_or(defaults.n_estimators),
            seed: section.seed.unwrap_or(defaults.seed),
            max_depth: section.max_depth.or(defaults.max_depth),
            min_samples_split: section
                .min_samples_split
                .unwrap_or(defaults.min_samples_split),
        };
    }
    if let Some(section) = file.database {
        let db = &mut cfg.database;
        if let Some(url_env) = section.url_env {
            db.url_env = url_env;
        }
        if let Some(key_env) = section.key_env {
            db.key_env = key_env;
        }
        if let Some(table) = section.table {
            db.table = table;
        }
        if let Some(page_size) = section.page_size {
            db.page_size = page_size;
        }
        if let Some(max_retries) = section.max_retries {
            db.max_retries = max_retries;
        }
        if let Some(secs) = section.retry_delay_secs {
            db.retry_delay = Duration::from_secs(secs);
        }
    }

    Ok(cfg)
}

fn validate(cfg: &ResolvedConfig) -> Result<(), String> {
    let forecast = &cfg.forecast;
    if !forecast.test_fraction.is_finite()
        || forecast.test_fraction <= 0.0
        || forecast.test_fraction >= 1.0
    {
        return Err("forecast.test_fraction must be within (0, 1)".to_string());
    }
    if forecast.max_horizon_days == 0 {
        return Err("forecast.max_horizon_days must be > 0".to_string());
    }
    if forecast.linear.max_iters == 0 {
        return Err("linear.max_iters must be > 0".to_string());
    }
    if forecast.linear.history == 0 {
        return Err("linear.history must be > 0".to_string());
    }
    if forecast.ensemble.n_estimators == 0 {
        return Err("ensemble.n_estimators must be > 0".to_string());
    }
    if forecast.ensemble.max_depth == Some(0) {
        return Err("ensemble.max_depth must be > 0".to_string());
    }
    if forecast.ensemble.min_samples_split < 2 {
        return Err("ensemble.min_samples_split must be >= 2".to_string());
    }
    let db = &cfg.database;
    if db.url_env.trim().is_empty() || db.key_env.trim().is_empty() {
        return Err("database.url_env and database.key_env must name variables".to_string());
    }
    if db.table.trim().is_empty() {
        return Err("database.table must not be empty".to_string());
    }
    if db.page_size == 0 {
        return Err("database.page_size must be > 0".to_string());
    }
    if db.max_retries == 0 {
        return Err("database.max_retries must be > 0".to_string());
    }
    Ok(())
}

pub fn parse_config(raw: &str) -> Result<ResolvedConfig, String> {
    let file: ConfigFile = toml::from_str(raw).map_err(|err| err.to_string())?;
    let cfg = resolve(file)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Читает конфиг; отсутствие файла по пути по умолчанию не ошибка.
pub fn load_config(path: &Path) -> Result<ResolvedConfig, String> {
    if !path.exists() {
        if path == Path::new(DEFAULT_CONFIG_PATH) {
            tracing::info!("Config {} not found, using built-in defaults", path.display());
            return Ok(ResolvedConfig::default());
        }
        return Err(format!("Config {} does not exist", path.display()));
    }

    let raw = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read config {}: {err}", path.display()))?;
    parse_config(&raw).map_err(|err| format!("Invalid config {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::tempdir;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg, ResolvedConfig::default());
        assert_eq!(cfg.policy, CombinationPolicy::Average);
        assert_eq!(cfg.forecast.max_horizon_days, 180);
        assert_eq!(cfg.database.url_env, DEFAULT_URL_ENV);
    }

    #[test]
    fn sections_override_only_given_fields() {
        let cfg = parse_config(
            r#"
            [forecast]
            policy = "rf"
            lags = false

            [ensemble]
            trees = 25
            max_depth = 6

            [database]
            table = "flights_archive"
            retry_delay_secs = 7
            "#,
        )
        .unwrap();
        assert_eq!(cfg.policy, CombinationPolicy::EnsembleMember);
        assert!(!cfg.forecast.lags);
        assert!((cfg.forecast.test_fraction - 0.2).abs() < f64::EPSILON);
        assert_eq!(cfg.forecast.ensemble.n_estimators, 25);
        assert_eq!(cfg.forecast.ensemble.max_depth, Some(6));
        assert_eq!(cfg.forecast.ensemble.seed, 42);
        assert_eq!(cfg.database.table, "flights_archive");
        assert_eq!(cfg.database.retry_delay, Duration::from_secs(7));
        assert_eq!(cfg.database.key_env, DEFAULT_KEY_ENV);
    }

    #[rstest]
    #[case("[forecast]\ntest_fraction = 1.0", "test_fraction")]
    #[case("[forecast]\nmax_horizon_days = 0", "max_horizon_days")]
    #[case("[forecast]\npolicy = \"median\"", "median")]
    #[case("[ensemble]\nmin_samples_split = 1", "min_samples_split")]
    #[case("[database]\npage_size = 0", "page_size")]
    #[case("[database]\napi_key = \"secret\"", "api_key")]
    fn invalid_values_are_reported(#[case] raw: &str, #[case] needle: &str) {
        let err = parse_config(raw).unwrap_err();
        assert!(err.contains(needle), "unexpected error: {err}");
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(load_config(&path).unwrap_err().contains("does not exist"));
    }

    #[test]
    fn loads_file_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("forecast.toml");
        fs::write(&path, "[linear]\nmax_iters = 50\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.forecast.linear.max_iters, 50);
        assert_eq!(cfg.forecast.linear.history, LinearConfig::default().history);
    }
}
