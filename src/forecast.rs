//! Прогноз дневного числа рейсов: признаки, разбиение по времени, две модели и пошаговый прогноз.

mod ensemble;
mod features;
mod linear;
mod metrics;
mod output;
mod recursive;
mod split;
mod trainer;

use std::error::Error;
use std::fmt;

use chrono::NaiveDate;

use crate::constants::{DATE_FORMAT, DEFAULT_MAX_HORIZON_DAYS};

pub use ensemble::EnsembleConfig;
pub use features::{CalendarFeatures, FeatureFrame, FeatureRow, FeatureSet};
pub use linear::LinearConfig;
pub use metrics::{ForecastMetrics, ModelMetrics};
pub use output::{
    ForecastRecord, MetricsReport, read_forecast_csv, read_metrics_json, write_forecast_csv,
    write_metrics_json,
};
pub use recursive::{CombinationPolicy, ForecastRow, HistoryTail};
pub use split::DEFAULT_TEST_FRACTION;

/// Обученная модель, которая умеет предсказывать по вектору признаков своего набора.
pub trait Regressor {
    fn feature_set(&self) -> FeatureSet;
    fn predict(&self, features: &[f64]) -> f64;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForecastError {
    InsufficientData {
        stage: &'static str,
        available: usize,
        required: usize,
    },
    InvalidHorizon {
        requested: usize,
        max: Option<usize>,
    },
    InvalidTestFraction(f64),
    DuplicateDate(NaiveDate),
    FeatureMismatch,
    Solver(String),
}

impl fmt::Display for ForecastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData {
                stage,
                available,
                required,
            } => write!(
                f,
                "not enough data for forecasting ({stage}): {available} rows, need at least {required}"
            ),
            Self::InvalidHorizon {
                requested,
                max: Some(max),
            } => write!(f, "forecast horizon must be within 1..={max} days, got {requested}"),
            Self::InvalidHorizon {
                requested,
                max: None,
            } => write!(f, "forecast horizon must be positive, got {requested}"),
            Self::InvalidTestFraction(fraction) => {
                write!(f, "test fraction must be within (0, 1), got {fraction}")
            }
            Self::DuplicateDate(date) => {
                write!(f, "duplicate date {} in daily series", date.format(DATE_FORMAT))
            }
            Self::FeatureMismatch => {
                f.write_str("feature columns differ between training and prediction")
            }
            Self::Solver(err) => write!(f, "linear model solver failed: {err}"),
        }
    }
}

impl Error for ForecastError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u32,
}

/// Дневной ряд: даты уникальны и идут по возрастанию, пропуски не заполняются.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DailyCountSeries {
    records: Vec<DailyCount>,
}

impl DailyCountSeries {
    pub fn new(mut records: Vec<DailyCount>) -> Result<Self, ForecastError> {
        records.sort_by_key(|record| record.date);
        if let Some(pair) = records.windows(2).find(|pair| pair[0].date == pair[1].date) {
            return Err(ForecastError::DuplicateDate(pair[0].date));
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[DailyCount] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn counts(&self) -> Vec<u32> {
        self.records.iter().map(|record| record.count).collect()
    }

    fn tail(&self) -> Option<HistoryTail> {
        let last = self.records.last()?;
        HistoryTail::new(last.date, &self.counts())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForecastConfig {
    pub test_fraction: f64,
    pub lags: bool,
    pub max_horizon_days: usize,
    pub linear: LinearConfig,
    pub ensemble: EnsembleConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            test_fraction: DEFAULT_TEST_FRACTION,
            lags: true,
            max_horizon_days: DEFAULT_MAX_HORIZON_DAYS,
            linear: LinearConfig::default(),
            ensemble: EnsembleConfig::default(),
        }
    }
}

/// Точка итогового ряда: факт (`forecast = false`) или прогноз.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub count: u32,
    pub forecast: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForecastResult {
    pub points: Vec<ForecastPoint>,
    pub rows: Vec<ForecastRow>,
    pub metrics: ForecastMetrics,
    pub policy: CombinationPolicy,
}

impl ForecastResult {
    pub fn history(&self) -> impl Iterator<Item = &ForecastPoint> {
        self.points.iter().filter(|point| !point.forecast)
    }

    pub fn forecast(&self) -> impl Iterator<Item = &ForecastPoint> {
        self.points.iter().filter(|point| point.forecast)
    }
}

/// Склеивает факт и прогноз в один хронологический ряд.
pub fn assemble(series: &DailyCountSeries, rows: &[ForecastRow]) -> Vec<ForecastPoint> {
    series
        .records()
        .iter()
        .map(|record| ForecastPoint {
            date: record.date,
            count: record.count,
            forecast: false,
        })
        .chain(rows.iter().map(|row| ForecastPoint {
            date: row.date,
            count: row.prediction,
            forecast: true,
        }))
        .collect()
}

fn validate_horizon(horizon_days: usize, max_horizon_days: usize) -> Result<(), ForecastError> {
    if horizon_days == 0 || horizon_days > max_horizon_days {
        return Err(ForecastError::InvalidHorizon {
            requested: horizon_days,
            max: Some(max_horizon_days),
        });
    }
    Ok(())
}

/// Полный конвейер: признаки, разбиение, две модели, пошаговый прогноз и сборка результата.
pub fn forecast(
    series: &DailyCountSeries,
    horizon_days: usize,
    policy: CombinationPolicy,
    config: &ForecastConfig,
) -> Result<ForecastResult, ForecastError> {
    validate_horizon(horizon_days, config.max_horizon_days)?;

    let frame = features::fitting_frame(series, config.lags)?;
    let trained = trainer::train_and_evaluate(
        &frame,
        config.test_fraction,
        config.linear,
        config.ensemble,
    )?;
    tracing::debug!(
        rows = frame.rows.len(),
        train = trained.train_rows,
        test = trained.test_rows,
        features = ?frame.feature_set.column_names(),
        trees = trained.ensemble.n_trees(),
        intercept = trained.linear.intercept(),
        coefficients = ?trained.linear.coefficients(),
        "Models trained"
    );

    let tail = series.tail().ok_or(ForecastError::InsufficientData {
        stage: "history",
        available: 0,
        required: 1,
    })?;
    let rows = recursive::recursive_forecast(
        &trained.linear,
        &trained.ensemble,
        &tail,
        policy,
        horizon_days,
    )?;

    Ok(ForecastResult {
        points: assemble(series, &rows),
        rows,
        metrics: trained.metrics,
        policy,
    })
}

/// Упрощённый вариант: только календарные признаки и линейная модель.
pub fn simple_forecast(
    series: &DailyCountSeries,
    horizon_days: usize,
    config: &ForecastConfig,
) -> Result<ForecastResult, ForecastError> {
    let config = ForecastConfig {
        lags: false,
        ..*config
    };
    forecast(series, horizon_days, CombinationPolicy::Linear, &config)
}
