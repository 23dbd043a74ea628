//! Календарные и лаговые признаки для дневного ряда.

use chrono::{Datelike, NaiveDate};

use super::{DailyCountSeries, ForecastError};

/// Сколько строк нужно иметь сверх самого длинного лага, чтобы лаги вообще включились.
pub const LAG_WINDOW: usize = 7;
/// Минимум строк после отбрасывания неполных лагов.
pub const MIN_FITTING_ROWS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CalendarFeatures {
    /// Понедельник = 0.
    pub dayofweek: u32,
    pub month: u32,
    pub year: i32,
    pub dayofyear: u32,
    pub dayofmonth: u32,
    /// Неделя по ISO 8601.
    pub weekofyear: u32,
}

impl CalendarFeatures {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            dayofweek: date.weekday().num_days_from_monday(),
            month: date.month(),
            year: date.year(),
            dayofyear: date.ordinal(),
            dayofmonth: date.day(),
            weekofyear: date.iso_week().week(),
        }
    }
}

/// Набор столбцов, на которых обучена модель. Один и тот же набор кодирует и обучающие,
/// и прогнозные строки, поэтому рассогласование признаков невозможно.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureSet {
    lags: bool,
}

impl FeatureSet {
    pub const CALENDAR: Self = Self { lags: false };
    pub const WITH_LAGS: Self = Self { lags: true };

    pub const fn has_lags(self) -> bool {
        self.lags
    }

    pub fn column_names(self) -> Vec<&'static str> {
        let mut names = vec![
            "dayofweek",
            "month",
            "year",
            "dayofyear",
            "dayofmonth",
            "weekofyear",
        ];
        if self.lags {
            names.extend(["lag_1", "lag_7"]);
        }
        names
    }

    pub fn width(self) -> usize {
        if self.lags { 8 } else { 6 }
    }

    /// Кодирует строку в вектор признаков. `None`, если набор требует лаги, а их нет.
    pub fn encode(
        self,
        calendar: &CalendarFeatures,
        lag_1: Option<u32>,
        lag_7: Option<u32>,
    ) -> Option<Vec<f64>> {
        let mut vector = Vec::with_capacity(self.width());
        vector.extend([
            f64::from(calendar.dayofweek),
            f64::from(calendar.month),
            f64::from(calendar.year),
            f64::from(calendar.dayofyear),
            f64::from(calendar.dayofmonth),
            f64::from(calendar.weekofyear),
        ]);
        if self.lags {
            vector.push(f64::from(lag_1?));
            vector.push(f64::from(lag_7?));
        }
        Some(vector)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub count: u32,
    pub calendar: CalendarFeatures,
    pub lag_1: Option<u32>,
    pub lag_7: Option<u32>,
}

impl FeatureRow {
    pub fn vector(&self, feature_set: FeatureSet) -> Option<Vec<f64>> {
        feature_set.encode(&self.calendar, self.lag_1, self.lag_7)
    }
}

/// Строки, готовые к обучению, вместе с набором столбцов.
#[derive(Clone, Debug)]
pub struct FeatureFrame {
    pub rows: Vec<FeatureRow>,
    pub feature_set: FeatureSet,
}

/// Строит признаки для всех строк ряда; лаги заполняются только при длине ряда больше недели.
pub fn build_features(series: &DailyCountSeries, allow_lags: bool) -> (Vec<FeatureRow>, FeatureSet) {
    let records = series.records();
    let feature_set = if allow_lags && records.len() > LAG_WINDOW {
        FeatureSet::WITH_LAGS
    } else {
        FeatureSet::CALENDAR
    };

    let rows = records
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            let (lag_1, lag_7) = if feature_set.has_lags() {
                (
                    idx.checked_sub(1).map(|prev| records[prev].count),
                    idx.checked_sub(LAG_WINDOW).map(|prev| records[prev].count),
                )
            } else {
                (None, None)
            };
            FeatureRow {
                date: record.date,
                count: record.count,
                calendar: CalendarFeatures::from_date(record.date),
                lag_1,
                lag_7,
            }
        })
        .collect();

    (rows, feature_set)
}

/// Отбрасывает строки без полного набора лагов и проверяет порог по объёму данных.
pub fn fitting_frame(
    series: &DailyCountSeries,
    allow_lags: bool,
) -> Result<FeatureFrame, ForecastError> {
    let (rows, feature_set) = build_features(series, allow_lags);
    let rows: Vec<FeatureRow> = rows
        .into_iter()
        .filter(|row| row.vector(feature_set).is_some())
        .collect();

    if rows.len() < MIN_FITTING_ROWS {
        return Err(ForecastError::InsufficientData {
            stage: "features",
            available: rows.len(),
            required: MIN_FITTING_ROWS,
        });
    }

    Ok(FeatureFrame { rows, feature_set })
}
