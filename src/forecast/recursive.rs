//! Пошаговый прогноз: лаги каждого следующего дня берутся из истории или из уже сделанных прогнозов.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::features::LAG_WINDOW;
use super::{CalendarFeatures, FeatureSet, ForecastError, Regressor};

/// Как сводить прогнозы двух моделей в одно значение.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationPolicy {
    Linear,
    EnsembleMember,
    #[default]
    Average,
}

impl CombinationPolicy {
    pub const fn combine(self, linear: f64, ensemble: f64) -> f64 {
        match self {
            Self::Linear => linear,
            Self::EnsembleMember => ensemble,
            Self::Average => (linear + ensemble) / 2.0,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::EnsembleMember => "ensemble_member",
            Self::Average => "average",
        }
    }
}

impl fmt::Display for CombinationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CombinationPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "linear" => Ok(Self::Linear),
            "ensemble_member" | "ensemble" | "rf" => Ok(Self::EnsembleMember),
            "average" | "avg" => Ok(Self::Average),
            other => Err(format!("unknown combination policy: {other}")),
        }
    }
}

/// Округление к ближайшему (половины к чётному) и отсечение отрицательных значений.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_count(value: f64) -> u32 {
    let rounded = value.round_ties_even();
    if rounded.is_finite() && rounded > 0.0 {
        rounded.min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForecastRow {
    pub date: NaiveDate,
    pub calendar: CalendarFeatures,
    pub lag_1: Option<u32>,
    pub lag_7: Option<u32>,
    pub linear_prediction: f64,
    pub ensemble_prediction: f64,
    pub prediction: u32,
}

/// Хвост истории, которым засеваются лаги первых шагов прогноза.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryTail {
    last_date: NaiveDate,
    /// Последние значения ряда, не больше недели, по возрастанию дат.
    counts: Vec<u32>,
}

impl HistoryTail {
    pub fn new(last_date: NaiveDate, counts: &[u32]) -> Option<Self> {
        if counts.is_empty() {
            return None;
        }
        let start = counts.len().saturating_sub(LAG_WINDOW);
        Some(Self {
            last_date,
            counts: counts[start..].to_vec(),
        })
    }

    pub const fn last_date(&self) -> NaiveDate {
        self.last_date
    }

    fn last_count(&self) -> u32 {
        self.counts[self.counts.len() - 1]
    }

    fn has_full_week(&self) -> bool {
        self.counts.len() >= LAG_WINDOW
    }

    /// Значение истории по отрицательному смещению от конца (`-1` = последний день).
    fn from_end(&self, offset: usize) -> u32 {
        self.counts[self.counts.len() - offset]
    }
}

fn resolve_lag_1(step: usize, tail: &HistoryTail, rows: &[ForecastRow]) -> u32 {
    if step == 0 {
        tail.last_count()
    } else {
        rows[step - 1].prediction
    }
}

fn resolve_lag_7(step: usize, tail: &HistoryTail, rows: &[ForecastRow]) -> u32 {
    if step >= LAG_WINDOW {
        return rows[step - LAG_WINDOW].prediction;
    }
    if tail.has_full_week() {
        // step - 7 < 0: индекс уходит в историю
        tail.from_end(LAG_WINDOW - step)
    } else {
        // Недели истории нет: до появления семи прогнозов lag_7 ведёт себя как lag_1.
        resolve_lag_1(step, tail, rows)
    }
}

/// Строит `horizon_days` строк прогноза подряд, начиная со дня после последней даты истории.
pub fn recursive_forecast<L, E>(
    linear: &L,
    ensemble: &E,
    tail: &HistoryTail,
    policy: CombinationPolicy,
    horizon_days: usize,
) -> Result<Vec<ForecastRow>, ForecastError>
where
    L: Regressor,
    E: Regressor,
{
    if horizon_days == 0 {
        return Err(ForecastError::InvalidHorizon {
            requested: horizon_days,
            max: None,
        });
    }
    let feature_set: FeatureSet = linear.feature_set();
    if ensemble.feature_set() != feature_set {
        return Err(ForecastError::FeatureMismatch);
    }

    let mut rows: Vec<ForecastRow> = Vec::with_capacity(horizon_days);
    for step in 0..horizon_days {
        let date = tail.last_date() + Duration::days(step as i64 + 1);
        let calendar = CalendarFeatures::from_date(date);
        let (lag_1, lag_7) = if feature_set.has_lags() {
            (
                Some(resolve_lag_1(step, tail, &rows)),
                Some(resolve_lag_7(step, tail, &rows)),
            )
        } else {
            (None, None)
        };

        let features = feature_set
            .encode(&calendar, lag_1, lag_7)
            .ok_or(ForecastError::FeatureMismatch)?;
        let linear_prediction = linear.predict(&features);
        let ensemble_prediction = ensemble.predict(&features);
        let prediction = to_count(policy.combine(linear_prediction, ensemble_prediction));

        rows.push(ForecastRow {
            date,
            calendar,
            lag_1,
            lag_7,
            linear_prediction,
            ensemble_prediction,
            prediction,
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    /// Модель-заглушка: lag_1 плюс сдвиг, либо константа без лагов.
    struct StubModel {
        feature_set: FeatureSet,
        shift: f64,
    }

    impl Regressor for StubModel {
        fn feature_set(&self) -> FeatureSet {
            self.feature_set
        }

        fn predict(&self, features: &[f64]) -> f64 {
            if self.feature_set.has_lags() {
                features[6] + self.shift
            } else {
                self.shift
            }
        }
    }

    fn tail(counts: &[u32]) -> HistoryTail {
        HistoryTail::new(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(), counts).unwrap()
    }

    const fn stub(shift: f64) -> StubModel {
        StubModel {
            feature_set: FeatureSet::WITH_LAGS,
            shift,
        }
    }

    #[rstest]
    #[case(CombinationPolicy::Linear, 3.4, 10.0, 3.4)]
    #[case(CombinationPolicy::EnsembleMember, 3.4, 10.0, 10.0)]
    #[case(CombinationPolicy::Average, 3.0, 10.0, 6.5)]
    fn policies_combine_pairs(
        #[case] policy: CombinationPolicy,
        #[case] linear: f64,
        #[case] ensemble: f64,
        #[case] expected: f64,
    ) {
        assert!((policy.combine(linear, ensemble) - expected).abs() < 1e-12);
    }

    #[rstest]
    #[case(-3.7, 0)]
    #[case(-0.4, 0)]
    #[case(2.5, 2)]
    #[case(3.5, 4)]
    #[case(41.49, 41)]
    #[case(f64::NAN, 0)]
    fn counts_round_half_even_and_floor_at_zero(#[case] value: f64, #[case] expected: u32) {
        assert_eq!(to_count(value), expected);
    }

    #[test]
    fn policy_parses_aliases() {
        assert_eq!("rf".parse::<CombinationPolicy>(), Ok(CombinationPolicy::EnsembleMember));
        assert_eq!("Average".parse::<CombinationPolicy>(), Ok(CombinationPolicy::Average));
        assert_eq!(
            "ensemble-member".parse::<CombinationPolicy>(),
            Ok(CombinationPolicy::EnsembleMember)
        );
        assert!("median".parse::<CombinationPolicy>().is_err());
    }

    #[test]
    fn dates_are_contiguous_after_history() {
        let history = tail(&[5, 6, 7, 8, 9, 10, 11, 12]);
        let rows =
            recursive_forecast(&stub(1.0), &stub(1.0), &history, CombinationPolicy::Average, 10)
                .unwrap();
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        for pair in rows.windows(2) {
            assert_eq!(pair[1].date - pair[0].date, Duration::days(1));
        }
    }

    #[test]
    fn first_step_is_seeded_from_history() {
        let history = tail(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let rows =
            recursive_forecast(&stub(0.0), &stub(0.0), &history, CombinationPolicy::Linear, 3)
                .unwrap();
        assert_eq!(rows[0].lag_1, Some(10));
        assert_eq!(rows[0].lag_7, Some(4));
        assert_eq!(rows[1].lag_7, Some(5));
        assert_eq!(rows[2].lag_7, Some(6));
    }

    #[test]
    fn lags_chain_through_previous_predictions() {
        let history = tail(&[20, 21, 22, 23, 24, 25, 26]);
        let rows =
            recursive_forecast(&stub(2.0), &stub(0.0), &history, CombinationPolicy::Average, 20)
                .unwrap();
        for step in 1..rows.len() {
            assert_eq!(rows[step].lag_1, Some(rows[step - 1].prediction));
        }
        for step in 7..rows.len() {
            assert_eq!(rows[step].lag_7, Some(rows[step - 7].prediction));
        }
        // Среднее (lag_1 + 2, lag_1) = lag_1 + 1
        assert_eq!(rows[0].prediction, 27);
        assert_eq!(rows[19].prediction, 46);
    }

    #[test]
    fn short_history_degrades_lag_7_to_lag_1() {
        let history = tail(&[3, 4, 5]);
        let rows =
            recursive_forecast(&stub(1.0), &stub(1.0), &history, CombinationPolicy::Linear, 9)
                .unwrap();
        assert_eq!(rows[0].lag_7, Some(5));
        for step in 1..7 {
            assert_eq!(rows[step].lag_7, Some(rows[step - 1].prediction));
        }
        assert_eq!(rows[7].lag_7, Some(rows[0].prediction));
        assert_eq!(rows[8].lag_7, Some(rows[1].prediction));
    }

    #[test]
    fn predictions_never_go_negative() {
        let history = tail(&[2, 1, 0, 1, 0, 0, 1, 0]);
        let rows =
            recursive_forecast(&stub(-3.0), &stub(-5.0), &history, CombinationPolicy::Average, 14)
                .unwrap();
        assert!(rows.iter().all(|row| row.prediction == 0));
        assert!(rows[0].linear_prediction < 0.0);
    }

    #[test]
    fn lag_free_models_never_resolve_lags() {
        let calendar_only = StubModel {
            feature_set: FeatureSet::CALENDAR,
            shift: 12.0,
        };
        let history = tail(&[9, 9, 9, 9, 9, 9, 9, 9]);
        let rows = recursive_forecast(
            &calendar_only,
            &calendar_only,
            &history,
            CombinationPolicy::Linear,
            5,
        )
        .unwrap();
        assert!(rows.iter().all(|row| row.lag_1.is_none() && row.lag_7.is_none()));
        assert!(rows.iter().all(|row| row.prediction == 12));
    }

    #[test]
    fn mismatched_feature_sets_are_rejected() {
        let calendar_only = StubModel {
            feature_set: FeatureSet::CALENDAR,
            shift: 1.0,
        };
        let history = tail(&[1, 2, 3]);
        let err = recursive_forecast(&stub(0.0), &calendar_only, &history, CombinationPolicy::Average, 3)
            .unwrap_err();
        assert!(matches!(err, ForecastError::FeatureMismatch));
    }

    #[test]
    fn zero_horizon_is_rejected() {
        let history = tail(&[1, 2, 3]);
        let err = recursive_forecast(&stub(0.0), &stub(0.0), &history, CombinationPolicy::Average, 0)
            .unwrap_err();
        assert!(matches!(err, ForecastError::InvalidHorizon { requested: 0, .. }));
    }
}
