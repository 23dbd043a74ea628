use super::ensemble::{EnsembleConfig, ForestModel, fit_forest};
use super::linear::{LinearConfig, LinearModel, fit_linear};
use super::metrics::{ForecastMetrics, ModelMetrics};
use super::split::train_test_split;
use super::{FeatureFrame, FeatureRow, FeatureSet, ForecastError, Regressor};

/// Обе обученные модели и их качество на тестовом хвосте.
#[derive(Clone, Debug)]
pub struct TrainedModels {
    pub linear: LinearModel,
    pub ensemble: ForestModel,
    pub metrics: ForecastMetrics,
    pub train_rows: usize,
    pub test_rows: usize,
}

fn design_matrix(rows: &[FeatureRow], feature_set: FeatureSet) -> Result<(Vec<Vec<f64>>, Vec<f64>), ForecastError> {
    rows.iter()
        .map(|row| {
            row.vector(feature_set)
                .map(|vector| (vector, f64::from(row.count)))
                .ok_or(ForecastError::FeatureMismatch)
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|pairs| pairs.into_iter().unzip())
}

fn predict_all<R: Regressor>(model: &R, x: &[Vec<f64>]) -> Vec<f64> {
    x.iter().map(|row| model.predict(row)).collect()
}

/// Делит строки по времени, обучает линейную модель и лес, считает метрики на тесте.
pub fn train_and_evaluate(
    frame: &FeatureFrame,
    test_fraction: f64,
    linear_config: LinearConfig,
    ensemble_config: EnsembleConfig,
) -> Result<TrainedModels, ForecastError> {
    let split = train_test_split(&frame.rows, test_fraction)?;
    if split.train.is_empty() || split.test.is_empty() {
        return Err(ForecastError::InsufficientData {
            stage: "train/test split",
            available: split.train.len().min(split.test.len()),
            required: 1,
        });
    }

    let (train_x, train_y) = design_matrix(&split.train, frame.feature_set)?;
    let (test_x, test_y) = design_matrix(&split.test, frame.feature_set)?;

    let linear = fit_linear(&train_x, &train_y, frame.feature_set, linear_config)?;
    let ensemble = fit_forest(&train_x, &train_y, frame.feature_set, ensemble_config)?;

    let metrics = ForecastMetrics {
        linear: ModelMetrics::evaluate(&test_y, &predict_all(&linear, &test_x)),
        ensemble: ModelMetrics::evaluate(&test_y, &predict_all(&ensemble, &test_x)),
    };

    Ok(TrainedModels {
        linear,
        ensemble,
        metrics,
        train_rows: split.train.len(),
        test_rows: split.test.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::features::fitting_frame;
    use crate::forecast::{DailyCount, DailyCountSeries};
    use chrono::{Duration, NaiveDate};
    use rstest::rstest;

    fn weekly_series(len: usize) -> DailyCountSeries {
        let start = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let pattern = [30, 34, 33, 35, 40, 22, 18];
        DailyCountSeries::new(
            (0..len)
                .map(|idx| DailyCount {
                    date: start + Duration::days(idx as i64),
                    count: pattern[idx % 7],
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn evaluates_both_models_on_the_test_tail() {
        let frame = fitting_frame(&weekly_series(60), true).unwrap();
        let trained = train_and_evaluate(
            &frame,
            0.2,
            LinearConfig::default(),
            EnsembleConfig::default(),
        )
        .unwrap();
        assert_eq!(trained.train_rows, 42);
        assert_eq!(trained.test_rows, 11);
        // lag_7 повторяет недельный цикл, так что обе модели почти точны
        assert!(trained.metrics.linear.mae < 1.0);
        assert!(trained.metrics.ensemble.mae < 3.0);
        assert!(trained.metrics.linear.rmse >= trained.metrics.linear.mae);
    }

    #[test]
    fn does_not_touch_the_input_frame() {
        let frame = fitting_frame(&weekly_series(30), true).unwrap();
        let before = frame.rows.clone();
        train_and_evaluate(&frame, 0.2, LinearConfig::default(), EnsembleConfig::default()).unwrap();
        assert_eq!(frame.rows, before);
    }

    #[rstest]
    #[case(0.95)]
    #[case(0.91)]
    fn empty_train_prefix_is_rejected(#[case] test_fraction: f64) {
        let frame = fitting_frame(&weekly_series(10), false).unwrap();
        assert_eq!(frame.rows.len(), 10);
        let err = train_and_evaluate(
            &frame,
            test_fraction,
            LinearConfig::default(),
            EnsembleConfig::default(),
        )
        .unwrap_err();
        assert!(
            matches!(
                err,
                ForecastError::InsufficientData {
                    stage: "train/test split",
                    available: 0,
                    required: 1,
                }
            ),
            "unexpected error: {err}"
        );
    }
}
