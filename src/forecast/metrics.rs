use serde::{Deserialize, Serialize};

/// Качество модели на тестовом хвосте.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub mae: f64,
    pub rmse: f64,
    /// `None`, если у тестовой выборки нулевая дисперсия.
    pub r2: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    pub linear: ModelMetrics,
    pub ensemble: ModelMetrics,
}

impl ModelMetrics {
    pub fn evaluate(actual: &[f64], predicted: &[f64]) -> Self {
        Self {
            mae: mean_absolute_error(actual, predicted),
            rmse: root_mean_squared_error(actual, predicted),
            r2: r2_score(actual, predicted),
        }
    }
}

pub fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> f64 {
    debug_assert_eq!(actual.len(), predicted.len());
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum();
    sum / actual.len() as f64
}

pub fn root_mean_squared_error(actual: &[f64], predicted: &[f64]) -> f64 {
    debug_assert_eq!(actual.len(), predicted.len());
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p) * (a - p))
        .sum();
    (sum / actual.len() as f64).sqrt()
}

/// Коэффициент детерминации; отрицателен, если модель хуже среднего.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    debug_assert_eq!(actual.len(), predicted.len());
    if actual.is_empty() {
        return None;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean) * (a - mean)).sum();
    if ss_tot <= f64::EPSILON {
        return None;
    }
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p) * (a - p))
        .sum();
    Some(1.0 - ss_res / ss_tot)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTUAL: [f64; 5] = [10.0, 20.0, 30.0, 40.0, 50.0];
    const PREDICTED: [f64; 5] = [12.0, 18.0, 33.0, 37.0, 52.0];

    #[test]
    fn regression_metrics_match_hand_computed_values() {
        let metrics = ModelMetrics::evaluate(&ACTUAL, &PREDICTED);
        assert!((metrics.mae - 2.4).abs() < 1e-9);
        assert!((metrics.rmse - 6.0_f64.sqrt()).abs() < 1e-9);
        assert!((metrics.r2.unwrap() - 0.97).abs() < 1e-9);
    }

    #[test]
    fn r2_goes_negative_for_poor_models() {
        let predicted = [50.0, 40.0, 30.0, 20.0, 10.0];
        assert!(r2_score(&ACTUAL, &predicted).unwrap() < 0.0);
    }

    #[test]
    fn r2_undefined_for_constant_target() {
        let actual = [5.0; 4];
        let predicted = [5.0, 6.0, 5.0, 4.0];
        assert_eq!(r2_score(&actual, &predicted), None);
        let metrics = ModelMetrics::evaluate(&actual, &predicted);
        assert!((metrics.mae - 0.5).abs() < 1e-12);
    }

    #[test]
    fn metrics_serialize_with_model_keys() {
        let metrics = ForecastMetrics {
            linear: ModelMetrics::evaluate(&ACTUAL, &PREDICTED),
            ensemble: ModelMetrics {
                mae: 1.0,
                rmse: 1.0,
                r2: None,
            },
        };
        let json = serde_json::to_value(metrics).unwrap();
        assert!(json["linear"]["mae"].is_number());
        assert!(json["ensemble"]["r2"].is_null());
    }
}
