//! Линейная регрессия с интерсептом; коэффициенты ищутся L-BFGS по стандартизованным признакам.

use argmin::core::{CostFunction, Error as ArgminError, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;

use super::{FeatureSet, ForecastError, Regressor};

const DEFAULT_MAX_ITERS: u64 = 400;
const DEFAULT_HISTORY: usize = 10;
const DEFAULT_TOL_GRAD: f64 = 1e-9;
const DEFAULT_TOL_COST: f64 = 1e-12;
const MIN_STD: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearConfig {
    pub max_iters: u64,
    pub history: usize,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            max_iters: DEFAULT_MAX_ITERS,
            history: DEFAULT_HISTORY,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LinearModel {
    pub(crate) feature_set: FeatureSet,
    pub(crate) intercept: f64,
    pub(crate) coefficients: Vec<f64>,
}

impl LinearModel {
    pub const fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
}

impl Regressor for LinearModel {
    fn feature_set(&self) -> FeatureSet {
        self.feature_set
    }

    fn predict(&self, features: &[f64]) -> f64 {
        debug_assert_eq!(features.len(), self.coefficients.len());
        self.coefficients
            .iter()
            .zip(features)
            .fold(self.intercept, |acc, (coef, value)| coef.mul_add(*value, acc))
    }
}

/// Среднеквадратичная ошибка по центрированным и нормированным данным.
#[derive(Clone)]
struct LeastSquaresProblem {
    x: Vec<Vec<f64>>,
    y: Vec<f64>,
}

impl LeastSquaresProblem {
    const fn new(x: Vec<Vec<f64>>, y: Vec<f64>) -> Self {
        Self { x, y }
    }

    fn residuals<'a>(&'a self, param: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
        self.x.iter().zip(&self.y).map(move |(row, target)| {
            row.iter()
                .zip(param)
                .fold(-target, |acc, (value, coef)| value.mul_add(*coef, acc))
        })
    }
}

impl CostFunction for LeastSquaresProblem {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, ArgminError> {
        let n = self.y.len() as f64;
        let sse: f64 = self.residuals(param).map(|r| r * r).sum();
        Ok(0.5 * sse / n)
    }
}

impl Gradient for LeastSquaresProblem {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, ArgminError> {
        let n = self.y.len() as f64;
        let mut grad = vec![0.0; param.len()];
        for (row, residual) in self.x.iter().zip(self.residuals(param)) {
            for (slot, value) in grad.iter_mut().zip(row) {
                *slot += residual * value;
            }
        }
        for slot in &mut grad {
            *slot /= n;
        }
        Ok(grad)
    }
}

fn mean_and_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let n = values.clone().count();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let var = values
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum::<f64>()
        / n as f64;
    (mean, var.sqrt())
}

/// Обучает МНК-модель. Постоянные столбцы получают нулевой коэффициент;
/// старт из нуля даёт решение минимальной нормы на коллинеарных календарных признаках.
pub fn fit_linear(
    x: &[Vec<f64>],
    y: &[f64],
    feature_set: FeatureSet,
    config: LinearConfig,
) -> Result<LinearModel, ForecastError> {
    if x.is_empty() || x.len() != y.len() {
        return Err(ForecastError::InsufficientData {
            stage: "linear fit",
            available: x.len().min(y.len()),
            required: 1,
        });
    }
    let width = feature_set.width();

    let columns: Vec<(f64, f64)> = (0..width)
        .map(|col| mean_and_std(x.iter().map(move |row| row[col])))
        .collect();
    let active: Vec<usize> = (0..width).filter(|&col| columns[col].1 > MIN_STD).collect();
    let (y_mean, y_std) = mean_and_std(y.iter().copied());

    let mut coefficients = vec![0.0; width];
    if y_std <= MIN_STD || active.is_empty() {
        return Ok(LinearModel {
            feature_set,
            intercept: y_mean,
            coefficients,
        });
    }

    let scaled_x: Vec<Vec<f64>> = x
        .iter()
        .map(|row| {
            active
                .iter()
                .map(|&col| (row[col] - columns[col].0) / columns[col].1)
                .collect()
        })
        .collect();
    let scaled_y: Vec<f64> = y.iter().map(|value| (value - y_mean) / y_std).collect();

    let problem = LeastSquaresProblem::new(scaled_x, scaled_y);
    let init = vec![0.0; active.len()];
    let solver_err = |err: ArgminError| ForecastError::Solver(err.to_string());
    let linesearch = MoreThuenteLineSearch::new()
        .with_c(1e-4, 0.9)
        .map_err(solver_err)?;
    let solver = LBFGS::new(linesearch, config.history)
        .with_tolerance_grad(DEFAULT_TOL_GRAD)
        .map_err(solver_err)?
        .with_tolerance_cost(DEFAULT_TOL_COST)
        .map_err(solver_err)?;

    let result = Executor::new(problem, solver)
        .configure(|state| state.param(init).max_iters(config.max_iters))
        .run()
        .map_err(solver_err)?;

    let beta = result
        .state
        .get_param()
        .ok_or_else(|| ForecastError::Solver("no parameters returned from optimizer".into()))?
        .clone();

    let mut intercept = y_mean;
    for (&col, scaled_coef) in active.iter().zip(beta) {
        let (mean, std) = columns[col];
        let coef = scaled_coef * y_std / std;
        coefficients[col] = coef;
        intercept -= coef * mean;
    }

    Ok(LinearModel {
        feature_set,
        intercept,
        coefficients,
    })
}
