use super::ForecastError;

pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

#[derive(Clone, Debug)]
pub struct TrainTestSplit<T> {
    pub train: Vec<T>,
    pub test: Vec<T>,
}

/// Делит упорядоченные по времени строки на обучающий префикс и тестовый хвост, без перемешивания.
pub fn train_test_split<T: Clone>(
    rows: &[T],
    test_fraction: f64,
) -> Result<TrainTestSplit<T>, ForecastError> {
    if !test_fraction.is_finite() || test_fraction <= 0.0 || test_fraction >= 1.0 {
        return Err(ForecastError::InvalidTestFraction(test_fraction));
    }
    let n = rows.len();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let train_len = ((n as f64) * (1.0 - test_fraction)).floor() as usize;
    let train_len = train_len.min(n);

    Ok(TrainTestSplit {
        train: rows[..train_len].to_vec(),
        test: rows[train_len..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(10, 0.2, 8)]
    #[case(11, 0.2, 8)]
    #[case(23, 0.2, 18)]
    #[case(100, 0.25, 75)]
    fn split_point_is_floor_of_train_share(
        #[case] n: usize,
        #[case] fraction: f64,
        #[case] expected_train: usize,
    ) {
        let rows: Vec<usize> = (0..n).collect();
        let split = train_test_split(&rows, fraction).unwrap();
        assert_eq!(split.train.len(), expected_train);
        assert_eq!(split.test.len(), n - expected_train);
    }

    #[test]
    fn partition_is_contiguous_and_ordered() {
        let rows: Vec<usize> = (0..12).collect();
        let split = train_test_split(&rows, 0.2).unwrap();
        let rejoined: Vec<usize> = split.train.iter().chain(&split.test).copied().collect();
        assert_eq!(rejoined, rows);
        assert_eq!(split.train.last(), Some(&8));
        assert_eq!(split.test.first(), Some(&9));
    }

    #[rstest]
    #[case(0.0)]
    #[case(1.0)]
    #[case(-0.1)]
    #[case(f64::NAN)]
    fn rejects_fraction_outside_open_interval(#[case] fraction: f64) {
        let rows = [1, 2, 3];
        assert!(matches!(
            train_test_split(&rows, fraction),
            Err(ForecastError::InvalidTestFraction(_))
        ));
    }
}
