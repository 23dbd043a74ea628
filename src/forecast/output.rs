//! Запись и чтение результатов прогноза: CSV с рядом и JSON с метриками.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{CombinationPolicy, ForecastMetrics, ForecastResult};

/// Строка CSV прогноза; у исторических строк прогнозы моделей пусты.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub date: NaiveDate,
    pub count: u32,
    pub forecast: bool,
    pub linear_prediction: Option<f64>,
    pub ensemble_prediction: Option<f64>,
}

/// Содержимое JSON с метриками: качество моделей и политика, по которой собран прогноз.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub policy: CombinationPolicy,
    #[serde(flatten)]
    pub metrics: ForecastMetrics,
}

impl ForecastResult {
    pub const fn metrics_report(&self) -> MetricsReport {
        MetricsReport {
            policy: self.policy,
            metrics: self.metrics,
        }
    }

    pub fn records(&self) -> Vec<ForecastRecord> {
        let history = self.history().map(|point| ForecastRecord {
            date: point.date,
            count: point.count,
            forecast: false,
            linear_prediction: None,
            ensemble_prediction: None,
        });
        let forecast = self.rows.iter().map(|row| ForecastRecord {
            date: row.date,
            count: row.prediction,
            forecast: true,
            linear_prediction: Some(row.linear_prediction),
            ensemble_prediction: Some(row.ensemble_prediction),
        });
        history.chain(forecast).collect()
    }
}

fn ensure_parent(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create {}: {err}", parent.display()))?;
    }
    Ok(())
}

pub fn write_forecast_csv(records: &[ForecastRecord], path: &Path) -> Result<(), String> {
    ensure_parent(path)?;
    let file = File::create(path)
        .map_err(|err| format!("Failed to create CSV {}: {err}", path.display()))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for record in records {
        writer
            .serialize(record)
            .map_err(|err| format!("Failed to write CSV row to {}: {err}", path.display()))?;
    }
    writer
        .flush()
        .map_err(|err| format!("Failed to flush CSV {}: {err}", path.display()))
}

pub fn read_forecast_csv(path: &Path) -> Result<Vec<ForecastRecord>, String> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|err| format!("Failed to open CSV {}: {err}", path.display()))?;
    reader
        .deserialize::<ForecastRecord>()
        .map(|row| row.map_err(|err| format!("Failed to parse {}: {err}", path.display())))
        .collect()
}

pub fn write_metrics_json(report: &MetricsReport, path: &Path) -> Result<(), String> {
    ensure_parent(path)?;
    let file = File::create(path)
        .map_err(|err| format!("Failed to create {}: {err}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .map_err(|err| format!("Failed to write metrics to {}: {err}", path.display()))
}

pub fn read_metrics_json(path: &Path) -> Result<MetricsReport, String> {
    let file =
        File::open(path).map_err(|err| format!("Failed to open {}: {err}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|err| format!("Failed to parse metrics {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ModelMetrics;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::tempdir;

    fn sample_records() -> Vec<ForecastRecord> {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        vec![
            ForecastRecord {
                date: day,
                count: 12,
                forecast: false,
                linear_prediction: None,
                ensemble_prediction: None,
            },
            ForecastRecord {
                date: day.succ_opt().unwrap(),
                count: 14,
                forecast: true,
                linear_prediction: Some(13.5),
                ensemble_prediction: Some(14.25),
            },
        ]
    }

    #[test]
    fn forecast_csv_has_expected_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("forecast.csv");
        write_forecast_csv(&sample_records(), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "date,count,forecast,linear_prediction,ensemble_prediction",
                "2024-03-01,12,false,,",
                "2024-03-02,14,true,13.5,14.25",
            ]
        );
        assert_eq!(read_forecast_csv(&path).unwrap(), sample_records());
    }

    #[test]
    fn metrics_json_keeps_null_r2() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let report = MetricsReport {
            policy: CombinationPolicy::Average,
            metrics: ForecastMetrics {
                linear: ModelMetrics {
                    mae: 1.5,
                    rmse: 2.0,
                    r2: Some(0.8),
                },
                ensemble: ModelMetrics {
                    mae: 0.5,
                    rmse: 0.75,
                    r2: None,
                },
            },
        };
        write_metrics_json(&report, &path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["ensemble"]["r2"].is_null());
        assert_eq!(read_metrics_json(&path).unwrap(), report);
    }

    #[rstest]
    #[case(CombinationPolicy::Linear, "linear")]
    #[case(CombinationPolicy::EnsembleMember, "ensemble_member")]
    #[case(CombinationPolicy::Average, "average")]
    fn metrics_json_remembers_policy(#[case] policy: CombinationPolicy, #[case] label: &str) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let metrics = ModelMetrics {
            mae: 1.0,
            rmse: 1.0,
            r2: Some(0.5),
        };
        let report = MetricsReport {
            policy,
            metrics: ForecastMetrics {
                linear: metrics,
                ensemble: metrics,
            },
        };
        write_metrics_json(&report, &path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["policy"], label);
        assert_eq!(read_metrics_json(&path).unwrap().policy, policy);
    }

    #[test]
    fn missing_csv_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.csv");
        let err = read_forecast_csv(&path).unwrap_err();
        assert!(err.contains("absent.csv"));
    }
}
