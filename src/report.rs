//! Сборка HTML-дашборда: график прогноза, карточки показателей и таблицы.

mod chart;
mod page;

use std::error::Error;
use std::fs;
use std::path::Path;

use chrono::{NaiveDate, Utc};

use crate::forecast::{CombinationPolicy, ForecastMetrics, ForecastRecord};
use crate::stats::{
    AircraftUsage, AirportCount, DelayBucket, DelayRate, FlightKpis, ForecastSummary, RouteCount,
};

/// Имена файлов для ссылок на скачивание рядом с HTML.
#[derive(Clone, Debug)]
pub struct DownloadLinks {
    pub flights: String,
    pub forecast: String,
}

/// Всё, что показывается на странице.
#[derive(Clone, Debug)]
pub struct Dashboard {
    pub selection: String,
    pub policy: CombinationPolicy,
    pub records: Vec<ForecastRecord>,
    pub metrics: ForecastMetrics,
    pub forecast_summary: ForecastSummary,
    pub kpis: FlightKpis,
    pub top_routes: Vec<RouteCount>,
    pub aircraft: Vec<AircraftUsage>,
    pub top_origins: Vec<AirportCount>,
    pub top_destinations: Vec<AirportCount>,
    pub delay_buckets: Vec<DelayBucket>,
    pub daily_delays: Vec<DelayRate<NaiveDate>>,
    pub delay_airports: Vec<DelayRate<String>>,
}

fn minify(page: &str) -> String {
    let mut cfg = minify_html::Cfg::new();
    cfg.minify_css = true;
    let minified = minify_html::minify(page.as_bytes(), &cfg);
    String::from_utf8(minified).unwrap_or_else(|_| page.to_string())
}

pub fn render_page(
    dashboard: &Dashboard,
    download_links: &DownloadLinks,
    minify_html: bool,
) -> String {
    let chart::ChartOutput { plot, summary } = chart::build_forecast_chart(&dashboard.records);
    let page = page::render_dashboard_page(&plot, &summary, dashboard, Utc::now(), download_links);
    if minify_html { minify(&page) } else { page }
}

pub fn render_dashboard(
    dashboard: &Dashboard,
    output_html: &Path,
    download_links: &DownloadLinks,
    minify_html: bool,
) -> Result<(), Box<dyn Error>> {
    // Создаём директорию для HTML, если её ещё нет.
    if let Some(parent) = output_html.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    fs::write(output_html, render_page(dashboard, download_links, minify_html))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ModelMetrics;
    use crate::stats::summarize_forecast;
    use chrono::Duration;
    use tempfile::tempdir;

    fn dashboard() -> Dashboard {
        let start = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let records: Vec<ForecastRecord> = (0..40)
            .map(|idx| {
                let forecast = idx >= 30;
                let count = 20 + (idx % 7) as u32;
                ForecastRecord {
                    date: start + Duration::days(i64::from(idx)),
                    count,
                    forecast,
                    linear_prediction: forecast.then_some(f64::from(count) - 0.4),
                    ensemble_prediction: forecast.then_some(f64::from(count) + 0.3),
                }
            })
            .collect();
        Dashboard {
            selection: "SVO → LED".into(),
            policy: CombinationPolicy::Average,
            forecast_summary: summarize_forecast(&records),
            records,
            metrics: ForecastMetrics {
                linear: ModelMetrics {
                    mae: 1.25,
                    rmse: 1.5,
                    r2: Some(0.91),
                },
                ensemble: ModelMetrics {
                    mae: 0.75,
                    rmse: 1.0,
                    r2: None,
                },
            },
            kpis: FlightKpis {
                total_flights: 812,
                unique_routes: 1,
                unique_aircraft: 9,
                on_time_percent: Some(87.5),
                average_delay_minutes: Some(6.2),
                total_fuel: 1_250_000.0,
            },
            top_routes: vec![RouteCount {
                origin: "SVO".into(),
                destination: "LED".into(),
                flights: 812,
                active_days: 30,
            }],
            aircraft: vec![AircraftUsage {
                registration: "RA-73001".into(),
                flights: 120,
            }],
            top_origins: vec![AirportCount {
                airport: "SVO".into(),
                flights: 812,
            }],
            top_destinations: vec![AirportCount {
                airport: "LED".into(),
                flights: 812,
            }],
            delay_buckets: vec![
                DelayBucket {
                    label: "до 15 мин",
                    flights: 0,
                },
                DelayBucket {
                    label: "более 2 ч",
                    flights: 7,
                },
            ],
            daily_delays: vec![DelayRate {
                key: start,
                flights: 8,
                delayed: 3,
            }],
            delay_airports: vec![DelayRate {
                key: "KZN".into(),
                flights: 4,
                delayed: 3,
            }],
        }
    }

    fn links() -> DownloadLinks {
        DownloadLinks {
            flights: "flights.csv".into(),
            forecast: "forecast.csv".into(),
        }
    }

    #[test]
    fn page_contains_plot_metrics_and_tables() {
        let html = render_page(&dashboard(), &links(), false);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("forecast-plot"));
        assert!(html.contains("Линейная регрессия"));
        assert!(html.contains("1.25"));
        assert!(html.contains("0.910"));
        assert!(html.contains("SVO → LED"));
        assert!(html.contains("RA-73001"));
        assert!(html.contains("2024-05-10"));
        assert!(html.contains("forecast.csv"));
    }

    #[test]
    fn page_shows_delay_and_airport_tables() {
        let html = render_page(&dashboard(), &links(), false);
        assert!(html.contains("более 2 ч"));
        assert!(html.contains("37.5%"));
        assert!(html.contains("KZN"));
        assert!(html.contains("75.0%"));
        assert!(html.contains("Аэропорты прилёта"));
    }

    #[test]
    fn active_policy_row_is_highlighted() {
        let mut linear = dashboard();
        linear.policy = CombinationPolicy::Linear;
        let html = render_page(&linear, &links(), false);
        assert!(html.contains(r#"<tr class="active"><td>Линейная регрессия"#));

        let html = render_page(&dashboard(), &links(), false);
        assert!(!html.contains(r#"class="active""#));
    }

    #[test]
    fn minified_page_is_smaller() {
        let plain = render_page(&dashboard(), &links(), false);
        let minified = render_page(&dashboard(), &links(), true);
        assert!(minified.len() < plain.len());
        assert!(minified.contains("forecast-plot"));
    }

    #[test]
    fn writes_html_into_missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dist").join("index.html");
        render_dashboard(&dashboard(), &path, &links(), true).unwrap();
        assert!(path.exists());
    }
}
