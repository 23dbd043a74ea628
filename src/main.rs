mod config;
mod constants;
mod data;
mod fetch;
mod forecast;
mod report;
mod series;
mod stats;

use clap::{ArgAction, Args as ClapArgs, CommandFactory, Parser, Subcommand};
use std::fs::{self, File};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use crate::config::{DEFAULT_CONFIG_PATH, DatabaseConfig, ResolvedConfig, load_config};
use crate::constants::DATE_FORMAT;
use crate::data::FlightRecord;
use crate::forecast::{
    CombinationPolicy, ForecastRecord, ForecastResult, MetricsReport, read_forecast_csv,
    read_metrics_json, write_forecast_csv, write_metrics_json,
};
use crate::series::{Direction, FlightFilter};
use crate::stats::AirportSide;

const APP_ABOUT: &str = "flightcast - daily flight volume forecasting dashboard";
const DEFAULT_OUTPUT_HTML: &str = "dist/index.html";
const DEFAULT_FLIGHTS_CSV: &str = "dist/flights.csv";
const DEFAULT_FORECAST_CSV: &str = "dist/forecast.csv";
const DEFAULT_METRICS_JSON: &str = "dist/metrics.json";
const DEFAULT_FORECAST_HORIZON_DAYS: usize = 30;
const TOP_ROUTES_LIMIT: usize = 10;
const TOP_AIRCRAFT_LIMIT: usize = 10;
const TOP_AIRPORTS_LIMIT: usize = 10;
const DELAY_AIRPORTS_LIMIT: usize = 5;

#[derive(Parser, Debug)]
#[command(name = "flightcast", about = APP_ABOUT)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|err| format!("expected YYYY-MM-DD, got {raw}: {err}"))
}

/// Фильтры выборки рейсов.
#[derive(ClapArgs, Debug, Clone)]
struct FilterArgs {
    /// Первая дата (включительно), YYYY-MM-DD.
    #[arg(long = "start-date", value_name = "DATE", value_parser = parse_date)]
    start_date: Option<NaiveDate>,
    /// Последняя дата (включительно), YYYY-MM-DD.
    #[arg(long = "end-date", value_name = "DATE", value_parser = parse_date)]
    end_date: Option<NaiveDate>,
    /// Код аэропорта вылета.
    #[arg(long = "origin", value_name = "CODE")]
    origin: Option<String>,
    /// Код аэропорта прилёта.
    #[arg(long = "destination", value_name = "CODE")]
    destination: Option<String>,
    /// Аэропорт, по которому считаются вылеты и/или прилёты.
    #[arg(long = "airport", value_name = "CODE")]
    airport: Option<String>,
    /// Какие рейсы аэропорта учитывать.
    #[arg(long = "direction", value_enum, default_value_t = Direction::Both)]
    direction: Direction,
}

impl FilterArgs {
    fn into_filter(self) -> Result<FlightFilter, String> {
        let filter = FlightFilter {
            start_date: self.start_date,
            end_date: self.end_date,
            origin: self.origin,
            destination: self.destination,
            airport: self.airport,
            direction: self.direction,
        };
        filter.validate()?;
        Ok(filter)
    }
}

/// Параметры прогноза.
#[derive(ClapArgs, Debug, Clone)]
struct ForecastArgs {
    /// Горизонт прогноза (в днях).
    #[arg(
        long = "horizon-days",
        value_name = "DAYS",
        default_value_t = DEFAULT_FORECAST_HORIZON_DAYS
    )]
    horizon_days: usize,
    /// Как объединять модели: linear, ensemble_member, average (по умолчанию из конфига).
    #[arg(long = "policy", value_name = "POLICY")]
    policy: Option<CombinationPolicy>,
    /// Упрощённый прогноз: только календарные признаки и линейная модель.
    #[arg(long = "simple")]
    simple: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Полный режим: скачать рейсы, построить прогноз и сгенерировать HTML.
    Run {
        /// Куда сохранить HTML.
        #[arg(
            short = 'o',
            long = "output-html",
            value_name = "PATH",
            default_value = DEFAULT_OUTPUT_HTML
        )]
        output_html: PathBuf,
        /// Не минифицировать HTML (по умолчанию минифицируется).
        #[arg(
            long = "no-minify-html",
            default_value_t = true,
            action = ArgAction::SetFalse
        )]
        minify_html: bool,
        /// Куда сохранить CSV с рейсами.
        #[arg(
            long = "output-flights-csv",
            value_name = "PATH",
            default_value = DEFAULT_FLIGHTS_CSV
        )]
        output_flights_csv: PathBuf,
        /// Куда сохранить CSV с прогнозом.
        #[arg(
            long = "output-forecast-csv",
            value_name = "PATH",
            default_value = DEFAULT_FORECAST_CSV
        )]
        output_forecast_csv: PathBuf,
        /// Куда сохранить метрики моделей.
        #[arg(
            long = "metrics-json",
            value_name = "PATH",
            default_value = DEFAULT_METRICS_JSON
        )]
        metrics_json: PathBuf,
        #[command(flatten)]
        forecast: ForecastArgs,
        #[command(flatten)]
        filter: FilterArgs,
        /// TOML-файл с параметрами модели и хранилища.
        #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Скачать рейсы и сохранить CSV.
    Download {
        /// Куда сохранить CSV.
        #[arg(
            short = 'o',
            long = "output-csv",
            value_name = "PATH",
            default_value = DEFAULT_FLIGHTS_CSV
        )]
        output_csv: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        /// TOML-файл с параметрами хранилища.
        #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Построить прогноз по CSV с рейсами.
    Forecast {
        /// CSV с рейсами.
        #[arg(
            short = 'c',
            long = "csv",
            value_name = "PATH",
            default_value = DEFAULT_FLIGHTS_CSV
        )]
        csv: PathBuf,
        /// Куда сохранить CSV с прогнозом.
        #[arg(
            long = "output-csv",
            value_name = "PATH",
            default_value = DEFAULT_FORECAST_CSV
        )]
        output_csv: PathBuf,
        /// Куда сохранить метрики моделей.
        #[arg(
            long = "metrics-json",
            value_name = "PATH",
            default_value = DEFAULT_METRICS_JSON
        )]
        metrics_json: PathBuf,
        #[command(flatten)]
        forecast: ForecastArgs,
        #[command(flatten)]
        filter: FilterArgs,
        /// TOML-файл с параметрами модели.
        #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Сгенерировать HTML-страницу по рейсам, прогнозу и метрикам.
    Render {
        /// CSV с рейсами.
        #[arg(
            short = 'c',
            long = "csv",
            value_name = "PATH",
            default_value = DEFAULT_FLIGHTS_CSV
        )]
        csv: PathBuf,
        /// CSV с прогнозом.
        #[arg(
            long = "forecast-csv",
            value_name = "PATH",
            default_value = DEFAULT_FORECAST_CSV
        )]
        forecast_csv: PathBuf,
        /// JSON с метриками моделей.
        #[arg(
            long = "metrics-json",
            value_name = "PATH",
            default_value = DEFAULT_METRICS_JSON
        )]
        metrics_json: PathBuf,
        /// Куда сохранить HTML.
        #[arg(
            short = 'o',
            long = "output-html",
            value_name = "PATH",
            default_value = DEFAULT_OUTPUT_HTML
        )]
        output_html: PathBuf,
        /// Не минифицировать HTML (по умолчанию минифицируется).
        #[arg(
            long = "no-minify-html",
            default_value_t = true,
            action = ArgAction::SetFalse
        )]
        minify_html: bool,
        /// Подпись политики объединения на странице (по умолчанию та, что записана в метриках).
        #[arg(long = "policy", value_name = "POLICY")]
        policy: Option<CombinationPolicy>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Сгенерировать файлы автодополнения для shell.
    Completions {
        /// Целевой shell.
        #[arg(value_enum)]
        shell: Shell,
        /// Куда сохранить файл (по умолчанию stdout).
        #[arg(short = 'o', long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn generate_completions(shell: Shell, output: Option<PathBuf>) -> Result<(), String> {
    let mut cmd = Args::command();
    let bin_name = cmd.get_name().to_string();
    if let Some(path) = output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|err| format!("Failed to create {}: {err}", parent.display()))?;
        }
        let mut file = File::create(&path)
            .map_err(|err| format!("Failed to create {}: {err}", path.display()))?;
        generate(shell, &mut cmd, bin_name, &mut file);
    } else {
        let mut stdout = std::io::stdout();
        generate(shell, &mut cmd, bin_name, &mut stdout);
    }
    Ok(())
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flightcast=info"));
    let ansi = std::io::stdout().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(ansi)
        .compact()
        .init();
}

fn headline(message: &str) {
    tracing::info!(status = "start", "{message}");
}

fn info(message: &str) {
    tracing::info!(status = "info", "{message}");
}

fn success(message: &str) {
    tracing::info!(status = "ok", "{message}");
}

fn error(message: &str) {
    tracing::error!(status = "err", "{message}");
}


async fn download_flights(
    filter: &FlightFilter,
    database: &DatabaseConfig,
) -> Result<Vec<FlightRecord>, String> {
    let (base_url, api_key) = fetch::credentials_from_env(&database.url_env, &database.key_env)
        .map_err(|err| err.to_string())?;
    let store = fetch::FlightStore {
        base_url,
        api_key,
        table: database.table.clone(),
        page_size: database.page_size,
        max_retries: database.max_retries,
        delay: database.retry_delay,
    };
    let client = fetch::build_client()?;
    fetch::fetch_flights(&client, &store, filter)
        .await
        .map_err(|err| format!("Failed to fetch flights: {err}"))
}

fn load_flights(csv: &Path) -> Result<Vec<FlightRecord>, String> {
    data::load_csv(csv).map_err(|err| format!("Failed to read flights CSV {}: {err}", csv.display()))
}

fn build_forecast(
    flights: &[FlightRecord],
    filter: &FlightFilter,
    args: &ForecastArgs,
    config: &ResolvedConfig,
) -> Result<ForecastResult, String> {
    let series = series::daily_counts(flights, filter).map_err(|err| err.to_string())?;
    if series.is_empty() {
        return Err(format!("No flights match selection: {}", filter.describe()));
    }
    let policy = args.policy.unwrap_or(config.policy);
    tracing::info!(
        days = series.len(),
        horizon_days = args.horizon_days,
        policy = %policy,
        simple = args.simple,
        selection = %filter.describe(),
        "Training forecast models"
    );
    let result = if args.simple {
        forecast::simple_forecast(&series, args.horizon_days, &config.forecast)
    } else {
        forecast::forecast(&series, args.horizon_days, policy, &config.forecast)
    };
    let result = result.map_err(|err| format!("Failed to build forecast: {err}"))?;
    tracing::info!(
        status = "info",
        history_days = result.history().count(),
        forecast_days = result.forecast().count(),
        "Forecast built"
    );
    Ok(result)
}

fn log_metrics(metrics_report: &MetricsReport) {
    let metrics = metrics_report.metrics;
    for (model, scores) in [("linear", metrics.linear), ("ensemble", metrics.ensemble)] {
        tracing::info!(
            status = "info",
            model,
            policy = %metrics_report.policy,
            mae = scores.mae,
            rmse = scores.rmse,
            r2 = ?scores.r2,
            "Model evaluated on the test tail"
        );
    }
}

fn save_forecast(
    result: &ForecastResult,
    output_csv: &Path,
    metrics_json: &Path,
) -> Result<Vec<ForecastRecord>, String> {
    let records = result.records();
    write_forecast_csv(&records, output_csv)?;
    write_metrics_json(&result.metrics_report(), metrics_json)?;
    Ok(records)
}

fn file_name_for(path: &Path) -> Result<String, String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| format!("Path {} has no file name", path.display()))
}

fn build_download_links(
    flights_csv: &Path,
    forecast_csv: &Path,
) -> Result<report::DownloadLinks, String> {
    Ok(report::DownloadLinks {
        flights: file_name_for(flights_csv)?,
        forecast: file_name_for(forecast_csv)?,
    })
}

fn build_dashboard(
    flights: &[FlightRecord],
    filter: &FlightFilter,
    records: Vec<ForecastRecord>,
    metrics_report: MetricsReport,
) -> Result<report::Dashboard, String> {
    let selected: Vec<FlightRecord> = flights
        .iter()
        .filter(|record| filter.matches(record))
        .cloned()
        .collect();
    let top_routes = stats::top_routes(&selected, &FlightFilter::default(), TOP_ROUTES_LIMIT)
        .map_err(|err| err.to_string())?;
    Ok(report::Dashboard {
        selection: filter.describe(),
        policy: metrics_report.policy,
        forecast_summary: stats::summarize_forecast(&records),
        records,
        metrics: metrics_report.metrics,
        kpis: stats::calculate_kpis(&selected),
        top_routes,
        aircraft: stats::aircraft_usage(&selected, TOP_AIRCRAFT_LIMIT),
        top_origins: stats::top_airports(&selected, AirportSide::Origin, TOP_AIRPORTS_LIMIT),
        top_destinations: stats::top_airports(
            &selected,
            AirportSide::Destination,
            TOP_AIRPORTS_LIMIT,
        ),
        delay_buckets: stats::delay_buckets(&selected),
        daily_delays: stats::daily_delay_rate(&selected),
        delay_airports: stats::airport_delay_rates(&selected, DELAY_AIRPORTS_LIMIT),
    })
}

#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() {
    let args = Args::parse();
    match args.command {
        Command::Completions { shell, output } => {
            if let Err(err) = generate_completions(shell, output) {
                eprintln!("{err}");
            }
        }
        Command::Run {
            output_html,
            minify_html,
            output_flights_csv,
            output_forecast_csv,
            metrics_json,
            forecast: forecast_args,
            filter,
            config: config_path,
        } => {
            init_logging();
            headline(APP_ABOUT);
            let config = match load_config(&config_path) {
                Ok(config) => config,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            let filter = match filter.into_filter() {
                Ok(filter) => filter,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            tracing::info!(
                mode = "run",
                config_path = %config_path.display(),
                output_flights_csv = %output_flights_csv.display(),
                output_forecast_csv = %output_forecast_csv.display(),
                metrics_json = %metrics_json.display(),
                output_html = %output_html.display(),
                minify_html,
                "Starting full pipeline"
            );
            let download_links =
                match build_download_links(&output_flights_csv, &output_forecast_csv) {
                    Ok(links) => links,
                    Err(err) => {
                        error(&err);
                        return;
                    }
                };

            info(&format!("Saving flights CSV to {}", output_flights_csv.display()));
            let flights = match download_flights(&filter, &config.database).await {
                Ok(flights) => flights,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            if let Err(err) = data::to_csv(&flights, &output_flights_csv) {
                error(&err);
                return;
            }

            let result = match build_forecast(&flights, &filter, &forecast_args, &config) {
                Ok(result) => result,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            let metrics_report = result.metrics_report();
            log_metrics(&metrics_report);
            let records = match save_forecast(&result, &output_forecast_csv, &metrics_json) {
                Ok(records) => records,
                Err(err) => {
                    error(&err);
                    return;
                }
            };

            let dashboard = match build_dashboard(&flights, &filter, records, metrics_report) {
                Ok(dashboard) => dashboard,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            if let Err(err) =
                report::render_dashboard(&dashboard, &output_html, &download_links, minify_html)
            {
                error(&format!("Failed to render dashboard: {err}"));
                return;
            }

            success(&format!(
                "Saved forecast to {} and {}",
                output_forecast_csv.display(),
                output_html.display()
            ));
        }
        Command::Download {
            output_csv,
            filter,
            config: config_path,
        } => {
            init_logging();
            headline(APP_ABOUT);
            let config = match load_config(&config_path) {
                Ok(config) => config,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            let filter = match filter.into_filter() {
                Ok(filter) => filter,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            tracing::info!(
                mode = "download",
                table = %config.database.table,
                selection = %filter.describe(),
                output_csv = %output_csv.display(),
                "Downloading flights"
            );
            info(&format!("Saving CSV to {}", output_csv.display()));
            let flights = match download_flights(&filter, &config.database).await {
                Ok(flights) => flights,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            if let Err(err) = data::to_csv(&flights, &output_csv) {
                error(&err);
                return;
            }
            success(&format!(
                "Saved {} flights to {}",
                flights.len(),
                output_csv.display()
            ));
        }
        Command::Forecast {
            csv,
            output_csv,
            metrics_json,
            forecast: forecast_args,
            filter,
            config: config_path,
        } => {
            init_logging();
            headline(APP_ABOUT);
            let config = match load_config(&config_path) {
                Ok(config) => config,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            let filter = match filter.into_filter() {
                Ok(filter) => filter,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            tracing::info!(
                mode = "forecast",
                config_path = %config_path.display(),
                input_csv = %csv.display(),
                output_csv = %output_csv.display(),
                metrics_json = %metrics_json.display(),
                "Forecasting daily flights"
            );
            let flights = match load_flights(&csv) {
                Ok(flights) => flights,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            let result = match build_forecast(&flights, &filter, &forecast_args, &config) {
                Ok(result) => result,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            log_metrics(&result.metrics_report());
            if let Err(err) = save_forecast(&result, &output_csv, &metrics_json) {
                error(&err);
                return;
            }
            success(&format!(
                "Saved forecast to {} and metrics to {}",
                output_csv.display(),
                metrics_json.display()
            ));
        }
        Command::Render {
            csv,
            forecast_csv,
            metrics_json,
            output_html,
            minify_html,
            policy,
            filter,
        } => {
            init_logging();
            headline(APP_ABOUT);
            let filter = match filter.into_filter() {
                Ok(filter) => filter,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            tracing::info!(
                mode = "render",
                input_csv = %csv.display(),
                forecast_csv = %forecast_csv.display(),
                metrics_json = %metrics_json.display(),
                output_html = %output_html.display(),
                minify_html,
                "Rendering HTML dashboard"
            );
            let download_links = match build_download_links(&csv, &forecast_csv) {
                Ok(links) => links,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            let flights = match load_flights(&csv) {
                Ok(flights) => flights,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            let records = match read_forecast_csv(&forecast_csv) {
                Ok(records) => records,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            let mut metrics_report = match read_metrics_json(&metrics_json) {
                Ok(report) => report,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            if let Some(policy) = policy {
                metrics_report.policy = policy;
            }

            let dashboard = match build_dashboard(&flights, &filter, records, metrics_report) {
                Ok(dashboard) => dashboard,
                Err(err) => {
                    error(&err);
                    return;
                }
            };
            if let Err(err) =
                report::render_dashboard(&dashboard, &output_html, &download_links, minify_html)
            {
                error(&format!("Failed to render dashboard: {err}"));
                return;
            }
            success(&format!("Saved HTML to {}", output_html.display()));
        }
    }
}
