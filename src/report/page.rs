//! Рендер HTML-страницы дашборда с Plotly-графиком.

use chrono::{DateTime, Utc};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use plotly::Plot;

use super::chart::ChartSummary;
use super::{Dashboard, DownloadLinks};
use crate::constants::DATE_FORMAT;
use crate::forecast::ModelMetrics;
use crate::stats::{AirportCount, DelayRate};

const PAGE_TITLE: &str = "Прогноз числа рейсов";
const PAGE_DESCRIPTION: &str =
    "Дневное число рейсов, прогноз двух моделей и ключевые показатели по выборке.";
const FAVICON_DATA_URI: &str = "data:image/svg+xml,%3Csvg%20xmlns='http://www.w3.org/2000/svg'%20viewBox='0%200%2064%2064'%3E%3Crect%20width='64'%20height='64'%20rx='14'%20fill='%232464a6'/%3E%3Ctext%20x='32'%20y='41'%20font-size='28'%20text-anchor='middle'%20font-family='IBM%20Plex%20Sans,%20Arial,%20sans-serif'%20fill='white'%3EF%3C/text%3E%3C/svg%3E";
const GENERATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M UTC";
const GOOGLE_FONTS_CSS: &str =
    "https://fonts.googleapis.com/css2?family=IBM+Plex+Sans:wght@400;500;600&display=swap";
const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";
const UNIT_FLIGHTS: &str = "рейсов";
const DASH: &str = "—";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const STYLE: &str = "
:root {
    color-scheme: light;
    --bg: #f7f6f2;
    --card: #ffffff;
    --ink: #1f2430;
    --muted: #56606f;
    --accent: #2464a6;
    --forecast: #d66a26;
    --border: rgba(31, 36, 48, 0.08);
}
* { box-sizing: border-box; }
body {
    margin: 0;
    background: var(--bg);
    color: var(--ink);
    font-family: \"IBM Plex Sans\", \"PT Sans\", sans-serif;
}
.page { max-width: 1240px; margin: 40px auto 60px; padding: 0 24px; }
.hero { margin-bottom: 22px; }
.title { font-size: 26px; font-weight: 600; margin: 0; }
.subtitle { margin: 6px 0 0; color: var(--muted); font-size: 13px; }
.card {
    background: var(--card);
    border-radius: 18px;
    padding: 16px;
    border: 1px solid var(--border);
    overflow-x: auto;
}
.summary { margin: 14px 0 18px; }
.summary-grid {
    display: grid;
    grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
    gap: 14px;
}
.summary-card {
    background: var(--card);
    border-radius: 16px;
    padding: 14px 16px;
    border: 1px solid var(--border);
}
.summary-label {
    font-size: 11px;
    text-transform: uppercase;
    letter-spacing: 0.08em;
    color: var(--muted);
}
.summary-value { font-size: 20px; font-weight: 600; margin-top: 6px; }
.summary-value.forecast { color: var(--forecast); }
.summary-sub { margin-top: 6px; font-size: 12px; color: var(--muted); }
.table-card {
    background: var(--card);
    border-radius: 18px;
    padding: 18px 20px;
    border: 1px solid var(--border);
    margin-top: 18px;
}
.table-grid { display: grid; grid-template-columns: repeat(2, minmax(0, 1fr)); gap: 16px; }
.table-title { margin: 0 0 10px; font-size: 16px; font-weight: 600; }
.data-table { width: 100%; border-collapse: collapse; font-size: 13px; }
.data-table th, .data-table td {
    padding: 8px 10px;
    border-bottom: 1px solid var(--border);
    text-align: left;
}
.data-table th {
    color: var(--muted);
    font-weight: 500;
    text-transform: uppercase;
    font-size: 11px;
}
.data-table td.num { font-variant-numeric: tabular-nums; }
.data-table tr.active td { font-weight: 600; }
.data-table tbody tr:nth-child(even) { background: rgba(31, 36, 48, 0.02); }
.scroll { max-height: 420px; overflow-y: auto; }
.note { margin-top: 10px; font-size: 11px; color: var(--muted); }
#forecast-plot { width: 100%; min-height: 640px; }
footer { margin-top: 16px; font-size: 12px; color: var(--muted); text-align: right; }
footer a { color: inherit; border-bottom: 1px dotted rgba(86, 96, 111, 0.6); text-decoration: none; }
@media (max-width: 900px) {
    .title { font-size: 22px; }
    #forecast-plot { min-height: 560px; }
    .table-grid { grid-template-columns: 1fr; }
}
";

fn format_change(value: Option<i64>) -> String {
    value.map_or_else(|| DASH.to_string(), |val| format!("{val:+}"))
}

fn format_optional(value: Option<f64>, precision: usize, suffix: &str) -> String {
    value.map_or_else(
        || DASH.to_string(),
        |val| format!("{val:.precision$}{suffix}"),
    )
}

fn summary_card(label: &str, value: &str, sub: &str) -> Markup {
    html! {
        div class="summary-card" {
            div class="summary-label" { (label) }
            div class="summary-value" { (value) }
            div class="summary-sub" { (sub) }
        }
    }
}

fn metrics_row(name: &str, metrics: &ModelMetrics, active: bool) -> Markup {
    html! {
        tr class=[active.then_some("active")] {
            td { (name) }
            td class="num" { (format!("{:.2}", metrics.mae)) }
            td class="num" { (format!("{:.2}", metrics.rmse)) }
            td class="num" { (format_optional(metrics.r2, 3, "")) }
        }
    }
}

fn airport_table(title: &str, airports: &[AirportCount]) -> Markup {
    html! {
        div {
            h2 class="table-title" { (title) }
            table class="data-table" {
                thead {
                    tr {
                        th { "Аэропорт" }
                        th { "Рейсов" }
                    }
                }
                tbody {
                    @for airport in airports {
                        tr {
                            td { (airport.airport) }
                            td class="num" { (airport.flights) }
                        }
                    }
                }
            }
        }
    }
}

fn delay_rate_cells<K>(rate: &DelayRate<K>) -> Markup {
    html! {
        td class="num" { (rate.flights) }
        td class="num" { (rate.delayed) }
        td class="num" { (format!("{:.1}%", rate.rate_percent())) }
    }
}

#[allow(clippy::too_many_lines)]
pub(super) fn render_dashboard_page(
    plot: &Plot,
    summary: &ChartSummary,
    dashboard: &Dashboard,
    generated_at: DateTime<Utc>,
    download_links: &DownloadLinks,
) -> String {
    let plot_html = plot.to_inline_html(Some("forecast-plot"));
    let generated_label = generated_at.format(GENERATED_AT_FORMAT).to_string();
    let kpis = &dashboard.kpis;
    let forecast = &dashboard.forecast_summary;
    let policy = dashboard.policy.as_str();
    let forecast_rows = dashboard.records.iter().filter(|record| record.forecast);
    let band_sub = summary.band.as_ref().map_or_else(
        || "Запустите с командой forecast".to_string(),
        |band| {
            format!(
                "{} · {:.0} (95%: {:.0}–{:.0}) · через {} дн.",
                band.end_date, band.mean, band.lower, band.upper, band.horizon_days
            )
        },
    );

    let page = html! {
        (DOCTYPE)
        html lang="ru" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                meta name="description" content=(PAGE_DESCRIPTION);
                link rel="icon" type="image/svg+xml" href=(FAVICON_DATA_URI);
                title { (PAGE_TITLE) " · " (dashboard.selection) }
                link rel="preconnect" href="https://fonts.googleapis.com";
                link rel="preconnect" href="https://fonts.gstatic.com" crossorigin;
                link rel="stylesheet" href=(GOOGLE_FONTS_CSS);
                script src=(PLOTLY_CDN) {}
                style { (PreEscaped(STYLE)) }
            }
            body {
                div class="page" {
                    header class="hero" {
                        h1 class="title" { (PAGE_TITLE) }
                        p class="subtitle" {
                            "Выборка: " (dashboard.selection) " · политика объединения: " (policy)
                        }
                    }
                    section class="summary" {
                        div class="summary-grid" {
                            div class="summary-card" {
                                div class="summary-label" { "Последний день" }
                                div class="summary-value" {
                                    (summary.latest_count) " " (UNIT_FLIGHTS)
                                }
                                div class="summary-sub" {
                                    (summary.latest_date) " · "
                                    (format_change(summary.daily_change)) " за сутки, "
                                    (format_change(summary.weekly_change)) " за 7 записей"
                                }
                            }
                            (summary_card(
                                "Среднее по истории",
                                &format_optional(forecast.historical_average, 1, ""),
                                "рейсов в день",
                            ))
                            div class="summary-card" {
                                div class="summary-label" { "Прогноз" }
                                div class="summary-value forecast" {
                                    (format_optional(forecast.forecast_average, 1, ""))
                                }
                                div class="summary-sub" {
                                    "в среднем за день, всего " (forecast.forecast_total)
                                }
                                div class="summary-sub" { (band_sub) }
                            }
                            (summary_card(
                                "Рейсов в выборке",
                                &kpis.total_flights.to_string(),
                                &format!(
                                    "{} маршрутов · {} бортов",
                                    kpis.unique_routes, kpis.unique_aircraft
                                ),
                            ))
                            (summary_card(
                                "Вовремя",
                                &format_optional(kpis.on_time_percent, 1, "%"),
                                &format!(
                                    "средняя задержка {} мин",
                                    format_optional(kpis.average_delay_minutes, 1, "")
                                ),
                            ))
                            (summary_card(
                                "Топливо",
                                &format!("{:.0}", kpis.total_fuel),
                                "суммарный расход",
                            ))
                        }
                    }
                    div class="card" {
                        (PreEscaped(plot_html))
                    }
                    section class="table-card" {
                        h2 class="table-title" { "Качество моделей на тестовом хвосте" }
                        table class="data-table" {
                            thead {
                                tr {
                                    th { "Модель" }
                                    th { "MAE" }
                                    th { "RMSE" }
                                    th { "R²" }
                                }
                            }
                            tbody {
                                (metrics_row("Линейная регрессия", &dashboard.metrics.linear, policy == "linear"))
                                (metrics_row("Случайный лес", &dashboard.metrics.ensemble, policy == "ensemble_member"))
                            }
                        }
                        p class="note" {
                            "R² не определён, если на тестовом хвосте число рейсов не менялось."
                        }
                    }
                    section class="table-card" {
                        h2 class="table-title" { "Прогноз по дням" }
                        div class="scroll" {
                            table class="data-table" {
                                thead {
                                    tr {
                                        th { "Дата" }
                                        th { "Линейная" }
                                        th { "Лес" }
                                        th { "Итог" }
                                    }
                                }
                                tbody {
                                    @for record in forecast_rows {
                                        tr {
                                            td { (record.date.format(DATE_FORMAT).to_string()) }
                                            td class="num" { (format_optional(record.linear_prediction, 1, "")) }
                                            td class="num" { (format_optional(record.ensemble_prediction, 1, "")) }
                                            td class="num" { (record.count) }
                                        }
                                    }
                                }
                            }
                        }
                    }
                    section class="table-card" {
                        div class="table-grid" {
                            div {
                                h2 class="table-title" { "Популярные маршруты" }
                                table class="data-table" {
                                    thead {
                                        tr {
                                            th { "Маршрут" }
                                            th { "Рейсов" }
                                            th { "Дней" }
                                        }
                                    }
                                    tbody {
                                        @for route in &dashboard.top_routes {
                                            tr {
                                                td { (route.label()) }
                                                td class="num" { (route.flights) }
                                                td class="num" { (route.active_days) }
                                            }
                                        }
                                    }
                                }
                            }
                            div {
                                h2 class="table-title" { "Загрузка бортов" }
                                table class="data-table" {
                                    thead {
                                        tr {
                                            th { "Борт" }
                                            th { "Рейсов" }
                                        }
                                    }
                                    tbody {
                                        @for aircraft in &dashboard.aircraft {
                                            tr {
                                                td { (aircraft.registration) }
                                                td class="num" { (aircraft.flights) }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                    section class="table-card" {
                        div class="table-grid" {
                            (airport_table("Аэропорты вылета", &dashboard.top_origins))
                            (airport_table("Аэропорты прилёта", &dashboard.top_destinations))
                        }
                    }
                    section class="table-card" {
                        div class="table-grid" {
                            div {
                                h2 class="table-title" { "Длительность задержек" }
                                table class="data-table" {
                                    thead {
                                        tr {
                                            th { "Задержка" }
                                            th { "Рейсов" }
                                        }
                                    }
                                    tbody {
                                        @for bucket in &dashboard.delay_buckets {
                                            tr {
                                                td { (bucket.label) }
                                                td class="num" { (bucket.flights) }
                                            }
                                        }
                                    }
                                }
                                h2 class="table-title" { "Аэропорты с наибольшей долей задержек" }
                                table class="data-table" {
                                    thead {
                                        tr {
                                            th { "Аэропорт" }
                                            th { "Рейсов" }
                                            th { "Задержано" }
                                            th { "Доля" }
                                        }
                                    }
                                    tbody {
                                        @for rate in &dashboard.delay_airports {
                                            tr {
                                                td { (rate.key) }
                                                (delay_rate_cells(rate))
                                            }
                                        }
                                    }
                                }
                            }
                            div {
                                h2 class="table-title" { "Доля задержек по дням" }
                                div class="scroll" {
                                    table class="data-table" {
                                        thead {
                                            tr {
                                                th { "Дата" }
                                                th { "Рейсов" }
                                                th { "Задержано" }
                                                th { "Доля" }
                                            }
                                        }
                                        tbody {
                                            @for rate in &dashboard.daily_delays {
                                                tr {
                                                    td { (rate.key.format(DATE_FORMAT).to_string()) }
                                                    (delay_rate_cells(rate))
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                    footer {
                        "Версия: " (APP_VERSION) " · Сгенерировано: " (generated_label) " · "
                        a href=(&download_links.flights) download { (download_links.flights) }
                        " · "
                        a href=(&download_links.forecast) download { (download_links.forecast) }
                    }
                }
            }
        }
    };
    page.into_string()
}
