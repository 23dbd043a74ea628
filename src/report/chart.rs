//! Подготовка данных и генерация Plotly-графика.

use itertools::Itertools;
use plotly::color::{Rgb, Rgba};
use plotly::common::{Anchor, DashType, Fill, Font, Line, Mode, Orientation, Title};
use plotly::layout::{
    Annotation, Axis, GridPattern, ItemClick, Layout, LayoutGrid, Legend, Margin, RowOrder, Shape,
    ShapeLayer, ShapeLine, ShapeType, TicksDirection,
};
use plotly::{Configuration, Plot, Scatter};

use crate::constants::DATE_FORMAT;
use crate::forecast::ForecastRecord;
use crate::stats::historical_std;

/// Сводка для карточек над графиком.
#[derive(Clone, Debug)]
pub(super) struct ChartSummary {
    /// Последняя дата с фактическими рейсами (YYYY-MM-DD).
    pub latest_date: String,
    pub latest_count: u32,
    /// Изменение к предыдущей записи ряда.
    pub daily_change: Option<i64>,
    /// Изменение к записи неделей раньше (по позиции в ряду).
    pub weekly_change: Option<i64>,
    pub band: Option<BandSummary>,
}

/// Прогноз на конец горизонта с границами полосы.
#[derive(Clone, Debug)]
pub(super) struct BandSummary {
    pub horizon_days: usize,
    pub end_date: String,
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

pub(super) struct ChartOutput {
    pub plot: Plot,
    pub summary: ChartSummary,
}

/// Полоса прогноза: ±1.96 стандартного отклонения истории, нижняя граница не ниже нуля.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct ConfidenceBand {
    pub dates: Vec<String>,
    pub mean: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

const CONFIDENCE_Z: f64 = 1.96;
const MAX_PLOT_POINTS: usize = 900;
const ROLLING_WINDOW: usize = 7;
const ROLLING_MIN_PERIODS: usize = 4;
const AXIS_MAIN_X: &str = "x1";
const AXIS_MAIN_Y: &str = "y1";
const AXIS_ROLLING_X: &str = "x2";
const AXIS_ROLLING_Y: &str = "y2";
const AXIS_REF_X: &str = "x";
const AXIS_REF_Y: &str = "y";
const AXIS_REF_PAPER: &str = "paper";
const AXIS_REF_PIXEL: &str = "pixel";
const LABEL_ACTUAL: &str = "Факт";
const LABEL_FORECAST: &str = "Прогноз";
const LABEL_CONFIDENCE: &str = "95%";
const LABEL_ROLLING: &str = "Среднее за 7 дней";
const UNIT_FLIGHTS: &str = "рейсов";
const UNIT_FLIGHTS_PER_DAY: &str = "рейсов/сутки";
const FONT_FAMILY: &str = "PT Sans, Arial, sans-serif";
const TICK_FORMAT_MONTH_YEAR: &str = "%b\n%Y";
const FONT_SIZE_BASE: usize = 12;
const FONT_SIZE_AXIS_TITLE: usize = 13;
const FONT_SIZE_AXIS_TICK: usize = 11;
const FONT_SIZE_ANNOTATION: usize = 11;
const LINE_WIDTH_MAIN: f64 = 2.2;
const LINE_WIDTH_FORECAST: f64 = 2.2;
const LINE_WIDTH_ROLLING: f64 = 1.6;
const LINE_WIDTH_MARKER: f64 = 1.0;
const ARROW_HEAD: u8 = 2;
const ARROW_SIZE: f64 = 0.9;
const ARROW_WIDTH: f64 = 1.0;
const ANNOTATION_OFFSET_X: f64 = 20.0;
const ANNOTATION_OFFSET_Y: f64 = -34.0;
const FORECAST_OFFSET_X: f64 = -20.0;
const FORECAST_OFFSET_Y: f64 = -34.0;
const LEGEND_X: f64 = 0.5;
const LEGEND_Y: f64 = 1.02;
const LEGEND_FONT_SIZE: usize = 12;
const LEGEND_BORDER_WIDTH: usize = 1;
const MARGIN_LEFT: usize = 80;
const MARGIN_RIGHT: usize = 40;
const MARGIN_TOP: usize = 70;
const MARGIN_BOTTOM: usize = 60;
const MARGIN_PAD: usize = 8;
const TICK_LENGTH: usize = 6;
const AXIS_GRID_WIDTH: usize = 1;
const GRID_ROWS: usize = 2;
const GRID_COLS: usize = 1;
const X2_TICKS_COUNT: usize = 8;
const COLOR_ACTUAL: (u8, u8, u8) = (36, 100, 166);
const COLOR_FORECAST: (u8, u8, u8) = (214, 106, 38);
const COLOR_TRANSPARENT: (u8, u8, u8, f64) = (214, 106, 38, 0.0);
const COLOR_BAND: (u8, u8, u8, f64) = (214, 106, 38, 0.18);
const COLOR_ROLLING_FILL: (u8, u8, u8, f64) = (36, 100, 166, 0.15);
const COLOR_ROLLING_LINE: (u8, u8, u8) = (29, 82, 137);
const COLOR_ARROW: (u8, u8, u8, f64) = (80, 80, 80, 0.6);
const COLOR_MARKER_LINE: (u8, u8, u8, f64) = (80, 80, 80, 0.35);
const COLOR_TEXT_BASE: (u8, u8, u8) = (40, 40, 40);
const COLOR_TEXT_ANNOTATION: (u8, u8, u8) = (32, 32, 32);
const COLOR_PANEL_BG: (u8, u8, u8, f64) = (255, 255, 255, 0.85);
const COLOR_PANEL_BORDER: (u8, u8, u8, f64) = (200, 200, 200, 0.75);
const COLOR_AXIS_TICK: (u8, u8, u8, f64) = (0, 0, 0, 0.45);
const COLOR_AXIS_LINE: (u8, u8, u8, f64) = (0, 0, 0, 0.35);
const COLOR_AXIS_GRID_LIGHT: (u8, u8, u8, f64) = (0, 0, 0, 0.06);
const COLOR_AXIS_GRID_MEDIUM: (u8, u8, u8, f64) = (0, 0, 0, 0.08);
const COLOR_LEGEND_BG: (u8, u8, u8, f64) = (255, 255, 255, 0.75);
const COLOR_LEGEND_BORDER: (u8, u8, u8, f64) = (210, 210, 210, 0.8);

fn rgb(color: (u8, u8, u8)) -> Rgb {
    Rgb::new(color.0, color.1, color.2)
}

fn rgba(color: (u8, u8, u8, f64)) -> Rgba {
    Rgba::new(color.0, color.1, color.2, color.3)
}

pub(super) fn confidence_band(records: &[ForecastRecord]) -> ConfidenceBand {
    let history = records
        .iter()
        .filter(|record| !record.forecast)
        .map(|record| record.count)
        .collect_vec();
    let spread = CONFIDENCE_Z * historical_std(&history);
    let forecast = records.iter().filter(|record| record.forecast).collect_vec();
    ConfidenceBand {
        dates: forecast
            .iter()
            .map(|record| record.date.format(DATE_FORMAT).to_string())
            .collect(),
        mean: forecast.iter().map(|record| f64::from(record.count)).collect(),
        lower: forecast
            .iter()
            .map(|record| (f64::from(record.count) - spread).max(0.0))
            .collect(),
        upper: forecast
            .iter()
            .map(|record| f64::from(record.count) + spread)
            .collect(),
    }
}

fn change_at(values: &[f64], back: usize) -> Option<i64> {
    let last = *values.last()?;
    let earlier = *values.get(values.len().checked_sub(back + 1)?)?;
    #[allow(clippy::cast_possible_truncation)]
    Some((last - earlier) as i64)
}

fn value_annotation(text: String, x: String, y: f64, offset: (f64, f64), anchor: Anchor) -> Annotation {
    Annotation::new()
        .text(text)
        .x(x)
        .y(y)
        .x_ref(AXIS_REF_X)
        .y_ref(AXIS_REF_Y)
        .x_anchor(anchor)
        .y_anchor(Anchor::Bottom)
        .ax(offset.0)
        .ay(offset.1)
        .ax_ref(AXIS_REF_PIXEL)
        .ay_ref(AXIS_REF_PIXEL)
        .show_arrow(true)
        .arrow_head(ARROW_HEAD)
        .arrow_size(ARROW_SIZE)
        .arrow_width(ARROW_WIDTH)
        .arrow_color(rgba(COLOR_ARROW))
        .font(
            Font::new()
                .size(FONT_SIZE_ANNOTATION)
                .color(rgb(COLOR_TEXT_ANNOTATION)),
        )
        .background_color(rgba(COLOR_PANEL_BG))
        .border_color(rgba(COLOR_PANEL_BORDER))
        .border_width(LINE_WIDTH_MARKER)
}

/// Строит двухпанельный график: факт с прогнозом и полосой сверху, скользящее среднее снизу.
#[allow(clippy::too_many_lines)]
pub(super) fn build_forecast_chart(records: &[ForecastRecord]) -> ChartOutput {
    let (actual_dates, actual_counts): (Vec<String>, Vec<f64>) = records
        .iter()
        .filter(|record| !record.forecast)
        .map(|record| {
            (
                record.date.format(DATE_FORMAT).to_string(),
                f64::from(record.count),
            )
        })
        .unzip();
    let band = confidence_band(records);

    let rolling = centered_moving_average(&actual_counts, ROLLING_WINDOW, ROLLING_MIN_PERIODS);
    let (rolling_dates, rolling_values) = actual_dates
        .iter()
        .zip(rolling)
        .filter_map(|(date, value)| value.map(|v| (date.clone(), v)))
        .unzip::<_, _, Vec<_>, Vec<_>>();

    let (actual_dates_plot, actual_counts_plot) =
        downsample_min_max(&actual_dates, &actual_counts, MAX_PLOT_POINTS);
    let (rolling_dates_plot, rolling_values_plot) =
        downsample_min_max(&rolling_dates, &rolling_values, MAX_PLOT_POINTS / 2);

    let mut plot = Plot::new();
    plot.add_trace(
        Scatter::new(actual_dates_plot, actual_counts_plot)
            .mode(Mode::Lines)
            .line(
                Line::new()
                    .color(rgb(COLOR_ACTUAL))
                    .width(LINE_WIDTH_MAIN)
                    .simplify(true),
            )
            .name(LABEL_ACTUAL)
            .x_axis(AXIS_MAIN_X)
            .y_axis(AXIS_MAIN_Y),
    );

    if !band.dates.is_empty() {
        plot.add_trace(
            Scatter::new(band.dates.clone(), band.lower.clone())
                .mode(Mode::Lines)
                .line(Line::new().color(rgba(COLOR_TRANSPARENT)))
                .show_legend(false)
                .x_axis(AXIS_MAIN_X)
                .y_axis(AXIS_MAIN_Y),
        );
        plot.add_trace(
            Scatter::new(band.dates.clone(), band.upper.clone())
                .mode(Mode::Lines)
                .fill(Fill::ToNextY)
                .fill_color(rgba(COLOR_BAND))
                .line(Line::new().color(rgba(COLOR_TRANSPARENT)))
                .show_legend(false)
                .name(LABEL_CONFIDENCE)
                .x_axis(AXIS_MAIN_X)
                .y_axis(AXIS_MAIN_Y),
        );
        plot.add_trace(
            Scatter::new(band.dates.clone(), band.mean.clone())
                .mode(Mode::Lines)
                .line(
                    Line::new()
                        .color(rgb(COLOR_FORECAST))
                        .width(LINE_WIDTH_FORECAST)
                        .dash(DashType::Dash),
                )
                .name(LABEL_FORECAST)
                .x_axis(AXIS_MAIN_X)
                .y_axis(AXIS_MAIN_Y),
        );
    }

    plot.add_trace(
        Scatter::new(rolling_dates_plot, rolling_values_plot)
            .mode(Mode::Lines)
            .fill(Fill::ToZeroY)
            .fill_color(rgba(COLOR_ROLLING_FILL))
            .line(
                Line::new()
                    .color(rgb(COLOR_ROLLING_LINE))
                    .width(LINE_WIDTH_ROLLING)
                    .simplify(true),
            )
            .name(LABEL_ROLLING)
            .x_axis(AXIS_ROLLING_X)
            .y_axis(AXIS_ROLLING_Y),
    );

    let mut annotations = Vec::new();
    if let (Some(last_date), Some(last_value)) = (actual_dates.last(), actual_counts.last()) {
        annotations.push(value_annotation(
            format!("{last_value:.0} {UNIT_FLIGHTS}"),
            last_date.clone(),
            *last_value,
            (ANNOTATION_OFFSET_X, ANNOTATION_OFFSET_Y),
            Anchor::Left,
        ));
    }
    if let (Some(last_date), Some(last_mean)) = (band.dates.last(), band.mean.last()) {
        annotations.push(value_annotation(
            format!("{last_mean:.0} {UNIT_FLIGHTS}"),
            last_date.clone(),
            *last_mean,
            (FORECAST_OFFSET_X, FORECAST_OFFSET_Y),
            Anchor::Right,
        ));
    }

    // Вертикальная линия на границе факта и прогноза.
    let marker_shapes: Vec<Shape> = band
        .dates
        .first()
        .map(|start| {
            Shape::new()
                .shape_type(ShapeType::Line)
                .layer(ShapeLayer::Below)
                .x_ref(AXIS_REF_X)
                .y_ref(AXIS_REF_PAPER)
                .x0(start.clone())
                .x1(start.clone())
                .y0(0)
                .y1(1)
                .line(
                    ShapeLine::new()
                        .color(rgba(COLOR_MARKER_LINE))
                        .width(LINE_WIDTH_MARKER)
                        .dash(DashType::Dash),
                )
        })
        .into_iter()
        .collect();

    let layout = Layout::new()
        .font(
            Font::new()
                .family(FONT_FAMILY)
                .size(FONT_SIZE_BASE)
                .color(rgb(COLOR_TEXT_BASE)),
        )
        .auto_size(true)
        .margin(
            Margin::new()
                .left(MARGIN_LEFT)
                .right(MARGIN_RIGHT)
                .top(MARGIN_TOP)
                .bottom(MARGIN_BOTTOM)
                .pad(MARGIN_PAD),
        )
        .grid(
            LayoutGrid::new()
                .rows(GRID_ROWS)
                .columns(GRID_COLS)
                .pattern(GridPattern::Independent)
                .row_order(RowOrder::TopToBottom),
        )
        .show_legend(true)
        .legend(
            Legend::new()
                .orientation(Orientation::Horizontal)
                .item_click(ItemClick::False)
                .item_double_click(ItemClick::False)
                .x(LEGEND_X)
                .x_anchor(Anchor::Center)
                .y(LEGEND_Y)
                .y_anchor(Anchor::Bottom)
                .font(Font::new().size(LEGEND_FONT_SIZE))
                .background_color(rgba(COLOR_LEGEND_BG))
                .border_color(rgba(COLOR_LEGEND_BORDER))
                .border_width(LEGEND_BORDER_WIDTH),
        )
        .annotations(annotations)
        .shapes(marker_shapes)
        .x_axis(
            Axis::new()
                .title(Title::new())
                .show_tick_labels(false)
                .ticks(TicksDirection::Outside)
                .tick_length(TICK_LENGTH)
                .tick_color(rgba(COLOR_AXIS_TICK))
                .show_line(true)
                .line_color(rgba(COLOR_AXIS_LINE))
                .grid_color(rgba(COLOR_AXIS_GRID_LIGHT))
                .grid_width(AXIS_GRID_WIDTH)
                .auto_margin(true),
        )
        .y_axis(
            Axis::new()
                .title(Title::with_text(UNIT_FLIGHTS).font(Font::new().size(FONT_SIZE_AXIS_TITLE)))
                .tick_font(Font::new().size(FONT_SIZE_AXIS_TICK))
                .ticks(TicksDirection::Outside)
                .tick_length(TICK_LENGTH)
                .tick_color(rgba(COLOR_AXIS_TICK))
                .separate_thousands(true)
                .show_line(true)
                .line_color(rgba(COLOR_AXIS_LINE))
                .grid_color(rgba(COLOR_AXIS_GRID_MEDIUM))
                .grid_width(AXIS_GRID_WIDTH)
                .auto_margin(true),
        )
        .x_axis2(
            Axis::new()
                .matches("x")
                .tick_format(TICK_FORMAT_MONTH_YEAR)
                .n_ticks(X2_TICKS_COUNT)
                .tick_font(Font::new().size(FONT_SIZE_AXIS_TICK))
                .ticks(TicksDirection::Outside)
                .tick_length(TICK_LENGTH)
                .tick_color(rgba(COLOR_AXIS_TICK))
                .show_line(true)
                .line_color(rgba(COLOR_AXIS_LINE))
                .grid_color(rgba(COLOR_AXIS_GRID_LIGHT))
                .grid_width(AXIS_GRID_WIDTH)
                .auto_margin(true),
        )
        .y_axis2(
            Axis::new()
                .title(
                    Title::with_text(UNIT_FLIGHTS_PER_DAY)
                        .font(Font::new().size(FONT_SIZE_AXIS_TITLE)),
                )
                .tick_font(Font::new().size(FONT_SIZE_AXIS_TICK))
                .ticks(TicksDirection::Outside)
                .tick_length(TICK_LENGTH)
                .tick_color(rgba(COLOR_AXIS_TICK))
                .separate_thousands(true)
                .show_line(true)
                .line_color(rgba(COLOR_AXIS_LINE))
                .grid_color(rgba(COLOR_AXIS_GRID_MEDIUM))
                .grid_width(AXIS_GRID_WIDTH)
                .auto_margin(true),
        );

    plot.set_layout(layout);
    plot.set_configuration(Configuration::new().responsive(true));

    let band_summary = (!band.dates.is_empty()).then(|| BandSummary {
        horizon_days: band.dates.len(),
        end_date: band.dates.last().cloned().unwrap_or_default(),
        mean: band.mean.last().copied().unwrap_or_default(),
        lower: band.lower.last().copied().unwrap_or_default(),
        upper: band.upper.last().copied().unwrap_or_default(),
    });

    let latest_count = records
        .iter()
        .rev()
        .find(|record| !record.forecast)
        .map_or(0, |record| record.count);

    ChartOutput {
        plot,
        summary: ChartSummary {
            latest_date: actual_dates.last().cloned().unwrap_or_default(),
            latest_count,
            daily_change: change_at(&actual_counts, 1),
            weekly_change: change_at(&actual_counts, 7),
            band: band_summary,
        },
    }
}

/// Центрированное скользящее среднее; возвращает `None`, если окно недозаполнено.
fn centered_moving_average(values: &[f64], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    if window == 0 || values.is_empty() {
        return vec![None; values.len()];
    }
    let radius = window / 2;

    values
        .iter()
        .enumerate()
        .map(|(idx, _)| {
            let start = idx.saturating_sub(radius);
            let end = (idx + radius).min(values.len() - 1);
            let count = end - start + 1;
            if count < min_periods {
                None
            } else {
                let sum: f64 = values[start..=end].iter().copied().sum();
                Some(sum / count as f64)
            }
        })
        .collect()
}

/// Даунсемплит ряд, сохраняя минимум/максимум в бакетах, чтобы ускорить отрисовку.
fn downsample_min_max<X: Clone>(x: &[X], y: &[f64], max_points: usize) -> (Vec<X>, Vec<f64>) {
    if x.len() <= max_points || x.len() != y.len() || max_points < 3 {
        return (x.to_vec(), y.to_vec());
    }

    let len = y.len();
    let mut indices = Vec::with_capacity(max_points);
    indices.push(0);

    let interior_len = len.saturating_sub(2);
    let bucket_count = (max_points.saturating_sub(2) / 2).max(1);
    let bucket_size = interior_len.div_ceil(bucket_count);

    if bucket_size == 0 {
        indices.push(len - 1);
    } else {
        let mut start = 1usize;
        while start < len - 1 {
            let end = (start + bucket_size).min(len - 1);
            let bucket = start..end;
            let min_idx = bucket
                .clone()
                .min_by(|&a, &b| y[a].total_cmp(&y[b]))
                .unwrap_or(start);
            let max_idx = bucket
                .max_by(|&a, &b| y[a].total_cmp(&y[b]))
                .unwrap_or(start);
            indices.push(min_idx.min(max_idx));
            indices.push(min_idx.max(max_idx));
            start = end;
        }
        indices.push(len - 1);
    }

    indices.sort_unstable();
    indices.dedup();

    indices
        .into_iter()
        .map(|idx| (x[idx].clone(), y[idx]))
        .unzip()
}
