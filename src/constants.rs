//! Общие константы: формат дат и предел горизонта прогноза.

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_MAX_HORIZON_DAYS: usize = 180;
