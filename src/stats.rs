//! Сводные показатели для карточек дашборда.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use itertools::Itertools;

use crate::data::FlightRecord;
use crate::forecast::{ForecastError, ForecastRecord};
use crate::series::{FlightFilter, daily_counts_by_route};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlightKpis {
    pub total_flights: usize,
    pub unique_routes: usize,
    pub unique_aircraft: usize,
    /// Доля рейсов без задержки, в процентах; `None` для пустой выборки.
    pub on_time_percent: Option<f64>,
    /// Средняя задержка по рейсам, где она известна.
    pub average_delay_minutes: Option<f64>,
    pub total_fuel: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteCount {
    pub origin: String,
    pub destination: String,
    pub flights: u32,
    pub active_days: usize,
}

impl RouteCount {
    pub fn label(&self) -> String {
        format!("{} → {}", self.origin, self.destination)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AircraftUsage {
    pub registration: String,
    pub flights: usize,
}

/// Число задержанных рейсов в интервале длительности задержки.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelayBucket {
    pub label: &'static str,
    pub flights: usize,
}

/// Доля задержанных рейсов в группе: по дню или по аэропорту вылета.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelayRate<K> {
    pub key: K,
    pub flights: usize,
    pub delayed: usize,
}

impl<K> DelayRate<K> {
    pub fn rate_percent(&self) -> f64 {
        if self.flights == 0 {
            return 0.0;
        }
        self.delayed as f64 / self.flights as f64 * 100.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AirportSide {
    Origin,
    Destination,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AirportCount {
    pub airport: String,
    pub flights: usize,
}

/// Интервалы (нижняя, верхняя] в минутах.
const DELAY_BUCKETS: [(f64, f64, &str); 5] = [
    (0.0, 15.0, "до 15 мин"),
    (15.0, 30.0, "15–30 мин"),
    (30.0, 60.0, "30–60 мин"),
    (60.0, 120.0, "1–2 ч"),
    (120.0, f64::INFINITY, "более 2 ч"),
];

/// Средние значения факта и прогноза для карточек над графиком.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ForecastSummary {
    pub historical_average: Option<f64>,
    pub forecast_average: Option<f64>,
    pub forecast_total: u64,
    pub horizon_days: usize,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0_usize), |(sum, count), value| (sum + value, count + 1));
    (count > 0).then(|| sum / count as f64)
}

pub fn calculate_kpis(records: &[FlightRecord]) -> FlightKpis {
    let unique_routes = records.iter().map(FlightRecord::route).collect::<BTreeSet<_>>().len();
    let unique_aircraft = records
        .iter()
        .filter_map(|record| record.registration.as_deref())
        .collect::<BTreeSet<_>>()
        .len();
    let on_time_percent = mean(
        records
            .iter()
            .map(|record| if record.is_delayed { 0.0 } else { 100.0 }),
    );
    FlightKpis {
        total_flights: records.len(),
        unique_routes,
        unique_aircraft,
        on_time_percent,
        average_delay_minutes: mean(records.iter().filter_map(|record| record.delay_minutes)),
        total_fuel: records.iter().filter_map(|record| record.fuel_used).sum(),
    }
}

/// Самые загруженные маршруты; при равенстве порядок по кодам аэропортов.
pub fn top_routes(
    records: &[FlightRecord],
    filter: &FlightFilter,
    limit: usize,
) -> Result<Vec<RouteCount>, ForecastError> {
    let routes = daily_counts_by_route(records, filter)?;
    Ok(routes
        .into_iter()
        .map(|((origin, destination), series)| RouteCount {
            origin,
            destination,
            flights: series.counts().iter().sum(),
            active_days: series.len(),
        })
        .sorted_by(|a, b| b.flights.cmp(&a.flights))
        .take(limit)
        .collect())
}

pub fn aircraft_usage(records: &[FlightRecord], limit: usize) -> Vec<AircraftUsage> {
    records
        .iter()
        .filter_map(|record| record.registration.as_deref())
        .fold(BTreeMap::<&str, usize>::new(), |mut acc, registration| {
            *acc.entry(registration).or_default() += 1;
            acc
        })
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1))
        .take(limit)
        .map(|(registration, flights)| AircraftUsage {
            registration: registration.to_string(),
            flights,
        })
        .collect()
}

/// Распределение задержанных рейсов по длительности; нулевая или неизвестная задержка не попадает никуда.
pub fn delay_buckets(records: &[FlightRecord]) -> Vec<DelayBucket> {
    let mut counts = [0_usize; DELAY_BUCKETS.len()];
    for minutes in records
        .iter()
        .filter(|record| record.is_delayed)
        .filter_map(|record| record.delay_minutes)
    {
        if let Some(idx) = DELAY_BUCKETS
            .iter()
            .position(|(lower, upper, _)| minutes > *lower && minutes <= *upper)
        {
            counts[idx] += 1;
        }
    }
    DELAY_BUCKETS
        .iter()
        .zip(counts)
        .map(|(&(_, _, label), flights)| DelayBucket { label, flights })
        .collect()
}

fn tally_delays<'a, K: Ord>(
    records: &'a [FlightRecord],
    key: impl Fn(&'a FlightRecord) -> K,
) -> Vec<DelayRate<K>> {
    records
        .iter()
        .fold(BTreeMap::<K, (usize, usize)>::new(), |mut acc, record| {
            let slot = acc.entry(key(record)).or_default();
            slot.0 += 1;
            slot.1 += usize::from(record.is_delayed);
            acc
        })
        .into_iter()
        .map(|(key, (flights, delayed))| DelayRate {
            key,
            flights,
            delayed,
        })
        .collect()
}

/// Доля задержек по дням, в хронологическом порядке.
pub fn daily_delay_rate(records: &[FlightRecord]) -> Vec<DelayRate<NaiveDate>> {
    tally_delays(records, |record| record.flight_date)
}

/// Аэропорты вылета с наибольшей долей задержек; при равенстве порядок по коду.
pub fn airport_delay_rates(records: &[FlightRecord], limit: usize) -> Vec<DelayRate<String>> {
    tally_delays(records, |record| record.origin_code.clone())
        .into_iter()
        .sorted_by(|a, b| b.rate_percent().total_cmp(&a.rate_percent()))
        .take(limit)
        .collect()
}

pub fn top_airports(records: &[FlightRecord], side: AirportSide, limit: usize) -> Vec<AirportCount> {
    records
        .iter()
        .map(|record| match side {
            AirportSide::Origin => record.origin_code.as_str(),
            AirportSide::Destination => record.destination_code.as_str(),
        })
        .fold(BTreeMap::<&str, usize>::new(), |mut acc, airport| {
            *acc.entry(airport).or_default() += 1;
            acc
        })
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1))
        .take(limit)
        .map(|(airport, flights)| AirportCount {
            airport: airport.to_string(),
            flights,
        })
        .collect()
}

pub fn summarize_forecast(records: &[ForecastRecord]) -> ForecastSummary {
    let (forecast, history): (Vec<&ForecastRecord>, Vec<&ForecastRecord>) =
        records.iter().partition(|record| record.forecast);
    ForecastSummary {
        historical_average: mean(history.iter().map(|record| f64::from(record.count))),
        forecast_average: mean(forecast.iter().map(|record| f64::from(record.count))),
        forecast_total: forecast.iter().map(|record| u64::from(record.count)).sum(),
        horizon_days: forecast.len(),
    }
}

/// Стандартное отклонение исторических значений; ширина доверительной полосы.
pub fn historical_std(counts: &[u32]) -> f64 {
    let values: Vec<f64> = counts.iter().copied().map(f64::from).collect();
    let Some(avg) = mean(values.iter().copied()) else {
        return 0.0;
    };
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|value| (value - avg) * (value - avg)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}
