//! Фильтрация рейсов и построение дневного ряда числа рейсов.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use clap::ValueEnum;

use crate::constants::DATE_FORMAT;
use crate::data::FlightRecord;
use crate::forecast::{DailyCount, DailyCountSeries, ForecastError};

/// Какие рейсы аэропорта учитывать.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Direction {
    Departures,
    Arrivals,
    #[default]
    Both,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Departures => "departures",
            Self::Arrivals => "arrivals",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Фильтр рейсов; пустые поля не ограничивают выборку. Коды аэропортов сравниваются без учёта регистра.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlightFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub airport: Option<String>,
    pub direction: Direction,
}

fn same_code(expected: Option<&str>, actual: &str) -> bool {
    expected.is_none_or(|code| code.eq_ignore_ascii_case(actual))
}

impl FlightFilter {
    pub fn validate(&self) -> Result<(), String> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date)
            && start > end
        {
            return Err(format!(
                "start date {} is after end date {}",
                start.format(DATE_FORMAT),
                end.format(DATE_FORMAT)
            ));
        }
        Ok(())
    }

    pub fn matches(&self, record: &FlightRecord) -> bool {
        let in_range = self.start_date.is_none_or(|start| record.flight_date >= start)
            && self.end_date.is_none_or(|end| record.flight_date <= end);
        if !in_range
            || !same_code(self.origin.as_deref(), &record.origin_code)
            || !same_code(self.destination.as_deref(), &record.destination_code)
        {
            return false;
        }
        let Some(airport) = self.airport.as_deref() else {
            return true;
        };
        let departs = airport.eq_ignore_ascii_case(&record.origin_code);
        let arrives = airport.eq_ignore_ascii_case(&record.destination_code);
        match self.direction {
            Direction::Departures => departs,
            Direction::Arrivals => arrives,
            Direction::Both => departs || arrives,
        }
    }

    /// Короткая подпись для заголовков отчёта.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        match (self.origin.as_deref(), self.destination.as_deref()) {
            (Some(origin), Some(destination)) => parts.push(format!("{origin} → {destination}")),
            (Some(origin), None) => parts.push(format!("из {origin}")),
            (None, Some(destination)) => parts.push(format!("в {destination}")),
            (None, None) => {}
        }
        if let Some(airport) = self.airport.as_deref() {
            let label = match self.direction {
                Direction::Departures => "вылеты",
                Direction::Arrivals => "прилёты",
                Direction::Both => "вылеты и прилёты",
            };
            parts.push(format!("{airport}: {label}"));
        }
        if parts.is_empty() {
            "все рейсы".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Считает рейсы по дням; дни без рейсов в ряд не попадают.
pub fn daily_counts(
    records: &[FlightRecord],
    filter: &FlightFilter,
) -> Result<DailyCountSeries, ForecastError> {
    let buckets = records
        .iter()
        .filter(|record| filter.matches(record))
        .fold(BTreeMap::<NaiveDate, u32>::new(), |mut acc, record| {
            *acc.entry(record.flight_date).or_default() += 1;
            acc
        });
    DailyCountSeries::new(
        buckets
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect(),
    )
}

/// Дневные ряды по каждому маршруту, упорядоченные по коду вылета и прилёта.
pub fn daily_counts_by_route(
    records: &[FlightRecord],
    filter: &FlightFilter,
) -> Result<BTreeMap<(String, String), DailyCountSeries>, ForecastError> {
    let mut routes: BTreeMap<(String, String), Vec<FlightRecord>> = BTreeMap::new();
    for record in records.iter().filter(|record| filter.matches(record)) {
        routes
            .entry((record.origin_code.clone(), record.destination_code.clone()))
            .or_default()
            .push(record.clone());
    }
    routes
        .into_iter()
        .map(|(route, flights)| {
            daily_counts(&flights, &FlightFilter::default()).map(|series| (route, series))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn flight(d: u32, origin: &str, destination: &str) -> FlightRecord {
        FlightRecord {
            flight_date: day(d),
            origin_code: origin.into(),
            destination_code: destination.into(),
            registration: None,
            is_delayed: false,
            delay_minutes: None,
            fuel_used: None,
        }
    }

    fn sample() -> Vec<FlightRecord> {
        vec![
            flight(3, "SVO", "LED"),
            flight(1, "SVO", "LED"),
            flight(1, "LED", "SVO"),
            flight(2, "SVO", "AER"),
            flight(3, "AER", "LED"),
            flight(3, "LED", "SVO"),
        ]
    }

    fn counts(series: &DailyCountSeries) -> Vec<(NaiveDate, u32)> {
        series
            .records()
            .iter()
            .map(|record| (record.date, record.count))
            .collect()
    }

    #[test]
    fn groups_by_day_in_date_order() {
        let series = daily_counts(&sample(), &FlightFilter::default()).unwrap();
        assert_eq!(counts(&series), vec![(day(1), 2), (day(2), 1), (day(3), 3)]);
    }

    #[rstest]
    #[case(Direction::Departures, vec![(day(1), 1), (day(2), 1), (day(3), 1)])]
    #[case(Direction::Arrivals, vec![(day(1), 1), (day(3), 1)])]
    #[case(Direction::Both, vec![(day(1), 2), (day(2), 1), (day(3), 2)])]
    fn airport_direction_selects_side(
        #[case] direction: Direction,
        #[case] expected: Vec<(NaiveDate, u32)>,
    ) {
        let filter = FlightFilter {
            airport: Some("svo".into()),
            direction,
            ..FlightFilter::default()
        };
        let series = daily_counts(&sample(), &filter).unwrap();
        assert_eq!(counts(&series), expected);
    }

    #[test]
    fn date_range_is_inclusive() {
        let filter = FlightFilter {
            start_date: Some(day(2)),
            end_date: Some(day(3)),
            ..FlightFilter::default()
        };
        let series = daily_counts(&sample(), &filter).unwrap();
        assert_eq!(counts(&series), vec![(day(2), 1), (day(3), 3)]);
    }

    #[test]
    fn route_filter_and_grouping() {
        let filter = FlightFilter {
            origin: Some("SVO".into()),
            destination: Some("LED".into()),
            ..FlightFilter::default()
        };
        let series = daily_counts(&sample(), &filter).unwrap();
        assert_eq!(counts(&series), vec![(day(1), 1), (day(3), 1)]);

        let by_route = daily_counts_by_route(&sample(), &FlightFilter::default()).unwrap();
        assert_eq!(by_route.len(), 4);
        let led_svo = &by_route[&("LED".to_string(), "SVO".to_string())];
        assert_eq!(counts(led_svo), vec![(day(1), 1), (day(3), 1)]);
    }

    #[test]
    fn empty_selection_gives_empty_series() {
        let filter = FlightFilter {
            origin: Some("KZN".into()),
            ..FlightFilter::default()
        };
        assert!(daily_counts(&sample(), &filter).unwrap().is_empty());
    }

    #[test]
    fn reversed_range_is_invalid() {
        let filter = FlightFilter {
            start_date: Some(day(5)),
            end_date: Some(day(1)),
            ..FlightFilter::default()
        };
        assert!(filter.validate().is_err());
        assert!(FlightFilter::default().validate().is_ok());
    }

    #[test]
    fn describes_selection() {
        let filter = FlightFilter {
            airport: Some("SVO".into()),
            direction: Direction::Arrivals,
            ..FlightFilter::default()
        };
        assert_eq!(filter.describe(), "SVO: прилёты");
        assert_eq!(FlightFilter::default().describe(), "все рейсы");
    }
}
