//! Записи о рейсах: разбор ответа API, запись и чтение CSV.

use std::error::Error;
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::constants::DATE_FORMAT;

const TIME_FORMAT_NAIVE: &str = "%Y-%m-%d %H:%M:%S";
const TIME_FORMAT_NAIVE_T: &str = "%Y-%m-%dT%H:%M:%S%.f";
const TIME_FORMAT_OFFSET: &str = "%Y-%m-%d %H:%M:%S%#z";

const ERROR_EMPTY_DATE: &str = "empty flight_date";
const ERROR_UNRECOGNIZED_DATE: &str = "unrecognized date format";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DateFormatHint {
    Date,
    Rfc3339,
    Offset,
    NaiveT,
    Naive,
}

impl DateFormatHint {
    const ALL: [Self; 5] = [
        Self::Date,
        Self::Rfc3339,
        Self::Offset,
        Self::NaiveT,
        Self::Naive,
    ];

    /// Для значений со смещением берётся локальная дата рейса, без перевода в UTC.
    fn parse(self, raw: &str) -> Option<NaiveDate> {
        match self {
            Self::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT).ok(),
            Self::Rfc3339 => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive()),
            Self::Offset => DateTime::parse_from_str(raw, TIME_FORMAT_OFFSET)
                .ok()
                .map(|dt| dt.date_naive()),
            Self::NaiveT => NaiveDateTime::parse_from_str(raw, TIME_FORMAT_NAIVE_T)
                .ok()
                .map(|dt| dt.date()),
            Self::Naive => NaiveDateTime::parse_from_str(raw, TIME_FORMAT_NAIVE)
                .ok()
                .map(|dt| dt.date()),
        }
    }
}

/// Парсит дату рейса; удачный формат запоминается и пробуется первым на следующих строках.
fn parse_flight_date_with_hint(
    raw: &str,
    hint: &mut Option<DateFormatHint>,
) -> Result<NaiveDate, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ERROR_EMPTY_DATE.into());
    }

    if let Some(known) = *hint
        && let Some(date) = known.parse(trimmed)
    {
        return Ok(date);
    }

    for candidate in DateFormatHint::ALL {
        if let Some(date) = candidate.parse(trimmed) {
            *hint = Some(candidate);
            return Ok(date);
        }
    }

    Err(ERROR_UNRECOGNIZED_DATE.into())
}

/// Рейс в том виде, в каком он хранится в CSV.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlightRecord {
    pub flight_date: NaiveDate,
    pub origin_code: String,
    pub destination_code: String,
    pub registration: Option<String>,
    pub is_delayed: bool,
    pub delay_minutes: Option<f64>,
    pub fuel_used: Option<f64>,
}

impl FlightRecord {
    pub fn route(&self) -> (&str, &str) {
        (&self.origin_code, &self.destination_code)
    }
}

/// Строка ответа API или CSV до разбора даты; лишние колонки игнорируются.
#[derive(Debug, Deserialize)]
struct RawFlight {
    flight_date: String,
    origin_code: String,
    destination_code: String,
    #[serde(default)]
    registration: Option<String>,
    #[serde(default)]
    is_delayed: Option<bool>,
    #[serde(default)]
    delay_minutes: Option<f64>,
    #[serde(default)]
    fuel_used: Option<f64>,
}

impl RawFlight {
    fn into_record(self, hint: &mut Option<DateFormatHint>) -> Result<FlightRecord, String> {
        let flight_date = parse_flight_date_with_hint(&self.flight_date, hint)
            .map_err(|err| format!("failed to parse flight_date '{}': {err}", self.flight_date))?;
        Ok(FlightRecord {
            flight_date,
            origin_code: self.origin_code.trim().to_uppercase(),
            destination_code: self.destination_code.trim().to_uppercase(),
            registration: self
                .registration
                .map(|reg| reg.trim().to_string())
                .filter(|reg| !reg.is_empty()),
            is_delayed: self.is_delayed.unwrap_or(false),
            delay_minutes: self.delay_minutes,
            fuel_used: self.fuel_used,
        })
    }
}

/// Разбирает JSON-массив рейсов из ответа API.
pub fn decode_flights(payload: &[u8]) -> Result<Vec<FlightRecord>, String> {
    let raw: Vec<RawFlight> = serde_json::from_slice(payload)
        .map_err(|err| format!("Failed to deserialize JSON: {err}"))?;
    let mut hint = None;
    raw.into_iter()
        .map(|flight| flight.into_record(&mut hint))
        .collect()
}

/// Записывает рейсы в CSV, создавая директорию при необходимости.
pub fn to_csv(records: &[FlightRecord], file_path: &Path) -> Result<(), String> {
    if let Some(parent) = file_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create {}: {err}", parent.display()))?;
    }
    let file = std::fs::File::create(file_path)
        .map_err(|err| format!("Failed to create CSV {}: {err}", file_path.display()))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for record in records {
        writer
            .serialize(record)
            .map_err(|err| format!("Failed to write CSV row to {}: {err}", file_path.display()))?;
    }
    writer
        .flush()
        .map_err(|err| format!("Failed to flush CSV {}: {err}", file_path.display()))?;
    Ok(())
}

/// Читает CSV рейсов, принимая дату как в виде даты, так и в виде отметки времени.
pub fn load_csv(csv_path: &Path) -> Result<Vec<FlightRecord>, Box<dyn Error>> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut hint = None;
    reader
        .deserialize::<RawFlight>()
        .map(|row| Ok(row?.into_record(&mut hint)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::tempdir;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[rstest]
    #[case("2024-03-05", DateFormatHint::Date)]
    #[case("2024-03-05T23:10:00+03:00", DateFormatHint::Rfc3339)]
    #[case("2024-03-05 23:10:00+0300", DateFormatHint::Offset)]
    #[case("2024-03-05T23:10:00.123", DateFormatHint::NaiveT)]
    #[case("2024-03-05 23:10:00", DateFormatHint::Naive)]
    fn parses_known_formats_and_remembers_hint(#[case] raw: &str, #[case] expected: DateFormatHint) {
        let mut hint = None;
        assert_eq!(parse_flight_date_with_hint(raw, &mut hint), Ok(day(2024, 3, 5)));
        assert_eq!(hint, Some(expected));
    }

    #[test]
    fn falls_back_when_hint_does_not_match() {
        let mut hint = Some(DateFormatHint::Date);
        let parsed = parse_flight_date_with_hint("2024-01-02 08:00:00", &mut hint);
        assert_eq!(parsed, Ok(day(2024, 1, 2)));
        assert_eq!(hint, Some(DateFormatHint::Naive));
    }

    #[rstest]
    #[case("", ERROR_EMPTY_DATE)]
    #[case("05/03/2024", ERROR_UNRECOGNIZED_DATE)]
    fn rejects_bad_dates(#[case] raw: &str, #[case] message: &str) {
        let mut hint = None;
        assert_eq!(parse_flight_date_with_hint(raw, &mut hint), Err(message.to_string()));
    }

    #[test]
    fn decodes_api_payload_with_nulls_and_extra_columns() {
        let payload = br#"[
            {"id": 1, "deleted": false, "flight_date": "2024-05-01", "origin_code": "svo",
             "destination_code": "LED", "registration": "RA-73001", "is_delayed": true,
             "delay_minutes": 25.0, "fuel_used": 5400.5},
            {"id": 2, "deleted": false, "flight_date": "2024-05-01T06:30:00+00:00",
             "origin_code": "LED", "destination_code": "SVO", "registration": null,
             "is_delayed": null, "delay_minutes": null, "fuel_used": null}
        ]"#;
        let flights = decode_flights(payload).unwrap();
        assert_eq!(flights.len(), 2);
        assert_eq!(flights[0].origin_code, "SVO");
        assert!(flights[0].is_delayed);
        assert_eq!(flights[1].flight_date, day(2024, 5, 1));
        assert_eq!(flights[1].registration, None);
        assert!(!flights[1].is_delayed);
    }

    #[test]
    fn csv_persists_and_reloads() {
        let records = vec![
            FlightRecord {
                flight_date: day(2024, 2, 29),
                origin_code: "SVO".into(),
                destination_code: "AER".into(),
                registration: Some("RA-89001".into()),
                is_delayed: false,
                delay_minutes: Some(0.0),
                fuel_used: Some(4100.0),
            },
            FlightRecord {
                flight_date: day(2024, 3, 1),
                origin_code: "AER".into(),
                destination_code: "SVO".into(),
                registration: None,
                is_delayed: true,
                delay_minutes: None,
                fuel_used: None,
            },
        ];
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("flights.csv");
        to_csv(&records, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text.lines().next(),
            Some("flight_date,origin_code,destination_code,registration,is_delayed,delay_minutes,fuel_used")
        );
        assert_eq!(load_csv(&path).unwrap(), records);
    }

    #[test]
    fn csv_with_bad_date_reports_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flights.csv");
        std::fs::write(
            &path,
            "flight_date,origin_code,destination_code\nyesterday,SVO,LED\n",
        )
        .unwrap();
        let err = load_csv(&path).unwrap_err().to_string();
        assert!(err.contains("yesterday"));
    }
}
