use bytes::Bytes;
use chrono::NaiveDate;
use reqwest::{Client, Error, Url};
use std::time::Duration;
use std::{env, fmt};
use tracing::{debug, info, warn};

use crate::constants::DATE_FORMAT;
use crate::data::{FlightRecord, decode_flights};
use crate::series::{Direction, FlightFilter};

const HTTPS_PROXY_ENV: &str = "HTTPS_PROXY";
const REST_PREFIX: &str = "rest/v1";
const API_KEY_HEADER: &str = "apikey";

#[derive(Debug)]
pub enum FetchError {
    Request(reqwest::Error),
    MissingCredential(String),
    InvalidUrl(String),
    Decode(String),
    NoAttempts,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(err) => write!(f, "{err}"),
            Self::MissingCredential(var) => {
                write!(f, "Environment variable {var} is not set")
            }
            Self::InvalidUrl(err) => write!(f, "Invalid flight store URL: {err}"),
            Self::Decode(err) => f.write_str(err),
            Self::NoAttempts => f.write_str("Request attempts were not performed"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(err) => Some(err),
            _ => None,
        }
    }
}

/// Параметры подключения к хранилищу рейсов.
#[derive(Clone, Debug)]
pub struct FlightStore {
    pub base_url: String,
    pub api_key: String,
    pub table: String,
    pub page_size: usize,
    pub max_retries: u32,
    pub delay: Duration,
}

/// Адрес и ключ берутся только из окружения.
pub fn credentials_from_env(url_env: &str, key_env: &str) -> Result<(String, String), FetchError> {
    let read = |name: &str| {
        env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| FetchError::MissingCredential(name.to_string()))
    };
    Ok((read(url_env)?, read(key_env)?))
}

pub fn build_client() -> Result<Client, String> {
    match env::var(HTTPS_PROXY_ENV) {
        Ok(val) => {
            info!(proxy = %val, "Using HTTPS proxy");
            let proxy = reqwest::Proxy::https(&val)
                .map_err(|err| format!("Invalid {HTTPS_PROXY_ENV} value {val}: {err}"))?;
            Client::builder()
                .proxy(proxy)
                .build()
                .map_err(|err| format!("Failed to build HTTP client: {err}"))
        }
        Err(e) => {
            debug!(error = %e, "HTTPS_PROXY not used");
            Ok(Client::new())
        }
    }
}

/// Одна выборка из таблицы; для аэропорта с `Direction::Both` их две.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct StoreQuery {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    origin: Option<String>,
    destination: Option<String>,
}

fn queries_for(filter: &FlightFilter) -> Vec<StoreQuery> {
    let base = StoreQuery {
        start_date: filter.start_date,
        end_date: filter.end_date,
        origin: filter.origin.clone(),
        destination: filter.destination.clone(),
    };
    let Some(airport) = filter.airport.as_ref().map(|code| code.to_uppercase()) else {
        return vec![base];
    };
    let departures = StoreQuery {
        origin: Some(airport.clone()),
        ..base.clone()
    };
    let arrivals = StoreQuery {
        destination: Some(airport),
        ..base
    };
    match filter.direction {
        Direction::Departures => vec![departures],
        Direction::Arrivals => vec![arrivals],
        Direction::Both => vec![departures, arrivals],
    }
}

fn query_params(query: &StoreQuery, limit: usize, offset: usize) -> Vec<(String, String)> {
    let mut params = vec![
        ("select".to_string(), "*".to_string()),
        ("deleted".to_string(), "eq.false".to_string()),
    ];
    if let Some(start) = query.start_date {
        params.push((
            "flight_date".to_string(),
            format!("gte.{}", start.format(DATE_FORMAT)),
        ));
    }
    if let Some(end) = query.end_date {
        params.push((
            "flight_date".to_string(),
            format!("lte.{}", end.format(DATE_FORMAT)),
        ));
    }
    if let Some(origin) = &query.origin {
        params.push(("origin_code".to_string(), format!("eq.{}", origin.to_uppercase())));
    }
    if let Some(destination) = &query.destination {
        params.push((
            "destination_code".to_string(),
            format!("eq.{}", destination.to_uppercase()),
        ));
    }
    params.push(("order".to_string(), "flight_date.asc".to_string()));
    params.push(("limit".to_string(), limit.to_string()));
    params.push(("offset".to_string(), offset.to_string()));
    params
}

fn page_url(
    store: &FlightStore,
    query: &StoreQuery,
    offset: usize,
) -> Result<Url, FetchError> {
    let endpoint = format!(
        "{}/{REST_PREFIX}/{}",
        store.base_url.trim_end_matches('/'),
        store.table
    );
    Url::parse_with_params(&endpoint, query_params(query, store.page_size, offset))
        .map_err(|err| FetchError::InvalidUrl(err.to_string()))
}

fn log_failure(attempt: u32, err: &Error, message: &str) {
    if let Some(status) = err.status() {
        warn!(attempt = attempt + 1, status = %status, error = %err, "{message}");
    } else {
        warn!(attempt = attempt + 1, error = %err, "{message}");
    }
}

/// Запрашивает страницу и повторяет попытки при сетевых/HTTP ошибках.
async fn fetch_url(client: &Client, url: &Url, store: &FlightStore) -> Result<Bytes, FetchError> {
    let mut last_error: Option<Error> = None;
    for attempt in 0..store.max_retries {
        let sent = client
            .get(url.clone())
            .header(API_KEY_HEADER, &store.api_key)
            .bearer_auth(&store.api_key)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        match sent {
            Ok(response) => return response.bytes().await.map_err(FetchError::Request),
            Err(err) => {
                log_failure(attempt, &err, "HTTP request failed");
                last_error = Some(err);
            }
        }

        if attempt + 1 < store.max_retries {
            if let Some(error) = &last_error {
                log_failure(attempt, error, "Retrying request");
            }
            tokio::time::sleep(store.delay).await;
        }
    }

    last_error.map_or_else(
        || Err(FetchError::NoAttempts),
        |err| Err(FetchError::Request(err)),
    )
}

/// Выкачивает одну выборку постранично, пока страница не окажется неполной.
async fn fetch_query(
    client: &Client,
    store: &FlightStore,
    query: &StoreQuery,
) -> Result<Vec<FlightRecord>, FetchError> {
    let page_size = store.page_size.max(1);
    let mut flights = Vec::new();
    let mut offset = 0;
    loop {
        let url = page_url(store, query, offset)?;
        let payload = fetch_url(client, &url, store).await?;
        let mut page = decode_flights(&payload).map_err(FetchError::Decode)?;
        let received = page.len();
        debug!(offset, received, "Fetched page");
        flights.append(&mut page);
        if received < page_size {
            break;
        }
        offset += received;
    }
    Ok(flights)
}

/// Загружает рейсы по фильтру; вылеты и прилёты аэропорта запрашиваются параллельно и склеиваются.
pub async fn fetch_flights(
    client: &Client,
    store: &FlightStore,
    filter: &FlightFilter,
) -> Result<Vec<FlightRecord>, FetchError> {
    let queries = queries_for(filter);
    let mut flights = match queries.as_slice() {
        [first, second] => {
            let (mut departures, mut arrivals) = futures::try_join!(
                fetch_query(client, store, first),
                fetch_query(client, store, second)
            )?;
            departures.append(&mut arrivals);
            departures
        }
        _ => {
            let mut all = Vec::new();
            for query in &queries {
                all.append(&mut fetch_query(client, store, query).await?);
            }
            all
        }
    };
    flights.sort_by_key(|flight| flight.flight_date);
    info!(flights = flights.len(), queries = queries.len(), "Fetched flights");
    Ok(flights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> FlightStore {
        FlightStore {
            base_url: "https://example.supabase.co/".into(),
            api_key: "test-key".into(),
            table: "flights".into(),
            page_size: 1000,
            max_retries: 3,
            delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn airport_both_splits_into_two_queries() {
        let filter = FlightFilter {
            airport: Some("svo".into()),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..FlightFilter::default()
        };
        let queries = queries_for(&filter);
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].origin.as_deref(), Some("SVO"));
        assert_eq!(queries[0].destination, None);
        assert_eq!(queries[1].destination.as_deref(), Some("SVO"));
        assert!(queries.iter().all(|query| query.start_date == filter.start_date));
    }

    #[test]
    fn plain_filter_is_a_single_query() {
        let filter = FlightFilter {
            origin: Some("LED".into()),
            ..FlightFilter::default()
        };
        let queries = queries_for(&filter);
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].origin.as_deref(), Some("LED"));
    }

    #[test]
    fn page_url_carries_filters_and_paging() {
        let query = StoreQuery {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 31),
            origin: Some("svo".into()),
            destination: None,
        };
        let url = page_url(&store(), &query, 2000).unwrap();
        assert_eq!(url.path(), "/rest/v1/flights");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let expect = |k: &str, v: &str| (k.to_string(), v.to_string());
        assert!(pairs.contains(&expect("deleted", "eq.false")));
        assert!(pairs.contains(&expect("flight_date", "gte.2024-01-01")));
        assert!(pairs.contains(&expect("flight_date", "lte.2024-01-31")));
        assert!(pairs.contains(&expect("origin_code", "eq.SVO")));
        assert!(pairs.contains(&expect("limit", "1000")));
        assert!(pairs.contains(&expect("offset", "2000")));
        assert!(!pairs.iter().any(|(k, _)| k == "destination_code"));
    }

    #[test]
    fn missing_credentials_name_the_variable() {
        let err =
            credentials_from_env("FLIGHTCAST_TEST_UNSET_URL", "FLIGHTCAST_TEST_UNSET_KEY")
                .unwrap_err();
        assert_eq!(err.to_string(), "Environment variable FLIGHTCAST_TEST_UNSET_URL is not set");
    }
}
