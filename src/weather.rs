//! Forecast lookup collaborator.
//!
//! Wraps the OpenWeatherMap 5-day/3-hour forecast endpoint. The API returns
//! forecasts in 3-hour slots; we pick the slot closest to the task's due
//! date. Responses are cached in memory per (city, day) for one hour.

use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const CACHE_TTL: Duration = Duration::from_secs(3600);
const CACHE_MAX_ENTRIES: usize = 100;

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("weather api key not configured")]
    NotConfigured,
    #[error("city not found")]
    CityNotFound,
    #[error("no forecast available for the requested date")]
    NoForecast,
    #[error("invalid date: {0}")]
    InvalidDate(String),
    #[error("weather api request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Forecast snapshot stored on tasks and returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub description: String,
    pub temperature: f64,
    pub icon: String,
    pub humidity: f64,
    pub wind_speed: f64,
    pub date: String,
    pub city: String,
    pub country: String,
}

pub struct WeatherService {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
    cache: DashMap<String, (Instant, Forecast)>,
}

impl WeatherService {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            http: reqwest::Client::new(),
            cache: DashMap::new(),
        }
    }

    /// Look up the forecast for a city on a given date (RFC3339 or YYYY-MM-DD).
    pub async fn get_forecast(&self, city: &str, date: &str) -> Result<Forecast, WeatherError> {
        let target = parse_date(date)?;
        let cache_key = format!("{}_{}", city.to_lowercase(), target.format("%Y-%m-%d"));

        if let Some(hit) = self.cache_get(&cache_key) {
            tracing::debug!(city, date = %date, "using cached forecast");
            return Ok(hit);
        }

        let api_key = self.api_key.as_deref().ok_or(WeatherError::NotConfigured)?;

        let response = self
            .http
            .get(format!("{}/forecast", self.base_url))
            .query(&[
                ("q", city),
                ("appid", api_key),
                ("units", "metric"),
                ("lang", "es"),
            ])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(WeatherError::CityNotFound);
        }
        let body: Value = response.error_for_status()?.json().await?;

        let forecast =
            closest_forecast(&body, target.timestamp()).ok_or(WeatherError::NoForecast)?;
        self.cache_put(cache_key, forecast.clone());
        Ok(forecast)
    }

    fn cache_get(&self, key: &str) -> Option<Forecast> {
        let expired = match self.cache.get(key) {
            Some(entry) => {
                let (stored_at, forecast) = entry.value();
                if stored_at.elapsed() <= CACHE_TTL {
                    return Some(forecast.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.cache.remove(key);
        }
        None
    }

    fn cache_put(&self, key: String, forecast: Forecast) {
        // Cap the cache; evict an arbitrary entry when full.
        if self.cache.len() >= CACHE_MAX_ENTRIES {
            if let Some(victim) = self.cache.iter().next().map(|e| e.key().clone()) {
                self.cache.remove(&victim);
            }
        }
        self.cache.insert(key, (Instant::now(), forecast));
    }
}

fn parse_date(date: &str) -> Result<DateTime<Utc>, WeatherError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(date) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|d| d.and_hms_opt(12, 0, 0).unwrap().and_utc())
        .map_err(|_| WeatherError::InvalidDate(date.to_string()))
}

/// Pick the 3-hour forecast slot closest to the target timestamp.
fn closest_forecast(body: &Value, target_unix: i64) -> Option<Forecast> {
    let list = body.get("list")?.as_array()?;
    let entry = list.iter().min_by_key(|f| {
        f.get("dt")
            .and_then(Value::as_i64)
            .map(|dt| (dt - target_unix).abs())
            .unwrap_or(i64::MAX)
    })?;

    let dt = entry.get("dt")?.as_i64()?;
    let weather = entry.get("weather")?.as_array()?.first()?;
    let main = entry.get("main")?;

    Some(Forecast {
        description: weather.get("description")?.as_str()?.to_string(),
        temperature: main.get("temp")?.as_f64()?,
        icon: weather.get("icon")?.as_str()?.to_string(),
        humidity: main.get("humidity")?.as_f64()?,
        wind_speed: entry.get("wind")?.get("speed")?.as_f64()?,
        date: DateTime::from_timestamp(dt, 0)?.to_rfc3339(),
        city: body.get("city")?.get("name")?.as_str()?.to_string(),
        country: body.get("city")?.get("country")?.as_str()?.to_string(),
    })
}
