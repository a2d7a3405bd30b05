use std::env;
use std::time::Duration;

use crate::error::AppError;
use crate::geo::GeoPoint;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub backend: BackendConfig,
    pub console: ConsoleSettings,
}

/// Connection settings for the hosted backend the console reads from.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub url: String,
    pub api_key: String,
    pub access_token: Option<String>,
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub feed_buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct ConsoleSettings {
    pub debounce: Duration,
    pub debounce_max_wait: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub confirm_timeout: Duration,
    pub stale_after: Duration,
    pub map_center: GeoPoint,
    pub map_zoom: u8,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(400),
            debounce_max_wait: Duration::from_millis(2000),
            reconnect_initial: Duration::from_millis(250),
            reconnect_max: Duration::from_millis(10_000),
            confirm_timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(60),
            map_center: GeoPoint {
                lat: 37.7749,
                lng: -122.4194,
            },
            map_zoom: 13,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let defaults = ConsoleSettings::default();
        let center_lat = parse_or_default("MAP_CENTER_LAT", defaults.map_center.lat)?;
        let center_lng = parse_or_default("MAP_CENTER_LNG", defaults.map_center.lng)?;
        let map_center = GeoPoint::new(center_lat, center_lng).ok_or_else(|| {
            AppError::Internal(format!("invalid map center: {center_lat},{center_lng}"))
        })?;

        let console = ConsoleSettings {
            debounce: Duration::from_millis(parse_or_default("DEBOUNCE_MS", 400)?),
            debounce_max_wait: Duration::from_millis(parse_or_default(
                "DEBOUNCE_MAX_WAIT_MS",
                2000,
            )?),
            reconnect_initial: Duration::from_millis(parse_or_default(
                "RECONNECT_INITIAL_MS",
                250,
            )?),
            reconnect_max: Duration::from_millis(parse_or_default("RECONNECT_MAX_MS", 10_000)?),
            confirm_timeout: Duration::from_secs(parse_or_default("CONFIRM_TIMEOUT_SECS", 10)?),
            stale_after: Duration::from_secs(parse_or_default("STALE_AFTER_SECS", 60)?),
            map_center,
            map_zoom: parse_or_default("MAP_ZOOM", defaults.map_zoom)?,
        };

        if console.debounce_max_wait < console.debounce {
            return Err(AppError::Internal(
                "DEBOUNCE_MAX_WAIT_MS must not be shorter than DEBOUNCE_MS".to_string(),
            ));
        }

        let backend = BackendConfig {
            url: required("BACKEND_URL")?,
            api_key: required("BACKEND_API_KEY")?,
            access_token: env::var("BACKEND_ACCESS_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
            request_timeout: Duration::from_secs(parse_or_default("REQUEST_TIMEOUT_SECS", 15)?),
            heartbeat_interval: Duration::from_secs(parse_or_default(
                "HEARTBEAT_INTERVAL_SECS",
                30,
            )?),
            feed_buffer_size: parse_or_default("FEED_BUFFER_SIZE", 64)?,
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            backend,
            console,
        })
    }
}

fn required(key: &str) -> Result<String, AppError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::Internal(format!("missing required {key}"))),
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_or_default, required};

    #[test]
    fn unset_key_falls_back_to_default() {
        let value: u64 = parse_or_default("DISPATCH_CONSOLE_TEST_UNSET_KEY", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let err = required("DISPATCH_CONSOLE_TEST_MISSING_URL").unwrap_err();
        assert!(err.to_string().contains("DISPATCH_CONSOLE_TEST_MISSING_URL"));
    }
}
