use std::{env, path::Path, str::FromStr, time::Duration};

use jiff::civil::{date, Date};
use log::info;

use crate::{error::GasStorageError, utils::format::Locale};

pub const DEFAULT_AGSI_URL: &str = "https://agsi.gie.eu/api";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/responses";

/// Runtime settings, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub duckdb_path: String,
    pub agsi_api_key: Option<String>,
    pub agsi_url: String,
    pub agsi_page_size: u32,
    /// Days between a gas day and its publication.  With the default of 1
    /// the last day ever requested is yesterday.
    pub publication_lag_days: i64,
    /// Where ingestion starts when the store is empty.
    pub history_floor: Date,
    pub source_timeout: Duration,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_url: String,
    pub history_cache_ttl: Duration,
    pub locale: Locale,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            duckdb_path: "gas_storage.duckdb".to_string(),
            agsi_api_key: None,
            agsi_url: DEFAULT_AGSI_URL.to_string(),
            agsi_page_size: 300,
            publication_lag_days: 1,
            history_floor: date(2025, 1, 1),
            source_timeout: Duration::from_secs(60),
            openai_api_key: None,
            openai_model: "gpt-5".to_string(),
            openai_url: DEFAULT_OPENAI_URL.to_string(),
            history_cache_ttl: Duration::from_secs(30),
            locale: Locale::Sk,
        }
    }
}

impl Settings {
    /// Load `.env/{env}.env` into the process environment if the file exists.
    pub fn load_env_file(env_name: &str) {
        let path = format!(".env/{}.env", env_name);
        if Path::new(&path).exists() {
            match dotenvy::from_path(Path::new(&path)) {
                Ok(_) => info!("Loaded environment from {}", path),
                Err(e) => log::warn!("Failed to load {}: {}", path, e),
            }
        }
    }

    pub fn from_env() -> Result<Settings, GasStorageError> {
        Settings::from_lookup(|key| env::var(key).ok())
    }

    /// Build the settings from any key/value source.  Empty values count as
    /// absent.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Settings, GasStorageError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let d = Settings::default();
        Ok(Settings {
            duckdb_path: get("DUCKDB_PATH").unwrap_or(d.duckdb_path),
            agsi_api_key: get("AGSI_API_KEY"),
            agsi_url: get("AGSI_URL").unwrap_or(d.agsi_url),
            agsi_page_size: parse_or("AGSI_PAGE_SIZE", get("AGSI_PAGE_SIZE"), d.agsi_page_size)?,
            publication_lag_days: parse_or(
                "PUBLICATION_LAG_DAYS",
                get("PUBLICATION_LAG_DAYS"),
                d.publication_lag_days,
            )?,
            history_floor: parse_or("HISTORY_FLOOR", get("HISTORY_FLOOR"), d.history_floor)?,
            source_timeout: Duration::from_secs(parse_or(
                "SOURCE_TIMEOUT_SECS",
                get("SOURCE_TIMEOUT_SECS"),
                d.source_timeout.as_secs(),
            )?),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or(d.openai_model),
            openai_url: get("OPENAI_URL").unwrap_or(d.openai_url),
            history_cache_ttl: Duration::from_secs(parse_or(
                "HISTORY_CACHE_TTL_SECS",
                get("HISTORY_CACHE_TTL_SECS"),
                d.history_cache_ttl.as_secs(),
            )?),
            locale: parse_or("DISPLAY_LOCALE", get("DISPLAY_LOCALE"), d.locale)?,
        })
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T, GasStorageError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse::<T>().map_err(|e| {
            GasStorageError::ConfigurationMissing(format!("valid {} (got '{}': {})", key, v, e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_empty() {
        let s = Settings::from_lookup(lookup(&[("AGSI_API_KEY", "  ")])).unwrap();
        assert_eq!(s.agsi_api_key, None);
        assert_eq!(s.publication_lag_days, 1);
        assert_eq!(s.history_floor, date(2025, 1, 1));
        assert_eq!(s.locale, Locale::Sk);
        assert_eq!(s.agsi_url, DEFAULT_AGSI_URL);
    }

    #[test]
    fn overrides() {
        let s = Settings::from_lookup(lookup(&[
            ("AGSI_API_KEY", "abc"),
            ("PUBLICATION_LAG_DAYS", "2"),
            ("HISTORY_FLOOR", "2024-06-01"),
            ("HISTORY_CACHE_TTL_SECS", "45"),
            ("DISPLAY_LOCALE", "en"),
        ]))
        .unwrap();
        assert_eq!(s.agsi_api_key.as_deref(), Some("abc"));
        assert_eq!(s.publication_lag_days, 2);
        assert_eq!(s.history_floor, date(2024, 6, 1));
        assert_eq!(s.history_cache_ttl, Duration::from_secs(45));
        assert_eq!(s.locale, Locale::En);
    }

    #[test]
    fn bad_value_is_a_configuration_error() {
        let res = Settings::from_lookup(lookup(&[("AGSI_PAGE_SIZE", "many")]));
        assert!(matches!(res, Err(GasStorageError::ConfigurationMissing(_))));
    }
}
