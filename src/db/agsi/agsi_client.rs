use jiff::civil::Date;
use log::info;
use reqwest::{blocking::Client, header::USER_AGENT};
use serde_json::Value;

use crate::{config::Settings, error::GasStorageError};

/// One usable day from the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub date: Date,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourcePage {
    pub rows: Vec<SourceRow>,
    /// Number of items the source sent, usable or not
    pub raw_count: usize,
    /// Items without a recognizable date or percent
    pub skipped: usize,
    pub last_page: u32,
}

/// A paginated reader of daily EU fill levels.
pub trait StorageSource {
    /// Fetch page `page` (1-based) of the days in `[from, to]`.
    fn fetch_page(&self, from: Date, to: Date, page: u32) -> Result<SourcePage, GasStorageError>;
}

/// A named way of pulling one value out of a source item.
pub struct FieldExtractor<T> {
    pub key: &'static str,
    pub parse: fn(&Value) -> Option<T>,
}

/// The AGSI+ API has renamed its fields over time.  Extractors are tried in
/// this order and the first one that yields a value wins.
pub const DATE_EXTRACTORS: &[FieldExtractor<Date>] = &[
    FieldExtractor {
        key: "gasDayStart",
        parse: parse_date_value,
    },
    FieldExtractor {
        key: "gas_day",
        parse: parse_date_value,
    },
    FieldExtractor {
        key: "date",
        parse: parse_date_value,
    },
];

pub const PERCENT_EXTRACTORS: &[FieldExtractor<f64>] = &[
    FieldExtractor {
        key: "full",
        parse: parse_percent_value,
    },
    FieldExtractor {
        key: "fullness",
        parse: parse_percent_value,
    },
    FieldExtractor {
        key: "percentage",
        parse: parse_percent_value,
    },
];

pub fn extract<T>(item: &Value, extractors: &[FieldExtractor<T>]) -> Option<T> {
    extractors
        .iter()
        .find_map(|e| item.get(e.key).and_then(|v| (e.parse)(v)))
}

/// Accepts `2025-01-10` as well as `2025-01-10T00:00:00+00:00`.
fn parse_date_value(v: &Value) -> Option<Date> {
    let s = v.as_str()?.trim();
    s.get(..10)?.parse::<Date>().ok()
}

/// Accepts numbers and strings like `81.23`, `81,23` or `81.23 %`.
fn parse_percent_value(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim().trim_end_matches('%').trim().replace(',', ".");
            if s.is_empty() {
                return None;
            }
            s.parse::<f64>().ok()
        }
        _ => None,
    }
}

/// Parse one page of an AGSI+ response.
pub fn parse_page(v: &Value) -> Result<SourcePage, GasStorageError> {
    if !v.is_object() {
        return Err(GasStorageError::SourceFetchFailed(
            "Wrong response format, expecting a json object".to_string(),
        ));
    }
    let last_page = match &v["last_page"] {
        Value::Number(n) => n.as_u64().and_then(|x| u32::try_from(x).ok()).unwrap_or(1),
        Value::String(s) => s.trim().parse::<u32>().unwrap_or(1),
        _ => 1,
    };
    let items: &[Value] = match &v["data"] {
        Value::Array(xs) => xs,
        _ => &[],
    };

    let mut page = SourcePage {
        raw_count: items.len(),
        last_page: last_page.max(1),
        ..Default::default()
    };
    for item in items {
        match (extract(item, DATE_EXTRACTORS), extract(item, PERCENT_EXTRACTORS)) {
            (Some(date), Some(percent)) => page.rows.push(SourceRow { date, percent }),
            _ => page.skipped += 1,
        }
    }
    Ok(page)
}

/// Client for the aggregated EU data of the AGSI+ transparency platform.
/// See https://agsi.gie.eu/
pub struct AgsiClient {
    client: Client,
    url: String,
    api_key: String,
    page_size: u32,
}

impl AgsiClient {
    pub fn new(settings: &Settings) -> Result<AgsiClient, GasStorageError> {
        let api_key = settings
            .agsi_api_key
            .clone()
            .ok_or_else(|| GasStorageError::ConfigurationMissing("AGSI_API_KEY".to_string()))?;
        let client = Client::builder().timeout(settings.source_timeout).build()?;
        Ok(AgsiClient {
            client,
            url: settings.agsi_url.clone(),
            api_key,
            page_size: settings.agsi_page_size,
        })
    }
}

impl StorageSource for AgsiClient {
    fn fetch_page(&self, from: Date, to: Date, page: u32) -> Result<SourcePage, GasStorageError> {
        info!("Fetching AGSI page {} for {} to {}", page, from, to);
        let response = self
            .client
            .get(&self.url)
            .header("x-key", &self.api_key)
            .header(USER_AGENT, concat!("gas_storage/", env!("CARGO_PKG_VERSION")))
            .query(&[
                ("type", "eu".to_string()),
                ("from", from.to_string()),
                ("to", to.to_string()),
                ("size", self.page_size.to_string()),
                ("gas_day", "asc".to_string()),
                ("page", page.to_string()),
            ])
            .send()?
            .error_for_status()?;
        let v: Value = response.json()?;
        parse_page(&v)
    }
}
