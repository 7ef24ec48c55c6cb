use std::str::FromStr;

use jiff::civil::Date;
use serde::Serialize;

/// How dates and percentages are rendered for humans.  Raw values in the
/// JSON payloads are never affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum Locale {
    /// `10. 1. 2025`, `81,23 %`
    #[default]
    Sk,
    /// `2025-01-10`, `81.23%`
    En,
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sk" | "sk_sk" | "sk-sk" => Ok(Locale::Sk),
            "en" | "en_us" | "en-us" | "en_gb" | "en-gb" => Ok(Locale::En),
            _ => Err(format!("Unknown locale: {}", s)),
        }
    }
}

/// Round to two decimals, the precision everything is stored and shown with.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn format_date(date: Date, locale: Locale) -> String {
    match locale {
        Locale::Sk => format!("{}. {}. {}", date.day(), date.month(), date.year()),
        Locale::En => date.to_string(),
    }
}

pub fn format_percent(value: f64, locale: Locale) -> String {
    match locale {
        Locale::Sk => format!("{:.2} %", value).replace('.', ","),
        Locale::En => format!("{:.2}%", value),
    }
}

/// Percentage-point change with an explicit sign, or a dash when unknown.
pub fn format_delta(value: Option<f64>, locale: Locale) -> String {
    match (value, locale) {
        (None, _) => "—".to_string(),
        (Some(v), Locale::Sk) => format!("{} p.b.", format!("{:+.2}", v).replace('.', ",")),
        (Some(v), Locale::En) => format!("{:+.2} pp", v),
    }
}
