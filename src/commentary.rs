use std::time::Duration;

use log::{info, warn};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::Settings;

#[derive(Error, Debug)]
pub enum CommentaryError {
    #[error("commentary generation failed: {0}")]
    CommentaryGenerationFailed(String),
}

impl From<reqwest::Error> for CommentaryError {
    fn from(e: reqwest::Error) -> Self {
        CommentaryError::CommentaryGenerationFailed(e.to_string())
    }
}

/// Something that turns a prompt into text, usually an LLM.
pub trait TextBackend: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, CommentaryError>;
}

/// An OpenAI style `responses` endpoint.
///
/// The http client is built per call: comments are generated a few times a
/// day, always from a blocking context.
pub struct OpenAiBackend {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl TextBackend for OpenAiBackend {
    fn complete(&self, prompt: &str) -> Result<String, CommentaryError> {
        let client = Client::builder().timeout(self.timeout).build()?;
        let response = client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&json!({"model": self.model, "input": prompt}))
            .send()?
            .error_for_status()?;
        let v: Value = response.json()?;
        Ok(output_text(&v))
    }
}

/// Concatenate the text parts of a `responses` payload.
fn output_text(v: &Value) -> String {
    if let Some(s) = v["output_text"].as_str() {
        return s.to_string();
    }
    let mut out = String::new();
    if let Value::Array(items) = &v["output"] {
        for item in items {
            if let Value::Array(parts) = &item["content"] {
                for part in parts {
                    if part["type"] == "output_text" {
                        if let Some(text) = part["text"].as_str() {
                            out.push_str(text);
                        }
                    }
                }
            }
        }
    }
    out
}

/// Writes the short market comment shown next to the latest fill level.
///
/// Stateless: the same inputs can be sent any number of times, from any
/// thread.  Callers decide when a comment gets regenerated.
pub struct Commentator {
    backend: Option<Box<dyn TextBackend>>,
}

impl Commentator {
    /// Only the deterministic template, no backend.
    pub fn offline() -> Commentator {
        Commentator { backend: None }
    }

    pub fn with_backend(backend: Box<dyn TextBackend>) -> Commentator {
        Commentator {
            backend: Some(backend),
        }
    }

    pub fn from_settings(settings: &Settings) -> Commentator {
        match &settings.openai_api_key {
            Some(key) => {
                info!("Comments generated with model {}", settings.openai_model);
                Commentator::with_backend(Box::new(OpenAiBackend {
                    url: settings.openai_url.clone(),
                    api_key: key.clone(),
                    model: settings.openai_model.clone(),
                    timeout: settings.source_timeout,
                }))
            }
            None => {
                info!("OPENAI_API_KEY not set, comments use the offline template");
                Commentator::offline()
            }
        }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Never fails: backend errors and empty answers fall back to
    /// [`fallback_comment`].
    pub fn generate(
        &self,
        percent: f64,
        delta: Option<f64>,
        trend7: Option<f64>,
        yoy_gap: Option<f64>,
    ) -> String {
        let trend7 = trend7.unwrap_or(0.0);
        let Some(backend) = &self.backend else {
            return fallback_comment(percent, delta, trend7, yoy_gap);
        };
        match backend.complete(&prompt(percent, delta, trend7, yoy_gap.unwrap_or(0.0))) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("Empty comment from the text backend, using the template");
                fallback_comment(percent, delta, trend7, yoy_gap)
            }
            Err(e) => {
                warn!("{}, using the template", e);
                fallback_comment(percent, delta, trend7, yoy_gap)
            }
        }
    }
}

fn delta_text(delta: Option<f64>) -> String {
    match delta {
        None => "—".to_string(),
        Some(d) => format!("{:+.2} p.b.", d),
    }
}

pub fn prompt(percent: f64, delta: Option<f64>, trend7: f64, yoy_gap: f64) -> String {
    format!(
        "Napíš 2–3 vety k situácii zásobníkov plynu v EÚ v slovenčine. \
         Aktuálne: {:.2} %, denná zmena: {}. \
         7-dňový trend: {:+.2} p.b., medziročný rozdiel: {:+.2} p.b. \
         Buď vecný, bez prehnaných varovaní; uveď kľúčové riziká (počasie, LNG, odstávky).",
        percent,
        delta_text(delta),
        trend7,
        yoy_gap
    )
}

/// The offline comment.
pub fn fallback_comment(percent: f64, delta: Option<f64>, trend7: f64, yoy_gap: Option<f64>) -> String {
    let tone = if trend7.abs() < 0.1 {
        "stabilný"
    } else if trend7 > 0.0 {
        "rastový"
    } else {
        "klesajúci"
    };
    let yoy = match yoy_gap {
        Some(g) => format!("medziročne {:+.2} p.b.", g),
        None => "medziročné porovnanie nie je k dispozícii".to_string(),
    };
    format!(
        "Zásobníky plynu v EÚ sú na {:.2} %, denná zmena {}. \
         Krátkodobý trend je {} ({:+.2} p.b./7d), {}. \
         Vývoj zodpovedá sezóne; riziká: počasie, prílevy LNG, neplánované odstávky.",
        percent,
        delta_text(delta),
        tone,
        trend7,
        yoy
    )
}
