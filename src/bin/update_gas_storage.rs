use std::{error::Error, process::ExitCode, thread, time::Duration};

use clap::{Parser, ValueEnum};
use gas_storage::{
    commentary::Commentator,
    config::Settings,
    db::{
        agsi::{comments::refresh_latest, deltas::recompute_last, ingest::ingest_from_agsi},
        prod_db::ProdDb,
    },
};
use log::{error, info, warn};
use reqwest::blocking::Client;
use serde_json::Value;
use tabled::{builder::Builder, settings::Style};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Call the endpoints of a running server, which owns the database file
    Http,
    /// Open the database file in this process
    Direct,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    #[arg(short, long, value_enum, default_value = "http")]
    mode: Mode,

    /// Base url of the server, for the http mode
    #[arg(long, default_value = "http://127.0.0.1:8111")]
    url: String,

    /// Attempts per step, for the http mode
    #[arg(long, default_value = "3")]
    retries: u32,

    /// Seconds between attempts
    #[arg(long, default_value = "10")]
    retry_delay: u64,

    /// Deltas are recomputed for this many trailing days
    #[arg(long, default_value = "7")]
    days: i64,
}

/// The daily steps, in order.
fn steps(days: i64) -> Vec<(&'static str, String)> {
    vec![
        ("Ingest", "/ingest".to_string()),
        ("Recompute deltas", format!("/recompute-deltas?days={}", days)),
        ("Refresh comment", "/refresh-comment?force=true".to_string()),
    ]
}

/// POST to `url` until it answers 200, at most `retries` times.
fn hit(client: &Client, url: &str, name: &str, retries: u32, delay: Duration) -> Option<Value> {
    for attempt in 1..=retries.max(1) {
        info!("{}: calling {} (attempt {}/{})", name, url, attempt, retries);
        match client.post(url).send() {
            Ok(response) if response.status().is_success() => {
                return Some(response.json().unwrap_or(Value::Null));
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().unwrap_or_default();
                warn!("{} failed with HTTP {}: {}", name, status, body);
            }
            Err(e) => warn!("{} failed: {}", name, e),
        }
        if attempt < retries {
            thread::sleep(delay);
        }
    }
    error!("{} failed after {} attempts", name, retries);
    None
}

fn run_http(args: &Args) -> Result<Vec<(String, String)>, Box<dyn Error>> {
    let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
    let base = args.url.trim_end_matches('/');
    let mut summary = vec![];
    for (name, path) in steps(args.days) {
        let url = format!("{}{}", base, path);
        match hit(&client, &url, name, args.retries, Duration::from_secs(args.retry_delay)) {
            Some(v) => summary.push((name.to_string(), v.to_string())),
            None => return Err(format!("{} failed", name).into()),
        }
    }
    Ok(summary)
}

fn run_direct(args: &Args) -> Result<Vec<(String, String)>, Box<dyn Error>> {
    let settings = Settings::from_env()?;
    let archive = ProdDb::gas_storage(&settings)?;
    let commentator = Commentator::from_settings(&settings);

    let ingest = ingest_from_agsi(&archive, &settings, &commentator, None)?;
    let deltas = recompute_last(&archive, args.days)?;
    let comment = refresh_latest(&archive, &commentator, true)?;
    Ok(vec![
        ("Ingest".to_string(), serde_json::to_string(&ingest)?),
        ("Recompute deltas".to_string(), serde_json::to_string(&deltas)?),
        ("Refresh comment".to_string(), serde_json::to_string(&comment)?),
    ])
}

fn ascii_table(summary: &[(String, String)]) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(vec!["Step", "Result"]);
    for (step, result) in summary {
        builder.push_record(vec![step.clone(), result.clone()]);
    }
    let mut table = builder.build();
    table.with(Style::sharp());
    table
}

/// Run this job once a day, after the AGSI+ publication.
fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();
    Settings::load_env_file(&args.env);

    let res = match args.mode {
        Mode::Http => run_http(&args),
        Mode::Direct => run_direct(&args),
    };
    match res {
        Ok(summary) => {
            info!("All steps done\n{}", ascii_table(&summary));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Daily update failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
