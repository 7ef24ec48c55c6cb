use actix_cors::Cors;
use actix_web::middleware::{self, Logger};
use actix_web::{App, HttpServer};
use clap::Parser;
use env_logger::Env;
use gas_storage::{
    api::{self, AppState},
    commentary::Commentator,
    config::Settings,
    db::prod_db::ProdDb,
};
use log::info;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Port number
    #[arg(short, long, default_value = "8111")]
    port: u16,

    /// Use 0.0.0.0 to allow all connections
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Environment name, e.g., test, prod.  Loads `.env/{env}.env` if present.
    #[arg(short, long, default_value = "prod")]
    env: String,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();

    env_logger::init_from_env(Env::default().default_filter_or("info"));
    Settings::load_env_file(&args.env);
    let settings = Settings::from_env().map_err(std::io::Error::other)?;
    let archive = ProdDb::gas_storage(&settings).map_err(std::io::Error::other)?;
    let commentator = Commentator::from_settings(&settings);
    info!("Serving {} on {}:{}", settings.duckdb_path, args.host, args.port);

    let state = AppState::new(archive, settings, commentator);
    HttpServer::new(move || {
        let cors = Cors::permissive();
        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::Compress::default())
            .configure(|cfg| api::configure(&state, cfg))
    })
    .bind((args.host.as_str(), args.port))?
    .run()
    .await
}
