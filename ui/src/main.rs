#[macro_use]
extern crate rocket;

mod aggregate;
mod audit;
mod completion;
mod competitors;
mod config;
mod db;
mod error;
mod gateway;
mod jobs;
mod models;
mod normalize;
mod progress;
mod rescan;
mod routes;
mod state;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rocket::fs::{relative, FileServer};
use rocket::{Build, Rocket};
use rocket_dyn_templates::Template;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::gateway::HttpGateway;
use crate::state::AppState;

/// AI visibility dashboard
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to a TOML/YAML/JSON config file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("visibility_ui={level},rocket=warn")));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

pub fn build_rocket(state: AppState) -> Rocket<Build> {
    rocket::build()
        .manage(state)
        .attach(Template::fairing())
        .mount("/", routes::index_routes())
        .mount("/api", routes::api_routes())
        .mount("/static", FileServer::from(relative!("static")))
}

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.log_level);

    let gateway = HttpGateway::new(&config).context("building scan gateway client")?;
    info!(gateway = %config.gateway_url, db = %config.db_path, "Starting dashboard");
    let state = AppState::new(config, Arc::new(gateway)).context("opening local store")?;

    build_rocket(state).launch().await?;
    Ok(())
}
