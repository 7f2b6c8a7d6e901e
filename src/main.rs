// src/main.rs
mod api;
mod auth;
mod catalog;
mod config;
mod db;
mod error;
mod ledger;
mod market;
mod models;

use crate::config::Config;
use crate::ledger::Ledger;
use env_logger::{Builder, Env};
use log::{error, info};
use std::sync::Arc;
use warp::Filter;

#[tokio::main]
async fn main() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let pool = match db::init(&config.database_url, config.database_max_connections).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };
    info!("Connected to database...");

    let client = match market::http_client() {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return;
        }
    };
    let prices = market::from_config(&config, client);
    info!("Using {} for market data.", prices.name());

    let ledger = Arc::new(Ledger::new(
        pool,
        prices,
        config.starting_cash,
        config.trade_fee,
    ));

    let api = api::routes(ledger, Arc::new(config.jwt_secret.clone()))
        .with(warp::log("gullak_trader::api"));

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(api).run(config.bind_addr).await;
}
