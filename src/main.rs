// src/main.rs
use chrono::Duration;
use env_logger::{Builder, Env};
use log::{error, info};
use reqwest::Client;
use std::sync::Arc;
use stock_trader::api::{self, AppState};
use stock_trader::auth::SessionKeys;
use stock_trader::config::{Config, QuoteSource};
use stock_trader::db;
use stock_trader::quote::{AlphaVantage, QuoteProvider, StaticQuotes};

#[tokio::main]
async fn main() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return;
        }
    };

    let pool = match db::init(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };
    info!("Connected to database...");

    let quotes: Arc<dyn QuoteProvider> = match config.quote_source {
        QuoteSource::AlphaVantage => Arc::new(AlphaVantage::new(
            Client::new(),
            config.alphavantage_url.clone(),
            config.alphavantage_api_key.clone(),
        )),
        QuoteSource::Static => {
            info!("Using static quotes.");
            Arc::new(StaticQuotes::sample())
        }
    };

    let state = Arc::new(AppState {
        pool,
        quotes,
        sessions: SessionKeys::new(
            config.session_secret.clone(),
            Duration::hours(config.session_ttl_hours),
        ),
        starting_cash: config.starting_cash,
        bcrypt_cost: config.bcrypt_cost,
    });

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(api::routes(state)).run(config.bind_addr).await;
}
