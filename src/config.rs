// src/config.rs
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid MARKET_PROVIDER: {0}. Must be 'yahoo' or 'alphavantage'")]
    UnknownProvider(String),

    #[error("Invalid {key}: {message}")]
    Invalid { key: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketProvider {
    Yahoo,
    AlphaVantage,
}

impl FromStr for MarketProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yahoo" => Ok(MarketProvider::Yahoo),
            "alphavantage" | "alpha_vantage" => Ok(MarketProvider::AlphaVantage),
            _ => Err(ConfigError::UnknownProvider(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub market_provider: MarketProvider,
    pub alpha_vantage_api_key: String,
    pub starting_cash: f64,
    pub trade_fee: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3030)),
            database_url: "sqlite://portfolio.db".to_string(),
            database_max_connections: 5,
            jwt_secret: "your_secret_key".to_string(),
            market_provider: MarketProvider::Yahoo,
            alpha_vantage_api_key: String::new(),
            starting_cash: 100_000.0,
            trade_fee: 20.0,
        }
    }
}

impl Config {
    /// Reads the environment (and `.env` if present); unset keys keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let defaults = Config::default();

        Ok(Self {
            bind_addr: parse_var("BIND_ADDR", defaults.bind_addr)?,
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections: parse_var(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            jwt_secret: env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            market_provider: parse_var("MARKET_PROVIDER", defaults.market_provider)?,
            alpha_vantage_api_key: env::var("ALPHA_VANTAGE_API_KEY").unwrap_or_default(),
            starting_cash: parse_var("STARTING_CASH", defaults.starting_cash)?,
            trade_fee: parse_var("TRADE_FEE", defaults.trade_fee)?,
        })
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                message: e.to_string(),
            }),
        _ => Ok(default),
    }
}
