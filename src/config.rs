// src/config.rs
use crate::error::{AppError, Result};
use rust_decimal::Decimal;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSource {
    AlphaVantage,
    Static,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub session_secret: String,
    pub session_ttl_hours: i64,
    pub starting_cash: Decimal,
    pub quote_source: QuoteSource,
    pub alphavantage_api_key: String,
    pub alphavantage_url: String,
    pub bcrypt_cost: u32,
}

impl Config {
    /// Reads the configuration from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = parse_or(&lookup, "BIND_ADDR", "127.0.0.1:3030")?;
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://finance.db".to_string());
        let session_secret = lookup("SESSION_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Config("SESSION_SECRET must be set".into()))?;
        let session_ttl_hours = parse_or(&lookup, "SESSION_TTL_HOURS", "24")?;
        let starting_cash = parse_or(&lookup, "STARTING_CASH", "10000.00")?;
        let bcrypt_cost = parse_or(&lookup, "BCRYPT_COST", &bcrypt::DEFAULT_COST.to_string())?;

        let quote_source = match lookup("QUOTE_PROVIDER").as_deref() {
            None | Some("alphavantage") => QuoteSource::AlphaVantage,
            Some("static") => QuoteSource::Static,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "unknown QUOTE_PROVIDER '{}'",
                    other
                )))
            }
        };
        let alphavantage_api_key = lookup("ALPHAVANTAGE_API_KEY").unwrap_or_default();
        if quote_source == QuoteSource::AlphaVantage && alphavantage_api_key.is_empty() {
            return Err(AppError::Config(
                "ALPHAVANTAGE_API_KEY must be set when QUOTE_PROVIDER=alphavantage".into(),
            ));
        }
        let alphavantage_url = lookup("ALPHAVANTAGE_URL")
            .unwrap_or_else(|| "https://www.alphavantage.co/query".to_string());

        Ok(Config {
            bind_addr,
            database_url,
            session_secret,
            session_ttl_hours,
            starting_cash,
            quote_source,
            alphavantage_api_key,
            alphavantage_url,
            bcrypt_cost,
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.parse::<T>()
        .map_err(|e| AppError::Config(format!("invalid {} '{}': {}", key, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_keys_are_set() {
        let config = Config::from_lookup(lookup_from(&[
            ("SESSION_SECRET", "s3cret"),
            ("ALPHAVANTAGE_API_KEY", "key"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:3030".parse::<SocketAddr>().unwrap());
        assert_eq!(config.database_url, "sqlite://finance.db");
        assert_eq!(config.session_ttl_hours, 24);
        assert_eq!(config.starting_cash, Decimal::new(1_000_000, 2));
        assert_eq!(config.quote_source, QuoteSource::AlphaVantage);
        assert_eq!(config.bcrypt_cost, bcrypt::DEFAULT_COST);
    }

    #[test]
    fn missing_session_secret_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("QUOTE_PROVIDER", "static")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn static_provider_does_not_need_api_key() {
        let config = Config::from_lookup(lookup_from(&[
            ("SESSION_SECRET", "s3cret"),
            ("QUOTE_PROVIDER", "static"),
        ]))
        .unwrap();
        assert_eq!(config.quote_source, QuoteSource::Static);
    }

    #[test]
    fn malformed_values_are_reported() {
        let err = Config::from_lookup(lookup_from(&[
            ("SESSION_SECRET", "s3cret"),
            ("QUOTE_PROVIDER", "static"),
            ("STARTING_CASH", "lots"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("STARTING_CASH"));
    }
}
