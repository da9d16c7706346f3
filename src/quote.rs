// src/quote.rs
use crate::error::{AppError, Result};
use crate::models::{normalize_symbol, Quote};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

/// Source of current stock prices.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Returns `Ok(None)` when the symbol is unknown to the provider.
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>>;
}

#[derive(Deserialize, Default)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

pub struct AlphaVantage {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantage {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl QuoteProvider for AlphaVantage {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Ok(None);
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Quote(format!(
                "quote provider returned HTTP {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let quote = parse_global_quote(&symbol, &body)?;
        info!("Looked up {}: {:?}", symbol, quote.as_ref().map(|q| q.price));
        Ok(quote)
    }
}

/// Interprets a `GLOBAL_QUOTE` payload. An empty quote object means the symbol is unknown.
pub fn parse_global_quote(symbol: &str, body: &str) -> Result<Option<Quote>> {
    let parsed: GlobalQuoteResponse = serde_json::from_str(body)
        .map_err(|e| AppError::Quote(format!("malformed quote response: {}", e)))?;

    if let Some(message) = parsed.note.or(parsed.information) {
        warn!("Quote provider throttled request for {}: {}", symbol, message);
        return Err(AppError::Quote(message));
    }
    if parsed.error_message.is_some() {
        return Ok(None);
    }

    let quote = parsed.global_quote.unwrap_or_default();
    let (Some(returned_symbol), Some(price)) = (quote.symbol, quote.price) else {
        return Ok(None);
    };
    let price = Decimal::from_str(price.trim())
        .map_err(|e| AppError::Quote(format!("invalid price '{}': {}", price, e)))?;
    if price <= Decimal::ZERO {
        return Ok(None);
    }

    Ok(Some(Quote {
        name: returned_symbol.clone(),
        symbol: returned_symbol,
        price,
    }))
}

/// Fixed price table, for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticQuotes {
    quotes: HashMap<String, Quote>,
}

impl StaticQuotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, symbol: &str, name: &str, price: Decimal) -> Self {
        let symbol = normalize_symbol(symbol);
        self.quotes.insert(
            symbol.clone(),
            Quote {
                symbol,
                name: name.to_string(),
                price,
            },
        );
        self
    }

    /// A handful of well-known tickers at round prices.
    pub fn sample() -> Self {
        Self::new()
            .with("AAPL", "Apple Inc.", Decimal::new(18_000, 2))
            .with("GOOGL", "Alphabet Inc.", Decimal::new(14_000, 2))
            .with("MSFT", "Microsoft Corporation", Decimal::new(41_000, 2))
            .with("NFLX", "Netflix, Inc.", Decimal::new(60_000, 2))
    }
}

#[async_trait]
impl QuoteProvider for StaticQuotes {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>> {
        Ok(self.quotes.get(&normalize_symbol(symbol)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_known_symbol() {
        let body = r#"{"Global Quote": {"01. symbol": "IBM", "02. open": "140.0000", "05. price": "141.2500"}}"#;
        let quote = parse_global_quote("IBM", body).unwrap().unwrap();
        assert_eq!(quote.symbol, "IBM");
        assert_eq!(quote.price, Decimal::new(1_412_500, 4));
    }

    #[test]
    fn empty_global_quote_means_unknown_symbol() {
        let body = r#"{"Global Quote": {}}"#;
        assert!(parse_global_quote("ZZZZ", body).unwrap().is_none());
    }

    #[test]
    fn error_message_means_unknown_symbol() {
        let body = r#"{"Error Message": "Invalid API call."}"#;
        assert!(parse_global_quote("ZZZZ", body).unwrap().is_none());
    }

    #[test]
    fn throttling_is_an_error() {
        let body = r#"{"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}"#;
        assert!(matches!(
            parse_global_quote("IBM", body),
            Err(AppError::Quote(_))
        ));
    }

    #[tokio::test]
    async fn static_quotes_normalize_symbols() {
        let quotes = StaticQuotes::sample();
        let quote = quotes.lookup(" aapl").await.unwrap().unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert!(quotes.lookup("NOPE").await.unwrap().is_none());
    }
}
