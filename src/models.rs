// src/models.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Buy,
    Sell,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "BUY" => Some(TransactionType::Buy),
            "SELL" => Some(TransactionType::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip)]
    pub hash: String,
    pub cash: Decimal,
}

/// Current position of one user in one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct Holding {
    pub user_id: i64,
    pub symbol: String,
    pub shares: i64,
    pub price: Decimal,
    pub transaction_type: TransactionType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub shares: i64,
    pub price: Decimal,
    pub transaction_type: TransactionType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
}

/// A holding valued at the latest known price, as shown on the portfolio page.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub symbol: String,
    pub name: String,
    pub shares: i64,
    pub price: Decimal,
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Portfolio {
    pub positions: Vec<Position>,
    pub cash: Decimal,
    pub total: Decimal,
}

/// Trims and upper-cases a ticker as typed into a form.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}
