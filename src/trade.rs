// src/trade.rs
use crate::db;
use crate::error::{AppError, Result};
use crate::models::{normalize_symbol, Portfolio, Position, Quote, TransactionType};
use crate::quote::QuoteProvider;
use chrono::Utc;
use log::{info, warn};
use rust_decimal::Decimal;
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct Receipt {
    pub symbol: String,
    pub shares: i64,
    pub price: Decimal,
    pub amount: Decimal,
    pub cash: Decimal,
}

/// Parses a share count typed into a form: digits only, greater than zero.
pub fn parse_shares(raw: Option<&str>) -> Result<i64> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(AppError::apology("Missing shares"));
    }
    if !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::apology("Shares must be a positive integer"));
    }
    match raw.parse::<i64>() {
        Ok(shares) if shares > 0 => Ok(shares),
        _ => Err(AppError::apology("Shares must be a positive integer")),
    }
}

/// Validates the order form, prices it and applies it.
pub async fn place_order(
    pool: &SqlitePool,
    quotes: &dyn QuoteProvider,
    user_id: i64,
    side: TransactionType,
    symbol: Option<&str>,
    shares: Option<&str>,
) -> Result<Receipt> {
    let symbol = normalize_symbol(symbol.unwrap_or_default());
    if symbol.is_empty() {
        return Err(AppError::apology("Missing symbol"));
    }
    let shares = parse_shares(shares)?;
    let quote = quotes
        .lookup(&symbol)
        .await?
        .ok_or_else(|| AppError::apology("Invalid Stock Symbol"))?;

    match side {
        TransactionType::Buy => buy(pool, user_id, &quote, shares).await,
        TransactionType::Sell => sell(pool, user_id, &quote, shares).await,
    }
}

fn order_amount(price: Decimal, shares: i64) -> Result<Decimal> {
    price
        .checked_mul(Decimal::from(shares))
        .ok_or_else(|| AppError::apology("order is too large"))
}

/// Lock contention with a concurrent trade on the same database is a conflict,
/// not a server failure.
fn contention_as_conflict(err: AppError) -> AppError {
    match err {
        AppError::Database(ref e) if db::is_lock_contention(e) => AppError::Conflict,
        other => other,
    }
}

pub async fn buy(pool: &SqlitePool, user_id: i64, quote: &Quote, shares: i64) -> Result<Receipt> {
    apply_buy(pool, user_id, quote, shares)
        .await
        .map_err(contention_as_conflict)
}

pub async fn sell(pool: &SqlitePool, user_id: i64, quote: &Quote, shares: i64) -> Result<Receipt> {
    apply_sell(pool, user_id, quote, shares)
        .await
        .map_err(contention_as_conflict)
}

async fn apply_buy(pool: &SqlitePool, user_id: i64, quote: &Quote, shares: i64) -> Result<Receipt> {
    let cost = order_amount(quote.price, shares)?;
    let mut tx = pool.begin().await?;

    let cash = db::get_cash(&mut *tx, user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    let remaining = cash - cost;
    if remaining < Decimal::ZERO {
        return Err(AppError::apology(
            "cannot afford the number of shares at the current price",
        ));
    }

    let now = Utc::now();
    db::add_to_holding(&mut *tx, user_id, &quote.symbol, shares, quote.price, now).await?;
    db::append_history(
        &mut *tx,
        user_id,
        &quote.symbol,
        shares,
        quote.price,
        TransactionType::Buy,
        now,
    )
    .await?;
    db::swap_cash(&mut *tx, user_id, cash, remaining).await?;
    tx.commit().await?;

    info!(
        "User {} bought {} {} at {} for {}",
        user_id, shares, quote.symbol, quote.price, cost
    );
    Ok(Receipt {
        symbol: quote.symbol.clone(),
        shares,
        price: quote.price,
        amount: cost,
        cash: remaining,
    })
}

async fn apply_sell(
    pool: &SqlitePool,
    user_id: i64,
    quote: &Quote,
    shares: i64,
) -> Result<Receipt> {
    let proceeds = order_amount(quote.price, shares)?;
    let mut tx = pool.begin().await?;

    let holding = db::get_holding(&mut *tx, user_id, &quote.symbol)
        .await?
        .ok_or_else(|| AppError::apology("haven't bought anything from this company yet"))?;
    let remaining_shares = holding.shares - shares;
    if remaining_shares < 0 {
        return Err(AppError::apology("shares sold exceeds shares owned"));
    }

    let now = Utc::now();
    if remaining_shares == 0 {
        db::delete_holding(&mut *tx, user_id, &quote.symbol).await?;
    } else {
        db::update_holding_after_sale(
            &mut *tx,
            user_id,
            &quote.symbol,
            remaining_shares,
            quote.price,
            now,
        )
        .await?;
    }
    db::append_history(
        &mut *tx,
        user_id,
        &quote.symbol,
        shares,
        quote.price,
        TransactionType::Sell,
        now,
    )
    .await?;

    let cash = db::get_cash(&mut *tx, user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    let new_cash = cash + proceeds;
    db::swap_cash(&mut *tx, user_id, cash, new_cash).await?;
    tx.commit().await?;

    info!(
        "User {} sold {} {} at {} for {}",
        user_id, shares, quote.symbol, quote.price, proceeds
    );
    Ok(Receipt {
        symbol: quote.symbol.clone(),
        shares,
        price: quote.price,
        amount: proceeds,
        cash: new_cash,
    })
}

/// Values every holding at its live price. A failed lookup falls back to the
/// last transaction price.
pub async fn portfolio(
    pool: &SqlitePool,
    quotes: &dyn QuoteProvider,
    user_id: i64,
) -> Result<Portfolio> {
    let cash = db::get_cash(pool, user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    let holdings = db::list_holdings(pool, user_id).await?;

    let mut positions = Vec::with_capacity(holdings.len());
    let mut total = cash;
    for holding in holdings {
        let (name, price) = match quotes.lookup(&holding.symbol).await {
            Ok(Some(quote)) => (quote.name, quote.price),
            Ok(None) => {
                warn!("No quote for held symbol {}", holding.symbol);
                (holding.symbol.clone(), holding.price)
            }
            Err(e) => {
                warn!("Quote lookup for {} failed: {}", holding.symbol, e);
                (holding.symbol.clone(), holding.price)
            }
        };
        let value = order_amount(price, holding.shares)?;
        total += value;
        positions.push(Position {
            symbol: holding.symbol,
            name,
            shares: holding.shares,
            price,
            value,
        });
    }

    Ok(Portfolio {
        positions,
        cash,
        total,
    })
}
