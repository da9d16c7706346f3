// src/db.rs
use crate::error::{AppError, Result};
use crate::models::{HistoryEntry, Holding, TransactionType, User};
use chrono::{DateTime, Utc};
use log::info;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, SqliteExecutor};
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        hash TEXT NOT NULL,
        cash TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS holdings (
        id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id),
        symbol TEXT NOT NULL,
        shares INTEGER NOT NULL CHECK (shares > 0),
        price TEXT NOT NULL,
        transaction_type TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        UNIQUE (user_id, symbol)
    )",
    "CREATE INDEX IF NOT EXISTS holdings_by_user_id_index ON holdings(user_id)",
    "CREATE TABLE IF NOT EXISTS history (
        id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id),
        symbol TEXT NOT NULL,
        shares INTEGER NOT NULL CHECK (shares > 0),
        price TEXT NOT NULL,
        transaction_type TEXT NOT NULL,
        timestamp TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS history_by_user_id_index ON history(user_id)",
];

pub async fn init(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    create_schema(&pool).await?;

    info!("Successfully connected to {}.", database_url);
    Ok(pool)
}

/// Single-connection in-memory database; every pooled connection would otherwise
/// see its own empty database.
pub async fn init_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| AppError::Internal(format!("stored amount '{}': {}", raw, e)))
}

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// True for busy/locked errors, including their extended result codes.
pub(crate) fn is_lock_contention(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };
    db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

fn parse_transaction_type(raw: &str) -> Result<TransactionType> {
    TransactionType::parse(raw)
        .ok_or_else(|| AppError::Internal(format!("stored transaction type '{}'", raw)))
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    username: String,
    hash: String,
    cash: String,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id,
            username: row.username,
            hash: row.hash,
            cash: parse_decimal(&row.cash)?,
        })
    }
}

#[derive(FromRow)]
struct HoldingRow {
    user_id: i64,
    symbol: String,
    shares: i64,
    price: String,
    transaction_type: String,
    timestamp: DateTime<Utc>,
}

impl TryFrom<HoldingRow> for Holding {
    type Error = AppError;

    fn try_from(row: HoldingRow) -> Result<Self> {
        Ok(Holding {
            user_id: row.user_id,
            symbol: row.symbol,
            shares: row.shares,
            price: parse_decimal(&row.price)?,
            transaction_type: parse_transaction_type(&row.transaction_type)?,
            timestamp: row.timestamp,
        })
    }
}

#[derive(FromRow)]
struct HistoryRow {
    id: i64,
    user_id: i64,
    symbol: String,
    shares: i64,
    price: String,
    transaction_type: String,
    timestamp: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = AppError;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(HistoryEntry {
            id: row.id,
            user_id: row.user_id,
            symbol: row.symbol,
            shares: row.shares,
            price: parse_decimal(&row.price)?,
            transaction_type: parse_transaction_type(&row.transaction_type)?,
            timestamp: row.timestamp,
        })
    }
}

/// Inserts a new user and returns its id. A taken username is reported as an apology.
pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    hash: &str,
    cash: Decimal,
) -> Result<i64> {
    let result = sqlx::query("INSERT INTO users (username, hash, cash) VALUES (?, ?, ?)")
        .bind(username)
        .bind(hash)
        .bind(cash.to_string())
        .execute(pool)
        .await;

    match result {
        Ok(done) => Ok(done.last_insert_rowid()),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(AppError::apology("username is already taken"))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn find_user_by_username(pool: &SqlitePool, username: &str) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, hash, cash FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;
    row.map(User::try_from).transpose()
}

pub async fn get_cash<'e, E>(executor: E, user_id: i64) -> Result<Option<Decimal>>
where
    E: SqliteExecutor<'e>,
{
    let cash: Option<(String,)> = sqlx::query_as("SELECT cash FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(executor)
        .await?;
    cash.map(|(raw,)| parse_decimal(&raw)).transpose()
}

/// Writes `new_cash` only if the stored balance still equals `expected`.
pub async fn swap_cash<'e, E>(
    executor: E,
    user_id: i64,
    expected: Decimal,
    new_cash: Decimal,
) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let done = sqlx::query("UPDATE users SET cash = ? WHERE id = ? AND cash = ?")
        .bind(new_cash.to_string())
        .bind(user_id)
        .bind(expected.to_string())
        .execute(executor)
        .await?;
    if done.rows_affected() == 0 {
        return Err(AppError::Conflict);
    }
    Ok(())
}

pub async fn get_holding<'e, E>(executor: E, user_id: i64, symbol: &str) -> Result<Option<Holding>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, HoldingRow>(
        "SELECT user_id, symbol, shares, price, transaction_type, timestamp
         FROM holdings WHERE user_id = ? AND symbol = ?",
    )
    .bind(user_id)
    .bind(symbol)
    .fetch_optional(executor)
    .await?;
    row.map(Holding::try_from).transpose()
}

pub async fn list_holdings(pool: &SqlitePool, user_id: i64) -> Result<Vec<Holding>> {
    let rows = sqlx::query_as::<_, HoldingRow>(
        "SELECT user_id, symbol, shares, price, transaction_type, timestamp
         FROM holdings WHERE user_id = ? ORDER BY symbol",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(Holding::try_from).collect()
}

pub async fn held_symbols(pool: &SqlitePool, user_id: i64) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT symbol FROM holdings WHERE user_id = ? ORDER BY symbol")
            .bind(user_id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(symbol,)| symbol).collect())
}

/// Adds `shares` to the position, creating it on first purchase.
pub async fn add_to_holding<'e, E>(
    executor: E,
    user_id: i64,
    symbol: &str,
    shares: i64,
    price: Decimal,
    timestamp: DateTime<Utc>,
) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO holdings (user_id, symbol, shares, price, transaction_type, timestamp)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (user_id, symbol) DO UPDATE SET
             shares = holdings.shares + excluded.shares,
             price = excluded.price,
             transaction_type = excluded.transaction_type,
             timestamp = excluded.timestamp",
    )
    .bind(user_id)
    .bind(symbol)
    .bind(shares)
    .bind(price.to_string())
    .bind(TransactionType::Buy.as_str())
    .bind(timestamp)
    .execute(executor)
    .await?;
    Ok(())
}

/// Sets the remaining share count after a sale.
pub async fn update_holding_after_sale<'e, E>(
    executor: E,
    user_id: i64,
    symbol: &str,
    remaining: i64,
    price: Decimal,
    timestamp: DateTime<Utc>,
) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "UPDATE holdings SET shares = ?, price = ?, transaction_type = ?, timestamp = ?
         WHERE user_id = ? AND symbol = ?",
    )
    .bind(remaining)
    .bind(price.to_string())
    .bind(TransactionType::Sell.as_str())
    .bind(timestamp)
    .bind(user_id)
    .bind(symbol)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn delete_holding<'e, E>(executor: E, user_id: i64, symbol: &str) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("DELETE FROM holdings WHERE user_id = ? AND symbol = ?")
        .bind(user_id)
        .bind(symbol)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn append_history<'e, E>(
    executor: E,
    user_id: i64,
    symbol: &str,
    shares: i64,
    price: Decimal,
    transaction_type: TransactionType,
    timestamp: DateTime<Utc>,
) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO history (user_id, symbol, shares, price, transaction_type, timestamp)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(symbol)
    .bind(shares)
    .bind(price.to_string())
    .bind(transaction_type.as_str())
    .bind(timestamp)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn list_history(pool: &SqlitePool, user_id: i64) -> Result<Vec<HistoryEntry>> {
    let rows = sqlx::query_as::<_, HistoryRow>(
        "SELECT id, user_id, symbol, shares, price, transaction_type, timestamp
         FROM history WHERE user_id = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(HistoryEntry::try_from).collect()
}
