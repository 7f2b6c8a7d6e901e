// src/db.rs
use crate::models::{HoldingLot, Portfolio, Position, Transaction, TransactionType};
use chrono::{DateTime, Utc};
use log::{error, info};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS portfolios (
        owner TEXT PRIMARY KEY,
        cash_balance REAL NOT NULL,
        total_value REAL NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS holding_lots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner TEXT NOT NULL,
        symbol TEXT NOT NULL,
        quantity INTEGER NOT NULL CHECK (quantity >= 0),
        average_price REAL NOT NULL,
        purchase_time TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS holding_lots_owner_symbol ON holding_lots (owner, symbol)",
    "CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner TEXT NOT NULL,
        symbol TEXT NOT NULL,
        transaction_type TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        price REAL NOT NULL,
        fee REAL NOT NULL,
        timestamp TEXT NOT NULL
    )",
];

pub async fn init(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = database_url.contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    // An in-memory database lives and dies with its single connection.
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
    } else {
        options = options.journal_mode(SqliteJournalMode::Wal);
        SqlitePoolOptions::new().max_connections(max_connections.max(1))
    };

    let pool = pool_options.connect_with(options).await?;

    let mut conn = pool.acquire().await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *conn).await?;
    }

    info!("Successfully connected to SQLite at {}.", database_url);
    Ok(pool)
}

/// Seeds a portfolio with `starting_cash`. Returns `true` when a new row was created.
pub async fn ensure_portfolio(
    conn: &mut SqliteConnection,
    owner: &str,
    starting_cash: f64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO portfolios (owner, cash_balance, total_value, created_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(owner)
    .bind(starting_cash)
    .bind(starting_cash)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn get_portfolio(
    conn: &mut SqliteConnection,
    owner: &str,
) -> Result<Option<Portfolio>, sqlx::Error> {
    let row = sqlx::query("SELECT owner, cash_balance, total_value FROM portfolios WHERE owner = ?")
        .bind(owner)
        .fetch_optional(conn)
        .await?;

    row.map(|row| -> Result<Portfolio, sqlx::Error> {
        Ok(Portfolio {
            owner: row.try_get("owner")?,
            cash_balance: row.try_get("cash_balance")?,
            total_value: row.try_get("total_value")?,
        })
    })
    .transpose()
}

pub async fn update_cash_balance(
    conn: &mut SqliteConnection,
    owner: &str,
    cash_balance: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE portfolios SET cash_balance = ? WHERE owner = ?")
        .bind(cash_balance)
        .bind(owner)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn update_total_value(
    conn: &mut SqliteConnection,
    owner: &str,
    total_value: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE portfolios SET total_value = ? WHERE owner = ?")
        .bind(total_value)
        .bind(owner)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_lot(
    conn: &mut SqliteConnection,
    owner: &str,
    symbol: &str,
    quantity: i64,
    price: f64,
    purchase_time: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO holding_lots (owner, symbol, quantity, average_price, purchase_time)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(owner)
    .bind(symbol)
    .bind(quantity)
    .bind(price)
    .bind(purchase_time)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Non-empty lots for a symbol, oldest purchase first.
pub async fn open_lots(
    conn: &mut SqliteConnection,
    owner: &str,
    symbol: &str,
) -> Result<Vec<HoldingLot>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, symbol, quantity, average_price, purchase_time FROM holding_lots
         WHERE owner = ? AND symbol = ? AND quantity > 0
         ORDER BY purchase_time ASC, id ASC",
    )
    .bind(owner)
    .bind(symbol)
    .fetch_all(conn)
    .await?;

    rows.iter().map(lot_from_row).collect()
}

fn lot_from_row(row: &SqliteRow) -> Result<HoldingLot, sqlx::Error> {
    Ok(HoldingLot {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        quantity: row.try_get("quantity")?,
        average_price: row.try_get("average_price")?,
        purchase_time: row.try_get("purchase_time")?,
    })
}

pub async fn delete_lot(conn: &mut SqliteConnection, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM holding_lots WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn update_lot_quantity(
    conn: &mut SqliteConnection,
    id: i64,
    quantity: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE holding_lots SET quantity = ? WHERE id = ?")
        .bind(quantity)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn owned_quantity(
    conn: &mut SqliteConnection,
    owner: &str,
    symbol: &str,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "SELECT COALESCE(SUM(quantity), 0) AS owned FROM holding_lots
         WHERE owner = ? AND symbol = ?",
    )
    .bind(owner)
    .bind(symbol)
    .fetch_one(conn)
    .await?;
    row.try_get("owned")
}

/// Net position per symbol with the total cost of the open lots.
pub async fn positions(
    conn: &mut SqliteConnection,
    owner: &str,
) -> Result<Vec<Position>, sqlx::Error> {
    // Cost basis is quantity-weighted, so average price is SUM(q*p) / SUM(q).
    let rows = sqlx::query(
        "SELECT symbol, SUM(quantity) AS quantity, SUM(quantity * average_price) AS cost_basis
         FROM holding_lots
         WHERE owner = ?
         GROUP BY symbol
         HAVING SUM(quantity) > 0
         ORDER BY symbol",
    )
    .bind(owner)
    .fetch_all(conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<Position, sqlx::Error> {
            Ok(Position {
                symbol: row.try_get("symbol")?,
                quantity: row.try_get("quantity")?,
                cost_basis: row.try_get("cost_basis")?,
            })
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_transaction(
    conn: &mut SqliteConnection,
    owner: &str,
    symbol: &str,
    kind: TransactionType,
    quantity: i64,
    price: f64,
    fee: f64,
    timestamp: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO transactions (owner, symbol, transaction_type, quantity, price, fee, timestamp)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(owner)
    .bind(symbol)
    .bind(kind.to_string())
    .bind(quantity)
    .bind(price)
    .bind(fee)
    .bind(timestamp)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Newest first.
pub async fn list_transactions(
    conn: &mut SqliteConnection,
    owner: &str,
    limit: i64,
) -> Result<Vec<Transaction>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, symbol, transaction_type, quantity, price, fee, timestamp FROM transactions
         WHERE owner = ?
         ORDER BY timestamp DESC, id DESC
         LIMIT ?",
    )
    .bind(owner)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    let data: Vec<Transaction> = rows
        .iter()
        .filter_map(|row| match transaction_from_row(row) {
            Ok(tx) => Some(tx),
            Err(e) => {
                error!("Skipping malformed transaction row: {}", e);
                None
            }
        })
        .collect();
    info!("Fetched {} transactions for {}", data.len(), owner);
    Ok(data)
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, sqlx::Error> {
    let kind: String = row.try_get("transaction_type")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        kind: kind
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        fee: row.try_get("fee")?,
        timestamp: row.try_get("timestamp")?,
    })
}
