// src/ledger.rs
//! Cash and holding-lot bookkeeping for the trading simulator.
//!
//! Every operation is a short sequence of statements on one connection.
//! Buys and sells run inside a single SQLite transaction so a failed step
//! leaves nothing half-settled; there is no coordination between requests.

use crate::catalog;
use crate::db;
use crate::error::AppError;
use crate::market::PriceSource;
use crate::models::{
    ChartData, HoldingLot, HoldingValue, Insight, InsightKind, PortfolioValuation, StockQuote,
    TradeReceipt, TradeRequest, Transaction, TransactionType,
};
use chrono::Utc;
use log::{info, warn};
use sqlx::SqlitePool;
use std::sync::Arc;

const HISTORY_LIMIT: i64 = 100;
const LARGE_CAP_THRESHOLD: f64 = 1_000_000_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotChange {
    Close(i64),
    Reduce { id: i64, quantity: i64 },
}

/// Consumes `quantity` shares from `lots`, which must be ordered oldest first.
pub fn plan_fifo_disposal(lots: &[HoldingLot], quantity: i64) -> Result<Vec<LotChange>, AppError> {
    let mut remaining = quantity;
    let mut changes = Vec::new();

    for lot in lots {
        if remaining <= 0 {
            break;
        }
        if lot.quantity <= remaining {
            changes.push(LotChange::Close(lot.id));
            remaining -= lot.quantity;
        } else {
            changes.push(LotChange::Reduce {
                id: lot.id,
                quantity: lot.quantity - remaining,
            });
            remaining = 0;
        }
    }

    if remaining > 0 {
        return Err(AppError::InsufficientShares);
    }
    Ok(changes)
}

fn validate_order(request: &TradeRequest) -> Result<(String, i64), AppError> {
    let symbol = request
        .symbol
        .as_deref()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .ok_or(AppError::InvalidOrder)?;
    if request.quantity <= 0 {
        return Err(AppError::InvalidOrder);
    }
    Ok((symbol, request.quantity))
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Absolute and percentage change from `previous` to `current`.
fn change_between(previous: f64, current: f64) -> (f64, f64) {
    if previous > 0.0 {
        let change = current - previous;
        (change, change / previous * 100.0)
    } else {
        (0.0, 0.0)
    }
}

pub struct Ledger {
    pool: SqlitePool,
    prices: Arc<dyn PriceSource>,
    starting_cash: f64,
    fee: f64,
}

impl Ledger {
    pub fn new(pool: SqlitePool, prices: Arc<dyn PriceSource>, starting_cash: f64, fee: f64) -> Self {
        Self {
            pool,
            prices,
            starting_cash,
            fee,
        }
    }

    /// Opens a portfolio with the starting cash unless the owner already has one.
    pub async fn seed(&self, owner: &str) -> Result<bool, AppError> {
        let mut conn = self.pool.acquire().await?;
        let created = db::ensure_portfolio(&mut conn, owner, self.starting_cash).await?;
        if created {
            info!("Seeded portfolio for {} with {:.2}", owner, self.starting_cash);
        }
        Ok(created)
    }

    async fn live_price(&self, symbol: &str) -> Result<f64, AppError> {
        let price = self.prices.snapshot(symbol).await?.current_price;
        if !price.is_finite() || price <= 0.0 {
            warn!("Unusable price {} for {}", price, symbol);
            return Err(AppError::PriceUnavailable);
        }
        Ok(price)
    }

    pub async fn quote(&self, symbol: &str) -> Result<StockQuote, AppError> {
        let symbol = symbol.trim().to_uppercase();
        let snapshot = self.prices.snapshot(&symbol).await?;

        let (price_change, price_change_percent) = match snapshot.closes.len() {
            n if n >= 2 => change_between(snapshot.closes[n - 2].1, snapshot.current_price),
            _ => (0.0, 0.0),
        };

        Ok(StockQuote {
            name: catalog::display_name(&symbol),
            is_blue_chip: catalog::is_blue_chip(&symbol),
            current_price: round2(snapshot.current_price),
            price_change: round2(price_change),
            price_change_percent: round2(price_change_percent),
            chart_data: ChartData {
                dates: snapshot
                    .closes
                    .iter()
                    .map(|(d, _)| d.format("%Y-%m-%d").to_string())
                    .collect(),
                prices: snapshot.closes.iter().map(|(_, p)| *p).collect(),
            },
            symbol,
        })
    }

    pub async fn insights(&self, symbol: &str) -> Result<Vec<Insight>, AppError> {
        let symbol = symbol.trim().to_uppercase();
        let snapshot = self.prices.snapshot(&symbol).await?;

        let (_, change_percent) = match snapshot.closes.len() {
            n if n >= 2 => change_between(snapshot.closes[n - 2].1, snapshot.closes[n - 1].1),
            _ => (0.0, 0.0),
        };
        let magnitude = change_percent.abs();

        let mut insights = Vec::new();
        if magnitude > 5.0 {
            insights.push(Insight {
                kind: InsightKind::Volatility,
                message: format!(
                    "Gullak Guru says: This stock is showing high volatility with a {:.1}% change! High-risk, high-reward territory.",
                    magnitude
                ),
                icon: "⚡",
            });
        } else if magnitude > 2.0 {
            insights.push(Insight {
                kind: InsightKind::Moderate,
                message: format!(
                    "Gullak Guru says: Moderate price movement of {:.1}%. Keep an eye on market trends!",
                    magnitude
                ),
                icon: "📈",
            });
        } else {
            insights.push(Insight {
                kind: InsightKind::Stable,
                message: "Gullak Guru says: This stock is showing stable price movement today. Good for steady investors!".to_string(),
                icon: "🔒",
            });
        }

        if catalog::is_blue_chip(&symbol) {
            insights.push(Insight {
                kind: InsightKind::BlueChip,
                message: "Gullak Guru says: This is a well-established blue-chip company, often considered a more stable, long-term investment choice.".to_string(),
                icon: "💎",
            });
        }

        let market_cap = match snapshot.market_cap {
            Some(cap) => Some(cap),
            None => match self.prices.market_cap(&symbol).await {
                Ok(cap) => cap,
                Err(e) => {
                    warn!("No market cap for {} from {}: {}", symbol, self.prices.name(), e);
                    None
                }
            },
        };
        if market_cap.unwrap_or(0.0) > LARGE_CAP_THRESHOLD {
            insights.push(Insight {
                kind: InsightKind::LargeCap,
                message: "Gullak Guru says: This is a large-cap stock with strong market presence. Generally less risky but slower growth.".to_string(),
                icon: "🏗️",
            });
        }

        Ok(insights)
    }

    pub async fn buy(&self, owner: &str, request: &TradeRequest) -> Result<TradeReceipt, AppError> {
        let (symbol, quantity) = validate_order(request)?;
        let price = self.live_price(&symbol).await?;
        let total_cost = quantity as f64 * price + self.fee;

        let mut tx = self.pool.begin().await?;
        db::ensure_portfolio(&mut tx, owner, self.starting_cash).await?;
        let cash = db::get_portfolio(&mut tx, owner)
            .await?
            .map(|p| p.cash_balance)
            .unwrap_or(self.starting_cash);

        if cash < total_cost {
            info!(
                "Rejected buy of {} {} for {}: needs {:.2}, has {:.2}",
                quantity, symbol, owner, total_cost, cash
            );
            return Err(AppError::InsufficientFunds);
        }

        let new_balance = cash - total_cost;
        let now = Utc::now();
        db::update_cash_balance(&mut tx, owner, new_balance).await?;
        db::insert_lot(&mut tx, owner, &symbol, quantity, price, now).await?;
        db::insert_transaction(
            &mut tx,
            owner,
            &symbol,
            TransactionType::Buy,
            quantity,
            price,
            self.fee,
            now,
        )
        .await?;
        tx.commit().await?;

        info!(
            "{} bought {} {} at {:.2}; cash now {:.2}",
            owner, quantity, symbol, price, new_balance
        );
        Ok(TradeReceipt {
            success: true,
            message: format!("Successfully bought {} shares of {}", quantity, symbol),
            price: round2(price),
            fee: self.fee,
            cash_balance: round2(new_balance),
        })
    }

    pub async fn sell(&self, owner: &str, request: &TradeRequest) -> Result<TradeReceipt, AppError> {
        let (symbol, quantity) = validate_order(request)?;

        {
            let mut conn = self.pool.acquire().await?;
            if db::owned_quantity(&mut conn, owner, &symbol).await? < quantity {
                return Err(AppError::InsufficientShares);
            }
        }

        let price = self.live_price(&symbol).await?;
        let proceeds = quantity as f64 * price - self.fee;

        let mut tx = self.pool.begin().await?;
        db::ensure_portfolio(&mut tx, owner, self.starting_cash).await?;
        let lots = db::open_lots(&mut tx, owner, &symbol).await?;
        let changes = plan_fifo_disposal(&lots, quantity)?;

        let cash = db::get_portfolio(&mut tx, owner)
            .await?
            .map(|p| p.cash_balance)
            .unwrap_or(self.starting_cash);
        let new_balance = cash + proceeds;
        if new_balance < 0.0 {
            return Err(AppError::InsufficientFunds);
        }

        db::update_cash_balance(&mut tx, owner, new_balance).await?;
        for change in &changes {
            match *change {
                LotChange::Close(id) => db::delete_lot(&mut tx, id).await?,
                LotChange::Reduce { id, quantity } => {
                    db::update_lot_quantity(&mut tx, id, quantity).await?
                }
            }
        }
        db::insert_transaction(
            &mut tx,
            owner,
            &symbol,
            TransactionType::Sell,
            quantity,
            price,
            self.fee,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;

        info!(
            "{} sold {} {} at {:.2} across {} lot(s); cash now {:.2}",
            owner,
            quantity,
            symbol,
            price,
            changes.len(),
            new_balance
        );
        Ok(TradeReceipt {
            success: true,
            message: format!("Successfully sold {} shares of {}", quantity, symbol),
            price: round2(price),
            fee: self.fee,
            cash_balance: round2(new_balance),
        })
    }

    /// Prices every open position; a failed quote values the position at cost.
    pub async fn valuate(&self, owner: &str) -> Result<PortfolioValuation, AppError> {
        let (cash_balance, positions) = {
            let mut conn = self.pool.acquire().await?;
            db::ensure_portfolio(&mut conn, owner, self.starting_cash).await?;
            let cash = db::get_portfolio(&mut conn, owner)
                .await?
                .map(|p| p.cash_balance)
                .unwrap_or(self.starting_cash);
            (cash, db::positions(&mut conn, owner).await?)
        };

        let mut holdings = Vec::with_capacity(positions.len());
        let mut total_holdings_value = 0.0;

        for position in positions {
            let avg_price = position.average_price();
            let quantity = position.quantity as f64;

            let (current_price, profit_loss) = match self.live_price(&position.symbol).await {
                Ok(price) => (price, quantity * price - position.cost_basis),
                Err(e) => {
                    warn!(
                        "Valuing {} at cost for {}: {}",
                        position.symbol, owner, e
                    );
                    (avg_price, 0.0)
                }
            };
            let current_value = quantity * current_price;
            total_holdings_value += current_value;

            holdings.push(HoldingValue {
                name: catalog::display_name(&position.symbol),
                symbol: position.symbol,
                quantity: position.quantity,
                avg_price: round2(avg_price),
                current_price: round2(current_price),
                current_value: round2(current_value),
                profit_loss: round2(profit_loss),
            });
        }

        let total_portfolio_value = cash_balance + total_holdings_value;
        let mut conn = self.pool.acquire().await?;
        db::update_total_value(&mut conn, owner, total_portfolio_value).await?;

        Ok(PortfolioValuation {
            cash_balance: round2(cash_balance),
            holdings,
            total_portfolio_value: round2(total_portfolio_value),
            total_holdings_value: round2(total_holdings_value),
        })
    }

    pub async fn history(&self, owner: &str) -> Result<Vec<Transaction>, AppError> {
        let mut conn = self.pool.acquire().await?;
        Ok(db::list_transactions(&mut conn, owner, HISTORY_LIMIT).await?)
    }
}
