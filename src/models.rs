// src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize)]
pub struct Portfolio {
    pub owner: String,
    pub cash_balance: f64,
    pub total_value: f64,
}

/// A single purchase, consumed oldest-first on sale.
#[derive(Debug, Clone, Serialize)]
pub struct HoldingLot {
    pub id: i64,
    pub symbol: String,
    pub quantity: i64,
    pub average_price: f64,
    pub purchase_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Buy,
    Sell,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Buy => write!(f, "BUY"),
            TransactionType::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(TransactionType::Buy),
            "SELL" => Ok(TransactionType::Sell),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub quantity: i64,
    pub price: f64,
    pub fee: f64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated position for one symbol, straight from the lots table.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub cost_basis: f64,
}

impl Position {
    pub fn average_price(&self) -> f64 {
        if self.quantity == 0 {
            0.0
        } else {
            self.cost_basis / self.quantity as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub current_price: f64,
    pub closes: Vec<(NaiveDate, f64)>,
    pub market_cap: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ChartData {
    pub dates: Vec<String>,
    pub prices: Vec<f64>,
}

#[derive(Debug, Serialize)]
pub struct StockQuote {
    pub symbol: String,
    pub name: String,
    pub current_price: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub chart_data: ChartData,
    pub is_blue_chip: bool,
}

#[derive(Debug, Serialize)]
pub struct HoldingValue {
    pub symbol: String,
    pub name: String,
    pub quantity: i64,
    pub avg_price: f64,
    pub current_price: f64,
    pub current_value: f64,
    pub profit_loss: f64,
}

#[derive(Debug, Serialize)]
pub struct PortfolioValuation {
    pub cash_balance: f64,
    pub holdings: Vec<HoldingValue>,
    pub total_portfolio_value: f64,
    pub total_holdings_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Volatility,
    Moderate,
    Stable,
    BlueChip,
    LargeCap,
}

#[derive(Debug, Serialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub message: String,
    pub icon: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct TradeRequest {
    pub symbol: Option<String>,
    #[serde(default)]
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct TradeReceipt {
    pub success: bool,
    pub message: String,
    pub price: f64,
    pub fee: f64,
    pub cash_balance: f64,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}
