// src/catalog.rs
use serde_json::{Map, Value};

/// Tradable NSE symbols and their display names.
pub const STOCKS: &[(&str, &str)] = &[
    ("RELIANCE.NS", "Reliance Industries"),
    ("TCS.NS", "Tata Consultancy Services"),
    ("HDFCBANK.NS", "HDFC Bank"),
    ("INFY.NS", "Infosys"),
    ("HINDUNILVR.NS", "Hindustan Unilever"),
    ("ICICIBANK.NS", "ICICI Bank"),
    ("KOTAKBANK.NS", "Kotak Mahindra Bank"),
    ("BHARTIARTL.NS", "Bharti Airtel"),
    ("ITC.NS", "ITC Limited"),
    ("SBIN.NS", "State Bank of India"),
    ("BAJFINANCE.NS", "Bajaj Finance"),
    ("ASIANPAINT.NS", "Asian Paints"),
    ("MARUTI.NS", "Maruti Suzuki"),
    ("TITAN.NS", "Titan Company"),
    ("WIPRO.NS", "Wipro"),
];

pub const BLUE_CHIPS: &[&str] = &[
    "RELIANCE.NS",
    "TCS.NS",
    "HDFCBANK.NS",
    "INFY.NS",
    "HINDUNILVR.NS",
];

pub fn display_name(symbol: &str) -> String {
    STOCKS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| symbol.to_string())
}

pub fn is_blue_chip(symbol: &str) -> bool {
    BLUE_CHIPS.contains(&symbol)
}

/// `{symbol: name}` map served to the simulator page.
pub fn as_json() -> Value {
    let stocks: Map<String, Value> = STOCKS
        .iter()
        .map(|(s, n)| (s.to_string(), Value::String(n.to_string())))
        .collect();
    Value::Object(stocks)
}
