// src/market.rs
use crate::config::{Config, MarketProvider};
use crate::error::AppError;
use crate::models::MarketSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::{error, info};
use reqwest::header;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use urlencoding::encode;

/// Days of daily closes carried in a snapshot.
const HISTORY_DAYS: usize = 7;

#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot, AppError>;

    /// Market capitalisation from the provider's company profile, if it has one.
    async fn market_cap(&self, symbol: &str) -> Result<Option<f64>, AppError>;
}

pub fn from_config(config: &Config, client: Client) -> Arc<dyn PriceSource> {
    match config.market_provider {
        MarketProvider::Yahoo => Arc::new(YahooClient::new(client)),
        MarketProvider::AlphaVantage => Arc::new(AlphaVantageClient::new(
            client,
            config.alpha_vantage_api_key.clone(),
        )),
    }
}

pub fn http_client() -> Result<Client, AppError> {
    // Yahoo answers 429 to requests without a browser-like agent.
    Ok(Client::builder()
        .user_agent("Mozilla/5.0 (compatible; gullak-trader/0.1)")
        .timeout(std::time::Duration::from_secs(10))
        .build()?)
}

// ---------------------------------------------------------------------------
// Yahoo Finance chart endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooChartResult>>,
    error: Option<YahooChartError>,
}

#[derive(Debug, Deserialize)]
struct YahooChartError {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YahooChartResult {
    meta: YahooChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooChartMeta {
    regular_market_price: Option<f64>,
    market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    #[serde(default)]
    quote: Vec<YahooQuoteSeries>,
}

#[derive(Debug, Deserialize)]
struct YahooQuoteSeries {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooQuoteSummaryResponse {
    quote_summary: YahooQuoteSummary,
}

#[derive(Debug, Deserialize)]
struct YahooQuoteSummary {
    #[serde(default)]
    result: Option<Vec<YahooQuoteSummaryResult>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooQuoteSummaryResult {
    summary_detail: Option<YahooSummaryDetail>,
}

/// Yahoo wraps numbers as `{"raw": .., "fmt": ..}` or `{}` when absent.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooSummaryDetail {
    market_cap: Option<YahooRawValue>,
}

#[derive(Debug, Deserialize)]
struct YahooRawValue {
    raw: Option<f64>,
}

#[derive(Debug, Clone)]
struct YahooCrumb {
    cookie: String,
    crumb: String,
}

pub struct YahooClient {
    client: Client,
    base_url: String,
    crumb: Mutex<Option<YahooCrumb>>,
}

impl YahooClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: "https://query1.finance.yahoo.com".to_string(),
            crumb: Mutex::new(None),
        }
    }

    /// quoteSummary needs a session cookie plus the crumb issued for it.
    async fn ensure_crumb(&self) -> Result<YahooCrumb, AppError> {
        let mut guard = self.crumb.lock().await;
        if let Some(crumb) = guard.as_ref() {
            return Ok(crumb.clone());
        }

        let response = self.client.get("https://fc.yahoo.com").send().await?;
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split_once(';').map(|(v, _)| v.to_string()))
            .ok_or_else(|| AppError::MarketData("Failed to parse Yahoo cookie".into()))?;

        let crumb = self
            .client
            .get(format!("{}/v1/test/getcrumb", self.base_url))
            .header(header::COOKIE, &cookie)
            .send()
            .await?
            .text()
            .await?;

        let crumb = YahooCrumb { cookie, crumb };
        *guard = Some(crumb.clone());
        Ok(crumb)
    }
}

fn yahoo_chart_url(base_url: &str, symbol: &str) -> String {
    format!(
        "{}/v8/finance/chart/{}?range={}d&interval=1d",
        base_url,
        encode(symbol),
        HISTORY_DAYS
    )
}

fn yahoo_summary_url(base_url: &str, symbol: &str, crumb: &str) -> String {
    format!(
        "{}/v10/finance/quoteSummary/{}?modules=summaryDetail&crumb={}",
        base_url,
        encode(symbol),
        encode(crumb)
    )
}

#[async_trait]
impl PriceSource for YahooClient {
    fn name(&self) -> &'static str {
        "YAHOO"
    }

    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot, AppError> {
        let url = yahoo_chart_url(&self.base_url, symbol);
        info!("Fetching {} from Yahoo.", symbol);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            error!("Failed to fetch {} from Yahoo: HTTP {}", symbol, response.status());
            return Err(AppError::MarketData(format!(
                "Failed to fetch data: HTTP {}",
                response.status()
            )));
        }
        let body = response.json::<YahooChartResponse>().await?;
        parse_yahoo_chart(body)
    }

    async fn market_cap(&self, symbol: &str) -> Result<Option<f64>, AppError> {
        let crumb = self.ensure_crumb().await?;
        let url = yahoo_summary_url(&self.base_url, symbol, &crumb.crumb);

        let response = self
            .client
            .get(&url)
            .header(header::COOKIE, &crumb.cookie)
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            *self.crumb.lock().await = None;
            return Err(AppError::MarketData("Yahoo authentication expired".into()));
        }
        if !response.status().is_success() {
            return Err(AppError::MarketData(format!(
                "Failed to fetch profile: HTTP {}",
                response.status()
            )));
        }
        let body = response.json::<YahooQuoteSummaryResponse>().await?;
        Ok(parse_summary_market_cap(body))
    }
}

fn parse_summary_market_cap(body: YahooQuoteSummaryResponse) -> Option<f64> {
    body.quote_summary
        .result?
        .into_iter()
        .next()?
        .summary_detail?
        .market_cap?
        .raw
}

fn parse_yahoo_chart(body: YahooChartResponse) -> Result<MarketSnapshot, AppError> {
    if let Some(err) = body.chart.error {
        return Err(AppError::MarketData(
            err.description.unwrap_or_else(|| "unknown chart error".into()),
        ));
    }
    let result = body
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| AppError::MarketData("empty chart result".into()))?;

    let closes_raw = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    let closes: Vec<(NaiveDate, f64)> = result
        .timestamp
        .iter()
        .zip(closes_raw)
        .filter_map(|(ts, close)| {
            let date = DateTime::<Utc>::from_timestamp(*ts, 0)?.date_naive();
            Some((date, close?))
        })
        .collect();

    let current_price = result
        .meta
        .regular_market_price
        .or_else(|| closes.last().map(|(_, c)| *c))
        .unwrap_or(0.0);

    Ok(MarketSnapshot {
        current_price,
        closes,
        market_cap: result.meta.market_cap,
    })
}

// ---------------------------------------------------------------------------
// Alpha Vantage daily series
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TimeSeriesData {
    #[serde(rename = "4. close")]
    close: String,
}

#[derive(Deserialize)]
struct AlphaVantageResponse {
    #[serde(rename = "Time Series (Daily)")]
    time_series: Option<HashMap<String, TimeSeriesData>>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
}

#[derive(Deserialize)]
struct AlphaVantageOverview {
    #[serde(rename = "MarketCapitalization")]
    market_capitalization: Option<String>,
}

const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";

pub struct AlphaVantageClient {
    client: Client,
    api_key: String,
}

impl AlphaVantageClient {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl PriceSource for AlphaVantageClient {
    fn name(&self) -> &'static str {
        "ALPHA_VANTAGE"
    }

    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot, AppError> {
        info!("Fetching {} from Alpha Vantage.", symbol);

        let response = self
            .client
            .get(ALPHA_VANTAGE_URL)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            error!(
                "Failed to fetch {} from Alpha Vantage: HTTP {}",
                symbol,
                response.status()
            );
            return Err(AppError::MarketData(format!(
                "Failed to fetch data: HTTP {}",
                response.status()
            )));
        }
        let body = response.json::<AlphaVantageResponse>().await?;
        parse_daily_series(body)
    }

    async fn market_cap(&self, symbol: &str) -> Result<Option<f64>, AppError> {
        let response = self
            .client
            .get(ALPHA_VANTAGE_URL)
            .query(&[
                ("function", "OVERVIEW"),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::MarketData(format!(
                "Failed to fetch overview: HTTP {}",
                response.status()
            )));
        }
        let body = response.json::<AlphaVantageOverview>().await?;
        Ok(parse_overview_market_cap(body))
    }
}

/// Alpha Vantage sends numbers as strings and "None" when unknown.
fn parse_overview_market_cap(body: AlphaVantageOverview) -> Option<f64> {
    body.market_capitalization?.trim().parse::<f64>().ok()
}

fn parse_daily_series(body: AlphaVantageResponse) -> Result<MarketSnapshot, AppError> {
    let series = match (body.time_series, body.error_message, body.note) {
        (Some(series), _, _) => series,
        (None, Some(message), _) | (None, None, Some(message)) => {
            return Err(AppError::MarketData(message))
        }
        (None, None, None) => return Err(AppError::MarketData("missing daily series".into())),
    };

    let mut closes: Vec<(NaiveDate, f64)> = series
        .into_iter()
        .filter_map(|(date_str, data)| {
            let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").ok()?;
            let close = data.close.parse::<f64>().ok()?;
            Some((date, close))
        })
        .collect();
    closes.sort_by_key(|(date, _)| *date);
    if closes.len() > HISTORY_DAYS {
        closes.drain(..closes.len() - HISTORY_DAYS);
    }

    let current_price = closes
        .last()
        .map(|(_, c)| *c)
        .ok_or_else(|| AppError::MarketData("no closes in daily series".into()))?;

    Ok(MarketSnapshot {
        current_price,
        closes,
        market_cap: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn yahoo_chart_skips_missing_closes() {
        let body: YahooChartResponse = serde_json::from_value(json!({
            "chart": {
                "result": [{
                    "meta": { "regularMarketPrice": 2950.5, "currency": "INR" },
                    "timestamp": [1760313600, 1760400000, 1760486400],
                    "indicators": { "quote": [{ "close": [2900.0, null, 2940.25] }] }
                }],
                "error": null
            }
        }))
        .unwrap();

        let snapshot = parse_yahoo_chart(body).unwrap();
        assert_eq!(snapshot.current_price, 2950.5);
        assert_eq!(snapshot.closes.len(), 2);
        assert_eq!(snapshot.closes[1].1, 2940.25);
        assert_eq!(
            snapshot.closes[0].0,
            NaiveDate::from_ymd_opt(2025, 10, 13).unwrap()
        );
        assert_eq!(snapshot.market_cap, None);
    }

    #[test]
    fn yahoo_chart_error_is_reported() {
        let body: YahooChartResponse = serde_json::from_value(json!({
            "chart": {
                "result": null,
                "error": { "code": "Not Found", "description": "No data found, symbol may be delisted" }
            }
        }))
        .unwrap();

        match parse_yahoo_chart(body) {
            Err(AppError::MarketData(message)) => assert!(message.contains("delisted")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn daily_series_keeps_the_latest_week() {
        let mut series = serde_json::Map::new();
        for day in 1..=10 {
            series.insert(
                format!("2026-10-{:02}", day),
                json!({
                    "1. open": "1.0", "2. high": "1.0", "3. low": "1.0",
                    "4. close": format!("{}.0", 100 + day), "5. volume": "10"
                }),
            );
        }
        let body: AlphaVantageResponse =
            serde_json::from_value(json!({ "Time Series (Daily)": series })).unwrap();

        let snapshot = parse_daily_series(body).unwrap();
        assert_eq!(snapshot.closes.len(), HISTORY_DAYS);
        assert_eq!(
            snapshot.closes[0].0,
            NaiveDate::from_ymd_opt(2026, 10, 4).unwrap()
        );
        assert_eq!(snapshot.current_price, 110.0);
    }

    #[test]
    fn symbols_are_percent_encoded_in_yahoo_urls() {
        let url = yahoo_chart_url("https://query1.finance.yahoo.com", "^NSEI");
        assert_eq!(
            url,
            "https://query1.finance.yahoo.com/v8/finance/chart/%5ENSEI?range=7d&interval=1d"
        );
        assert!(yahoo_chart_url("", "TCS.NS").starts_with("/v8/finance/chart/TCS.NS?"));
        assert!(yahoo_summary_url("", "../x", "a/b").contains("quoteSummary/..%2Fx?"));
        assert!(yahoo_summary_url("", "TCS.NS", "a/b").ends_with("crumb=a%2Fb"));
    }

    #[test]
    fn yahoo_summary_detail_carries_market_cap() {
        let body: YahooQuoteSummaryResponse = serde_json::from_value(json!({
            "quoteSummary": {
                "result": [{
                    "summaryDetail": {
                        "maxAge": 1,
                        "marketCap": { "raw": 19_134_561_599_488.0_f64, "fmt": "19.13T", "longFmt": "19,134,561,599,488" },
                        "trailingPE": {},
                        "currency": "INR"
                    }
                }],
                "error": null
            }
        }))
        .unwrap();
        assert_eq!(parse_summary_market_cap(body), Some(19_134_561_599_488.0));

        let empty: YahooQuoteSummaryResponse = serde_json::from_value(json!({
            "quoteSummary": { "result": [{ "summaryDetail": { "marketCap": {} } }], "error": null }
        }))
        .unwrap();
        assert_eq!(parse_summary_market_cap(empty), None);
    }

    #[test]
    fn overview_market_cap_is_parsed_from_string() {
        let body: AlphaVantageOverview = serde_json::from_value(json!({
            "Symbol": "IBM",
            "Name": "International Business Machines",
            "MarketCapitalization": "2800000000000",
            "PERatio": "22.5"
        }))
        .unwrap();
        assert_eq!(parse_overview_market_cap(body), Some(2.8e12));

        let unknown: AlphaVantageOverview =
            serde_json::from_value(json!({ "MarketCapitalization": "None" })).unwrap();
        assert_eq!(parse_overview_market_cap(unknown), None);
        let missing: AlphaVantageOverview = serde_json::from_value(json!({})).unwrap();
        assert_eq!(parse_overview_market_cap(missing), None);
    }

    #[test]
    fn daily_series_rate_limit_note_is_an_error() {
        let body: AlphaVantageResponse = serde_json::from_value(json!({
            "Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."
        }))
        .unwrap();
        assert!(matches!(
            parse_daily_series(body),
            Err(AppError::MarketData(_))
        ));
    }
}
