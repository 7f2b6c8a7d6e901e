// src/api.rs
use crate::auth::{self, Account, Role, Track};
use crate::catalog;
use crate::error::{handle_rejection, AppError};
use crate::ledger::Ledger;
use crate::models::{LoginRequest, TradeRequest};
use log::{error, info};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    #[serde(flatten)]
    account: Account,
}

pub fn routes(
    ledger: Arc<Ledger>,
    jwt_secret: Arc<String>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let login = warp::path!("api" / "login")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ledger(ledger.clone()))
        .and(with_secret(jwt_secret.clone()))
        .and_then(login_handler);

    let available = warp::path!("api" / "available-stocks")
        .and(warp::get())
        .and_then(available_stocks_handler);

    let stock_data = warp::path!("api" / "stock-data" / String)
        .map(decode_symbol)
        .and(warp::get())
        .and(with_ledger(ledger.clone()))
        .and_then(stock_data_handler);

    let insights = warp::path!("api" / "ai-insights" / String)
        .map(decode_symbol)
        .and(warp::get())
        .and(with_ledger(ledger.clone()))
        .and_then(insights_handler);

    let portfolio = warp::path!("api" / "portfolio")
        .and(warp::get())
        .and(with_kid(jwt_secret.clone()))
        .and(with_ledger(ledger.clone()))
        .and_then(portfolio_handler);

    let buy = warp::path!("api" / "buy-stock")
        .and(warp::post())
        .and(with_kid(jwt_secret.clone()))
        .and(with_ledger(ledger.clone()))
        .and(warp::body::json())
        .and_then(buy_handler);

    let sell = warp::path!("api" / "sell-stock")
        .and(warp::post())
        .and(with_kid(jwt_secret.clone()))
        .and(with_ledger(ledger.clone()))
        .and(warp::body::json())
        .and_then(sell_handler);

    let transactions = warp::path!("api" / "transactions")
        .and(warp::get())
        .and(with_kid(jwt_secret))
        .and(with_ledger(ledger))
        .and_then(transactions_handler);

    login
        .or(available)
        .or(stock_data)
        .or(insights)
        .or(portfolio)
        .or(buy)
        .or(sell)
        .or(transactions)
        .recover(handle_rejection)
}

fn with_ledger(
    ledger: Arc<Ledger>,
) -> impl Filter<Extract = (Arc<Ledger>,), Error = Infallible> + Clone {
    warp::any().map(move || ledger.clone())
}

fn with_secret(
    secret: Arc<String>,
) -> impl Filter<Extract = (Arc<String>,), Error = Infallible> + Clone {
    warp::any().map(move || secret.clone())
}

/// Extracts the kid who owns the portfolio from the bearer token.
fn with_kid(secret: Arc<String>) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let secret = secret.clone();
        async move {
            match header {
                Some(header) => {
                    auth::kid_from_header(&header, &secret).map_err(warp::reject::custom)
                }
                None => Err(warp::reject::custom(AppError::Unauthorized)),
            }
        }
    })
}

/// warp hands path segments over still percent-encoded (`%5ENSEI` for `^NSEI`).
fn decode_symbol(raw: String) -> String {
    match urlencoding::decode(&raw) {
        Ok(symbol) => symbol.into_owned(),
        Err(_) => raw,
    }
}

fn reject(context: &str, e: AppError) -> Rejection {
    error!("{}: {}", context, e);
    warp::reject::custom(e)
}

async fn login_handler(
    request: LoginRequest,
    ledger: Arc<Ledger>,
    secret: Arc<String>,
) -> Result<impl Reply, Rejection> {
    let account = auth::authenticate(&request.email, &request.password)
        .map_err(|e| reject("Login failed", e))?;

    if account.role == Role::Kid && account.track == Some(Track::WealthBuilders) {
        ledger
            .seed(&account.email)
            .await
            .map_err(|e| reject("Failed to seed portfolio", e))?;
    }

    let token =
        auth::create_token(&account, &secret).map_err(|e| reject("Failed to sign token", e))?;
    info!("{} logged in as {:?}.", account.email, account.role);
    Ok(warp::reply::json(&LoginResponse { token, account }))
}

async fn available_stocks_handler() -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&json!({ "stocks": catalog::as_json() })))
}

async fn stock_data_handler(symbol: String, ledger: Arc<Ledger>) -> Result<impl Reply, Rejection> {
    match ledger.quote(&symbol).await {
        Ok(quote) => {
            info!("Quote for {} retrieved successfully.", quote.symbol);
            Ok(warp::reply::json(&quote))
        }
        Err(e) => Err(reject(&format!("Failed to quote {}", symbol), e)),
    }
}

async fn insights_handler(symbol: String, ledger: Arc<Ledger>) -> Result<impl Reply, Rejection> {
    match ledger.insights(&symbol).await {
        Ok(insights) => Ok(warp::reply::json(&json!({ "insights": insights }))),
        Err(e) => Err(reject(&format!("Failed to build insights for {}", symbol), e)),
    }
}

async fn portfolio_handler(owner: String, ledger: Arc<Ledger>) -> Result<impl Reply, Rejection> {
    match ledger.valuate(&owner).await {
        Ok(valuation) => {
            info!("Portfolio for {} valued successfully.", owner);
            Ok(warp::reply::json(&valuation))
        }
        Err(e) => Err(reject("Failed to value portfolio", e)),
    }
}

async fn buy_handler(
    owner: String,
    ledger: Arc<Ledger>,
    request: TradeRequest,
) -> Result<impl Reply, Rejection> {
    match ledger.buy(&owner, &request).await {
        Ok(receipt) => Ok(warp::reply::json(&receipt)),
        Err(e) => Err(reject("Buy failed", e)),
    }
}

async fn sell_handler(
    owner: String,
    ledger: Arc<Ledger>,
    request: TradeRequest,
) -> Result<impl Reply, Rejection> {
    match ledger.sell(&owner, &request).await {
        Ok(receipt) => Ok(warp::reply::json(&receipt)),
        Err(e) => Err(reject("Sell failed", e)),
    }
}

async fn transactions_handler(
    owner: String,
    ledger: Arc<Ledger>,
) -> Result<impl Reply, Rejection> {
    match ledger.history(&owner).await {
        Ok(history) => Ok(warp::reply::json(&json!({ "transactions": history }))),
        Err(e) => Err(reject("Failed to load transactions", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::market::stub::StubPrices;
    use serde_json::Value;
    use warp::http::StatusCode;

    const SECRET: &str = "api-test-secret";

    async fn app(
        prices: Arc<StubPrices>,
    ) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
        let pool = db::init("sqlite::memory:", 1).await.unwrap();
        let ledger = Arc::new(Ledger::new(pool, prices, 100_000.0, 20.0));
        routes(ledger, Arc::new(SECRET.to_string()))
    }

    fn body_json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    async fn login<F>(filter: &F, email: &str, password: &str) -> String
    where
        F: Filter + Clone + Send + Sync + 'static,
        F::Extract: Reply + Send,
    {
        let res = warp::test::request()
            .method("POST")
            .path("/api/login")
            .json(&json!({ "email": email, "password": password }))
            .reply(filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        body_json(res.body())["token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn login_reports_the_age_track() {
        let filter = app(Arc::new(StubPrices::default())).await;

        let res = warp::test::request()
            .method("POST")
            .path("/api/login")
            .json(&json!({ "email": "kid6@example.com", "password": "password6" }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res.body());
        assert_eq!(body["track"], "chillar-party");
        assert_eq!(body["name"], "Rohan");
        assert_eq!(body["role"], "kid");

        let res = warp::test::request()
            .method("POST")
            .path("/api/login")
            .json(&json!({ "email": "kid6@example.com", "password": "nope" }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res.body())["error"], "Invalid credentials");
    }

    #[tokio::test]
    async fn catalog_is_public() {
        let filter = app(Arc::new(StubPrices::default())).await;
        let res = warp::test::request()
            .path("/api/available-stocks")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res.body())["stocks"]["WIPRO.NS"], "Wipro");
    }

    #[tokio::test]
    async fn trading_requires_a_kid_token() {
        let filter = app(Arc::new(StubPrices::default())).await;

        let res = warp::test::request()
            .path("/api/portfolio")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res.body())["error"], "Unauthorized");

        let parent = login(&filter, "parent@example.com", "password").await;
        let res = warp::test::request()
            .method("POST")
            .path("/api/buy-stock")
            .header("authorization", format!("Bearer {}", parent))
            .json(&json!({ "symbol": "TCS.NS", "quantity": 1 }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn buy_sell_and_valuate_over_http() {
        let prices = Arc::new(StubPrices::default());
        prices.set("TCS.NS", 3_000.0, &[2_900.0, 3_000.0]);
        let filter = app(prices.clone()).await;
        let token = login(&filter, "kid16@example.com", "password16").await;
        let auth = format!("Bearer {}", token);

        let res = warp::test::request()
            .path("/api/portfolio")
            .header("authorization", &auth)
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res.body())["cash_balance"], 100_000.0);

        let res = warp::test::request()
            .method("POST")
            .path("/api/buy-stock")
            .header("authorization", &auth)
            .json(&json!({ "symbol": "TCS.NS", "quantity": 2 }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res.body());
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Successfully bought 2 shares of TCS.NS");

        let res = warp::test::request()
            .method("POST")
            .path("/api/sell-stock")
            .header("authorization", &auth)
            .json(&json!({ "symbol": "TCS.NS", "quantity": 5 }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res.body())["error"], "Insufficient shares to sell");

        prices.set("TCS.NS", 3_100.0, &[3_000.0, 3_100.0]);
        let res = warp::test::request()
            .path("/api/portfolio")
            .header("authorization", &auth)
            .reply(&filter)
            .await;
        let body = body_json(res.body());
        assert_eq!(body["cash_balance"], 93_980.0);
        assert_eq!(body["holdings"][0]["quantity"], 2);
        assert_eq!(body["holdings"][0]["profit_loss"], 200.0);
        assert_eq!(body["total_portfolio_value"], 100_180.0);

        let res = warp::test::request()
            .path("/api/transactions")
            .header("authorization", &auth)
            .reply(&filter)
            .await;
        let body = body_json(res.body());
        assert_eq!(body["transactions"][0]["type"], "BUY");
    }

    #[tokio::test]
    async fn invalid_orders_are_bad_requests() {
        let filter = app(Arc::new(StubPrices::default())).await;
        let token = login(&filter, "kid16@example.com", "password16").await;

        let res = warp::test::request()
            .method("POST")
            .path("/api/buy-stock")
            .header("authorization", format!("Bearer {}", token))
            .json(&json!({ "symbol": "TCS.NS", "quantity": 0 }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res.body())["error"], "Invalid symbol or quantity");
    }

    #[tokio::test]
    async fn market_outage_is_a_bad_gateway() {
        let filter = app(Arc::new(StubPrices::default())).await;
        let res = warp::test::request()
            .path("/api/stock-data/TCS.NS")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

        let res = warp::test::request()
            .path("/api/ai-insights/TCS.NS")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn stock_data_serves_chart() {
        let prices = Arc::new(StubPrices::default());
        prices.set("INFY.NS", 1_500.0, &[1_450.0, 1_480.0]);
        let filter = app(prices).await;

        let res = warp::test::request()
            .path("/api/stock-data/INFY.NS")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res.body());
        assert_eq!(body["name"], "Infosys");
        assert_eq!(body["is_blue_chip"], true);
        assert_eq!(body["price_change"], 50.0);
        assert_eq!(body["chart_data"]["prices"][1], 1_480.0);
    }

    #[tokio::test]
    async fn encoded_index_symbols_are_decoded() {
        let prices = Arc::new(StubPrices::default());
        prices.set("^NSEI", 25_000.0, &[24_900.0, 25_000.0]);
        let filter = app(prices).await;

        let res = warp::test::request()
            .path("/api/stock-data/%5ENSEI")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res.body());
        assert_eq!(body["symbol"], "^NSEI");
        assert_eq!(body["is_blue_chip"], false);

        let res = warp::test::request()
            .path("/api/ai-insights/%5Ensei")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res.body())["insights"][0]["kind"], "stable");
    }
}
