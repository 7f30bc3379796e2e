use super::ExchangeGateway;
use crate::config::{Credentials, ExchangeSettings};
use crate::error::ExchangeError;
use crate::models::{
    split_symbol, AssetBalance, Balance, Candle, OrderReceipt, OrderSide, OrderSize, Ticker,
    TickerStats,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

const DEFAULT_BASE_URL: &str = "https://api.binance.me";
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

type SpotRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Connection settings for [`SpotClient`]
#[derive(Debug, Clone)]
pub struct SpotConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub recv_window_ms: u64,
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
    pub quote_orders: bool,
    pub adjust_for_time_difference: bool,
}

impl Default for SpotConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            api_secret: None,
            recv_window_ms: 5000,
            timeout_secs: 30,
            requests_per_minute: 1200,
            quote_orders: true,
            adjust_for_time_difference: true,
        }
    }
}

impl SpotConfig {
    pub fn from_settings(settings: &ExchangeSettings, credentials: Option<Credentials>) -> Self {
        let (api_key, api_secret) = match credentials {
            Some(c) => (Some(c.api_key), Some(c.api_secret)),
            None => (None, None),
        };

        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            recv_window_ms: settings.recv_window_ms,
            timeout_secs: settings.timeout_secs,
            requests_per_minute: settings.requests_per_minute,
            quote_orders: settings.quote_orders,
            adjust_for_time_difference: settings.adjust_for_time_difference,
        }
    }
}

/// One tradable pair as listed by the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct Market {
    /// Exchange-native symbol ("BTCUSDT")
    pub id: String,
    pub base: String,
    pub quote: String,
    pub step_size: Option<f64>,
    pub trading: bool,
}

impl Market {
    pub fn symbol(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

#[derive(Debug, Default)]
struct Markets {
    by_id: HashMap<String, Market>,
    by_symbol: HashMap<String, String>,
}

impl Markets {
    fn from_list(list: Vec<Market>) -> Self {
        let mut markets = Markets::default();
        for market in list {
            markets.by_symbol.insert(market.symbol(), market.id.clone());
            markets.by_id.insert(market.id.clone(), market);
        }
        markets
    }

    fn get(&self, symbol: &str) -> Option<&Market> {
        self.by_symbol.get(symbol).and_then(|id| self.by_id.get(id))
    }
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    server_time: i64,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    filters: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PriceTicker {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyTicker {
    symbol: String,
    last_price: String,
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    #[serde(default)]
    status: String,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
}

impl From<SymbolInfo> for Market {
    fn from(raw: SymbolInfo) -> Self {
        let step_size = raw
            .filters
            .iter()
            .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some("LOT_SIZE"))
            .and_then(|f| f.get("stepSize"))
            .and_then(parse_number)
            .filter(|s| *s > 0.0);

        Market {
            id: raw.symbol,
            base: raw.base_asset,
            quote: raw.quote_asset,
            step_size,
            trading: raw.status == "TRADING",
        }
    }
}

// ============== Implementation ==============

/// Client for a Binance-compatible spot REST API
///
/// Public market data needs no credentials; balance and order calls are
/// signed with HMAC-SHA256. Requests are rate limited client-side and never
/// retried here: a failed call simply fails the current cycle.
#[derive(Clone)]
pub struct SpotClient {
    client: Client,
    config: SpotConfig,
    rate_limiter: Arc<SpotRateLimiter>,
    markets: Arc<RwLock<Option<Arc<Markets>>>>,
    time_offset_ms: Arc<Mutex<Option<i64>>>,
}

impl SpotClient {
    pub fn new(config: SpotConfig) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)));

        Ok(Self {
            client,
            config,
            rate_limiter,
            markets: Arc::new(RwLock::new(None)),
            time_offset_ms: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &SpotConfig {
        &self.config
    }

    /// Exchange-native id for a unified symbol
    fn market_id(symbol: &str) -> Result<String, ExchangeError> {
        split_symbol(symbol)
            .map(|(base, quote)| format!("{}{}", base, quote))
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    fn credentials(&self) -> Result<(&str, &str), ExchangeError> {
        match (&self.config.api_key, &self.config.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Ok((key.as_str(), secret.as_str()))
            }
            _ => Err(ExchangeError::MissingCredentials),
        }
    }

    async fn markets(&self) -> Result<Arc<Markets>, ExchangeError> {
        if let Some(markets) = self.markets.read().await.as_ref() {
            return Ok(markets.clone());
        }

        let info: ExchangeInfo = self
            .public_get("/api/v3/exchangeInfo", &[], "exchange info")
            .await?;
        let markets = Arc::new(Markets::from_list(
            info.symbols.into_iter().map(Market::from).collect(),
        ));

        tracing::info!("Loaded {} markets", markets.by_id.len());
        *self.markets.write().await = Some(markets.clone());
        Ok(markets)
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        what: &'static str,
    ) -> Result<T, ExchangeError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.config.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        Self::decode(response, what).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&'static str, String)>,
        what: &'static str,
    ) -> Result<T, ExchangeError> {
        let (api_key, api_secret) = self.credentials()?;
        let url = self.signed_url(path, &mut params, api_secret).await?;

        let response = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;
        Self::decode(response, what).await
    }

    /// Waits for a rate-limit slot before stamping, so the timestamp is
    /// never older than the request it signs
    async fn signed_url(
        &self,
        path: &str,
        params: &mut Vec<(&'static str, String)>,
        api_secret: &str,
    ) -> Result<String, ExchangeError> {
        self.rate_limiter.until_ready().await;
        let timestamp = self.timestamp_ms().await?;

        params.push(("recvWindow", self.config.recv_window_ms.to_string()));
        params.push(("timestamp", timestamp.to_string()));
        let query = encode_query(params);
        let signature = sign(api_secret, &query)?;

        Ok(format!(
            "{}{}?{}&signature={}",
            self.config.base_url, path, query, signature
        ))
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        what: &'static str,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<ApiErrorBody>(&body) {
                return Err(ExchangeError::Api {
                    code: err.code,
                    message: err.msg,
                });
            }
            return Err(ExchangeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ExchangeError::decode(what, e))
    }

    /// Local clock shifted onto the exchange clock
    async fn timestamp_ms(&self) -> Result<i64, ExchangeError> {
        let local = Utc::now().timestamp_millis();
        if !self.config.adjust_for_time_difference {
            return Ok(local);
        }

        let mut offset = self.time_offset_ms.lock().await;
        if offset.is_none() {
            let before = Utc::now().timestamp_millis();
            let server: ServerTime = self.public_get("/api/v3/time", &[], "server time").await?;
            let after = Utc::now().timestamp_millis();
            let measured = server.server_time - (before + after) / 2;

            tracing::debug!(offset_ms = measured, "Measured exchange clock offset");
            *offset = Some(measured);
        }

        Ok(Utc::now().timestamp_millis() + offset.unwrap_or(0))
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        size: (&'static str, String),
    ) -> Result<OrderReceipt, ExchangeError> {
        let side_param = match side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };

        let params = vec![
            ("symbol", Self::market_id(symbol)?),
            ("side", side_param.to_string()),
            ("type", "MARKET".to_string()),
            size,
        ];

        let response: OrderResponse = self
            .signed_request(Method::POST, "/api/v3/order", params, "order")
            .await?;

        tracing::info!(
            symbol = %symbol,
            order_id = response.order_id,
            status = %response.status,
            "Market {} submitted",
            side_param
        );

        Ok(OrderReceipt {
            order_id: response.order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            executed_qty: response
                .executed_qty
                .as_deref()
                .and_then(|q| q.parse().ok())
                .unwrap_or(0.0),
            quote_qty: response
                .cummulative_quote_qty
                .as_deref()
                .and_then(|q| q.parse().ok())
                .unwrap_or(0.0),
            status: response.status,
        })
    }
}

#[async_trait]
impl ExchangeGateway for SpotClient {
    async fn fetch_balance(&self) -> Result<Balance, ExchangeError> {
        let account: AccountInfo = self
            .signed_request(Method::GET, "/api/v3/account", Vec::new(), "account")
            .await?;

        let mut balance = Balance::default();
        for raw in account.balances {
            let free: f64 = raw
                .free
                .parse()
                .map_err(|e| ExchangeError::decode("balance", e))?;
            let locked: f64 = raw
                .locked
                .parse()
                .map_err(|e| ExchangeError::decode("balance", e))?;

            balance.assets.insert(
                raw.asset,
                AssetBalance {
                    free,
                    total: free + locked,
                },
            );
        }

        Ok(balance)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let id = Self::market_id(symbol)?;
        let ticker: PriceTicker = self
            .public_get("/api/v3/ticker/price", &[("symbol", id)], "ticker")
            .await?;

        let last: f64 = ticker
            .price
            .parse()
            .map_err(|e| ExchangeError::decode("ticker", e))?;
        if !(last.is_finite() && last > 0.0) {
            return Err(ExchangeError::InvalidResponse(format!(
                "price {} for {}",
                ticker.price, symbol
            )));
        }

        Ok(Ticker {
            symbol: symbol.to_string(),
            last,
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let id = Self::market_id(symbol)?;
        let rows: Vec<Vec<serde_json::Value>> = self
            .public_get(
                "/api/v3/klines",
                &[
                    ("symbol", id),
                    ("interval", timeframe.to_string()),
                    ("limit", limit.to_string()),
                ],
                "klines",
            )
            .await?;

        rows.iter().map(|row| parse_kline(row)).collect()
    }

    async fn fetch_tickers(&self) -> Result<Vec<TickerStats>, ExchangeError> {
        let markets = self.markets().await?;
        let tickers: Vec<DailyTicker> = self
            .public_get("/api/v3/ticker/24hr", &[], "24h tickers")
            .await?;

        let stats = tickers
            .into_iter()
            .filter_map(|t| {
                let market = markets.by_id.get(&t.symbol)?;
                if !market.trading {
                    return None;
                }
                Some(TickerStats {
                    symbol: market.symbol(),
                    last: t.last_price.parse().ok()?,
                    quote_volume: t.quote_volume.parse().unwrap_or(0.0),
                })
            })
            .collect();

        Ok(stats)
    }

    async fn create_market_buy_order(
        &self,
        symbol: &str,
        size: OrderSize,
    ) -> Result<OrderReceipt, ExchangeError> {
        let size_param = match size {
            OrderSize::Quote(amount) if self.config.quote_orders => {
                ("quoteOrderQty", format_decimal(amount, 8))
            }
            OrderSize::Quote(_) => {
                return Err(ExchangeError::InvalidOrder(
                    "quote-sized market buys are disabled".to_string(),
                ))
            }
            OrderSize::Base(amount) => {
                ("quantity", self.format_quantity(symbol, amount).await?)
            }
        };

        self.submit_market_order(symbol, OrderSide::Buy, size_param)
            .await
    }

    async fn create_market_sell_order(
        &self,
        symbol: &str,
        amount: f64,
    ) -> Result<OrderReceipt, ExchangeError> {
        let quantity = self.format_quantity(symbol, amount).await?;
        self.submit_market_order(symbol, OrderSide::Sell, ("quantity", quantity))
            .await
    }

    fn supports_quote_orders(&self) -> bool {
        self.config.quote_orders
    }
}

impl SpotClient {
    /// Floor `amount` to the market's lot step
    async fn format_quantity(&self, symbol: &str, amount: f64) -> Result<String, ExchangeError> {
        let markets = self.markets().await?;
        let market = markets
            .get(symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;

        let formatted = match market.step_size {
            Some(step) => floor_to_step(amount, step),
            None => format_decimal(amount, 8),
        };

        match formatted.parse::<f64>() {
            Ok(q) if q > 0.0 => Ok(formatted),
            _ => Err(ExchangeError::InvalidOrder(format!(
                "{} {} is below the lot size",
                amount, symbol
            ))),
        }
    }
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex HMAC-SHA256 of the query string
fn sign(secret: &str, payload: &str) -> Result<String, ExchangeError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::InvalidOrder(format!("bad API secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn parse_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn parse_kline(row: &[serde_json::Value]) -> Result<Candle, ExchangeError> {
    if row.len() < 6 {
        return Err(ExchangeError::decode(
            "kline",
            format!("expected at least 6 fields, got {}", row.len()),
        ));
    }

    let field = |i: usize| {
        parse_number(&row[i]).ok_or_else(|| ExchangeError::decode("kline", format!("field {}", i)))
    };

    let open_time = row[0]
        .as_i64()
        .ok_or_else(|| ExchangeError::decode("kline", "open time"))?;
    let timestamp = DateTime::from_timestamp_millis(open_time)
        .ok_or_else(|| ExchangeError::decode("kline", "open time out of range"))?;

    Ok(Candle {
        timestamp,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

fn decimals_for_step(step: f64) -> usize {
    if step >= 1.0 {
        0
    } else {
        (-step.log10()).round().max(0.0) as usize
    }
}

fn floor_to_step(amount: f64, step: f64) -> String {
    // Absorbs division error (0.3 / 0.1) without rounding a short amount up
    let ratio = amount / step;
    let steps = (ratio + ratio.abs() * 4.0 * f64::EPSILON).floor();
    format!("{:.*}", decimals_for_step(step), steps * step)
}

fn format_decimal(value: f64, max_decimals: usize) -> String {
    let s = format!("{:.*}", max_decimals, value);
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}
