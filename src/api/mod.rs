pub mod spot;

#[cfg(test)]
pub mod mock;

pub use spot::{SpotClient, SpotConfig};

use crate::error::ExchangeError;
use crate::models::{Balance, Candle, OrderReceipt, OrderSize, Ticker, TickerStats};
use async_trait::async_trait;

/// Everything the bot needs from an exchange
///
/// Symbols are unified `BASE/QUOTE` strings. Any failure is reported as an
/// [`ExchangeError`]; callers treat it as "try again next cycle".
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn fetch_balance(&self) -> Result<Balance, ExchangeError>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError>;

    /// Recent candles, oldest first
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// 24h stats for every listed pair
    async fn fetch_tickers(&self) -> Result<Vec<TickerStats>, ExchangeError>;

    async fn create_market_buy_order(
        &self,
        symbol: &str,
        size: OrderSize,
    ) -> Result<OrderReceipt, ExchangeError>;

    async fn create_market_sell_order(
        &self,
        symbol: &str,
        amount: f64,
    ) -> Result<OrderReceipt, ExchangeError>;

    /// Whether market buys can be sized in quote currency
    fn supports_quote_orders(&self) -> bool {
        true
    }
}
