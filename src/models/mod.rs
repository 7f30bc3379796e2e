use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// An open holding tracked by the bot
///
/// Field names on disk follow the legacy `posisi_multi.json` layout
/// (`symbol`, `buy_price`, `quantity`, `tp`, `sl`). Hand-edited records may
/// leave out the thresholds; they load as zero and are treated as unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub buy_price: f64,
    pub quantity: f64,
    #[serde(rename = "tp", default)]
    pub take_profit_price: f64,
    #[serde(rename = "sl", default)]
    pub stop_loss_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub origin: PositionOrigin,
}

impl Position {
    /// Amount paid for the position at its reference price
    pub fn invested(&self) -> f64 {
        self.buy_price * self.quantity
    }

    /// Unrealized P&L at the given price
    pub fn pnl(&self, current_price: f64) -> f64 {
        (current_price - self.buy_price) * self.quantity
    }

    /// Unrealized P&L in percent of the entry price
    pub fn pnl_pct(&self, current_price: f64) -> Option<f64> {
        if self.buy_price > 0.0 {
            Some((current_price - self.buy_price) / self.buy_price * 100.0)
        } else {
            None
        }
    }

    /// Base asset of the pair ("BTC" for "BTC/USDT")
    pub fn base_asset(&self) -> &str {
        split_symbol(&self.symbol).map(|(b, _)| b).unwrap_or(&self.symbol)
    }
}

/// How a position came to be tracked
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PositionOrigin {
    Signal,
    WalletSync,
    #[default]
    Manual,
}

/// OHLCV candle, oldest first when in a slice
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Entry classification produced by the signal evaluator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Wait,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Wait => write!(f, "WAIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TakeProfit => write!(f, "TP"),
            ExitReason::StopLoss => write!(f, "SL"),
        }
    }
}

/// Last traded price for a symbol
#[derive(Debug, Clone, PartialEq)]
pub struct Ticker {
    pub symbol: String,
    pub last: f64,
}

/// 24h statistics used for ranking candidates
#[derive(Debug, Clone, PartialEq)]
pub struct TickerStats {
    pub symbol: String,
    pub last: f64,
    pub quote_volume: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AssetBalance {
    pub free: f64,
    pub total: f64,
}

/// Balance snapshot keyed by asset code
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Balance {
    pub assets: HashMap<String, AssetBalance>,
}

impl Balance {
    pub fn free(&self, asset: &str) -> f64 {
        self.assets.get(asset).map(|b| b.free).unwrap_or(0.0)
    }

    pub fn total(&self, asset: &str) -> f64 {
        self.assets.get(asset).map(|b| b.total).unwrap_or(0.0)
    }

    pub fn with_asset(mut self, asset: &str, free: f64, total: f64) -> Self {
        self.assets
            .insert(asset.to_string(), AssetBalance { free, total });
        self
    }
}

/// Market buy sizing
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderSize {
    /// Spend this much quote currency
    Quote(f64),
    /// Buy this much base asset
    Base(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// What the exchange reported back for a submitted order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReceipt {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub executed_qty: f64,
    pub quote_qty: f64,
    pub status: String,
}

/// Split a unified "BASE/QUOTE" symbol
pub fn split_symbol(symbol: &str) -> Option<(&str, &str)> {
    let (base, quote) = symbol.split_once('/')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    Some((base, quote))
}

pub fn pair_symbol(base: &str, quote: &str) -> String {
    format!("{}/{}", base, quote)
}
