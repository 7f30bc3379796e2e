use std::collections::HashMap;

use crate::api::ExchangeGateway;
use crate::models::{Balance, Position};
use crate::persistence::PositionStore;

/// A position priced at the latest ticker
#[derive(Debug, Clone, PartialEq)]
pub struct PositionView {
    pub position: Position,
    /// `None` when no price could be fetched
    pub current_price: Option<f64>,
    pub value: Option<f64>,
    pub invested: f64,
    pub pnl: Option<f64>,
    pub pnl_pct: Option<f64>,
    /// Where the price sits between stop loss (0.0) and take profit (1.0)
    pub progress: Option<f64>,
}

impl PositionView {
    pub fn new(position: Position, current_price: Option<f64>) -> Self {
        let invested = position.invested();
        let value = current_price.map(|p| p * position.quantity);
        let pnl = current_price.map(|p| position.pnl(p));
        let pnl_pct = current_price.and_then(|p| position.pnl_pct(p));
        let progress = current_price.and_then(|p| target_progress(&position, p));

        Self {
            position,
            current_price,
            value,
            invested,
            pnl,
            pnl_pct,
            progress,
        }
    }
}

/// Fraction of the way from stop loss to take profit, clamped to [0, 1]
///
/// `None` when either threshold is unset or they are inverted.
pub fn target_progress(position: &Position, price: f64) -> Option<f64> {
    let (tp, sl) = (position.take_profit_price, position.stop_loss_price);
    if !(tp > 0.0 && sl > 0.0 && tp > sl) || !price.is_finite() {
        return None;
    }
    Some(((price - sl) / (tp - sl)).clamp(0.0, 1.0))
}

/// Balances plus every open position at current prices
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSnapshot {
    pub quote_currency: String,
    pub free_quote: f64,
    pub total_quote: f64,
    pub positions: Vec<PositionView>,
    pub max_slots: usize,
}

impl PortfolioSnapshot {
    pub fn build(
        quote_currency: &str,
        balance: &Balance,
        positions: Vec<Position>,
        prices: &HashMap<String, f64>,
        max_slots: usize,
    ) -> Self {
        let positions = positions
            .into_iter()
            .map(|p| {
                let price = prices.get(&p.symbol).copied();
                PositionView::new(p, price)
            })
            .collect();

        Self {
            quote_currency: quote_currency.to_string(),
            free_quote: balance.free(quote_currency),
            total_quote: balance.total(quote_currency),
            positions,
            max_slots,
        }
    }

    /// Fetch balance and a ticker per position; failures leave zeros or `None`
    pub async fn fetch<G>(
        gateway: &G,
        store: &PositionStore,
        quote_currency: &str,
        max_slots: usize,
    ) -> Self
    where
        G: ExchangeGateway + ?Sized,
    {
        let balance = match gateway.fetch_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!("⚠️  Balance unavailable: {}", e);
                Balance::default()
            }
        };

        let positions = store.load();
        let mut prices = HashMap::new();
        for position in &positions {
            match gateway.fetch_ticker(&position.symbol).await {
                Ok(ticker) => {
                    prices.insert(position.symbol.clone(), ticker.last);
                }
                Err(e) => tracing::warn!("No price for {}: {}", position.symbol, e),
            }
        }

        Self::build(quote_currency, &balance, positions, &prices, max_slots)
    }

    pub fn slots_used(&self) -> usize {
        self.positions.len()
    }

    /// Market value of positions with a known price
    pub fn positions_value(&self) -> f64 {
        self.positions.iter().filter_map(|v| v.value).sum()
    }

    /// Free quote balance plus the market value of open positions
    pub fn equity(&self) -> f64 {
        self.free_quote + self.positions_value()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions.iter().filter_map(|v| v.pnl).sum()
    }
}
