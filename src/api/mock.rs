//! In-memory exchange for exercising the lifecycle without a network.

use super::ExchangeGateway;
use crate::error::ExchangeError;
use crate::models::{Balance, Candle, OrderReceipt, OrderSide, OrderSize, Ticker, TickerStats};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub side: OrderSide,
    pub symbol: String,
    pub size: OrderSize,
}

#[derive(Default)]
struct MockState {
    balance: Balance,
    prices: HashMap<String, f64>,
    closes: HashMap<String, Vec<f64>>,
    tickers: Vec<TickerStats>,
    failing_symbols: HashSet<String>,
    fail_balance: bool,
    fail_orders: bool,
    orders: Vec<PlacedOrder>,
    ohlcv_calls: Vec<String>,
}

pub struct MockExchange {
    state: Mutex<MockState>,
    quote_orders: bool,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            quote_orders: true,
        }
    }

    pub fn without_quote_orders(mut self) -> Self {
        self.quote_orders = false;
        self
    }

    pub fn with_balance(self, balance: Balance) -> Self {
        self.state.lock().unwrap().balance = balance;
        self
    }

    pub fn with_price(self, symbol: &str, price: f64) -> Self {
        self.state
            .lock()
            .unwrap()
            .prices
            .insert(symbol.to_string(), price);
        self
    }

    /// Candles whose closes follow `closes`; also lists the pair in tickers
    pub fn with_closes(self, symbol: &str, closes: Vec<f64>, quote_volume: f64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let last = closes.last().copied().unwrap_or(0.0);
            state.prices.entry(symbol.to_string()).or_insert(last);
            state.tickers.push(TickerStats {
                symbol: symbol.to_string(),
                last,
                quote_volume,
            });
            state.closes.insert(symbol.to_string(), closes);
        }
        self
    }

    pub fn failing_symbol(self, symbol: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_symbols
            .insert(symbol.to_string());
        self
    }

    pub fn failing_balance(self) -> Self {
        self.state.lock().unwrap().fail_balance = true;
        self
    }

    pub fn failing_orders(self) -> Self {
        self.set_fail_orders(true);
        self
    }

    pub fn set_fail_orders(&self, fail: bool) {
        self.state.lock().unwrap().fail_orders = fail;
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.state
            .lock()
            .unwrap()
            .prices
            .insert(symbol.to_string(), price);
    }

    pub fn orders(&self) -> Vec<PlacedOrder> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn ohlcv_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().ohlcv_calls.clone()
    }

    fn check_symbol(&self, state: &MockState, symbol: &str) -> Result<(), ExchangeError> {
        if state.failing_symbols.contains(symbol) {
            return Err(ExchangeError::Api {
                code: -1121,
                message: "Invalid symbol.".to_string(),
            });
        }
        Ok(())
    }

    fn place(
        &self,
        side: OrderSide,
        symbol: &str,
        size: OrderSize,
    ) -> Result<OrderReceipt, ExchangeError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_orders {
            return Err(ExchangeError::Api {
                code: -2010,
                message: "Account has insufficient balance for requested action.".to_string(),
            });
        }

        state.orders.push(PlacedOrder {
            side,
            symbol: symbol.to_string(),
            size,
        });

        Ok(OrderReceipt {
            order_id: state.orders.len().to_string(),
            symbol: symbol.to_string(),
            side,
            executed_qty: 0.0,
            quote_qty: 0.0,
            status: "FILLED".to_string(),
        })
    }
}

#[async_trait]
impl ExchangeGateway for MockExchange {
    async fn fetch_balance(&self) -> Result<Balance, ExchangeError> {
        let state = self.state.lock().unwrap();
        if state.fail_balance {
            return Err(ExchangeError::Status {
                status: 401,
                body: "unauthorized".to_string(),
            });
        }
        Ok(state.balance.clone())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let state = self.state.lock().unwrap();
        self.check_symbol(&state, symbol)?;
        let last = state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last,
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        _timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut state = self.state.lock().unwrap();
        state.ohlcv_calls.push(symbol.to_string());
        self.check_symbol(&state, symbol)?;

        let closes = state.closes.get(symbol).cloned().unwrap_or_default();
        let skip = closes.len().saturating_sub(limit);
        let start = Utc::now() - Duration::minutes(5 * closes.len() as i64);

        Ok(closes
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, &close)| Candle {
                timestamp: start + Duration::minutes(5 * i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            })
            .collect())
    }

    async fn fetch_tickers(&self) -> Result<Vec<TickerStats>, ExchangeError> {
        Ok(self.state.lock().unwrap().tickers.clone())
    }

    async fn create_market_buy_order(
        &self,
        symbol: &str,
        size: OrderSize,
    ) -> Result<OrderReceipt, ExchangeError> {
        self.place(OrderSide::Buy, symbol, size)
    }

    async fn create_market_sell_order(
        &self,
        symbol: &str,
        amount: f64,
    ) -> Result<OrderReceipt, ExchangeError> {
        self.place(OrderSide::Sell, symbol, OrderSize::Base(amount))
    }

    fn supports_quote_orders(&self) -> bool {
        self.quote_orders
    }
}
