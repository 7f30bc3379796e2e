use super::{SignalReading, Strategy};
use crate::api::ExchangeGateway;
use crate::error::ExchangeError;
use crate::indicators::calculate_rsi;
use crate::models::{Candle, Signal};

/// Buy when RSI drops below a fixed limit
///
/// Classification is `Buy` only when the latest RSI is strictly below
/// `rsi_limit`; everything else is `Wait`.
#[derive(Debug, Clone)]
pub struct RsiThresholdStrategy {
    pub period: usize,
    pub rsi_limit: f64,
    pub timeframe: String,
    pub candle_limit: usize,
}

impl RsiThresholdStrategy {
    pub fn new(rsi_limit: f64) -> Self {
        Self {
            rsi_limit,
            ..Self::default()
        }
    }

    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = timeframe.into();
        self
    }

    pub fn with_period(mut self, period: usize) -> Self {
        self.period = period;
        self
    }

    pub fn with_candle_limit(mut self, candle_limit: usize) -> Self {
        self.candle_limit = candle_limit;
        self
    }

    pub fn classify(&self, rsi: f64) -> Signal {
        if rsi < self.rsi_limit {
            Signal::Buy
        } else {
            Signal::Wait
        }
    }

    /// Fetch candles for `symbol` and evaluate them
    ///
    /// Gateway failures come back as errors so the caller can skip the
    /// candidate; too little data is `Ok(None)`.
    pub async fn analyze<G>(
        &self,
        gateway: &G,
        symbol: &str,
    ) -> Result<Option<SignalReading>, ExchangeError>
    where
        G: ExchangeGateway + ?Sized,
    {
        let candles = gateway
            .fetch_ohlcv(symbol, &self.timeframe, self.candle_limit)
            .await?;
        let reading = self.evaluate(symbol, &candles);

        match &reading {
            Some(r) => tracing::debug!(
                symbol = %symbol,
                price = r.price,
                rsi = format!("{:.2}", r.rsi),
                signal = %r.signal,
                "Evaluated candidate"
            ),
            None => tracing::debug!(
                symbol = %symbol,
                candles = candles.len(),
                "Not enough candles for a reading"
            ),
        }

        Ok(reading)
    }
}

impl Default for RsiThresholdStrategy {
    fn default() -> Self {
        Self {
            period: 14,
            rsi_limit: 35.0,
            timeframe: "5m".to_string(),
            candle_limit: 50,
        }
    }
}

impl Strategy for RsiThresholdStrategy {
    fn evaluate(&self, symbol: &str, candles: &[Candle]) -> Option<SignalReading> {
        let closes: Vec<f64> = candles
            .iter()
            .map(|c| c.close)
            .filter(|c| c.is_finite())
            .collect();

        if closes.len() < self.min_candles_required() {
            return None;
        }

        let rsi = calculate_rsi(&closes, self.period)?;
        let price = *closes.last()?;

        Some(SignalReading {
            symbol: symbol.to_string(),
            price,
            rsi,
            signal: self.classify(rsi),
        })
    }

    fn name(&self) -> &str {
        "RsiThreshold"
    }

    fn min_candles_required(&self) -> usize {
        self.period + 1
    }
}
