// Trading strategy module
pub mod rsi_threshold;

pub use rsi_threshold::RsiThresholdStrategy;

use crate::models::{Candle, Signal};

/// One evaluated candidate
#[derive(Debug, Clone, PartialEq)]
pub struct SignalReading {
    pub symbol: String,
    /// Close of the latest candle
    pub price: f64,
    pub rsi: f64,
    pub signal: Signal,
}

/// Base trait for entry strategies
pub trait Strategy: Send + Sync {
    /// Classify a symbol from its recent candles
    ///
    /// `None` means there is not enough usable data for a reading.
    fn evaluate(&self, symbol: &str, candles: &[Candle]) -> Option<SignalReading>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}
