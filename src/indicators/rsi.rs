/// Calculate Relative Strength Index (RSI) with Wilder smoothing
///
/// The first average gain/loss is the simple mean of the first `period`
/// price changes; every later change is folded in as
/// `avg = (prev_avg * (period - 1) + change) / period`.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// Returns `None` until there are `period` changes, i.e. `period + 1` prices.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    calculate_rsi_series(prices, period).last().copied().flatten()
}

/// RSI for every price in `prices`, `None` during warmup
pub fn calculate_rsi_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; prices.len()];
    if period == 0 || prices.len() < period + 1 {
        return series;
    }

    let mut gains = Vec::with_capacity(prices.len() - 1);
    let mut losses = Vec::with_capacity(prices.len() - 1);

    for window in prices.windows(2) {
        let change = window[1] - window[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut avg_gain: f64 = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss: f64 = losses[..period].iter().sum::<f64>() / period as f64;
    series[period] = Some(rsi_from_averages(avg_gain, avg_loss));

    let smoothing = (period - 1) as f64;
    for i in period..gains.len() {
        avg_gain = (avg_gain * smoothing + gains[i]) / period as f64;
        avg_loss = (avg_loss * smoothing + losses[i]) / period as f64;
        // change i sits between price i and i + 1
        series[i + 1] = Some(rsi_from_averages(avg_gain, avg_loss));
    }

    series
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        // Flat window has no momentum either way
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }

    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}
