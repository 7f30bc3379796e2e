use crate::models::{split_symbol, TickerStats};
use std::cmp::Ordering;
use std::collections::HashSet;

/// What makes a pair eligible for scanning
#[derive(Debug, Clone)]
pub struct RankingFilter {
    pub quote_currency: String,
    /// Stablecoin bases (USDC/USDT and friends never move enough to trade)
    pub excluded_bases: Vec<String>,
    pub max_candidates: usize,
}

/// Eligibility check for one pair
///
/// Returns (is_tradable, reason) tuple
pub fn is_tradable_pair(stats: &TickerStats, filter: &RankingFilter) -> (bool, String) {
    let Some((base, quote)) = split_symbol(&stats.symbol) else {
        return (false, format!("Malformed symbol {}", stats.symbol));
    };

    if quote != filter.quote_currency {
        return (false, format!("Quoted in {}", quote));
    }

    if filter
        .excluded_bases
        .iter()
        .any(|b| b.eq_ignore_ascii_case(base))
    {
        return (false, format!("Stablecoin base {}", base));
    }

    if !(stats.last > 0.0) || !stats.last.is_finite() {
        return (false, "InvalidData: price is invalid".to_string());
    }

    (true, format!("Volume {:.0} {}", stats.quote_volume, quote))
}

/// Liquid pairs, highest quote volume first
///
/// Held symbols are dropped before the list is cut to `max_candidates`.
/// Pairs with a missing or NaN volume sort last.
pub fn rank_candidates(
    tickers: &[TickerStats],
    filter: &RankingFilter,
    held: &HashSet<String>,
) -> Vec<String> {
    let mut eligible: Vec<&TickerStats> = tickers
        .iter()
        .filter(|t| !held.contains(&t.symbol))
        .filter(|t| {
            let (ok, reason) = is_tradable_pair(t, filter);
            if !ok {
                tracing::trace!("Skipping {}: {}", t.symbol, reason);
            }
            ok
        })
        .collect();

    eligible.sort_by(|a, b| compare_volume(b.quote_volume, a.quote_volume));

    eligible
        .into_iter()
        .take(filter.max_candidates)
        .map(|t| t.symbol.clone())
        .collect()
}

fn compare_volume(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(symbol: &str, quote_volume: f64) -> TickerStats {
        TickerStats {
            symbol: symbol.to_string(),
            last: 1.0,
            quote_volume,
        }
    }

    fn filter(max_candidates: usize) -> RankingFilter {
        RankingFilter {
            quote_currency: "USDT".to_string(),
            excluded_bases: vec!["USDC".to_string(), "FDUSD".to_string()],
            max_candidates,
        }
    }

    #[test]
    fn test_sorted_by_volume_descending() {
        let tickers = vec![
            stats("ETH/USDT", 500.0),
            stats("BTC/USDT", 900.0),
            stats("SOL/USDT", 700.0),
        ];

        let ranked = rank_candidates(&tickers, &filter(20), &HashSet::new());
        assert_eq!(ranked, vec!["BTC/USDT", "SOL/USDT", "ETH/USDT"]);
    }

    #[test]
    fn test_excludes_stablecoins_other_quotes_and_held() {
        let tickers = vec![
            stats("USDC/USDT", 10_000.0),
            stats("BTC/BIDR", 9_000.0),
            stats("BTC/USDT", 900.0),
            stats("ETH/USDT", 800.0),
            stats("SOL/USDT", 700.0),
        ];
        let held: HashSet<String> = ["ETH/USDT".to_string()].into_iter().collect();

        let ranked = rank_candidates(&tickers, &filter(20), &held);
        assert_eq!(ranked, vec!["BTC/USDT", "SOL/USDT"]);
    }

    #[test]
    fn test_capped_after_dropping_held() {
        let tickers: Vec<TickerStats> = (0..30)
            .map(|i| stats(&format!("C{}/USDT", i), 1000.0 - i as f64))
            .collect();
        let held: HashSet<String> = ["C0/USDT".to_string()].into_iter().collect();

        let ranked = rank_candidates(&tickers, &filter(5), &held);
        assert_eq!(ranked.len(), 5);
        assert_eq!(ranked[0], "C1/USDT");
        assert_eq!(ranked[4], "C5/USDT");
    }

    #[test]
    fn test_nan_volume_sorts_last() {
        let tickers = vec![stats("ABC/USDT", f64::NAN), stats("XYZ/USDT", 1.0)];
        let ranked = rank_candidates(&tickers, &filter(20), &HashSet::new());
        assert_eq!(ranked, vec!["XYZ/USDT", "ABC/USDT"]);
    }

    #[test]
    fn test_invalid_price_rejected() {
        let mut t = stats("BTC/USDT", 1.0);
        t.last = 0.0;
        let (ok, reason) = is_tradable_pair(&t, &filter(20));
        assert!(!ok);
        assert!(reason.contains("InvalidData"));
    }
}
