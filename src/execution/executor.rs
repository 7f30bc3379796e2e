use std::fmt;

use chrono::{DateTime, Utc};

use crate::config::TradingSettings;
use crate::models::{ExitReason, OrderSize, Position, PositionOrigin};

/// Check a position against its exit thresholds
///
/// Take profit wins over stop loss. A threshold of zero or less counts as
/// unset (hand-edited records) and never fires.
pub fn evaluate_exit(position: &Position, current_price: f64) -> Option<ExitReason> {
    if !current_price.is_finite() {
        return None;
    }

    if position.take_profit_price > 0.0 && current_price >= position.take_profit_price {
        return Some(ExitReason::TakeProfit);
    }

    if position.stop_loss_price > 0.0 && current_price <= position.stop_loss_price {
        return Some(ExitReason::StopLoss);
    }

    None
}

/// Take-profit and stop-loss prices around an entry
pub fn exit_targets(price: f64, take_profit_pct: f64, stop_loss_pct: f64) -> (f64, f64) {
    (
        price * (1.0 + take_profit_pct / 100.0),
        price * (1.0 - stop_loss_pct / 100.0),
    )
}

/// Sizing inputs for a new position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryParams {
    /// Quote currency spent per slot
    pub allocation: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    /// Haircut on the bought quantity for fees and slippage
    pub safety_factor: f64,
}

impl EntryParams {
    pub fn from_settings(settings: &TradingSettings) -> Self {
        Self {
            allocation: settings.allocation_per_slot,
            take_profit_pct: settings.take_profit_pct,
            stop_loss_pct: settings.stop_loss_pct,
            safety_factor: settings.safety_factor,
        }
    }
}

/// Everything needed to submit and record a buy
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPlan {
    pub symbol: String,
    pub price: f64,
    /// Expected base amount after fees
    pub quantity: f64,
    pub take_profit_price: f64,
    pub stop_loss_price: f64,
    pub order: OrderSize,
}

impl EntryPlan {
    pub fn into_position(self, opened_at: DateTime<Utc>) -> Position {
        Position {
            symbol: self.symbol,
            buy_price: self.price,
            quantity: self.quantity,
            take_profit_price: self.take_profit_price,
            stop_loss_price: self.stop_loss_price,
            opened_at: Some(opened_at),
            origin: PositionOrigin::Signal,
        }
    }
}

/// Size a buy at `price`
///
/// The market order spends the allocation in quote currency when the
/// exchange allows it, otherwise it asks for the estimated base quantity.
/// Returns `None` for a non-positive or non-finite price.
pub fn plan_entry(
    symbol: &str,
    price: f64,
    params: &EntryParams,
    quote_orders: bool,
) -> Option<EntryPlan> {
    if !(price > 0.0) || !price.is_finite() {
        return None;
    }

    let quantity = (params.allocation / price) * params.safety_factor;
    let (take_profit_price, stop_loss_price) =
        exit_targets(price, params.take_profit_pct, params.stop_loss_pct);

    let order = if quote_orders {
        OrderSize::Quote(params.allocation)
    } else {
        OrderSize::Base(quantity)
    };

    Some(EntryPlan {
        symbol: symbol.to_string(),
        price,
        quantity,
        take_profit_price,
        stop_loss_price,
        order,
    })
}

/// Why no new position was considered this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum EntrySkip {
    SlotsFull { open: usize, max: usize },
    InsufficientBalance { free: f64, required: f64 },
}

impl fmt::Display for EntrySkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntrySkip::SlotsFull { open, max } => write!(f, "Slots full ({}/{})", open, max),
            EntrySkip::InsufficientBalance { free, required } => write!(
                f,
                "Balance too low for a new slot ({:.2} < {:.2})",
                free, required
            ),
        }
    }
}

/// Gate for opening: a free slot and enough quote balance for one allocation
pub fn check_capacity(
    open_positions: usize,
    max_slots: usize,
    free_balance: f64,
    allocation: f64,
) -> Result<(), EntrySkip> {
    if open_positions >= max_slots {
        return Err(EntrySkip::SlotsFull {
            open: open_positions,
            max: max_slots,
        });
    }

    if !(free_balance >= allocation) {
        return Err(EntrySkip::InsufficientBalance {
            free: free_balance,
            required: allocation,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(buy_price: f64, take_profit_price: f64, stop_loss_price: f64) -> Position {
        Position {
            symbol: "SOL/USDT".to_string(),
            buy_price,
            quantity: 1.0,
            take_profit_price,
            stop_loss_price,
            opened_at: None,
            origin: PositionOrigin::Signal,
        }
    }

    fn params() -> EntryParams {
        EntryParams {
            allocation: 11.0,
            take_profit_pct: 1.5,
            stop_loss_pct: 2.0,
            safety_factor: 0.998,
        }
    }

    #[test]
    fn test_take_profit_triggered() {
        let pos = position(100.0, 101.5, 98.0);
        assert_eq!(evaluate_exit(&pos, 101.6), Some(ExitReason::TakeProfit));
        assert_eq!(evaluate_exit(&pos, 101.5), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn test_stop_loss_triggered() {
        let pos = position(100.0, 101.5, 98.0);
        assert_eq!(evaluate_exit(&pos, 98.0), Some(ExitReason::StopLoss));
        assert_eq!(evaluate_exit(&pos, 50.0), Some(ExitReason::StopLoss));
    }

    #[test]
    fn test_hold_between_thresholds() {
        let pos = position(100.0, 101.5, 98.0);
        assert_eq!(evaluate_exit(&pos, 100.0), None);
        assert_eq!(evaluate_exit(&pos, 101.49), None);
        assert_eq!(evaluate_exit(&pos, 98.01), None);
        assert_eq!(evaluate_exit(&pos, f64::NAN), None);
    }

    #[test]
    fn test_take_profit_is_monotonic() {
        let pos = position(100.0, 101.5, 98.0);
        for i in 0..1000 {
            let price = 101.5 + i as f64 * 0.37;
            assert_eq!(evaluate_exit(&pos, price), Some(ExitReason::TakeProfit));
        }
    }

    #[test]
    fn test_unset_thresholds_never_fire() {
        let pos = position(100.0, 0.0, 0.0);
        assert_eq!(evaluate_exit(&pos, 0.0001), None);
        assert_eq!(evaluate_exit(&pos, 1_000_000.0), None);

        // Inverted record only fires on the threshold that makes sense
        let pos = position(100.0, 0.0, 98.0);
        assert_eq!(evaluate_exit(&pos, 97.0), Some(ExitReason::StopLoss));
    }

    #[test]
    fn test_plan_entry_sizing() {
        let plan = plan_entry("ETH/USDT", 2000.0, &params(), true).unwrap();
        assert!((plan.quantity - 11.0 / 2000.0 * 0.998).abs() < 1e-12);
        assert!((plan.take_profit_price - 2030.0).abs() < 1e-9);
        assert!((plan.stop_loss_price - 1960.0).abs() < 1e-9);
        assert_eq!(plan.order, OrderSize::Quote(11.0));

        let plan = plan_entry("ETH/USDT", 2000.0, &params(), false).unwrap();
        assert_eq!(plan.order, OrderSize::Base(plan.quantity));
    }

    #[test]
    fn test_plan_entry_orders_thresholds() {
        for &price in &[0.00001234, 0.5, 1.0, 42.0, 65000.0] {
            for &(tp, sl) in &[(0.1, 0.1), (1.5, 2.0), (10.0, 50.0), (200.0, 99.0)] {
                let p = EntryParams {
                    take_profit_pct: tp,
                    stop_loss_pct: sl,
                    ..params()
                };
                let pos = plan_entry("X/USDT", price, &p, true)
                    .unwrap()
                    .into_position(Utc::now());
                assert!(pos.stop_loss_price < pos.buy_price);
                assert!(pos.buy_price < pos.take_profit_price);
                assert_eq!(pos.origin, PositionOrigin::Signal);
            }
        }
    }

    #[test]
    fn test_plan_entry_rejects_bad_price() {
        assert!(plan_entry("X/USDT", 0.0, &params(), true).is_none());
        assert!(plan_entry("X/USDT", -1.0, &params(), true).is_none());
        assert!(plan_entry("X/USDT", f64::INFINITY, &params(), true).is_none());
    }

    #[test]
    fn test_capacity_gate() {
        assert!(check_capacity(0, 3, 11.0, 11.0).is_ok());
        assert_eq!(
            check_capacity(3, 3, 100.0, 11.0),
            Err(EntrySkip::SlotsFull { open: 3, max: 3 })
        );
        assert_eq!(
            check_capacity(0, 3, 10.0, 11.0),
            Err(EntrySkip::InsufficientBalance {
                free: 10.0,
                required: 11.0
            })
        );
        let skip = check_capacity(0, 3, 10.0, 11.0).unwrap_err();
        assert!(skip.to_string().contains("Balance too low"));
    }
}
