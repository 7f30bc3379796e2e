use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Buy,
    Sell,
    SimulatedBuy,
    SimulatedSell,
    Import,
    Error,
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventAction::Buy => "BUY",
            EventAction::Sell => "SOLD",
            EventAction::SimulatedBuy => "SIM BUY",
            EventAction::SimulatedSell => "SIM SOLD",
            EventAction::Import => "IMPORT",
            EventAction::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// One human-readable line in the activity log
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub action: EventAction,
    pub detail: String,
}

impl TradeEvent {
    pub fn new(symbol: &str, action: EventAction, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            action,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp.format("%H:%M:%S"),
            self.action,
            self.symbol
        )?;
        if !self.detail.is_empty() {
            write!(f, " ({})", self.detail)?;
        }
        Ok(())
    }
}

/// Recent events, newest first, capped at a fixed count
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<TradeEvent>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add an event, dropping the oldest when full
    pub fn push(&mut self, event: TradeEvent) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push_front(event);
        self.entries.truncate(self.capacity);
    }

    pub fn record(&mut self, symbol: &str, action: EventAction, detail: impl Into<String>) {
        self.push(TradeEvent::new(symbol, action, detail));
    }

    /// Newest first
    pub fn recent(&self) -> impl Iterator<Item = &TradeEvent> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(50)
    }
}
