use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::event_log::{EventAction, EventLog};
use super::executor::{check_capacity, evaluate_exit, plan_entry, EntryParams, EntrySkip};
use crate::api::ExchangeGateway;
use crate::config::TradingSettings;
use crate::discovery::{rank_candidates, RankingFilter};
use crate::models::{Balance, ExitReason, Position, Signal};
use crate::persistence::PositionStore;
use crate::strategy::{RsiThresholdStrategy, SignalReading};

/// Where in a cycle something went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Balance,
    Price,
    Sell,
    Tickers,
    Candles,
    Buy,
    Store,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            CycleStage::Balance => "balance",
            CycleStage::Price => "price",
            CycleStage::Sell => "sell",
            CycleStage::Tickers => "tickers",
            CycleStage::Candles => "candles",
            CycleStage::Buy => "buy",
            CycleStage::Store => "store",
        };
        f.write_str(stage)
    }
}

/// A non-fatal failure inside one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleError {
    pub stage: CycleStage,
    pub symbol: Option<String>,
    pub message: String,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbol {
            Some(symbol) => write!(f, "{} {}: {}", self.stage, symbol, self.message),
            None => write!(f, "{}: {}", self.stage, self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub position: Position,
    pub exit_price: f64,
    pub reason: ExitReason,
    pub simulated: bool,
}

impl ClosedTrade {
    pub fn pnl(&self) -> f64 {
        self.position.pnl(self.exit_price)
    }
}

/// What one cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Balance fetched at cycle start (empty when the fetch failed)
    pub balance: Balance,
    pub closed: Vec<ClosedTrade>,
    pub opened: Option<Position>,
    /// Candidates evaluated by the signal strategy
    pub scanned: usize,
    pub errors: Vec<CycleError>,
    pub skipped_open_reason: Option<EntrySkip>,
    /// Last prices seen this cycle, by symbol
    pub prices: HashMap<String, f64>,
}

impl CycleReport {
    fn record_error(&mut self, stage: CycleStage, symbol: Option<&str>, message: impl ToString) {
        self.errors.push(CycleError {
            stage,
            symbol: symbol.map(str::to_string),
            message: message.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Knobs for one controller, usually taken from [`TradingSettings`]
#[derive(Debug, Clone)]
pub struct CycleParams {
    pub quote_currency: String,
    pub entry: EntryParams,
    pub max_slots: usize,
    pub live: bool,
    pub ranking: RankingFilter,
}

impl CycleParams {
    pub fn from_settings(settings: &TradingSettings) -> Self {
        Self {
            quote_currency: settings.quote_currency.clone(),
            entry: EntryParams::from_settings(settings),
            max_slots: settings.max_slots,
            live: settings.live,
            ranking: RankingFilter {
                quote_currency: settings.quote_currency.clone(),
                excluded_bases: settings.excluded_bases.clone(),
                max_candidates: settings.max_candidates,
            },
        }
    }
}

/// A store change for an order the exchange already filled
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Remove(String),
    Append(Position),
}

impl PendingWrite {
    fn symbol(&self) -> &str {
        match self {
            PendingWrite::Remove(symbol) => symbol,
            PendingWrite::Append(position) => &position.symbol,
        }
    }
}

/// Position lifecycle controller
///
/// One call to [`run_cycle`](Self::run_cycle) closes whatever crossed its
/// thresholds, then opens at most one new position. The store is the only
/// state, except for writes that failed after a live fill: those are kept in
/// memory and replayed first thing every cycle, and no live order goes out
/// while any remain.
pub struct PositionManager {
    store: PositionStore,
    strategy: RsiThresholdStrategy,
    params: CycleParams,
    pending: Vec<PendingWrite>,
}

impl PositionManager {
    pub fn new(store: PositionStore, strategy: RsiThresholdStrategy, params: CycleParams) -> Self {
        Self {
            store,
            strategy,
            params,
            pending: Vec::new(),
        }
    }

    pub fn from_settings(store: PositionStore, settings: &TradingSettings) -> Self {
        let strategy = RsiThresholdStrategy::new(settings.rsi_limit)
            .with_period(settings.rsi_period)
            .with_timeframe(settings.timeframe.clone())
            .with_candle_limit(settings.candle_limit);

        Self::new(store, strategy, CycleParams::from_settings(settings))
    }

    pub fn store(&self) -> &PositionStore {
        &self.store
    }

    pub fn strategy(&self) -> &RsiThresholdStrategy {
        &self.strategy
    }

    pub fn params(&self) -> &CycleParams {
        &self.params
    }

    pub fn is_live(&self) -> bool {
        self.params.live
    }

    /// Store writes still owed for filled orders
    pub fn pending_writes(&self) -> &[PendingWrite] {
        &self.pending
    }

    /// Live orders are held back until every pending write lands
    pub fn is_halted(&self) -> bool {
        self.params.live && !self.pending.is_empty()
    }

    /// Close evaluation for every position, then open evaluation
    ///
    /// Never fails: gateway and store errors land in the report and the
    /// event log, and the affected symbol is retried next cycle.
    pub async fn run_cycle<G>(&mut self, gateway: &G, log: &mut EventLog) -> CycleReport
    where
        G: ExchangeGateway + ?Sized,
    {
        let mut report = CycleReport::default();

        match gateway.fetch_balance().await {
            Ok(balance) => report.balance = balance,
            Err(e) => {
                tracing::warn!("⚠️  Balance unavailable, no opens this cycle: {}", e);
                report.record_error(CycleStage::Balance, None, &e);
            }
        }

        self.replay_pending(&mut report);
        if self.is_halted() {
            tracing::error!(
                "🛑 {} store writes pending, live orders halted",
                self.pending.len()
            );
            report.record_error(
                CycleStage::Store,
                None,
                format!("{} writes pending, live orders halted", self.pending.len()),
            );
            return report;
        }

        self.evaluate_exits(gateway, log, &mut report).await;
        self.evaluate_entry(gateway, log, &mut report).await;

        tracing::debug!(
            closed = report.closed.len(),
            opened = report.opened.is_some(),
            scanned = report.scanned,
            errors = report.errors.len(),
            "Cycle complete"
        );

        report
    }

    fn replay_pending(&mut self, report: &mut CycleReport) {
        let pending = std::mem::take(&mut self.pending);

        for write in pending {
            let result = match &write {
                PendingWrite::Remove(symbol) => self.store.remove(symbol).map(|_| ()),
                PendingWrite::Append(position) if self.store.contains(&position.symbol) => Ok(()),
                PendingWrite::Append(position) => self.store.append(position.clone()),
            };

            match result {
                Ok(()) => tracing::info!("💾 Store caught up on {}", write.symbol()),
                Err(e) => {
                    report.record_error(CycleStage::Store, Some(write.symbol()), &e);
                    self.pending.push(write);
                }
            }
        }
    }

    async fn evaluate_exits<G>(&mut self, gateway: &G, log: &mut EventLog, report: &mut CycleReport)
    where
        G: ExchangeGateway + ?Sized,
    {
        for position in self.store.load() {
            if self.is_halted() {
                return;
            }

            let price = match gateway.fetch_ticker(&position.symbol).await {
                Ok(ticker) => ticker.last,
                Err(e) => {
                    tracing::warn!("Skipping {} this cycle: {}", position.symbol, e);
                    report.record_error(CycleStage::Price, Some(&position.symbol), &e);
                    continue;
                }
            };
            report.prices.insert(position.symbol.clone(), price);

            let Some(reason) = evaluate_exit(&position, price) else {
                continue;
            };

            self.close_position(gateway, log, report, position, price, reason)
                .await;
        }
    }

    async fn close_position<G>(
        &mut self,
        gateway: &G,
        log: &mut EventLog,
        report: &mut CycleReport,
        position: Position,
        price: f64,
        reason: ExitReason,
    ) where
        G: ExchangeGateway + ?Sized,
    {
        let symbol = position.symbol.clone();

        if self.params.live {
            if let Err(e) = gateway
                .create_market_sell_order(&symbol, position.quantity)
                .await
            {
                tracing::error!("❌ Sell {} ({}) failed: {}", symbol, reason, e);
                log.record(&symbol, EventAction::Error, format!("sell failed: {}", e));
                report.record_error(CycleStage::Sell, Some(&symbol), &e);
                return;
            }
        }

        if let Err(e) = self.store.remove(&symbol) {
            tracing::error!("❌ Could not remove {} from store: {}", symbol, e);
            report.record_error(CycleStage::Store, Some(&symbol), &e);
            if self.params.live {
                self.pending.push(PendingWrite::Remove(symbol.clone()));
            }
        }

        let action = if self.params.live {
            EventAction::Sell
        } else {
            EventAction::SimulatedSell
        };
        log.record(&symbol, action, reason.to_string());

        let trade = ClosedTrade {
            position,
            exit_price: price,
            reason,
            simulated: !self.params.live,
        };

        tracing::info!(
            "💰 {} {} @ ${:.6} ({}) | P&L: ${:.4}",
            action,
            symbol,
            price,
            reason,
            trade.pnl()
        );

        report.closed.push(trade);
    }

    async fn evaluate_entry<G>(&mut self, gateway: &G, log: &mut EventLog, report: &mut CycleReport)
    where
        G: ExchangeGateway + ?Sized,
    {
        if self.is_halted() {
            return;
        }

        let positions = self.store.load();
        let free = report.balance.free(&self.params.quote_currency);

        if let Err(skip) = check_capacity(
            positions.len(),
            self.params.max_slots,
            free,
            self.params.entry.allocation,
        ) {
            tracing::debug!("No open this cycle: {}", skip);
            report.skipped_open_reason = Some(skip);
            return;
        }

        let candidates = match self.candidates(gateway, &positions).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("⚠️  Candidate scan unavailable: {}", e);
                report.record_error(CycleStage::Tickers, None, &e);
                return;
            }
        };

        for symbol in candidates {
            report.scanned += 1;
            let analysis = self.strategy.analyze(gateway, &symbol).await;
            match analysis {
                Ok(Some(reading)) if reading.signal == Signal::Buy => {
                    self.open_position(gateway, log, report, &reading).await;
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Skipping candidate {}: {}", symbol, e);
                    report.record_error(CycleStage::Candles, Some(&symbol), &e);
                }
            }
        }
    }

    async fn open_position<G>(
        &mut self,
        gateway: &G,
        log: &mut EventLog,
        report: &mut CycleReport,
        reading: &SignalReading,
    ) where
        G: ExchangeGateway + ?Sized,
    {
        let symbol = reading.symbol.as_str();
        let Some(plan) = plan_entry(
            symbol,
            reading.price,
            &self.params.entry,
            gateway.supports_quote_orders(),
        ) else {
            report.record_error(
                CycleStage::Buy,
                Some(symbol),
                format!("unusable price {}", reading.price),
            );
            return;
        };

        if self.params.live {
            if let Err(e) = gateway.create_market_buy_order(symbol, plan.order).await {
                tracing::error!("❌ Buy {} failed: {}", symbol, e);
                log.record(symbol, EventAction::Error, format!("buy failed: {}", e));
                report.record_error(CycleStage::Buy, Some(symbol), &e);
                return;
            }
        }

        let position = plan.into_position(Utc::now());
        if let Err(e) = self.store.append(position.clone()) {
            tracing::error!("❌ Could not save {} to store: {}", symbol, e);
            report.record_error(CycleStage::Store, Some(symbol), &e);
            if self.params.live {
                self.pending.push(PendingWrite::Append(position.clone()));
            }
        }

        let action = if self.params.live {
            EventAction::Buy
        } else {
            EventAction::SimulatedBuy
        };
        log.record(symbol, action, format!("RSI {:.1}", reading.rsi));

        tracing::info!(
            "✅ {} {} @ ${:.6} | qty {:.8} | TP ${:.6} | SL ${:.6} | RSI {:.1}",
            action,
            symbol,
            position.buy_price,
            position.quantity,
            position.take_profit_price,
            position.stop_loss_price,
            reading.rsi
        );

        report.prices.insert(position.symbol.clone(), position.buy_price);
        report.opened = Some(position);
    }

    async fn candidates<G>(
        &self,
        gateway: &G,
        positions: &[Position],
    ) -> Result<Vec<String>, crate::ExchangeError>
    where
        G: ExchangeGateway + ?Sized,
    {
        let tickers = gateway.fetch_tickers().await?;
        let held: HashSet<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        Ok(rank_candidates(&tickers, &self.params.ranking, &held))
    }

    /// Readings for every ranked candidate, without trading
    pub async fn scan<G>(&self, gateway: &G) -> Result<Vec<SignalReading>, crate::ExchangeError>
    where
        G: ExchangeGateway + ?Sized,
    {
        let positions = self.store.load();
        let mut readings = Vec::new();

        for symbol in self.candidates(gateway, &positions).await? {
            match self.strategy.analyze(gateway, &symbol).await {
                Ok(Some(reading)) => readings.push(reading),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping candidate {}: {}", symbol, e),
            }
        }

        Ok(readings)
    }
}
