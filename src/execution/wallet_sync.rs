use chrono::Utc;
use std::collections::HashSet;

use super::event_log::{EventAction, EventLog};
use super::executor::exit_targets;
use crate::api::ExchangeGateway;
use crate::config::SyncSettings;
use crate::error::BotError;
use crate::models::{pair_symbol, Balance, Position, PositionOrigin};
use crate::persistence::PositionStore;

/// Import rules for untracked wallet holdings
#[derive(Debug, Clone)]
pub struct SyncParams {
    pub quote_currency: String,
    /// Holdings worth this much or less are left alone
    pub min_value: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub ignored_assets: Vec<String>,
}

impl SyncParams {
    pub fn from_settings(quote_currency: &str, settings: &SyncSettings) -> Self {
        Self {
            quote_currency: quote_currency.to_string(),
            min_value: settings.min_value,
            take_profit_pct: settings.take_profit_pct,
            stop_loss_pct: settings.stop_loss_pct,
            ignored_assets: settings.ignored_assets.clone(),
        }
    }

    fn ignores(&self, asset: &str) -> bool {
        asset.eq_ignore_ascii_case(&self.quote_currency)
            || self
                .ignored_assets
                .iter()
                .any(|a| a.eq_ignore_ascii_case(asset))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub imported: Vec<Position>,
    /// Assets with a balance that were not imported, with the reason
    pub skipped: Vec<(String, String)>,
}

/// Fetch the wallet and import untracked holdings
pub async fn sync_wallet<G>(
    gateway: &G,
    store: &PositionStore,
    params: &SyncParams,
    log: &mut EventLog,
) -> Result<SyncReport, BotError>
where
    G: ExchangeGateway + ?Sized,
{
    let balance = gateway.fetch_balance().await?;
    import_holdings(gateway, store, &balance, params, log).await
}

/// Track every holding worth more than `min_value` that has no position yet
///
/// The price seen now becomes the entry price. Assets without a market in
/// the quote currency are skipped. The store is written once, and only if
/// something was imported.
pub async fn import_holdings<G>(
    gateway: &G,
    store: &PositionStore,
    balance: &Balance,
    params: &SyncParams,
    log: &mut EventLog,
) -> Result<SyncReport, BotError>
where
    G: ExchangeGateway + ?Sized,
{
    let mut positions = store.load();
    let mut tracked: HashSet<String> = positions.iter().map(|p| p.symbol.clone()).collect();
    let mut report = SyncReport::default();

    let mut assets: Vec<(&String, f64)> = balance
        .assets
        .iter()
        .map(|(asset, b)| (asset, b.total))
        .filter(|(asset, amount)| *amount > 0.0 && !params.ignores(asset))
        .collect();
    assets.sort_by(|a, b| a.0.cmp(b.0));

    for (asset, amount) in assets {
        let symbol = pair_symbol(asset, &params.quote_currency);
        if tracked.contains(&symbol) {
            continue;
        }

        let price = match gateway.fetch_ticker(&symbol).await {
            Ok(ticker) => ticker.last,
            Err(e) => {
                tracing::debug!("No market for {}: {}", symbol, e);
                report.skipped.push((asset.clone(), format!("no market: {}", e)));
                continue;
            }
        };

        let value = amount * price;
        if !(value > params.min_value) {
            report.skipped.push((
                asset.clone(),
                format!("worth {:.2} {}", value, params.quote_currency),
            ));
            continue;
        }

        let (take_profit_price, stop_loss_price) =
            exit_targets(price, params.take_profit_pct, params.stop_loss_pct);
        let position = Position {
            symbol: symbol.clone(),
            buy_price: price,
            quantity: amount,
            take_profit_price,
            stop_loss_price,
            opened_at: Some(Utc::now()),
            origin: PositionOrigin::WalletSync,
        };

        tracing::info!(
            "📥 Imported {} | qty {:.8} @ ${:.6} (worth ${:.2})",
            symbol,
            amount,
            price,
            value
        );
        log.record(&symbol, EventAction::Import, format!("{:.8} @ {}", amount, price));

        tracked.insert(symbol);
        positions.push(position.clone());
        report.imported.push(position);
    }

    if !report.imported.is_empty() {
        store.save(&positions)?;
    }

    Ok(report)
}
