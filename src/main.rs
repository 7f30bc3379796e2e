use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use syncbot::api::{SpotClient, SpotConfig};
use syncbot::config::{Credentials, Settings};
use syncbot::execution::{
    sync_wallet, CycleReport, EventLog, PortfolioSnapshot, PositionManager, Session, SyncParams,
};
use syncbot::persistence::PositionStore;
use syncbot::Strategy;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Parser)]
#[command(name = "syncbot", version, about = "RSI entry / TP-SL exit spot bot")]
struct Cli {
    /// Settings file (defaults to ./syncbot.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// KEY=value file holding the API key and secret
    #[arg(long, global = true)]
    keys_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the exchange and manage positions
    Run {
        /// Submit real orders
        #[arg(long, conflicts_with = "simulate")]
        live: bool,

        /// Record trades without submitting orders
        #[arg(long)]
        simulate: bool,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Import wallet holdings that are not tracked yet
    Sync,
    /// Print RSI readings for the ranked candidates
    Scan,
    /// Print open positions at current prices
    Positions,
    /// Replace the position file with another one
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let store = PositionStore::new(&settings.store.path);

    match cli.command {
        Command::Run {
            live,
            simulate,
            once,
        } => {
            if live {
                settings.trading.live = true;
            } else if simulate {
                settings.trading.live = false;
            }
            let client = create_client(&settings, cli.keys_file.as_deref(), settings.trading.live)?;
            run(&settings, &client, store, once).await
        }
        Command::Sync => {
            let client = create_client(&settings, cli.keys_file.as_deref(), true)?;
            sync(&settings, &client, &store).await
        }
        Command::Scan => {
            let client = create_client(&settings, cli.keys_file.as_deref(), false)?;
            scan(&settings, &client, store).await
        }
        Command::Positions => {
            let client = create_client(&settings, cli.keys_file.as_deref(), false)?;
            let snapshot = PortfolioSnapshot::fetch(
                &client,
                &store,
                &settings.trading.quote_currency,
                settings.trading.max_slots,
            )
            .await;
            print_snapshot(&snapshot);
            Ok(())
        }
        Command::Import { file } => {
            let count = store
                .replace_from(&file)
                .with_context(|| format!("importing {}", file.display()))?;
            tracing::info!(
                "📂 Replaced {} with {} positions from {}",
                store.path().display(),
                count,
                file.display()
            );
            Ok(())
        }
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("syncbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn create_client(
    settings: &Settings,
    keys_file: Option<&Path>,
    require_keys: bool,
) -> anyhow::Result<SpotClient> {
    let credentials = Credentials::resolve(keys_file).context("reading credentials")?;

    match (&credentials, require_keys) {
        (None, true) => bail!("API key and secret are required (TOKO_API_KEY / TOKO_SECRET_KEY)"),
        (None, false) => tracing::warn!("⚠️  No API keys found, balance and orders unavailable"),
        (Some(_), _) => {}
    }

    let config = SpotConfig::from_settings(&settings.exchange, credentials);
    SpotClient::new(config).context("building exchange client")
}

// ============================================================================
// Commands
// ============================================================================

async fn run(
    settings: &Settings,
    client: &SpotClient,
    store: PositionStore,
    once: bool,
) -> anyhow::Result<()> {
    let trading = &settings.trading;
    let mut manager = PositionManager::from_settings(store, trading);
    let mut session = Session::new(settings.store.event_log_capacity);

    tracing::info!("🚀 syncbot starting");
    tracing::info!("\n📊 Configuration:");
    tracing::info!(
        "  Mode: {}",
        if manager.is_live() { "LIVE" } else { "simulation" }
    );
    tracing::info!(
        "  Slots: {} x {:.2} {}",
        trading.max_slots,
        trading.allocation_per_slot,
        trading.quote_currency
    );
    tracing::info!(
        "  Strategy: {} | TP/SL: +{}% / -{}% | RSI({}) < {} on {}",
        manager.strategy().name(),
        trading.take_profit_pct,
        trading.stop_loss_pct,
        trading.rsi_period,
        trading.rsi_limit,
        trading.timeframe
    );
    tracing::info!("  Positions file: {}", manager.store().path().display());

    session.start();

    if once {
        if let Some(report) = session.tick(&mut manager, client).await {
            log_cycle(report);
        }
        log_portfolio_summary(&manager, &session, settings);
        return Ok(());
    }

    let mut ticker = interval(Duration::from_secs(trading.poll_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!("\nPress Ctrl+C to stop...\n");

    // Polled between cycles only; a running cycle always completes
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    while session.is_active() {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
                session.stop();
            }
            _ = ticker.tick() => {
                if let Some(report) = session.tick(&mut manager, client).await {
                    log_cycle(report);
                }
                log_portfolio_summary(&manager, &session, settings);
            }
        }
    }

    tracing::info!("👋 syncbot stopped after {} cycles", session.cycles());
    Ok(())
}

async fn sync(settings: &Settings, client: &SpotClient, store: &PositionStore) -> anyhow::Result<()> {
    let params = SyncParams::from_settings(&settings.trading.quote_currency, &settings.sync);
    let mut log = EventLog::new(settings.store.event_log_capacity);

    let report = sync_wallet(client, store, &params, &mut log)
        .await
        .context("wallet sync")?;

    tracing::info!(
        "📥 Wallet sync: {} imported, {} skipped",
        report.imported.len(),
        report.skipped.len()
    );
    for (asset, reason) in &report.skipped {
        tracing::info!("  {} skipped: {}", asset, reason);
    }
    Ok(())
}

async fn scan(settings: &Settings, client: &SpotClient, store: PositionStore) -> anyhow::Result<()> {
    let manager = PositionManager::from_settings(store, &settings.trading);
    let readings = manager.scan(client).await.context("scanning candidates")?;

    println!("{:<16} {:>16} {:>8} {:>6}", "SYMBOL", "PRICE", "RSI", "SIGNAL");
    for r in readings {
        println!(
            "{:<16} {:>16.8} {:>8.2} {:>6}",
            r.symbol,
            r.price,
            r.rsi,
            r.signal.to_string()
        );
    }
    Ok(())
}

// ============================================================================
// Reporting
// ============================================================================

fn log_cycle(report: &CycleReport) {
    if report.is_clean() {
        tracing::debug!("  cycle clean");
    }
    for error in &report.errors {
        tracing::warn!("  cycle error: {}", error);
    }
    if let Some(reason) = &report.skipped_open_reason {
        tracing::debug!("  no open: {}", reason);
    }
}

fn log_portfolio_summary(manager: &PositionManager, session: &Session, settings: &Settings) {
    let Some(report) = session.last_report() else {
        return;
    };

    let snapshot = PortfolioSnapshot::build(
        &settings.trading.quote_currency,
        &report.balance,
        manager.store().load(),
        &report.prices,
        settings.trading.max_slots,
    );

    tracing::info!("\n📊 Portfolio Summary (cycle {}):", session.cycles());
    tracing::info!(
        "  Free: {:.2} {} | Equity: {:.2} | Slots: {}/{}",
        snapshot.free_quote,
        snapshot.quote_currency,
        snapshot.equity(),
        snapshot.slots_used(),
        snapshot.max_slots
    );

    for view in &snapshot.positions {
        if let (Some(price), Some(pnl), Some(pct)) = (view.current_price, view.pnl, view.pnl_pct) {
            tracing::info!(
                "    {} | Entry: ${:.6} | Current: ${:.6} | P&L: ${:.4} ({:.2}%)",
                view.position.symbol,
                view.position.buy_price,
                price,
                pnl,
                pct
            );
        }
    }

    for event in session.log().recent().take(5) {
        tracing::info!("  {}", event);
    }
}

fn print_snapshot(snapshot: &PortfolioSnapshot) {
    println!(
        "Free {:.2} {} | Total {:.2} | Equity {:.2} | Slots {}/{}",
        snapshot.free_quote,
        snapshot.quote_currency,
        snapshot.total_quote,
        snapshot.equity(),
        snapshot.slots_used(),
        snapshot.max_slots
    );
    println!(
        "{:<14} {:>14} {:>14} {:>14} {:>12} {:>9} {:>6}",
        "SYMBOL", "QTY", "ENTRY", "PRICE", "P&L", "P&L %", "GOAL"
    );

    for view in &snapshot.positions {
        let p = &view.position;
        let fmt = |v: Option<f64>, decimals: usize| {
            v.map(|x| format!("{:.*}", decimals, x))
                .unwrap_or_else(|| "-".to_string())
        };
        println!(
            "{:<14} {:>14.8} {:>14.6} {:>14} {:>12} {:>9} {:>6}",
            p.symbol,
            p.quantity,
            p.buy_price,
            fmt(view.current_price, 6),
            fmt(view.pnl, 4),
            fmt(view.pnl_pct, 2),
            fmt(view.progress.map(|x| x * 100.0), 0),
        );
    }
}
