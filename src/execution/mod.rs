// Position lifecycle: per-cycle decisions, wallet import and the session driving them
pub mod event_log;
pub mod executor;
pub mod portfolio;
pub mod position_manager;
pub mod session;
pub mod wallet_sync;

pub use event_log::{EventAction, EventLog, TradeEvent};
pub use executor::{check_capacity, evaluate_exit, plan_entry, EntryParams, EntryPlan, EntrySkip};
pub use portfolio::{PortfolioSnapshot, PositionView};
pub use position_manager::{
    ClosedTrade, CycleError, CycleParams, CycleReport, CycleStage, PendingWrite, PositionManager,
};
pub use session::Session;
pub use wallet_sync::{import_holdings, sync_wallet, SyncParams, SyncReport};
