// Core modules
pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod strategy;

// Re-export commonly used types
pub use api::{ExchangeGateway, SpotClient};
pub use error::{BotError, ExchangeError, StoreError};
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, BotError>;
