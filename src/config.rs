//! Settings and credentials.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `SYNCBOT__SECTION__KEY` environment variables. Credentials come from the
//! process environment (a `.env` file is honoured by the binary) or from an
//! uploaded `KEY=value` file.

use crate::error::ConfigError;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "syncbot.toml";

/// Range the fee/slippage haircut on bought quantity may take
pub const SAFETY_FACTOR_RANGE: (f64, f64) = (0.995, 0.998);

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExchangeSettings {
    pub base_url: String,
    pub recv_window_ms: u64,
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
    /// Size market buys in quote currency
    pub quote_orders: bool,
    pub adjust_for_time_difference: bool,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.me".to_string(),
            recv_window_ms: 5000,
            timeout_secs: 30,
            requests_per_minute: 1200,
            quote_orders: true,
            adjust_for_time_difference: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TradingSettings {
    pub quote_currency: String,
    /// Quote currency committed to each slot
    pub allocation_per_slot: f64,
    pub max_slots: usize,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub timeframe: String,
    pub rsi_period: usize,
    pub rsi_limit: f64,
    pub candle_limit: usize,
    pub safety_factor: f64,
    /// Candidates scanned per cycle
    pub max_candidates: usize,
    /// Stablecoin bases never traded
    pub excluded_bases: Vec<String>,
    pub live: bool,
    pub poll_interval_secs: u64,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            quote_currency: "USDT".to_string(),
            allocation_per_slot: 11.0,
            max_slots: 3,
            take_profit_pct: 1.5,
            stop_loss_pct: 2.0,
            timeframe: "5m".to_string(),
            rsi_period: 14,
            rsi_limit: 35.0,
            candle_limit: 50,
            safety_factor: 0.998,
            max_candidates: 20,
            excluded_bases: ["USDC", "BUSD", "TUSD", "FDUSD", "DAI", "USDP"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            live: false,
            poll_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Holdings worth this much quote currency or less are ignored
    pub min_value: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    /// Assets never imported besides the quote currency
    pub ignored_assets: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            min_value: 5.0,
            take_profit_pct: 1.5,
            stop_loss_pct: 2.0,
            ignored_assets: vec!["BIDR".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreSettings {
    pub path: String,
    pub event_log_capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: "posisi_multi.json".to_string(),
            event_log_capacity: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub trading: TradingSettings,
    pub sync: SyncSettings,
    pub store: StoreSettings,
}

impl Settings {
    /// Load settings from `path` (required) or `syncbot.toml` (optional)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("SYNCBOT")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("trading.excluded_bases")
                    .with_list_parse_key("sync.ignored_assets"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.trading;

        if t.quote_currency.trim().is_empty() {
            return Err(invalid("trading.quote_currency", "must not be empty"));
        }
        if !(t.allocation_per_slot > 0.0) {
            return Err(invalid("trading.allocation_per_slot", "must be positive"));
        }
        if t.max_slots == 0 {
            return Err(invalid("trading.max_slots", "must be at least 1"));
        }
        if !(t.take_profit_pct > 0.0) || !(t.stop_loss_pct > 0.0) || t.stop_loss_pct >= 100.0 {
            return Err(invalid(
                "trading.take_profit_pct",
                "take profit must be positive and stop loss within (0, 100)",
            ));
        }
        if t.rsi_period == 0 || t.candle_limit <= t.rsi_period {
            return Err(invalid("trading.candle_limit", "must exceed the RSI period"));
        }
        let (lo, hi) = SAFETY_FACTOR_RANGE;
        if !(lo..=hi).contains(&t.safety_factor) {
            return Err(invalid(
                "trading.safety_factor",
                format!("{} is outside [{}, {}]", t.safety_factor, lo, hi),
            ));
        }
        if t.poll_interval_secs == 0 {
            return Err(invalid("trading.poll_interval_secs", "must be at least 1"));
        }
        if self.sync.min_value < 0.0 {
            return Err(invalid("sync.min_value", "must not be negative"));
        }
        if !(self.sync.take_profit_pct > 0.0)
            || !(self.sync.stop_loss_pct > 0.0)
            || self.sync.stop_loss_pct >= 100.0
        {
            return Err(invalid(
                "sync.take_profit_pct",
                "take profit must be positive and stop loss within (0, 100)",
            ));
        }
        if self.store.path.trim().is_empty() {
            return Err(invalid("store.path", "must not be empty"));
        }

        Ok(())
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

const KEY_NAMES: &[&str] = &["TOKO_API_KEY", "API_KEY"];
const SECRET_NAMES: &[&str] = &["TOKO_SECRET_KEY", "SECRET_KEY", "API_SECRET"];

/// Exchange API key pair
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Both halves must be present and non-empty
    pub fn from_pairs<I, K, V>(pairs: I) -> Option<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut api_key = None;
        let mut api_secret = None;

        for (k, v) in pairs {
            let name = k.as_ref().trim();
            if KEY_NAMES.contains(&name) && api_key.is_none() {
                api_key = Some(v.into());
            } else if SECRET_NAMES.contains(&name) && api_secret.is_none() {
                api_secret = Some(v.into());
            }
        }

        match (api_key, api_secret) {
            (Some(api_key), Some(api_secret))
                if !api_key.trim().is_empty() && !api_secret.trim().is_empty() =>
            {
                Some(Self {
                    api_key: api_key.trim().to_string(),
                    api_secret: api_secret.trim().to_string(),
                })
            }
            _ => None,
        }
    }

    pub fn from_env() -> Option<Self> {
        let names = KEY_NAMES.iter().chain(SECRET_NAMES.iter());
        Self::from_pairs(names.filter_map(|name| std::env::var(name).ok().map(|v| (*name, v))))
    }

    /// Parse an uploaded `KEY=value` blob
    pub fn parse_key_file(contents: &str) -> Result<Option<Self>, ConfigError> {
        let pairs = dotenvy::from_read_iter(contents.as_bytes())
            .collect::<Result<Vec<(String, String)>, _>>()
            .map_err(|e| invalid("keys_file", e.to_string()))?;

        Ok(Self::from_pairs(pairs))
    }

    /// Keys file when given, otherwise the environment
    pub fn resolve(keys_file: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        match keys_file {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| invalid("keys_file", format!("{}: {}", path.display(), e)))?;
                Self::parse_key_file(&contents)
            }
            None => Ok(Self::from_env()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.trading.allocation_per_slot, 11.0);
        assert_eq!(settings.trading.max_slots, 3);
        assert_eq!(settings.trading.safety_factor, 0.998);
        assert_eq!(settings.sync.min_value, 5.0);
        assert!(!settings.trading.live);
    }

    #[test]
    fn test_safety_factor_range() {
        let mut settings = Settings::default();
        settings.trading.safety_factor = 0.995;
        assert!(settings.validate().is_ok());

        settings.trading.safety_factor = 0.99;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("trading.safety_factor"));

        settings.trading.safety_factor = 1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_slots_and_allocation() {
        let mut settings = Settings::default();
        settings.trading.max_slots = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.trading.allocation_per_slot = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[trading]
allocation_per_slot = 25.0
max_slots = 5
timeframe = "15m"
safety_factor = 0.995

[sync]
min_value = 1.0
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.trading.allocation_per_slot, 25.0);
        assert_eq!(settings.trading.max_slots, 5);
        assert_eq!(settings.trading.timeframe, "15m");
        assert_eq!(settings.sync.min_value, 1.0);
        // Untouched keys keep their defaults
        assert_eq!(settings.trading.rsi_limit, 35.0);
        assert_eq!(settings.store.path, "posisi_multi.json");
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[trading]\nsafety_factor = 0.9").unwrap();
        assert!(Settings::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_credentials_from_key_file() {
        let blob = "# exported from the exchange\nTOKO_API_KEY=abc123\nTOKO_SECRET_KEY=\"s3cr3t\"\n";
        let creds = Credentials::parse_key_file(blob).unwrap().unwrap();
        assert_eq!(creds.api_key, "abc123");
        assert_eq!(creds.api_secret, "s3cr3t");
    }

    #[test]
    fn test_credentials_need_both_halves() {
        assert!(Credentials::parse_key_file("TOKO_API_KEY=abc\n")
            .unwrap()
            .is_none());
        assert!(Credentials::from_pairs([("API_KEY", "abc"), ("API_SECRET", " ")]).is_none());
        assert!(Credentials::from_pairs([("API_KEY", "abc"), ("API_SECRET", "def")]).is_some());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::from_pairs([("API_KEY", "abc"), ("API_SECRET", "def")]).unwrap();
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("abc"));
        assert!(!printed.contains("def"));
    }
}
