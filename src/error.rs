use thiserror::Error;

/// Failures talking to the exchange
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange rejected request ({code}): {message}")]
    Api { code: i64, message: String },

    #[error("exchange returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("unknown symbol {0}")]
    UnknownSymbol(String),

    #[error("API key and secret are both required")]
    MissingCredentials,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("order rejected before submission: {0}")]
    InvalidOrder(String),
}

impl ExchangeError {
    pub(crate) fn decode(what: &'static str, reason: impl ToString) -> Self {
        Self::Decode {
            what,
            reason: reason.to_string(),
        }
    }
}

/// Failures writing the position file
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("position file io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize positions: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("malformed position file {path}: {reason}")]
    Malformed { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Top-level error type for syncbot
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
