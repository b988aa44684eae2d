//! Error types

use thiserror::Error;

use crate::ExchangeId;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    #[error("Invalid trading pair: {0}")]
    InvalidPair(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// What went wrong talking to an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeErrorKind {
    /// Connection, DNS or body read failure
    Transport(String),
    /// Request exceeded its deadline
    Timeout,
    /// Non-2xx response
    HttpStatus(u16),
    /// 2xx response carrying an exchange-level error
    Api(String),
    /// Payload did not match the expected schema
    Malformed(String),
    UnsupportedSymbol,
}

impl std::fmt::Display for ExchangeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeErrorKind::Transport(msg) => write!(f, "transport error: {msg}"),
            ExchangeErrorKind::Timeout => write!(f, "request timed out"),
            ExchangeErrorKind::HttpStatus(status) => write!(f, "request failed: {status}"),
            ExchangeErrorKind::Api(msg) => write!(f, "exchange error: {msg}"),
            ExchangeErrorKind::Malformed(msg) => write!(f, "malformed response: {msg}"),
            ExchangeErrorKind::UnsupportedSymbol => write!(f, "symbol not supported"),
        }
    }
}

/// Exchange-level failure, carrying the raw body when one was received
#[derive(Debug, Clone, Error)]
#[error("{exchange} [{}]: {kind}", .symbol.as_deref().unwrap_or("-"))]
pub struct ExchangeError {
    pub exchange: ExchangeId,
    pub symbol: Option<String>,
    pub kind: ExchangeErrorKind,
    pub raw_response: Option<String>,
}

impl ExchangeError {
    pub fn new(exchange: ExchangeId, kind: ExchangeErrorKind) -> Self {
        Self {
            exchange,
            symbol: None,
            kind,
            raw_response: None,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw_response = Some(raw.into());
        self
    }

    pub fn malformed(exchange: ExchangeId, msg: impl Into<String>) -> Self {
        Self::new(exchange, ExchangeErrorKind::Malformed(msg.into()))
    }

    pub fn unsupported(exchange: ExchangeId, symbol: &str) -> Self {
        Self::new(exchange, ExchangeErrorKind::UnsupportedSymbol).with_symbol(symbol)
    }

    /// Network failures, timeouts, 5xx and 429 are worth retrying
    pub fn is_transient(&self) -> bool {
        match self.kind {
            ExchangeErrorKind::Transport(_) | ExchangeErrorKind::Timeout => true,
            ExchangeErrorKind::HttpStatus(status) => status >= 500 || status == 429,
            _ => false,
        }
    }
}

/// Storage collaborator errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Write failed for {pair}: {reason}")]
    WriteFailed { pair: String, reason: String },

    #[error("Read failed for {pair}: {reason}")]
    ReadFailed { pair: String, reason: String },
}

/// Publish collaborator errors
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("No subscribers on channel {0}")]
    NoSubscribers(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Publish failed: {0}")]
    Failed(String),
}

/// Registry construction errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No cryptocurrency exchanges are available (configured: {configured:?})")]
    Exhausted { configured: Vec<String> },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
pub type ExchangeResult<T> = Result<T, ExchangeError>;
pub type StoreResult<T> = Result<T, StoreError>;
