//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The backing store could not be reached (connect, pool or I/O failure).
    StoreUnavailable(String),
    /// Persistence failure while querying or decoding `SQLite` rows.
    Db(String),
    /// Notification channel transport failure.
    Notifier(String),
    /// The notification channel rejected the configured credentials.
    Unauthorized(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether this error means the store itself is unreachable.
    #[must_use]
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::StoreUnavailable(msg) => write!(f, "store unavailable: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Notifier(msg) => write!(f, "notifier: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::StoreUnavailable(err.to_string()),
            other => Self::Db(other.to_string()),
        }
    }
}
