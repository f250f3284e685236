//! Error types for Promocast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PromocastError>;

#[derive(Error, Debug)]
pub enum PromocastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PromocastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PromocastError::InvalidInput(_) => 3,
            PromocastError::Scheduling(SchedulingError::InvalidTime(_)) => 3,
            PromocastError::Config(_) => 2,
            PromocastError::Platform(PlatformError::Authentication(_)) => 2,
            PromocastError::Platform(_) => 1,
            PromocastError::Scheduling(_) => 1,
            PromocastError::Database(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No credentials or no integration for the platform. Callers use this to
    /// pick simulation without spending a network round trip.
    #[error("Platform not configured: {0}")]
    NotConfigured(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}

impl PlatformError {
    /// Transient errors are worth another attempt against the real provider
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Network(_) | PlatformError::Timeout(_) | PlatformError::RateLimit(_)
        )
    }
}

#[derive(Error, Debug, Clone)]
pub enum SchedulingError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("No active account for platform {0}")]
    NoActiveAccount(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),
}

impl From<sqlx::Error> for PromocastError {
    fn from(error: sqlx::Error) -> Self {
        PromocastError::Database(DbError::SqlxError(error))
    }
}
