use thiserror::Error;

/// Core error types for the payout proxy.
///
/// Every variant is fatal to the connection it occurs in; the supervisor
/// tears down both sockets and the miner is expected to reconnect.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Policy violation: {0}")]
    Policy(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Difficulty oracle error: {0}")]
    Oracle(String),

    #[error("Payout formula error: {0}")]
    Formula(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Framing(_) => "framing",
            Error::Policy(_) => "policy",
            Error::Transport(_) => "transport",
            Error::Oracle(_) => "oracle",
            Error::Formula(_) => "formula",
            Error::Database(_) => "database",
            Error::Migration(_) => "migration",
            Error::Io(_) => "transport",
            Error::Serialization(_) => "serialization",
            Error::Metrics(_) => "metrics",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether the error was caused by the miner or pool traffic rather
    /// than by a collaborator or the proxy itself.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Framing(_) | Error::Policy(_))
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::Framing("x".into()).category(), "framing");
        assert_eq!(Error::Policy("x".into()).category(), "policy");
        assert_eq!(Error::Oracle("x".into()).category(), "oracle");

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(Error::from(io).category(), "transport");
    }

    #[test]
    fn test_protocol_error_classification() {
        assert!(Error::Framing("bad json".into()).is_protocol_error());
        assert!(Error::Policy("foreign account".into()).is_protocol_error());
        assert!(!Error::Oracle("timeout".into()).is_protocol_error());
        assert!(!Error::Transport("refused".into()).is_protocol_error());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Policy("unexpected pool account OTHER".to_string());
        assert_eq!(err.to_string(), "Policy violation: unexpected pool account OTHER");
    }
}
