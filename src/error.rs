use crate::remote::RemoteError;
use crate::rollout::DeployPhase;
use crate::secrets::SecretError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the rollout engine
#[derive(Error, Debug)]
pub enum RolloutError {
    #[error("Policy violation: {}", .0.join("; "))]
    PolicyViolation(Vec<String>),

    #[error("Syntax error: {}", .0.join("; "))]
    Syntax(Vec<String>),

    #[error("Remote test failed: {}", .0.join("; "))]
    RemoteTestFailure(Vec<String>),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Protocol failure while {phase}: {message}")]
    Protocol { phase: DeployPhase, message: String },

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Host {0} already has an apply or rollback in flight")]
    HostBusy(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No suitable version found for rollback on host {0}")]
    NoRollbackTarget(String),

    #[error("Secret store error: {0}")]
    Secret(#[from] SecretError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("RocksDB error: {0}")]
    RocksDB(#[from] rocksdb::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, RolloutError>;

/// Coarse classification used by callers to decide what to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Forbidden directive or path; the content must be edited
    PolicyViolation,
    /// Brace imbalance or structural block error; the content must be edited
    Syntax,
    /// The daemon rejected the candidate; the content must be edited
    RemoteTestFailure,
    /// The host could not be reached; safe to retry the same version
    Transport,
    /// A mutating remote step failed; the host may be partially swapped
    Protocol,
    /// Post-deploy degradation; handled by automatic rollback
    HealthCheck,
    /// Another operation holds the host
    Conflict,
    /// Unknown host or version
    NotFound,
    /// Storage, secrets, configuration and other local faults
    Internal,
}

impl RolloutError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn protocol(phase: DeployPhase, msg: impl Into<String>) -> Self {
        Self::Protocol {
            phase,
            message: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PolicyViolation(_) => ErrorKind::PolicyViolation,
            Self::Syntax(_) | Self::Validation(_) => ErrorKind::Syntax,
            Self::RemoteTestFailure(_) => ErrorKind::RemoteTestFailure,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::HealthCheck(_) => ErrorKind::HealthCheck,
            Self::HostBusy(_) => ErrorKind::Conflict,
            Self::NotFound(_) | Self::NoRollbackTarget(_) => ErrorKind::NotFound,
            Self::Secret(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::RocksDB(_)
            | Self::Storage(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Transport failures and busy-host rejections may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Conflict)
    }

    /// Individual error lines, used when a result has to carry a list
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::PolicyViolation(errors)
            | Self::Syntax(errors)
            | Self::RemoteTestFailure(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl From<RemoteError> for RolloutError {
    fn from(err: RemoteError) -> Self {
        Self::Transport(err.to_string())
    }
}
