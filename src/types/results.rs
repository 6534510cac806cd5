use crate::error::RolloutError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a blocking validation finding, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PolicyViolation,
    Syntax,
    RemoteTest,
    Transport,
}

/// A single blocking validation error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FailureKind,
    pub message: String,
}

impl Finding {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of static and remote validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub correlation_id: String,
    pub raw_output: Option<String>,
    /// Most severe category among `errors`
    pub failure: Option<FailureKind>,
}

impl ValidationResult {
    /// Build a result from findings in the order they were produced
    pub fn from_findings(
        correlation_id: impl Into<String>,
        findings: Vec<Finding>,
        warnings: Vec<String>,
        raw_output: Option<String>,
    ) -> Self {
        let failure = findings.iter().map(|f| f.kind).min();
        Self {
            is_valid: findings.is_empty(),
            errors: findings.into_iter().map(|f| f.message).collect(),
            warnings,
            correlation_id: correlation_id.into(),
            raw_output,
            failure,
        }
    }

    /// The blocking error this result represents, if any
    pub fn to_error(&self) -> Option<RolloutError> {
        let errors = self.errors.clone();
        match self.failure? {
            FailureKind::PolicyViolation => Some(RolloutError::PolicyViolation(errors)),
            FailureKind::Syntax => Some(RolloutError::Syntax(errors)),
            FailureKind::RemoteTest => Some(RolloutError::RemoteTestFailure(errors)),
            FailureKind::Transport => Some(RolloutError::Transport(errors.join("; "))),
        }
    }
}

/// Raw observations behind a health verdict
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDetails {
    pub service_state: Option<String>,
    pub error_count: Option<u32>,
    pub error_threshold: u32,
    /// Set when the probe could not reach the host
    pub probe_error: Option<String>,
}

/// Structured result of a post-deploy health probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    /// False when the host could not be probed and a policy decided instead
    pub check_ran: bool,
    pub reason: Option<String>,
    pub details: HealthDetails,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn healthy(details: HealthDetails) -> Self {
        Self {
            healthy: true,
            check_ran: true,
            reason: None,
            details,
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(reason: impl Into<String>, details: HealthDetails) -> Self {
        Self {
            healthy: false,
            check_ran: true,
            reason: Some(reason.into()),
            details,
            checked_at: Utc::now(),
        }
    }

    /// Verdict taken without a probe because the host was unreachable
    pub fn not_run(healthy: bool, reason: impl Into<String>, details: HealthDetails) -> Self {
        Self {
            healthy,
            check_ran: false,
            reason: Some(reason.into()),
            details,
            checked_at: Utc::now(),
        }
    }
}
