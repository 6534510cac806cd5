use super::results::{HealthCheckResult, ValidationResult};
use super::HostId;
use crate::diff::ConfigDiff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Applied,
    RolledBack,
    Failed,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VersionStatus::Draft => "draft",
            VersionStatus::Applied => "applied",
            VersionStatus::RolledBack => "rolled_back",
            VersionStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// What kind of nginx fragment a version carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    #[default]
    ServerBlock,
    Upstream,
    Snippet,
}

/// Identity of a version: host plus per-host version number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionKey {
    pub host_id: HostId,
    pub version: u64,
}

impl VersionKey {
    pub fn new(host_id: impl Into<HostId>, version: u64) -> Self {
        Self {
            host_id: host_id.into(),
            version,
        }
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#v{}", self.host_id, self.version)
    }
}

/// One immutable content snapshot plus its mutable lifecycle fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigVersion {
    pub host_id: HostId,
    pub version: u64,
    pub config_name: String,
    pub config_type: ConfigType,
    pub author_id: String,

    /// Ciphertext token produced by the secret store
    pub content_encrypted: String,
    /// SHA-256 of the plaintext body
    pub content_hash: String,
    pub summary: Option<String>,
    /// Diff against the preceding version; absent for version 1
    pub diff: Option<ConfigDiff>,

    pub status: VersionStatus,
    pub watch_window_secs: u64,
    pub rollback_triggered: bool,
    pub rollback_reason: Option<String>,
    pub remote_test_result: Option<ValidationResult>,
    pub health_check: Option<HealthCheckResult>,

    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub scheduled_apply_at: Option<DateTime<Utc>>,
    /// Watch window requested together with the schedule
    #[serde(default)]
    pub scheduled_watch_window_secs: Option<u64>,
    /// Scheduler runs that failed on a retryable error
    #[serde(default)]
    pub scheduled_attempts: u32,
    /// Correlation id of the last operation that touched this version
    pub last_correlation_id: Option<String>,
}

impl ConfigVersion {
    pub fn key(&self) -> VersionKey {
        VersionKey::new(self.host_id.clone(), self.version)
    }

    /// Applied and not reverted by its own health watcher
    pub fn is_active(&self) -> bool {
        self.status == VersionStatus::Applied && !self.rollback_triggered
    }

    pub fn can_rollback(&self) -> bool {
        self.status == VersionStatus::Applied && self.applied_at.is_some()
    }

    /// Whether the protocol ever completed for this version
    pub fn was_deployed(&self) -> bool {
        self.applied_at.is_some()
    }

    /// Candidate for "last known good": deployed, superseded or active,
    /// never reverted by a watcher
    pub fn is_known_good(&self) -> bool {
        self.applied_at.is_some()
            && matches!(
                self.status,
                VersionStatus::Applied | VersionStatus::RolledBack
            )
            && !self.rollback_triggered
    }

    /// Remote file name stem, `<config_name>_<version>`
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.config_name, self.version)
    }

    /// Verify a decrypted body against the stored hash
    pub fn verify_integrity(&self, plaintext: &str) -> bool {
        super::helpers::content_hash(plaintext) == self.content_hash
    }

    pub fn summarize(&self) -> VersionSummary {
        VersionSummary {
            host_id: self.host_id.clone(),
            version: self.version,
            config_name: self.config_name.clone(),
            config_type: self.config_type,
            author_id: self.author_id.clone(),
            summary: self.summary.clone(),
            status: self.status,
            is_active: self.is_active(),
            can_rollback: self.can_rollback(),
            rollback_triggered: self.rollback_triggered,
            rollback_reason: self.rollback_reason.clone(),
            content_hash: self.content_hash.clone(),
            change_summary: self.diff.as_ref().map(|d| d.summary()),
            health_check: self.health_check.clone(),
            created_at: self.created_at,
            applied_at: self.applied_at,
            scheduled_apply_at: self.scheduled_apply_at,
        }
    }
}

/// Input for creating a new version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVersion {
    pub host_id: HostId,
    pub content: String,
    pub author_id: String,
    pub summary: Option<String>,
    pub config_name: String,
    pub config_type: ConfigType,
    pub watch_window_secs: u64,
}

/// Listing view of a version, without content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSummary {
    pub host_id: HostId,
    pub version: u64,
    pub config_name: String,
    pub config_type: ConfigType,
    pub author_id: String,
    pub summary: Option<String>,
    pub status: VersionStatus,
    pub is_active: bool,
    pub can_rollback: bool,
    pub rollback_triggered: bool,
    pub rollback_reason: Option<String>,
    pub content_hash: String,
    /// `+added/-removed` against the previous version
    pub change_summary: Option<String>,
    pub health_check: Option<HealthCheckResult>,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub scheduled_apply_at: Option<DateTime<Utc>>,
}
