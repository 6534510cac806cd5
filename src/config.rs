use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub rollout: RolloutSettings,
    pub layout: RemoteLayout,
    pub validator: ValidatorSettings,
    pub security: SecurityConfig,
    pub remote: RemoteConfig,
    pub alerting: AlertingConfig,
    pub observability: ObservabilityConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

/// What the health watcher does when the host cannot be reached at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreachablePolicy {
    /// Record that the probe could not run and keep the deploy
    AssumeHealthy,
    /// Treat an unreachable host as degraded and roll back
    TreatUnhealthy,
}

/// How outstanding health watchers are handled when the process stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    Wait,
    Abandon,
}

/// Rollout safety settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutSettings {
    pub default_watch_window_secs: u64,
    pub command_timeout_secs: u64,
    pub remote_test_timeout_secs: u64,
    pub health_error_threshold: u32,
    pub health_error_window: String,
    pub unreachable_policy: UnreachablePolicy,
    pub shutdown_mode: ShutdownMode,
    /// Retryable failures a scheduled apply may hit before its schedule is dropped
    pub max_scheduled_attempts: u32,
}

impl RolloutSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn remote_test_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_test_timeout_secs)
    }
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            default_watch_window_secs: 120,
            command_timeout_secs: 300,
            remote_test_timeout_secs: 30,
            health_error_threshold: 10,
            health_error_window: "2 minutes ago".to_string(),
            unreachable_policy: UnreachablePolicy::AssumeHealthy,
            shutdown_mode: ShutdownMode::Wait,
            max_scheduled_attempts: 5,
        }
    }
}

/// Paths and commands used on the managed proxy host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLayout {
    pub service_name: String,
    pub nginx_root: String,
    pub managed_dir: String,
    pub drafts_dir: String,
    pub sites_enabled_dir: String,
    pub backup_root: String,
    pub scratch_dir: String,
    /// Syntax check against a single file; `{path}` is substituted
    pub test_file_command: String,
    /// Syntax check of the live configuration tree
    pub test_command: String,
    pub reload_command: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            service_name: "nginx".to_string(),
            nginx_root: "/etc/nginx".to_string(),
            managed_dir: "/etc/nginx/managed.d".to_string(),
            drafts_dir: "/etc/nginx/managed.d/drafts".to_string(),
            sites_enabled_dir: "/etc/nginx/sites-enabled".to_string(),
            backup_root: "/srv/backups/nginx".to_string(),
            scratch_dir: "/tmp".to_string(),
            test_file_command: "nginx -t -c {path}".to_string(),
            test_command: "nginx -t".to_string(),
            reload_command: "systemctl reload nginx".to_string(),
        }
    }
}

/// Static validator tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSettings {
    pub max_body_size_mb: u64,
    pub extra_forbidden_directives: Vec<String>,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Base64 encoded 32 byte key for content encryption at rest
    pub encryption_key: String,
}

/// One managed host reachable over ssh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub address: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
}

/// Remote executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub ssh_binary: String,
    pub connect_timeout_secs: u64,
    pub hosts: BTreeMap<String, HostEntry>,
}

/// Alert delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    pub webhook_urls: Vec<String>,
    pub webhook_timeout_secs: u64,
    pub cooldown_critical_mins: i64,
    pub cooldown_warning_mins: i64,
    pub cooldown_info_mins: i64,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub audit_history: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                request_timeout_secs: 600,
            },
            storage: StorageConfig {
                data_dir: "./data/versions".to_string(),
            },
            rollout: RolloutSettings::default(),
            layout: RemoteLayout::default(),
            validator: ValidatorSettings {
                max_body_size_mb: 100,
                extra_forbidden_directives: Vec::new(),
            },
            security: SecurityConfig {
                encryption_key: String::new(),
            },
            remote: RemoteConfig {
                ssh_binary: "ssh".to_string(),
                connect_timeout_secs: 10,
                hosts: BTreeMap::new(),
            },
            alerting: AlertingConfig {
                webhook_urls: Vec::new(),
                webhook_timeout_secs: 30,
                cooldown_critical_mins: 5,
                cooldown_warning_mins: 15,
                cooldown_info_mins: 60,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: "text".to_string(),
                audit_history: 500,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub async fn load() -> Result<Self> {
        let mut config_builder = Config::builder()
            // Start with default values
            .add_source(Config::try_from(&AppConfig::default())?);

        let config_files = [
            "config/default.toml",
            "config/local.toml",
            "/etc/confguard/config.toml",
        ];

        for config_file in &config_files {
            if Path::new(config_file).exists() {
                config_builder = config_builder.add_source(File::with_name(config_file));
            }
        }

        // Environment variables with CONFGUARD_ prefix, e.g. CONFGUARD_SERVER__PORT
        config_builder = config_builder.add_source(
            Environment::with_prefix("CONFGUARD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = config_builder.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("Server port cannot be 0".to_string()));
        }

        if self.storage.data_dir.is_empty() {
            return Err(ConfigError::Message(
                "Storage data_dir cannot be empty".to_string(),
            ));
        }

        if self.rollout.command_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Rollout command_timeout_secs cannot be 0".to_string(),
            ));
        }

        if self.rollout.remote_test_timeout_secs == 0
            || self.rollout.remote_test_timeout_secs > self.rollout.command_timeout_secs
        {
            return Err(ConfigError::Message(
                "Rollout remote_test_timeout_secs must be within (0, command_timeout_secs]"
                    .to_string(),
            ));
        }

        if self.rollout.max_scheduled_attempts == 0 {
            return Err(ConfigError::Message(
                "Rollout max_scheduled_attempts cannot be 0".to_string(),
            ));
        }

        if !self.layout.test_file_command.contains("{path}") {
            return Err(ConfigError::Message(
                "Layout test_file_command must contain a {path} placeholder".to_string(),
            ));
        }

        for (name, dir) in [
            ("managed_dir", &self.layout.managed_dir),
            ("drafts_dir", &self.layout.drafts_dir),
            ("sites_enabled_dir", &self.layout.sites_enabled_dir),
            ("backup_root", &self.layout.backup_root),
        ] {
            if !dir.starts_with('/') {
                return Err(ConfigError::Message(format!(
                    "Layout {} must be an absolute path",
                    name
                )));
            }
        }

        if self.validator.max_body_size_mb == 0 {
            return Err(ConfigError::Message(
                "Validator max_body_size_mb cannot be 0".to_string(),
            ));
        }

        if self.security.encryption_key.is_empty() {
            return Err(ConfigError::Message(
                "Security encryption_key cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
