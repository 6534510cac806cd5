use anyhow::Result;
use confguard::app::CoreAppHandle;
use confguard::audit::MemoryAuditSink;
use confguard::config::AppConfig;
use confguard::notify::AlertingNotifier;
use confguard::protocol::http::HttpProtocol;
use confguard::protocol::{ProtocolConfig, ProtocolPlugin};
use confguard::remote::SshExecutor;
use confguard::rollout::{RolloutService, ServiceParts, WatchOutcome};
use confguard::secrets::AeadSecretStore;
use confguard::store::VersionStore;
use confguard::validation::ValidatorPolicy;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SCHEDULER_TICK: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load().await?;

    // Initialize tracing
    init_tracing(&config)?;
    info!("Starting confguard rollout service");

    let secrets = Arc::new(AeadSecretStore::from_base64(&config.security.encryption_key)?);
    let store = Arc::new(VersionStore::open(&config.storage.data_dir, secrets).await?);
    info!("Version store opened at {}", config.storage.data_dir);

    let audit = Arc::new(MemoryAuditSink::new(config.observability.audit_history));
    let policy = ValidatorPolicy::from_settings(&config.validator);
    policy.validate()?;

    let service = Arc::new(RolloutService::new(ServiceParts {
        store,
        executor: Arc::new(SshExecutor::new(&config.remote)),
        audit: audit.clone(),
        notifier: Arc::new(AlertingNotifier::new(&config.alerting)?),
        policy,
        settings: config.rollout.clone(),
        layout: config.layout.clone(),
    })?);

    let scheduler = {
        let service = service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SCHEDULER_TICK);
            loop {
                interval.tick().await;
                for (key, result) in service.apply_due().await {
                    if result.is_ok() {
                        info!("Scheduled apply of {} completed", key);
                    }
                }
            }
        })
    };

    let http = Arc::new(HttpProtocol::new());
    let server = {
        let http = http.clone();
        let handle = CoreAppHandle::new(service.clone(), audit);
        let protocol_config = ProtocolConfig::from(&config.server);
        tokio::spawn(async move { http.start(handle, protocol_config).await })
    };

    shutdown_signal().await;
    info!("Shutting down confguard");

    scheduler.abort();
    http.shutdown().await?;
    match server.await {
        Ok(Err(e)) => error!("HTTP server failed: {}", e),
        Err(e) => error!("HTTP server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    let outcomes = service.shutdown().await;
    let rolled_back = outcomes
        .iter()
        .filter(|o| matches!(o, WatchOutcome::RolledBack { .. }))
        .count();
    info!(
        "Settled {} health checks ({} rolled back)",
        outcomes.len(),
        rolled_back
    );

    Ok(())
}

fn init_tracing(config: &AppConfig) -> Result<()> {
    let default_filter = format!(
        "confguard={},tower_http={}",
        config.observability.log_level, config.observability.log_level
    );
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
