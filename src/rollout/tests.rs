use super::*;
use crate::audit::{AuditStatus, MemoryAuditSink};
use crate::config::{RolloutSettings, UnreachablePolicy};
use crate::error::RolloutError;
use crate::notify::Severity;
use crate::remote::CommandOutput;
use crate::testing::{server_block, service_rig, RecordingNotifier, ScriptedExecutor, ServiceRig};
use crate::types::*;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

struct Harness {
    service: Arc<RolloutService>,
    executor: Arc<ScriptedExecutor>,
    audit: Arc<MemoryAuditSink>,
    notifier: Arc<RecordingNotifier>,
    _rig: ServiceRig,
}

async fn harness_with(settings: RolloutSettings) -> Harness {
    let rig = service_rig(settings).await;
    Harness {
        service: rig.service.clone(),
        executor: rig.executor.clone(),
        audit: rig.audit.clone(),
        notifier: rig.notifier.clone(),
        _rig: rig,
    }
}

async fn harness() -> Harness {
    harness_with(RolloutSettings::default()).await
}

impl Harness {
    async fn create(&self, port: u16) -> ConfigVersion {
        self.service
            .create_version(CreateVersionRequest {
                host_id: "web-1".to_string(),
                content: server_block("example.com", port),
                author_id: "alice".to_string(),
                summary: None,
                config_name: Some("site".to_string()),
                config_type: None,
                watch_window_secs: None,
            })
            .await
            .unwrap()
    }

    async fn apply(&self, version: u64, window: u64) -> crate::error::Result<ApplyOutcome> {
        self.service
            .apply(ApplyRequest {
                key: VersionKey::new("web-1", version),
                actor: "alice".to_string(),
                dry_run: false,
                scheduled_at: None,
                watch_window_secs: Some(window),
            })
            .await
    }

    async fn version(&self, version: u64) -> ConfigVersion {
        self.service.get_version("web-1", version).await.unwrap()
    }

    fn alert_titles(&self) -> Vec<String> {
        self.notifier.sent().into_iter().map(|a| a.title).collect()
    }
}

#[tokio::test]
async fn test_create_version_is_audited_and_uses_default_window() {
    let h = harness().await;
    let v = h.create(80).await;

    assert_eq!(v.version, 1);
    assert_eq!(v.config_name, "site");
    assert_eq!(v.watch_window_secs, 120);

    let entries = h.audit.recent(Some("web-1"), 10);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, "nginx_config_create");
    assert_eq!(entries[0].status, AuditStatus::Success);
}

#[tokio::test]
async fn test_get_content_can_mask_credentials() {
    let h = harness().await;
    let content = format!(
        "{}# auth_basic_user_file /etc/nginx/hunter2.htpasswd;\n",
        server_block("example.com", 80)
    );
    h.service
        .create_version(CreateVersionRequest {
            host_id: "web-1".to_string(),
            content: content.clone(),
            author_id: "alice".to_string(),
            summary: None,
            config_name: None,
            config_type: None,
            watch_window_secs: None,
        })
        .await
        .unwrap();

    assert_eq!(h.service.get_content("web-1", 1, false).await.unwrap(), content);
    let masked = h.service.get_content("web-1", 1, true).await.unwrap();
    assert!(!masked.contains("hunter2"));
}

#[tokio::test]
async fn test_dry_run_touches_nothing_on_the_host() {
    let h = harness().await;
    h.create(80).await;

    let outcome = h
        .service
        .apply(ApplyRequest {
            key: VersionKey::new("web-1", 1),
            actor: "alice".to_string(),
            dry_run: true,
            scheduled_at: None,
            watch_window_secs: None,
        })
        .await
        .unwrap();

    match outcome {
        ApplyOutcome::DryRun { validation, .. } => assert!(validation.is_valid),
        other => panic!("expected dry run, got {:?}", other),
    }
    assert!(h.executor.calls().is_empty());
    assert!(!h.executor.ran("mv "));
    assert_eq!(h.version(1).await.status, VersionStatus::Draft);
    assert_eq!(h.service.pending_health_checks(), 0);
}

#[tokio::test]
async fn test_apply_runs_protocol_in_order() {
    let h = harness().await;
    h.create(80).await;

    let outcome = h.apply(1, 0).await.unwrap();
    let ApplyOutcome::Applied {
        version,
        superseded,
        backup_path,
        ..
    } = outcome
    else {
        panic!("expected applied");
    };
    assert_eq!(version, 1);
    assert!(superseded.is_empty());
    assert!(backup_path.starts_with("/srv/backups/nginx/"));

    let commands = h.executor.commands();
    let position = |prefix: &str| {
        commands
            .iter()
            .position(|c| c.starts_with(prefix))
            .unwrap_or_else(|| panic!("{} never ran", prefix))
    };
    assert!(position("cp -r") < position("mv "));
    assert!(position("mv ") < position("ln -sf"));
    assert!(position("ln -sf") < position("systemctl reload"));

    let staged: Vec<String> = h.executor.writes().into_iter().map(|(p, _)| p).collect();
    assert!(staged.contains(&"/etc/nginx/managed.d/drafts/site_1.conf".to_string()));

    let v = h.version(1).await;
    assert!(v.is_active());
    assert!(v.remote_test_result.unwrap().is_valid);
}

#[tokio::test]
async fn test_reapply_of_active_version_is_idempotent() {
    let h = harness().await;
    h.create(80).await;

    h.apply(1, 0).await.unwrap();
    let first = h.version(1).await;
    let outcome = h.apply(1, 0).await.unwrap();

    let ApplyOutcome::Applied { superseded, .. } = outcome else {
        panic!("expected applied");
    };
    assert!(superseded.is_empty());

    let versions = h.service.list_versions("web-1").await;
    assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);
    let second = h.version(1).await;
    assert_eq!(second.status, VersionStatus::Applied);
    assert!(second.applied_at >= first.applied_at);
}

#[tokio::test]
async fn test_new_version_supersedes_previous() {
    let h = harness().await;
    h.create(80).await;
    h.create(8080).await;

    h.apply(1, 0).await.unwrap();
    let ApplyOutcome::Applied { superseded, .. } = h.apply(2, 0).await.unwrap() else {
        panic!("expected applied");
    };

    assert_eq!(superseded, vec![1]);
    assert_eq!(h.version(1).await.status, VersionStatus::RolledBack);
    let status = h.service.status("web-1").await;
    assert_eq!(status.active.map(|v| v.version), Some(2));
    assert_eq!(status.last_known_good, Some(2));
    assert_eq!(status.total_versions, 2);
    assert!(!status.busy);
}

#[tokio::test]
async fn test_invalid_draft_is_marked_failed() {
    let h = harness().await;
    h.service
        .create_version(CreateVersionRequest {
            host_id: "web-1".to_string(),
            content: "server {\n    server_name example.com;\n}\n".to_string(),
            author_id: "alice".to_string(),
            summary: None,
            config_name: None,
            config_type: None,
            watch_window_secs: None,
        })
        .await
        .unwrap();

    let err = h.apply(1, 0).await.unwrap_err();
    assert!(matches!(err, RolloutError::Syntax(_)));
    assert_eq!(h.version(1).await.status, VersionStatus::Failed);
    assert!(h.executor.writes().is_empty());
    assert_eq!(h.alert_titles(), vec!["Nginx Config Apply Failed - web-1"]);

    // Failed versions cannot be retried
    let retry = h.apply(1, 0).await.unwrap_err();
    assert!(matches!(retry, RolloutError::Validation(_)));
}

#[tokio::test]
async fn test_remote_test_failure_keeps_host_untouched() {
    let h = harness().await;
    h.create(80).await;
    h.executor.respond(
        "nginx -t -c",
        CommandOutput::failed(1, "unknown directive \"proxy_passs\""),
    );

    let err = h.apply(1, 0).await.unwrap_err();
    assert!(matches!(err, RolloutError::RemoteTestFailure(_)));
    assert!(!h.executor.ran("mv "));
    assert!(!h.executor.ran("systemctl reload"));
    assert_eq!(h.version(1).await.status, VersionStatus::Failed);
}

#[tokio::test]
async fn test_reload_failure_marks_version_failed() {
    let h = harness().await;
    h.create(80).await;
    h.executor
        .respond("systemctl reload", CommandOutput::failed(1, "reload refused"));

    let err = h.apply(1, 0).await.unwrap_err();
    match err {
        RolloutError::Protocol { phase, .. } => assert_eq!(phase, DeployPhase::Reloading),
        other => panic!("expected protocol error, got {:?}", other),
    }
    let v = h.version(1).await;
    assert_eq!(v.status, VersionStatus::Failed);
    assert!(v.applied_at.is_none());
    assert!(h.service.status("web-1").await.active.is_none());
}

#[tokio::test]
async fn test_transport_failure_leaves_draft_retryable() {
    let h = harness().await;
    h.create(80).await;
    h.executor.set_unreachable(true);

    let err = h.apply(1, 0).await.unwrap_err();
    assert!(matches!(err, RolloutError::Transport(_)));
    assert!(err.is_retryable());
    assert_eq!(h.version(1).await.status, VersionStatus::Draft);

    h.executor.set_unreachable(false);
    h.apply(1, 0).await.unwrap();
    assert!(h.version(1).await.is_active());
}

#[tokio::test]
async fn test_failed_reapply_before_swap_keeps_status() {
    let h = harness().await;
    h.create(80).await;
    h.create(8080).await;
    h.apply(1, 0).await.unwrap();
    h.apply(2, 0).await.unwrap();

    h.executor
        .respond("cp -r", CommandOutput::failed(1, "disk full"));
    let err = h.apply(1, 0).await.unwrap_err();

    assert!(matches!(
        err,
        RolloutError::Protocol {
            phase: DeployPhase::BackingUp,
            ..
        }
    ));
    assert_eq!(h.version(1).await.status, VersionStatus::RolledBack);
    assert!(h.version(2).await.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_applies_on_one_host_are_exclusive() {
    let h = harness().await;
    h.create(80).await;
    h.create(8080).await;
    h.executor.set_delay(Duration::from_millis(50));

    let (first, second) = tokio::join!(h.apply(1, 0), h.apply(2, 0));

    let busy = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(RolloutError::HostBusy(_))))
        .count();
    assert_eq!(busy, 1);
    assert!(first.is_ok() || second.is_ok());
    assert!(h.executor.max_concurrent_swaps() <= 1);

    let versions = h.service.list_versions("web-1").await;
    assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_daemon_rolls_back_to_previous_good() {
    let h = harness().await;
    h.create(80).await;
    h.create(8080).await;
    h.apply(1, 0).await.unwrap();
    h.apply(2, 60).await.unwrap();
    assert_eq!(h.service.pending_health_checks(), 1);

    h.executor
        .respond("systemctl is-active", CommandOutput::ok("inactive\n"));
    let outcomes = h.service.shutdown().await;

    assert_eq!(outcomes, vec![WatchOutcome::RolledBack { to_version: 1 }]);
    assert!(h.version(1).await.is_active());

    let failed = h.version(2).await;
    assert_eq!(failed.status, VersionStatus::RolledBack);
    assert!(failed.rollback_triggered);
    assert!(failed
        .rollback_reason
        .unwrap()
        .contains("Nginx service is not active (inactive)"));
    assert!(!failed.health_check.unwrap().healthy);

    assert!(h
        .alert_titles()
        .contains(&"Automatic Rollback Triggered - web-1".to_string()));
    let operations: Vec<String> = h
        .audit
        .recent(Some("web-1"), 20)
        .into_iter()
        .map(|e| e.operation)
        .collect();
    assert!(operations.contains(&"nginx_config_health_check".to_string()));
    assert!(operations.contains(&"nginx_config_rollback".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_error_spike_triggers_rollback() {
    let h = harness().await;
    h.create(80).await;
    h.create(8080).await;
    h.apply(1, 0).await.unwrap();
    h.apply(2, 60).await.unwrap();

    h.executor.respond("journalctl", CommandOutput::ok("42\n"));
    let outcomes = h.service.shutdown().await;

    assert_eq!(outcomes, vec![WatchOutcome::RolledBack { to_version: 1 }]);
    let details = h.version(2).await.health_check.unwrap().details;
    assert_eq!(details.error_count, Some(42));
    assert_eq!(details.error_threshold, 10);
}

#[tokio::test(start_paused = true)]
async fn test_healthy_version_stays_active() {
    let h = harness().await;
    h.create(80).await;
    h.apply(1, 60).await.unwrap();

    let outcomes = h.service.shutdown().await;

    assert_eq!(outcomes, vec![WatchOutcome::Healthy { check_ran: true }]);
    let v = h.version(1).await;
    assert!(v.is_active());
    assert!(v.health_check.unwrap().healthy);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_first_version_has_nothing_to_restore() {
    let h = harness().await;
    h.create(80).await;
    h.apply(1, 60).await.unwrap();
    h.executor
        .respond("systemctl is-active", CommandOutput::ok("failed\n"));

    let outcomes = h.service.shutdown().await;

    assert!(matches!(outcomes.as_slice(), [WatchOutcome::RollbackFailed { .. }]));
    let v = h.version(1).await;
    assert_eq!(v.status, VersionStatus::Applied);
    assert!(v.rollback_triggered);
    assert!(!v.is_active());

    let critical: Vec<_> = h
        .notifier
        .sent()
        .into_iter()
        .filter(|a| a.severity == Severity::Critical)
        .map(|a| a.title)
        .collect();
    assert!(critical.contains(&"Automatic Rollback Failed - web-1".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_superseded_watcher_exits_without_judging() {
    let h = harness().await;
    h.create(80).await;
    h.create(8080).await;
    h.apply(1, 60).await.unwrap();
    h.apply(2, 0).await.unwrap();
    h.executor
        .respond("systemctl is-active", CommandOutput::ok("inactive\n"));
    h.executor.clear_calls();

    let outcomes = h.service.shutdown().await;

    assert_eq!(outcomes, vec![WatchOutcome::Stale]);
    assert!(h.executor.calls().is_empty());
    assert!(h.version(2).await.is_active());
    assert!(h.version(1).await.health_check.is_none());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_unreachable_host_assumed_healthy_by_default() {
    let h = harness().await;
    h.create(80).await;
    h.apply(1, 60).await.unwrap();
    h.executor.set_unreachable(true);

    let outcomes = h.service.shutdown().await;

    assert_eq!(outcomes, vec![WatchOutcome::Healthy { check_ran: false }]);
    let check = h.version(1).await.health_check.unwrap();
    assert!(check.healthy);
    assert!(!check.check_ran);
    assert!(check.details.probe_error.is_some());
    assert!(h.version(1).await.is_active());
    assert_eq!(h.alert_titles(), vec!["Health Check Could Not Run - web-1"]);
    assert!(logs_contain("Health probe could not reach host"));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_health_command_is_a_failed_check() {
    let h = harness_with(RolloutSettings {
        command_timeout_secs: 1,
        remote_test_timeout_secs: 1,
        ..RolloutSettings::default()
    })
    .await;
    h.create(80).await;
    h.apply(1, 60).await.unwrap();
    h.executor.set_delay(Duration::from_secs(5));

    let outcomes = h.service.shutdown().await;

    assert!(matches!(outcomes.as_slice(), [WatchOutcome::CheckFailed { .. }]));
    let v = h.version(1).await;
    assert!(v.is_active());
    assert!(v.health_check.is_none());
    assert_eq!(h.alert_titles(), vec!["Health Check Failed - web-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_host_can_be_treated_as_unhealthy() {
    let h = harness_with(RolloutSettings {
        unreachable_policy: UnreachablePolicy::TreatUnhealthy,
        ..RolloutSettings::default()
    })
    .await;
    h.create(80).await;
    h.create(8080).await;
    h.apply(1, 0).await.unwrap();
    h.apply(2, 60).await.unwrap();
    h.executor.set_unreachable(true);

    let outcomes = h.service.shutdown().await;

    // The restore itself cannot reach the host either
    assert!(matches!(outcomes.as_slice(), [WatchOutcome::RollbackFailed { .. }]));
    assert!(h.version(2).await.rollback_triggered);
    assert!(h
        .alert_titles()
        .contains(&"Automatic Rollback Failed - web-1".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_watchers_never_run() {
    let h = harness_with(RolloutSettings {
        shutdown_mode: crate::config::ShutdownMode::Abandon,
        ..RolloutSettings::default()
    })
    .await;
    h.create(80).await;
    h.apply(1, 600).await.unwrap();
    h.executor.clear_calls();

    let outcomes = h.service.shutdown().await;

    assert!(outcomes.is_empty());
    assert!(h.executor.calls().is_empty());
    assert_eq!(h.service.pending_health_checks(), 0);
}

#[tokio::test]
async fn test_rollback_without_target_changes_nothing() {
    let h = harness().await;
    h.create(80).await;

    let err = h.service.rollback("web-1", None, "alice").await.unwrap_err();

    assert!(matches!(err, RolloutError::NoRollbackTarget(_)));
    assert!(h.executor.calls().is_empty());
    assert_eq!(h.version(1).await.status, VersionStatus::Draft);
}

#[tokio::test]
async fn test_rollback_to_undeployed_version_is_rejected() {
    let h = harness().await;
    h.create(80).await;
    h.create(8080).await;
    h.apply(1, 0).await.unwrap();

    let err = h
        .service
        .rollback("web-1", Some(2), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, RolloutError::NoRollbackTarget(_)));
    assert!(h.version(1).await.is_active());
}

#[tokio::test]
async fn test_manual_rollback_restores_explicit_target() {
    let h = harness().await;
    h.create(80).await;
    h.create(8080).await;
    h.create(9090).await;
    h.apply(1, 0).await.unwrap();
    h.apply(2, 0).await.unwrap();
    h.apply(3, 0).await.unwrap();

    let outcome = h.service.rollback("web-1", Some(1), "bob").await.unwrap();

    assert_eq!(outcome.version, 1);
    assert_eq!(outcome.superseded, vec![3]);
    assert!(h.version(1).await.is_active());
    assert_eq!(h.version(3).await.status, VersionStatus::RolledBack);
    // Rollback never starts a new watch window
    assert_eq!(h.service.pending_health_checks(), 0);

    let entry = h.audit.find(&outcome.correlation_id).unwrap();
    assert_eq!(entry.operation, "nginx_config_rollback");
    assert_eq!(entry.actor, "bob");
    assert_eq!(entry.status, AuditStatus::Success);
}

#[tokio::test]
async fn test_rollback_defaults_to_last_known_good() {
    let h = harness().await;
    h.create(80).await;
    h.create(8080).await;
    h.apply(1, 0).await.unwrap();
    h.apply(2, 0).await.unwrap();

    let outcome = h.service.rollback("web-1", None, "bob").await.unwrap();

    // The active version is itself the most recent good one
    assert_eq!(outcome.version, 2);
    assert!(outcome.superseded.is_empty());
}

#[tokio::test]
async fn test_rollback_failure_alerts_and_keeps_state() {
    let h = harness().await;
    h.create(80).await;
    h.create(8080).await;
    h.apply(1, 0).await.unwrap();
    h.apply(2, 0).await.unwrap();
    h.executor.set_unreachable(true);

    let err = h.service.rollback("web-1", Some(1), "bob").await.unwrap_err();

    assert!(matches!(err, RolloutError::Transport(_)));
    assert!(h.version(2).await.is_active());
    assert_eq!(h.version(1).await.status, VersionStatus::RolledBack);
    assert_eq!(h.alert_titles(), vec!["Nginx Config Rollback Failed - web-1"]);
}

#[tokio::test]
async fn test_scheduled_apply_waits_for_its_time() {
    let h = harness().await;
    h.create(80).await;
    let at = Utc::now() + ChronoDuration::hours(1);

    let outcome = h
        .service
        .apply(ApplyRequest {
            key: VersionKey::new("web-1", 1),
            actor: "alice".to_string(),
            dry_run: false,
            scheduled_at: Some(at),
            watch_window_secs: Some(0),
        })
        .await
        .unwrap();

    assert!(matches!(outcome, ApplyOutcome::Scheduled { scheduled_at, .. } if scheduled_at == at));
    let v = h.version(1).await;
    assert_eq!(v.status, VersionStatus::Draft);
    assert_eq!(v.scheduled_apply_at, Some(at));
    assert!(h.executor.calls().is_empty());
    assert!(h.service.apply_due().await.is_empty());
}

#[tokio::test]
async fn test_due_scheduled_versions_are_applied() {
    let h = harness().await;
    h.create(80).await;
    let key = VersionKey::new("web-1", 1);
    h.service
        .store()
        .mark_scheduled(&key, Utc::now() - ChronoDuration::minutes(1), None, "cid")
        .await
        .unwrap();

    let results = h.service.apply_due().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, key);
    assert!(matches!(results[0].1, Ok(ApplyOutcome::Applied { .. })));
    let v = h.version(1).await;
    assert!(v.is_active());
    assert!(v.scheduled_apply_at.is_none());
    // The version's own window applies to scheduled deploys
    assert_eq!(h.service.pending_health_checks(), 1);
    assert!(h.service.apply_due().await.is_empty());
}

#[tokio::test]
async fn test_scheduled_reapply_of_rolled_back_version() {
    let h = harness().await;
    h.create(80).await;
    h.create(8080).await;
    h.apply(1, 0).await.unwrap();
    h.apply(2, 0).await.unwrap();
    assert_eq!(h.version(1).await.status, VersionStatus::RolledBack);

    let key = VersionKey::new("web-1", 1);
    h.service
        .store()
        .mark_scheduled(&key, Utc::now() - ChronoDuration::minutes(1), Some(0), "cid")
        .await
        .unwrap();

    let results = h.service.apply_due().await;

    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].1, Ok(ApplyOutcome::Applied { version: 1, .. })));
    assert!(h.version(1).await.is_active());
    assert_eq!(h.version(2).await.status, VersionStatus::RolledBack);
    assert!(h.version(1).await.scheduled_apply_at.is_none());
}

#[tokio::test]
async fn test_scheduled_apply_keeps_requested_window() {
    let h = harness().await;
    h.create(80).await;

    let outcome = h
        .service
        .apply(ApplyRequest {
            key: VersionKey::new("web-1", 1),
            actor: "alice".to_string(),
            dry_run: false,
            scheduled_at: Some(Utc::now() + ChronoDuration::milliseconds(200)),
            watch_window_secs: Some(0),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, ApplyOutcome::Scheduled { .. }));
    assert_eq!(h.version(1).await.scheduled_watch_window_secs, Some(0));

    tokio::time::sleep(Duration::from_millis(400)).await;
    let results = h.service.apply_due().await;

    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0].1,
        Ok(ApplyOutcome::Applied { watch_window_secs: 0, .. })
    ));
    assert_eq!(h.service.pending_health_checks(), 0);
    let v = h.version(1).await;
    assert_eq!(v.watch_window_secs, 0);
    assert!(v.scheduled_watch_window_secs.is_none());
}

#[tokio::test]
async fn test_scheduled_apply_gives_up_after_retryable_failures() {
    let h = harness_with(RolloutSettings {
        max_scheduled_attempts: 2,
        ..RolloutSettings::default()
    })
    .await;
    h.create(80).await;
    let key = VersionKey::new("web-1", 1);
    h.service
        .store()
        .mark_scheduled(&key, Utc::now() - ChronoDuration::minutes(1), None, "cid")
        .await
        .unwrap();
    h.executor.set_unreachable(true);

    let first = h.service.apply_due().await;
    assert!(matches!(first[0].1, Err(RolloutError::Transport(_))));
    let v = h.version(1).await;
    assert_eq!(v.status, VersionStatus::Draft);
    assert!(v.scheduled_apply_at.is_some());
    assert_eq!(v.scheduled_attempts, 1);
    assert!(!h
        .alert_titles()
        .contains(&"Nginx Scheduled Apply Abandoned - web-1".to_string()));

    let second = h.service.apply_due().await;
    assert_eq!(second.len(), 1);
    let v = h.version(1).await;
    assert_eq!(v.status, VersionStatus::Draft);
    assert!(v.scheduled_apply_at.is_none());
    assert!(h
        .alert_titles()
        .contains(&"Nginx Scheduled Apply Abandoned - web-1".to_string()));

    assert!(h.service.apply_due().await.is_empty());
}

#[tokio::test]
async fn test_scheduled_apply_dropped_after_protocol_failure() {
    let h = harness().await;
    h.create(80).await;
    h.create(8080).await;
    h.apply(1, 0).await.unwrap();
    h.apply(2, 0).await.unwrap();
    let key = VersionKey::new("web-1", 1);
    h.service
        .store()
        .mark_scheduled(&key, Utc::now() - ChronoDuration::minutes(1), None, "cid")
        .await
        .unwrap();
    h.executor
        .respond("systemctl reload", CommandOutput::failed(1, "reload refused"));

    let results = h.service.apply_due().await;

    assert!(matches!(results[0].1, Err(RolloutError::Protocol { .. })));
    assert!(h.version(1).await.scheduled_apply_at.is_none());
    assert!(h.service.apply_due().await.is_empty());
}

#[tokio::test]
async fn test_validate_previews_without_creating_versions() {
    let h = harness().await;

    let result = h
        .service
        .validate("web-1", "server {\n    listen 80;\n", true)
        .await
        .unwrap();

    assert!(!result.is_valid);
    assert_eq!(result.failure, Some(FailureKind::Syntax));
    assert!(h.service.list_versions("web-1").await.is_empty());
    assert!(h.service.validate("../etc", "x", true).await.is_err());
}
