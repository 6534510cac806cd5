//! Shared fakes for unit tests.

use crate::audit::MemoryAuditSink;
use crate::config::{RemoteLayout, RolloutSettings};
use crate::notify::{Notifier, Severity};
use crate::remote::{CommandOutput, RemoteError, RemoteExecutor};
use crate::rollout::{RolloutService, ServiceParts};
use crate::secrets::{AeadSecretStore, SecretStore};
use crate::store::VersionStore;
use crate::validation::ValidatorPolicy;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Execute { host: String, command: String },
    Write { host: String, path: String, content: String },
}

#[derive(Debug, Clone)]
enum Reply {
    Output(CommandOutput),
    Error(RemoteError),
}

/// Remote executor answering from a script of substring rules.
///
/// Rules are matched newest first so tests can override the healthy
/// defaults. Every call is recorded.
pub struct ScriptedExecutor {
    calls: Mutex<Vec<RemoteCall>>,
    rules: Mutex<Vec<(String, Reply)>>,
    write_error: Mutex<Option<RemoteError>>,
    unreachable: AtomicBool,
    delay: Mutex<Option<Duration>>,
    swaps_in_flight: AtomicUsize,
    max_swaps_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    /// A host whose daemon is active with no logged errors
    pub fn healthy() -> Arc<Self> {
        let executor = Self {
            calls: Mutex::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
            write_error: Mutex::new(None),
            unreachable: AtomicBool::new(false),
            delay: Mutex::new(None),
            swaps_in_flight: AtomicUsize::new(0),
            max_swaps_in_flight: AtomicUsize::new(0),
        };
        executor.respond("systemctl is-active", CommandOutput::ok("active\n"));
        executor.respond("journalctl", CommandOutput::ok("0\n"));
        Arc::new(executor)
    }

    pub fn respond(&self, pattern: &str, output: CommandOutput) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), Reply::Output(output)));
    }

    pub fn fail(&self, pattern: &str, error: RemoteError) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), Reply::Error(error)));
    }

    pub fn fail_writes(&self, error: RemoteError) {
        *self.write_error.lock().unwrap() = Some(error);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Delay every call, to widen race windows
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::Execute { command, .. } => Some(command),
                RemoteCall::Write { .. } => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::Write { path, content, .. } => Some((path, content)),
                RemoteCall::Execute { .. } => None,
            })
            .collect()
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.commands().iter().any(|c| c.starts_with(prefix))
    }

    pub fn max_concurrent_swaps(&self) -> usize {
        self.max_swaps_in_flight.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn unreachable_error(host: &str) -> RemoteError {
        RemoteError::Unreachable {
            host: host.to_string(),
            message: "connection refused".to_string(),
        }
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        host: &str,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        self.calls.lock().unwrap().push(RemoteCall::Execute {
            host: host.to_string(),
            command: command.to_string(),
        });

        let is_swap = command.starts_with("mv ");
        if is_swap {
            let now = self.swaps_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_swaps_in_flight.fetch_max(now, Ordering::SeqCst);
        }
        self.pause().await;
        if is_swap {
            self.swaps_in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Self::unreachable_error(host));
        }

        let reply = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone());

        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Error(error)) => Err(error),
            None => Ok(CommandOutput::ok("")),
        }
    }

    async fn write_file(&self, host: &str, path: &str, content: &str) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push(RemoteCall::Write {
            host: host.to_string(),
            path: path.to_string(),
            content: content.to_string(),
        });
        self.pause().await;

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Self::unreachable_error(host));
        }
        match self.write_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentAlert {
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

/// Notifier that only records what it was asked to send
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentAlert>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentAlert> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        severity: Severity,
        title: &str,
        message: &str,
        _details: serde_json::Value,
    ) {
        self.sent.lock().unwrap().push(SentAlert {
            severity,
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}

pub fn memory_audit() -> Arc<MemoryAuditSink> {
    Arc::new(MemoryAuditSink::new(100))
}

/// A rollout service over a temporary store and scripted hosts
pub struct ServiceRig {
    pub service: Arc<RolloutService>,
    pub executor: Arc<ScriptedExecutor>,
    pub audit: Arc<MemoryAuditSink>,
    pub notifier: Arc<RecordingNotifier>,
    _dir: tempfile::TempDir,
}

pub async fn service_rig(settings: RolloutSettings) -> ServiceRig {
    let dir = tempfile::tempdir().unwrap();
    let secrets: Arc<dyn SecretStore> =
        Arc::new(AeadSecretStore::from_base64(&AeadSecretStore::generate_key().unwrap()).unwrap());
    let store = Arc::new(VersionStore::open(dir.path(), secrets).await.unwrap());
    let executor = ScriptedExecutor::healthy();
    let audit = memory_audit();
    let notifier = Arc::new(RecordingNotifier::default());

    let service = RolloutService::new(ServiceParts {
        store,
        executor: executor.clone(),
        audit: audit.clone(),
        notifier: notifier.clone(),
        policy: ValidatorPolicy::default(),
        settings,
        layout: RemoteLayout::default(),
    })
    .unwrap();

    ServiceRig {
        service: Arc::new(service),
        executor,
        audit,
        notifier,
        _dir: dir,
    }
}

/// Minimal valid server block, free of advisory warnings except headers
pub fn server_block(name: &str, port: u16) -> String {
    format!(
        "server {{\n    listen {port};\n    server_name {name};\n    client_max_body_size 10m;\n    location / {{\n        proxy_pass http://127.0.0.1:9000;\n        proxy_set_header Host $host;\n        proxy_read_timeout 30s;\n    }}\n}}\n"
    )
}
