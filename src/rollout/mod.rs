//! Apply, rollback and post-deploy health checking for managed hosts.
//!
//! [`RolloutService`] is the entry point. It owns a [`RolloutOrchestrator`]
//! that serializes work per host through [`HostLocks`], a
//! [`RollbackCoordinator`] and a [`HealthWatcher`] for the watch windows.

pub mod deploy;
pub mod health;
pub mod locks;
pub mod orchestrator;
pub mod phase;
pub mod rollback;
pub mod service;

#[cfg(test)]
mod tests;

pub use deploy::{DeployProtocol, DeployReport, DeployTarget};
pub use health::{HealthWatcher, WatchOutcome};
pub use locks::{HostGuard, HostLocks};
pub use orchestrator::{ApplyOutcome, ApplyRequest, RolloutOrchestrator};
pub use phase::DeployPhase;
pub use rollback::{RollbackCause, RollbackCoordinator, RollbackOutcome};
pub use service::{CreateVersionRequest, HostStatus, RolloutService, ServiceParts};
