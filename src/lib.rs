pub mod app;
pub mod audit;
pub mod config;
pub mod diff;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod remote;
pub mod rollout;
pub mod sanitize;
pub mod secrets;
pub mod store;
pub mod types;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, RolloutError};
