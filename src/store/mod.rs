// Module declarations
mod constants;
mod types;
mod store;
mod persistence;
mod version_ops;
mod lifecycle;
mod queries;

// Re-export public types and functions
pub use constants::{CF_META, CF_VERSIONS};
pub use types::VersionStore;
