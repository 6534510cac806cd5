use super::VersionKey;
use crate::error::{Result, RolloutError};
use sha2::{Digest, Sha256};

const MAX_IDENTIFIER_LEN: usize = 253;

/// Hex SHA-256 of a plaintext configuration body
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Fresh correlation id tying audit entries, stored results and alerts
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// RocksDB key of a version; zero padded so keys sort by version number
pub fn make_version_key(key: &VersionKey) -> Vec<u8> {
    format!("{}/{:020}", key.host_id, key.version).into_bytes()
}

/// RocksDB key holding the last issued version number of a host
pub fn make_counter_key(host_id: &str) -> Vec<u8> {
    format!("next_version/{}", host_id).into_bytes()
}

/// Host ids and config names end up in remote file paths and store keys
pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > MAX_IDENTIFIER_LEN {
        return Err(RolloutError::validation(format!(
            "{} must be between 1 and {} characters",
            kind, MAX_IDENTIFIER_LEN
        )));
    }

    if value.starts_with('.') {
        return Err(RolloutError::validation(format!(
            "{} cannot start with '.'",
            kind
        )));
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(RolloutError::validation(format!(
            "{} may only contain letters, digits, '_', '.' and '-': {}",
            kind, value
        )));
    }

    Ok(())
}
