// Column family names
pub const CF_VERSIONS: &str = "versions";
pub const CF_META: &str = "meta";
