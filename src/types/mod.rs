// 子模块声明
pub mod version;
pub mod results;
pub mod helpers;

// 重新导出所有公共类型
pub use version::*;
pub use results::*;
pub use helpers::*;

/// Identifier of a managed proxy host
pub type HostId = String;
