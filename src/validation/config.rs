//! 校验策略模块
//!
//! 定义静态校验使用的禁用指令、危险路径、推荐安全头以及请求体大小上限

use crate::config::ValidatorSettings;
use crate::error::{Result, RolloutError};
use regex::RegexBuilder;

const MB: u64 = 1024 * 1024;

/// 静态校验策略
///
/// # Examples
///
/// ```rust
/// use confguard::validation::ValidatorPolicy;
///
/// let policy = ValidatorPolicy::default();
/// assert!(policy.validate().is_ok());
/// assert_eq!(policy.max_body_size_bytes, 100 * 1024 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct ValidatorPolicy {
    /// 子串匹配的禁用指令
    pub forbidden_directives: Vec<String>,
    /// 大小写不敏感的危险路径正则
    pub dangerous_patterns: Vec<String>,
    /// 缺失时给出警告的安全响应头
    pub recommended_headers: Vec<String>,
    /// `client_max_body_size` 上限（字节）
    pub max_body_size_bytes: u64,
}

impl Default for ValidatorPolicy {
    fn default() -> Self {
        Self {
            forbidden_directives: vec![
                "exec".to_string(),
                "lua_code_cache off".to_string(),
                "perl_modules".to_string(),
                "perl_require".to_string(),
            ],
            dangerous_patterns: vec![
                r"/etc/passwd".to_string(),
                r"/etc/shadow".to_string(),
                r"/root/".to_string(),
                r"/home/[^/]*/\.".to_string(),
                r"/var/log/".to_string(),
                r"/proc/".to_string(),
            ],
            recommended_headers: vec![
                "X-Content-Type-Options".to_string(),
                "X-Frame-Options".to_string(),
                "X-XSS-Protection".to_string(),
            ],
            max_body_size_bytes: 100 * MB,
        }
    }
}

impl ValidatorPolicy {
    /// 从应用配置构建策略
    pub fn from_settings(settings: &ValidatorSettings) -> Self {
        let mut policy = Self::default();
        policy.max_body_size_bytes = settings.max_body_size_mb.saturating_mul(MB);
        for directive in &settings.extra_forbidden_directives {
            if !policy.forbidden_directives.contains(directive) {
                policy.forbidden_directives.push(directive.clone());
            }
        }
        policy
    }

    /// 严格策略
    ///
    /// 额外禁止动态加载模块，并要求 HSTS 与 CSP 响应头
    pub fn strict() -> Self {
        let mut policy = Self::default();
        policy.forbidden_directives.push("load_module".to_string());
        policy
            .recommended_headers
            .push("Strict-Transport-Security".to_string());
        policy
            .recommended_headers
            .push("Content-Security-Policy".to_string());
        policy.max_body_size_bytes = 10 * MB;
        policy
    }

    /// 校验策略本身是否合法
    pub fn validate(&self) -> Result<()> {
        if self.max_body_size_bytes == 0 {
            return Err(RolloutError::validation(
                "max_body_size_bytes must be greater than 0",
            ));
        }

        if self.forbidden_directives.iter().any(|d| d.trim().is_empty()) {
            return Err(RolloutError::validation(
                "forbidden directives cannot be empty",
            ));
        }

        for pattern in &self.dangerous_patterns {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    RolloutError::validation(format!(
                        "invalid dangerous pattern '{}': {}",
                        pattern, e
                    ))
                })?;
        }

        Ok(())
    }
}
