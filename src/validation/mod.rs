//! 配置校验模块
//!
//! 静态策略检查加上可选的远端 `nginx -t` 测试，合并为一个 [`ValidationResult`]

mod blocks;
mod config;
mod static_checks;

pub use blocks::{check_braces, extract_server_blocks, parse_body_size, BraceCheck, ServerBlock};
pub use config::ValidatorPolicy;
pub use remote_test::{RemoteTestOutcome, RemoteTestRunner};
pub use static_checks::{StaticReport, StaticValidator};

use crate::types::ValidationResult;
use tracing::info;

/// 组合校验器
///
/// 静态检查总是执行；远端测试只在非 dry-run 且静态检查通过时执行
pub struct ConfigValidator {
    static_validator: StaticValidator,
    remote: RemoteTestRunner,
}

impl ConfigValidator {
    pub fn new(static_validator: StaticValidator, remote: RemoteTestRunner) -> Self {
        Self {
            static_validator,
            remote,
        }
    }

    pub fn static_validator(&self) -> &StaticValidator {
        &self.static_validator
    }

    /// 校验配置文本
    pub async fn validate(
        &self,
        host: &str,
        content: &str,
        dry_run: bool,
        correlation_id: &str,
    ) -> ValidationResult {
        let report = self.static_validator.check(content);
        let mut errors = report.errors;
        let mut raw_output = None;

        if !dry_run && errors.is_empty() {
            let outcome = self.remote.run(host, content, correlation_id).await;
            errors.extend(outcome.errors);
            raw_output = outcome.raw_output;
        }

        let result =
            ValidationResult::from_findings(correlation_id, errors, report.warnings, raw_output);
        info!(
            "Validation for {} [{}]: valid={}, {} errors, {} warnings",
            host,
            correlation_id,
            result.is_valid,
            result.errors.len(),
            result.warnings.len()
        );
        result
    }
}

#[cfg(test)]
#[path = "blocks_test.rs"]
mod blocks_tests;

#[cfg(test)]
#[path = "static_checks_test.rs"]
mod static_checks_tests;

#[cfg(test)]
#[path = "remote_test_test.rs"]
mod remote_test_tests;

#[cfg(test)]
#[path = "config_test.rs"]
mod config_tests;
