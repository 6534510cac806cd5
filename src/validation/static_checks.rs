//! 静态校验器
//!
//! 纯同步的词法与策略检查，不访问远端主机

use super::blocks::{check_braces, extract_server_blocks, parse_body_size, ServerBlock};
use super::config::ValidatorPolicy;
use crate::error::{Result, RolloutError};
use crate::types::{FailureKind, Finding};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::debug;

static LISTEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(?:^|[;{])\s*listen\s+[^;]*;").expect("static regex"));

static SERVER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(?:^|[;{])\s*server_name\s+[^;]*;").expect("static regex"));

static PROXY_PASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(?:^|[;{])\s*proxy_pass\s+").expect("static regex"));

static HOST_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"proxy_set_header\s+(?i:host)\s+").expect("static regex")
});

static BODY_SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:^|[;{])\s*client_max_body_size\s+([^;\s]+)\s*;").expect("static regex")
});

static BODY_SIZE_PRESENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"client_max_body_size\s+").expect("static regex"));

static READ_TIMEOUT_PRESENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"proxy_read_timeout\s+").expect("static regex"));

/// 静态检查的输出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticReport {
    pub errors: Vec<Finding>,
    pub warnings: Vec<String>,
}

impl StaticReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 静态校验器
///
/// 各项检查相互独立地累积错误，顺序固定：禁用指令、危险路径、花括号、
/// `server` 块结构，最后是建议性警告
///
/// # Examples
///
/// ```rust
/// use confguard::validation::StaticValidator;
///
/// let validator = StaticValidator::with_defaults().unwrap();
/// let report = validator.check("server { listen 80; server_name a.example; }");
/// assert!(report.is_valid());
/// ```
#[derive(Debug, Clone)]
pub struct StaticValidator {
    policy: ValidatorPolicy,
    dangerous: Vec<(String, Regex)>,
}

impl StaticValidator {
    pub fn new(policy: ValidatorPolicy) -> Result<Self> {
        policy.validate()?;

        let dangerous = policy
            .dangerous_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (pattern.clone(), re))
                    .map_err(|e| RolloutError::validation(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { policy, dangerous })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(ValidatorPolicy::default())
    }

    pub fn policy(&self) -> &ValidatorPolicy {
        &self.policy
    }

    /// 运行全部静态检查
    pub fn check(&self, content: &str) -> StaticReport {
        let mut report = StaticReport::default();

        self.check_forbidden(content, &mut report);
        self.check_dangerous(content, &mut report);

        if let Some(message) = check_braces(content).error_message() {
            report.errors.push(Finding::new(FailureKind::Syntax, message));
        }

        for block in extract_server_blocks(content) {
            self.check_server_block(&block, &mut report);
        }

        self.collect_warnings(content, &mut report);

        debug!(
            "Static validation finished: {} errors, {} warnings",
            report.errors.len(),
            report.warnings.len()
        );
        report
    }

    fn check_forbidden(&self, content: &str, report: &mut StaticReport) {
        for directive in &self.policy.forbidden_directives {
            if content.contains(directive.as_str()) {
                report.errors.push(Finding::new(
                    FailureKind::PolicyViolation,
                    format!("Forbidden directive '{}' detected", directive),
                ));
            }
        }
    }

    fn check_dangerous(&self, content: &str, report: &mut StaticReport) {
        for (pattern, re) in &self.dangerous {
            if re.is_match(content) {
                report.errors.push(Finding::new(
                    FailureKind::PolicyViolation,
                    format!("Dangerous include pattern detected: {}", pattern),
                ));
            }
        }
    }

    fn check_server_block(&self, block: &ServerBlock, report: &mut StaticReport) {
        let n = block.position;
        let text = block.text.as_str();

        if !LISTEN.is_match(text) {
            report.errors.push(Finding::new(
                FailureKind::Syntax,
                format!("Server block {}: Missing 'listen' directive", n),
            ));
        }

        if !SERVER_NAME.is_match(text) {
            report.errors.push(Finding::new(
                FailureKind::Syntax,
                format!("Server block {}: Missing 'server_name' directive", n),
            ));
        }

        if PROXY_PASS.is_match(text) && !HOST_HEADER.is_match(text) {
            report.errors.push(Finding::new(
                FailureKind::Syntax,
                format!("Server block {}: proxy_pass without proper Host header", n),
            ));
        }

        for caps in BODY_SIZE.captures_iter(text) {
            let raw = &caps[1];
            match parse_body_size(raw) {
                None => report.errors.push(Finding::new(
                    FailureKind::Syntax,
                    format!("Server block {}: Invalid client_max_body_size format: {}", n, raw),
                )),
                Some(0) => report.errors.push(Finding::new(
                    FailureKind::PolicyViolation,
                    format!(
                        "Server block {}: client_max_body_size 0 disables the upload limit",
                        n
                    ),
                )),
                Some(bytes) if bytes > self.policy.max_body_size_bytes => {
                    report.errors.push(Finding::new(
                        FailureKind::PolicyViolation,
                        format!("Server block {}: client_max_body_size too large: {}", n, raw),
                    ))
                }
                Some(_) => {}
            }
        }
    }

    fn collect_warnings(&self, content: &str, report: &mut StaticReport) {
        if !BODY_SIZE_PRESENT.is_match(content) {
            report.warnings.push(
                "Consider setting client_max_body_size to prevent large uploads".to_string(),
            );
        }

        if !READ_TIMEOUT_PRESENT.is_match(content) {
            report.warnings.push(
                "Consider setting proxy_read_timeout to prevent hanging connections".to_string(),
            );
        }

        for header in &self.policy.recommended_headers {
            if !content.contains(header.as_str()) {
                report
                    .warnings
                    .push(format!("Consider adding security header: {}", header));
            }
        }
    }
}
