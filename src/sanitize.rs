//! Redaction of remote diagnostics and error messages before they are
//! stored, logged or sent out in alerts.

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum length of a sanitized error message
pub const MAX_ERROR_LEN: usize = 500;

/// Maximum length of sanitized raw diagnostic output
pub const MAX_RAW_OUTPUT_LEN: usize = 8 * 1024;

static SENSITIVE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[^\s]*/(config|secret|key|password)[^\s]*").expect("static regex")
});

static SECRET_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|key|secret|token)[\s=:]+[^\s]+").expect("static regex")
});

static AUTH_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(auth_basic_user_file\s+)[^;]+;").expect("static regex")
});

static PEM_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)(-----BEGIN [^-]+-----)(.*?)(-----END [^-]+-----)")
        .expect("static regex")
});

/// Sanitize an error message: flatten it to one line, redact sensitive paths
/// and credential assignments, and cap its length.
pub fn sanitize_error(message: &str) -> String {
    redact(&message.replace(['\r', '\n'], " "), MAX_ERROR_LEN)
        .trim()
        .to_string()
}

/// Sanitize multi-line diagnostic output, keeping its line structure.
pub fn sanitize_output(output: &str) -> String {
    redact(output, MAX_RAW_OUTPUT_LEN)
}

fn redact(text: &str, limit: usize) -> String {
    let text = SENSITIVE_PATH.replace_all(text, "[REDACTED_PATH]");
    let text = SECRET_ASSIGNMENT.replace_all(&text, "${1}=[REDACTED]");
    truncate_chars(&text, limit)
}

/// Mask credential references and certificate bodies in configuration text
/// shown to operators.
pub fn mask_sensitive_content(content: &str) -> String {
    let masked = AUTH_FILE.replace_all(content, "${1}[MASKED_AUTH_FILE];");
    PEM_BLOCK
        .replace_all(&masked, "${1}[MASKED_CERTIFICATE]${3}")
        .into_owned()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
