// ARCHITECTURE: Sanitization Engine - Pure Input Hygiene Functions
//
// Everything in this module is a pure function over its input: text
// sanitization, recursive payload sanitization, heuristic injection-pattern
// detection, and password/file-upload validation. Pattern detection is
// defense-in-depth only — it is not a substitute for the parameterized
// queries owned by the data-access layer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Ordered pattern classes. Any single match flags the input.
static SUSPICIOUS_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "sql_keywords",
            Regex::new(
                r"(?i)\b(union[\s(]+select|select\s+.+\bfrom\b|insert\s+into|delete\s+from|drop\s+(table|database)|truncate\s+table|alter\s+table)",
            )
            .unwrap(),
        ),
        (
            "sql_tautology",
            Regex::new(r#"(?i)['"]\s*(or|and)\s+['"]?[\w\s]*['"]?\s*=|\b(or|and)\s+\d+\s*=\s*\d+|--|/\*"#)
                .unwrap(),
        ),
        (
            "xss",
            Regex::new(
                r"(?i)<\s*script|javascript\s*:|vbscript\s*:|on(load|error|click|mouseover|focus|submit)\s*=|<\s*iframe|<\s*embed|<\s*object|eval\s*\(",
            )
            .unwrap(),
        ),
        (
            "nosql_operator",
            Regex::new(r"\$(where|ne|gt|lt|regex)\b").unwrap(),
        ),
        (
            "path_traversal",
            Regex::new(r"\.\.[/\\]|\.\.%2[fF]|%2[eE]%2[eE]").unwrap(),
        ),
        (
            "shell_metacharacters",
            Regex::new(r"[;|]|&&|\$\(|\x60").unwrap(),
        ),
    ]
});

/// Sanitize a text value: strip control characters, drop the HTML-dangerous
/// characters `< > " '`, escape bare ampersands, collapse whitespace runs,
/// and trim. Idempotent: sanitizing sanitized text is a no-op.
pub fn sanitize_text(input: &str) -> String {
    let stripped: String = input
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\''))
        .collect();

    // Normalize before escaping so a second pass cannot double-escape.
    let escaped = stripped.replace("&amp;", "&").replace('&', "&amp;");

    WHITESPACE_RUN.replace_all(&escaped, " ").trim().to_string()
}

/// Recursively sanitize every string in a JSON value, object key names
/// included. Non-string scalars pass through unchanged.
pub fn deep_sanitize(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_text(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(deep_sanitize).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, val)| (sanitize_text(&key), deep_sanitize(val)))
                .collect(),
        ),
        other => other,
    }
}

/// Heuristic injection detection over the fixed, ordered pattern classes.
pub fn is_suspicious(input: &str) -> bool {
    suspicious_class(input).is_some()
}

/// The first pattern class the input matches, for audit event details.
pub fn suspicious_class(input: &str) -> Option<&'static str> {
    SUSPICIOUS_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(input))
        .map(|(class, _)| *class)
}

pub const MIN_PASSWORD_LEN: usize = 8;

/// Passwords that appear in every credential-stuffing wordlist.
const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "12345678",
    "123456789",
    "1234567890",
    "qwerty123",
    "qwertyuiop",
    "letmein1",
    "iloveyou",
    "admin123",
    "welcome1",
    "sunshine",
    "football",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordStrength {
    Weak,
    Medium,
    Strong,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordReport {
    pub valid: bool,
    pub strength: PasswordStrength,
    pub errors: Vec<String>,
}

/// Enforce minimum length, four character classes, the common-password
/// blocklist, and reject passwords that themselves look like injection
/// payloads. Strength is scored over length and class coverage.
pub fn validate_password(password: &str) -> PasswordReport {
    let mut errors = Vec::new();

    if password.len() < MIN_PASSWORD_LEN {
        errors.push(format!("must be at least {MIN_PASSWORD_LEN} characters"));
    }

    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| !c.is_alphanumeric());

    if !has_lower {
        errors.push("must contain a lowercase letter".to_string());
    }
    if !has_upper {
        errors.push("must contain an uppercase letter".to_string());
    }
    if !has_digit {
        errors.push("must contain a digit".to_string());
    }
    if !has_symbol {
        errors.push("must contain a symbol".to_string());
    }

    if COMMON_PASSWORDS.contains(&password.to_lowercase().as_str()) {
        errors.push("password is too common".to_string());
    }

    if is_suspicious(password) {
        errors.push("password contains a disallowed pattern".to_string());
    }

    let classes = [has_lower, has_upper, has_digit, has_symbol]
        .iter()
        .filter(|present| **present)
        .count();
    let length_bonus = if password.len() >= 12 {
        2
    } else if password.len() >= 10 {
        1
    } else {
        0
    };
    let score = classes + length_bonus;

    let valid = errors.is_empty();
    let strength = if !valid || score < 4 {
        PasswordStrength::Weak
    } else if score < 6 {
        PasswordStrength::Medium
    } else {
        PasswordStrength::Strong
    };

    PasswordReport {
        valid,
        strength,
        errors,
    }
}

/// Extensions that must never be accepted regardless of declared MIME type.
const EXECUTABLE_EXTENSIONS: &[&str] = &[
    ".exe", ".bat", ".cmd", ".com", ".scr", ".msi", ".dll", ".sh", ".ps1", ".jar", ".vbs",
];

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Validate an upload's declared name, size, and MIME type. All violations
/// are reported together rather than stopping at the first.
pub fn validate_file_upload(
    filename: &str,
    size: u64,
    mime_type: &str,
    allowed_mime_types: &[&str],
    max_bytes: u64,
) -> UploadReport {
    let mut errors = Vec::new();

    if size > max_bytes {
        errors.push(format!("file size {size} exceeds maximum of {max_bytes} bytes"));
    }

    if !allowed_mime_types
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
    {
        errors.push(format!("MIME type {mime_type} is not allowed"));
    }

    if is_suspicious(filename) {
        errors.push("filename contains a disallowed pattern".to_string());
    }

    // "report.pdf" has one extension; "report.pdf.exe" is smuggling a second.
    if filename.split('.').count() > 2 {
        errors.push("filename has multiple extensions".to_string());
    }

    let lowered = filename.to_lowercase();
    if EXECUTABLE_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext)) {
        errors.push("executable file extensions are not allowed".to_string());
    }

    UploadReport {
        valid: errors.is_empty(),
        errors,
    }
}
