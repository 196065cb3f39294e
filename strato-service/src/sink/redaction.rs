//! Sensitive-field redaction
//!
//! Applied to every field map before enqueue. Rules, in evaluation order per
//! field:
//!
//! 1. Values that are already a redaction sentinel pass through unchanged, so
//!    redaction is idempotent.
//! 2. `card_bin`, `card_brand`, `card_type` are explicit exceptions.
//! 3. Number-bearing keys (account/tax/card/routing number variants) keep only
//!    the last four digits of the normalized digit string.
//! 4. Keys containing a sensitive substring are replaced with `[REDACTED]`.
//! 5. Error-valued fields with long or input-echoing text become
//!    `[SANITIZED_ERROR]`.
//! 6. User-generated-content keys become `[USER_CONTENT_<n>_CHARS]`.
//! 7. Strings longer than 200 characters become `[LARGE_STRING_<n>_CHARS]`.

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

/// Sentinel for fully redacted values
pub const REDACTED: &str = "[REDACTED]";

/// Sentinel for sanitized error values
pub const SANITIZED_ERROR: &str = "[SANITIZED_ERROR]";

const MAX_STRING_LEN: usize = 200;
const MAX_ERROR_LEN: usize = 100;

static SENSITIVE_SUBSTRINGS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "password",
        "token",
        "secret",
        "key",
        "auth",
        "credential",
        "ssn",
        "pin",
        "cvv",
        "private",
        "confidential",
        "phone",
        "email",
    ]
});

static PARTIAL_MASK_KEYS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "accountnumber",
        "cardnumber",
        "taxnumber",
        "taxid",
        "routingnumber",
    ]
});

static EXCEPTION_KEYS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["card_bin", "card_brand", "card_type"]);

static USER_CONTENT_KEYS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "body",
        "request_body",
        "user_input",
        "query",
        "search",
        "message",
        "comment",
        "description",
    ]
});

/// Key with separators stripped, for variant-tolerant matching
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn is_error_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower == "error" || lower == "err" || lower.ends_with("_error")
}

/// True for any value this module could itself have produced
fn is_sentinel(value: &Value) -> bool {
    let Some(s) = value.as_str() else {
        return false;
    };
    if s == REDACTED || s == SANITIZED_ERROR {
        return true;
    }
    if let Some(inner) = s.strip_prefix('[').and_then(|s| s.strip_suffix("_CHARS]")) {
        for prefix in ["USER_CONTENT_", "LARGE_STRING_"] {
            if let Some(digits) = inner.strip_prefix(prefix) {
                return !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit());
            }
        }
        return false;
    }
    // Masked number: leading asterisks followed by the preserved four digits
    s.len() > 4
        && s.ends_with(|c: char| c.is_ascii_digit())
        && s.chars().rev().take(4).all(|c| c.is_ascii_digit())
        && s.chars().rev().skip(4).all(|c| c == '*')
        && s.starts_with('*')
}

/// Mask a number-bearing value, preserving the last four digits
fn mask_number(value: &Value) -> Value {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return Value::String(REDACTED.to_string());
    }
    let masked: String = "*".repeat(digits.len() - 4);
    let last4 = &digits[digits.len() - 4..];
    Value::String(format!("{}{}", masked, last4))
}

fn value_char_len(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    }
}

/// Redact one field value according to the policy
pub fn redact_value(key: &str, value: &Value) -> Value {
    if is_sentinel(value) {
        return value.clone();
    }

    let lower = key.to_ascii_lowercase();
    if EXCEPTION_KEYS.iter().any(|k| *k == lower) {
        return value.clone();
    }

    let normalized = normalize_key(key);
    if PARTIAL_MASK_KEYS.iter().any(|k| normalized.contains(k)) {
        return mask_number(value);
    }

    if SENSITIVE_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
        return Value::String(REDACTED.to_string());
    }

    if is_error_key(key) {
        if let Some(text) = value.as_str() {
            let lower_text = text.to_ascii_lowercase();
            if text.chars().count() > MAX_ERROR_LEN
                || lower_text.contains("input")
                || lower_text.contains("invalid")
            {
                return Value::String(SANITIZED_ERROR.to_string());
            }
        }
        return value.clone();
    }

    if USER_CONTENT_KEYS.iter().any(|k| *k == lower) {
        return Value::String(format!("[USER_CONTENT_{}_CHARS]", value_char_len(value)));
    }

    if let Some(s) = value.as_str() {
        if s.chars().count() > MAX_STRING_LEN {
            return Value::String(format!("[LARGE_STRING_{}_CHARS]", s.chars().count()));
        }
    }

    value.clone()
}

/// Redact every field in place
pub fn redact_fields(fields: &mut Map<String, Value>) {
    let keys: Vec<String> = fields.keys().cloned().collect();
    for key in keys {
        if let Some(value) = fields.get(&key) {
            let redacted = redact_value(&key, value);
            fields.insert(key, redacted);
        }
    }
}
