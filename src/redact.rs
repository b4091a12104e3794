//! Secret masking for logs, traces and session snapshots.
//!
//! Two layers: values the engine knows are secrets (resolved from the
//! agent's `secrets:` section) are masked exactly, and a regex catalogue
//! catches well-known credential shapes that slipped in some other way.

use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Placeholder for redacted content
pub const REDACTED: &str = "[REDACTED]";

/// Secret values shorter than this are not masked by substring; masking
/// `"a"` everywhere would destroy unrelated text.
const MIN_MASK_LEN: usize = 4;

static SECRET_PATTERNS: OnceLock<Vec<SecretPattern>> = OnceLock::new();

struct SecretPattern {
    name: &'static str,
    regex: Regex,
}

fn get_patterns() -> &'static Vec<SecretPattern> {
    SECRET_PATTERNS.get_or_init(|| {
        vec![
            SecretPattern {
                name: "api_key",
                regex: Regex::new(r#"(?i)(api[_-]?key|apikey)\s*[=:]\s*["']?([a-zA-Z0-9_\-]{20,})["']?"#).unwrap(),
            },
            SecretPattern {
                name: "bearer_token",
                regex: Regex::new(r#"(?i)(bearer\s+)([a-zA-Z0-9_\-\.]{20,})"#).unwrap(),
            },
            SecretPattern {
                name: "openai_key",
                regex: Regex::new(r#"(sk-[a-zA-Z0-9_\-]{32,})"#).unwrap(),
            },
            SecretPattern {
                name: "github_token",
                regex: Regex::new(r#"(ghp_[a-zA-Z0-9]{36}|github_pat_[a-zA-Z0-9_]{22,})"#).unwrap(),
            },
            SecretPattern {
                name: "slack_token",
                regex: Regex::new(r#"xox[baprs]-[a-zA-Z0-9-]+"#).unwrap(),
            },
            SecretPattern {
                name: "password",
                regex: Regex::new(r#"(?i)(password|passwd|pwd)\s*[=:]\s*["']?([^\s"']{8,})["']?"#).unwrap(),
            },
        ]
    })
}

/// Redact well-known credential shapes from a string.
pub fn redact_secrets(input: &str) -> Cow<'_, str> {
    let mut result = Cow::Borrowed(input);

    for pattern in get_patterns() {
        if pattern.regex.is_match(&result) {
            let replacement = format!("{}={}", pattern.name, REDACTED);
            result = Cow::Owned(
                pattern
                    .regex
                    .replace_all(&result, replacement.as_str())
                    .into_owned(),
            );
        }
    }

    result
}

/// Replace every occurrence of a known secret value with [`REDACTED`].
pub fn mask_known<'a, S: AsRef<str>>(input: &'a str, secrets: &[S]) -> Cow<'a, str> {
    let mut result = Cow::Borrowed(input);
    for secret in secrets {
        let secret = secret.as_ref();
        if secret.len() >= MIN_MASK_LEN && result.contains(secret) {
            result = Cow::Owned(result.replace(secret, REDACTED));
        }
    }
    result
}

/// Mask known secret values inside a JSON value, recursively.
pub fn mask_json<S: AsRef<str>>(value: &mut Value, secrets: &[S]) {
    match value {
        Value::String(s) => {
            let masked = match mask_known(s, secrets) {
                Cow::Owned(m) => Some(m),
                Cow::Borrowed(_) => None,
            };
            if let Some(m) = masked {
                *s = m;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| mask_json(v, secrets)),
        Value::Object(map) => map.values_mut().for_each(|v| mask_json(v, secrets)),
        _ => {}
    }
}

/// Apply the regex catalogue to a JSON value, and blank out string fields
/// whose key names a credential.
pub fn redact_json(value: &mut Value) {
    match value {
        Value::String(s) => {
            let redacted = match redact_secrets(s) {
                Cow::Owned(r) => Some(r),
                Cow::Borrowed(_) => None,
            };
            if let Some(r) = redacted {
                *s = r;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_json),
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if val.is_string() && is_sensitive_key(key) {
                    *val = Value::String(REDACTED.to_string());
                } else {
                    redact_json(val);
                }
            }
        }
        _ => {}
    }
}

/// Whether a field name suggests a credential.
pub fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    [
        "password",
        "passwd",
        "secret",
        "token",
        "api_key",
        "apikey",
        "credential",
        "authorization",
        "bearer",
    ]
    .iter()
    .any(|p| key_lower.contains(p))
}
