//! Redaction of secrets from action descriptions and audit payloads.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Replacement text for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Default cap on a serialized audit payload.
pub const DEFAULT_PAYLOAD_CAP: usize = 4 * 1024;

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "authorization",
    "api_key",
    "apikey",
    "api-key",
    "cookie",
    "private_key",
    "credential",
];

static SECRET_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(bearer\s+[a-z0-9._~+/=-]{8,}|\b(sk|pk|rk)-[a-z0-9_-]{16,}|\bgh[pousr]_[a-z0-9]{20,}|\bxox[abprs]-[a-z0-9-]{10,}|\bAKIA[0-9A-Z]{16}\b)",
    )
    .expect("secret value regex is valid")
});

static SECRET_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|passwd|secret|token|api[_-]?key)=([^\s&]+)")
        .expect("secret assignment regex is valid")
});

/// Whether an object key names something that should never be logged.
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|k| key.contains(k))
}

/// Replace secret-shaped substrings in free text.
pub fn redact_text(text: &str) -> String {
    let text = SECRET_VALUE.replace_all(text, REDACTED);
    SECRET_ASSIGNMENT
        .replace_all(&text, format!("$1={REDACTED}").as_str())
        .into_owned()
}

/// Strip credentials from a URL: userinfo password and sensitive query values.
pub fn redact_url(raw: &str) -> String {
    let Ok(mut url) = url::Url::parse(raw) else {
        return redact_text(raw);
    };
    if url.password().is_some() {
        let _ = url.set_password(Some(REDACTED));
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if is_sensitive_key(&k) {
                REDACTED.to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    if !pairs.is_empty() {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
}

/// Recursively redact a JSON value: sensitive keys are masked, strings are scrubbed.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_sensitive_key(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_value(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::String(s) => Value::String(redact_text(s)),
        other => other.clone(),
    }
}

/// Cap a payload's serialized size. Oversized payloads become a truncated preview.
pub fn cap_payload(value: Value, max_bytes: usize) -> Value {
    let serialized = value.to_string();
    if serialized.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes.min(serialized.len());
    while !serialized.is_char_boundary(end) {
        end -= 1;
    }
    serde_json::json!({
        "truncated": true,
        "originalBytes": serialized.len(),
        "preview": &serialized[..end],
    })
}

/// Redact and cap in one step, as done before every audit write.
pub fn audit_projection(value: &Value, max_bytes: usize) -> Value {
    cap_payload(redact_value(value), max_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sensitive_keys_masked() {
        let redacted = redact_value(&json!({
            "url": "https://api.example.com",
            "headers": {"Authorization": "Bearer abcdefghijkl", "Accept": "json"},
            "apiKey": "k-123",
        }));
        assert_eq!(redacted["headers"]["Authorization"], REDACTED);
        assert_eq!(redacted["headers"]["Accept"], "json");
        assert_eq!(redacted["apiKey"], REDACTED);
        assert_eq!(redacted["url"], "https://api.example.com");
    }

    #[test]
    fn test_secret_values_scrubbed_from_text() {
        let text = redact_text("curl -H 'Authorization: Bearer abcdefghijklmnop' --token=hunter2");
        assert!(!text.contains("abcdefghijklmnop"));
        assert!(!text.contains("hunter2"));
        assert!(text.contains(REDACTED));
    }

    #[test]
    fn test_redact_url_query_and_password() {
        let url = redact_url("https://user:pw@api.example.com/v1?api_key=abc&q=rust");
        assert!(!url.contains("pw@"));
        assert!(!url.contains("abc"));
        assert!(url.contains("q=rust"));
    }

    #[test]
    fn test_cap_payload_truncates() {
        let big = json!({"data": "x".repeat(10_000)});
        let capped = cap_payload(big, 100);
        assert_eq!(capped["truncated"], true);
        assert_eq!(capped["preview"].as_str().unwrap().len(), 100);

        let small = json!({"ok": true});
        assert_eq!(cap_payload(small.clone(), 100), small);
    }
}
