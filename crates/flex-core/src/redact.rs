// SPDX-License-Identifier: MIT OR Apache-2.0
//! Debug-view redaction of sensitive keys.

use serde_json::Value;

/// Key fragments that mark a property as sensitive, matched
/// case-insensitively as substrings.
const SENSITIVE_KEY_PARTS: &[&str] = &[
    "token",
    "secret",
    "apikey",
    "api_key",
    "authorization",
    "password",
    "bearer",
    "credential",
];

/// Placeholder written over redacted values.
pub const REDACTED: &str = "[redacted]";

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEY_PARTS.iter().any(|part| key.contains(part))
}

/// Return a copy of `value` with every sensitive property replaced by
/// [`REDACTED`], recursively through objects and arrays.
///
/// # Examples
///
/// ```
/// let v = serde_json::json!({"apiKey": "sk-1", "nested": {"Password": "x"}, "ok": 1});
/// let r = flex_core::redact::redact_value(&v);
/// assert_eq!(r["apiKey"], "[redacted]");
/// assert_eq!(r["nested"]["Password"], "[redacted]");
/// assert_eq!(r["ok"], 1);
/// ```
#[must_use]
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if is_sensitive(k) {
                        (k.clone(), Value::String(REDACTED.into()))
                    } else {
                        (k.clone(), redact_value(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_all_listed_key_shapes() {
        let v = json!({
            "accessToken": "a",
            "client_secret": "b",
            "apikey": "c",
            "api_key": "d",
            "Authorization": "e",
            "userPassword": "f",
            "bearerValue": "g",
            "dbCredentials": "h",
            "plain": "keep"
        });
        let r = redact_value(&v);
        for key in [
            "accessToken",
            "client_secret",
            "apikey",
            "api_key",
            "Authorization",
            "userPassword",
            "bearerValue",
            "dbCredentials",
        ] {
            assert_eq!(r[key], json!(REDACTED), "key {key} not redacted");
        }
        assert_eq!(r["plain"], json!("keep"));
    }

    #[test]
    fn walks_arrays_and_nested_objects() {
        let v = json!({"items": [{"token": "t"}, {"safe": {"password": "p"}}]});
        let r = redact_value(&v);
        assert_eq!(r["items"][0]["token"], json!(REDACTED));
        assert_eq!(r["items"][1]["safe"]["password"], json!(REDACTED));
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(redact_value(&json!(42)), json!(42));
        assert_eq!(redact_value(&json!("secret")), json!("secret"));
        assert_eq!(redact_value(&json!(null)), json!(null));
    }
}
