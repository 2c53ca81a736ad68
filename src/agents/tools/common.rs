use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;
use url::Url;

/// Read a required string parameter.
pub fn read_string_param(params: &Value, key: &str) -> Result<String, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required parameter: {}", key))
}

/// Read an optional string parameter.
pub fn read_optional_string_param(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Read an optional integer parameter.
pub fn read_integer_param(params: &Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Read a string array parameter. A bare string counts as a one-element list.
pub fn read_string_array_param(params: &Value, key: &str) -> Option<Vec<String>> {
    match params.get(key)? {
        Value::Array(arr) => Some(
            arr.iter()
                .filter_map(|item| item.as_str().map(String::from))
                .collect(),
        ),
        Value::String(s) => Some(vec![s.clone()]),
        _ => None,
    }
}

/// Build a header map from configured string pairs, skipping invalid entries.
pub fn build_header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut header_map = HeaderMap::new();
    for (key, value) in headers {
        match (HeaderName::from_str(key), HeaderValue::from_str(value)) {
            (Ok(name), Ok(val)) => {
                header_map.insert(name, val);
            }
            _ => warn!(header = %key, "Skipping invalid header"),
        }
    }
    header_map
}

/// Truncate on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Check if a URL targets a private/internal address.
pub fn is_ssrf_target(url: &Url) -> bool {
    if url.scheme() != "http" && url.scheme() != "https" {
        return true;
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        Some(url::Host::Ipv6(v6)) => v6.is_loopback() || v6.is_unspecified(),
        Some(url::Host::Domain(host)) => {
            let lower = host.to_lowercase();
            lower == "localhost"
                || lower.ends_with(".localhost")
                || lower.ends_with(".internal")
                || lower.ends_with(".local")
        }
        None => true,
    }
}
