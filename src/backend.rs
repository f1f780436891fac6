//! The backend descriptor carried in the caller's `x-api-key` header.
//!
//! The header holds `base64(JSON)` of [`BackendConfig`]. Decoding is lenient in
//! one direction only: anything undecodable, or missing a url or key, is
//! rejected as a whole.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_type: Option<String>,
    #[serde(default)]
    pub force_stream: bool,
    #[serde(default)]
    pub filter_content: bool,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
            model: None,
            headers: None,
            api_type: None,
            force_stream: false,
            filter_content: false,
        }
    }

    /// Decode a credential header value, returning `None` for anything invalid.
    pub fn decode(header_value: &str) -> Option<Self> {
        let raw = match general_purpose::STANDARD.decode(header_value.trim()) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(error = %e, "Credential header is not base64");
                return None;
            }
        };

        let config: Self = match serde_json::from_slice(&raw) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "Credential header is not a backend config");
                return None;
            }
        };

        if config.url.trim().is_empty() || config.key.trim().is_empty() {
            tracing::debug!("Credential header is missing url or key");
            return None;
        }

        Some(config)
    }

    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        general_purpose::STANDARD.encode(json)
    }

    /// Serialization key: base URL plus the first 16 characters of the key.
    pub fn queue_key(&self) -> String {
        let prefix: String = self.key.chars().take(16).collect();
        format!("{}:{}", self.url, prefix)
    }

    /// Model override, ignoring blank values.
    pub fn model_override(&self) -> Option<&str> {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_raw(raw: &str) -> String {
        general_purpose::STANDARD.encode(raw)
    }

    #[test]
    fn test_decode_valid_header() {
        let header = encode_raw(
            r#"{"url":"https://api.example.com/v1/chat/completions","key":"sk-1234","model":"gpt-4o","forceStream":true,"headers":{"X-Org":"acme"}}"#,
        );
        let config = BackendConfig::decode(&header).unwrap();
        assert_eq!(config.url, "https://api.example.com/v1/chat/completions");
        assert_eq!(config.key, "sk-1234");
        assert_eq!(config.model_override(), Some("gpt-4o"));
        assert!(config.force_stream);
        assert!(!config.filter_content);
        assert_eq!(
            config.headers.unwrap().get("X-Org").map(String::as_str),
            Some("acme")
        );
    }

    #[test]
    fn test_decode_invalid_headers_yield_none() {
        assert!(BackendConfig::decode("not base64 !!!").is_none());
        assert!(BackendConfig::decode(&encode_raw("plain text")).is_none());
        assert!(BackendConfig::decode(&encode_raw(r#"{"url":"https://x/responses"}"#)).is_none());
        assert!(BackendConfig::decode(&encode_raw(r#"{"url":"","key":"k"}"#)).is_none());
        assert!(BackendConfig::decode(&encode_raw("[1,2,3]")).is_none());
    }

    #[test]
    fn test_encode_decode_agree() {
        let config = BackendConfig::new("https://host/v1/responses", "key-abc");
        let decoded = BackendConfig::decode(&config.encode()).unwrap();
        assert_eq!(decoded.url, config.url);
        assert_eq!(decoded.key, config.key);
    }

    #[test]
    fn test_queue_key_uses_key_prefix() {
        let config = BackendConfig::new(
            "https://host/v1/chat/completions",
            "sk-abcdefghijklmnopqrstuvwxyz",
        );
        assert_eq!(
            config.queue_key(),
            "https://host/v1/chat/completions:sk-abcdefghijklm"
        );

        let short = BackendConfig::new("https://host/v1/responses", "short");
        assert_eq!(short.queue_key(), "https://host/v1/responses:short");
    }

    #[test]
    fn test_blank_model_is_no_override() {
        let mut config = BackendConfig::new("u", "k");
        config.model = Some("  ".to_string());
        assert_eq!(config.model_override(), None);
    }
}
