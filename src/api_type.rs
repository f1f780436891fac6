//! Which OpenAI-compatible wire format a backend URL speaks.
//!
//! Classification is by URL suffix only. This is the one place that decides
//! which converter pair a call uses.

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const CHAT_COMPLETIONS_SUFFIX: &str = "/chat/completions";
const RESPONSES_SUFFIX: &str = "/responses";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    ChatCompletions,
    Responses,
}

impl ApiType {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiType::ChatCompletions => "chat_completions",
            ApiType::Responses => "responses",
        }
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a full backend URL by its path suffix. Surrounding whitespace and
/// trailing slashes are ignored, so `.../chat/completions/` still matches.
pub fn api_type_from_url(url: &str) -> Result<ApiType> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.ends_with(CHAT_COMPLETIONS_SUFFIX) {
        Ok(ApiType::ChatCompletions)
    } else if trimmed.ends_with(RESPONSES_SUFFIX) {
        Ok(ApiType::Responses)
    } else {
        Err(ProxyError::invalid_request(format!(
            "Backend URL must end with '{CHAT_COMPLETIONS_SUFFIX}' or '{RESPONSES_SUFFIX}', got '{url}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_completions_suffix() {
        assert_eq!(
            api_type_from_url("https://api.openai.com/v1/chat/completions").unwrap(),
            ApiType::ChatCompletions
        );
        assert_eq!(
            api_type_from_url("https://openrouter.ai/api/v1/chat/completions/").unwrap(),
            ApiType::ChatCompletions
        );
    }

    #[test]
    fn test_responses_suffix() {
        assert_eq!(
            api_type_from_url("https://api.openai.com/v1/responses").unwrap(),
            ApiType::Responses
        );
    }

    #[test]
    fn test_unknown_suffix_names_both() {
        let err = api_type_from_url("https://api.openai.com/v1").unwrap_err();
        assert_eq!(err.kind().as_str(), "invalid_request_error");
        let msg = err.to_string();
        assert!(msg.contains("/chat/completions"));
        assert!(msg.contains("/responses"));
    }

    #[test]
    fn test_no_content_sniffing() {
        assert!(api_type_from_url("https://host/responses/v1").is_err());
        assert!(api_type_from_url("https://host/chat/completions?x=1").is_err());
    }
}
