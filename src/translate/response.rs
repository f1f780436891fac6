use serde_json::json;

use super::anthropic_types::{
    new_message_id, MessagesResponse, ResponseContentBlock, StopReason, Usage,
    WebSearchResult,
};
use super::blocks::parse_arguments;
use super::openai_types::{Annotation, ChatCompletionResponse, ChatUsage};

/// Translate an OpenAI Chat Completion response into an Anthropic Messages response.
///
/// A missing response, choice or message yields a well-formed envelope whose only
/// block is an `Error: ...` text. `request_model` is what the caller asked for and
/// wins over the provider's model name.
pub fn openai_to_anthropic(
    resp: Option<&ChatCompletionResponse>,
    request_model: Option<&str>,
) -> MessagesResponse {
    let Some(resp) = resp else {
        return error_message("empty response from provider", request_model);
    };
    let model = request_model.unwrap_or(&resp.model);

    let Some(choice) = resp.choices.first() else {
        return error_message("provider response has no choices", Some(model));
    };
    let Some(message) = choice.message.as_ref() else {
        return error_message("provider choice has no message", Some(model));
    };

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    let reasoning = message
        .reasoning_content
        .as_deref()
        .or(message.reasoning.as_deref())
        .filter(|r| !r.is_empty());
    if let Some(thinking) = reasoning {
        content.push(ResponseContentBlock::Thinking {
            thinking: thinking.to_string(),
            signature: None,
        });
    }

    if let Some(annotations) = message.annotations.as_deref() {
        content.extend(web_search_blocks(annotations));
    }

    if let Some(ref text) = message.content {
        if !text.is_empty() {
            content.push(ResponseContentBlock::Text { text: text.clone() });
        }
    }

    if let Some(ref tool_calls) = message.tool_calls {
        for tc in tool_calls {
            content.push(ResponseContentBlock::ToolUse {
                id: if tc.id.is_empty() {
                    format!("toolu_{}", uuid::Uuid::new_v4().simple())
                } else {
                    tc.id.clone()
                },
                name: tc.function.name.clone(),
                input: parse_arguments(&tc.function.arguments),
            });
        }
    }

    // Callers expect non-empty content
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = map_finish_reason(choice.finish_reason.as_deref());

    let id = if resp.id.is_empty() {
        new_message_id()
    } else {
        format!("msg_{}", resp.id.trim_start_matches("chatcmpl-"))
    };

    MessagesResponse {
        content,
        stop_reason: Some(stop_reason),
        usage: resp.usage.as_ref().map(chat_usage).unwrap_or_default(),
        ..MessagesResponse::empty(id, model)
    }
}

pub fn chat_usage(u: &ChatUsage) -> Usage {
    Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: u.cached_tokens(),
    }
}

/// Map an OpenAI `finish_reason` to an Anthropic stop reason.
///
/// `content_filter` maps to `stop_sequence`, which is approximate but what
/// existing callers see.
pub fn map_finish_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("stop") => StopReason::EndTurn,
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls") | Some("function_call") => StopReason::ToolUse,
        Some("content_filter") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

/// `url_citation` annotations as a web search tool use/result pair.
fn web_search_blocks(annotations: &[Annotation]) -> Vec<ResponseContentBlock> {
    let results: Vec<WebSearchResult> = annotations
        .iter()
        .filter_map(|a| a.url_citation.as_ref())
        .filter(|c| !c.url.is_empty())
        .map(|c| WebSearchResult {
            result_type: "web_search_result".to_string(),
            url: c.url.clone(),
            title: c.title.clone(),
            page_age: None,
        })
        .collect();

    if results.is_empty() {
        return Vec::new();
    }

    let id = format!("srvtoolu_{}", uuid::Uuid::new_v4().simple());
    vec![
        ResponseContentBlock::ServerToolUse {
            id: id.clone(),
            name: "web_search".to_string(),
            input: json!({}),
        },
        ResponseContentBlock::WebSearchToolResult {
            tool_use_id: id,
            content: results,
        },
    ]
}

fn error_message(reason: &str, model: Option<&str>) -> MessagesResponse {
    tracing::warn!(reason, "Synthesizing error reply");
    MessagesResponse {
        content: vec![ResponseContentBlock::Text {
            text: format!("Error: {reason}"),
        }],
        stop_reason: Some(StopReason::EndTurn),
        ..MessagesResponse::empty(new_message_id(), model.unwrap_or_default())
    }
}
