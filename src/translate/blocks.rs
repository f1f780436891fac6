//! Conversion primitives shared by both request converters and the response side:
//! images, tool results, tool definitions, tool choice, thinking budgets and
//! tool-argument JSON.

use serde_json::{json, Value};

use super::anthropic_types::{ImageSource, Tool, ToolChoice};
use super::openai_types::{
    ChatFunction, ChatTool, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
};
use super::responses_types::ResponsesTool;

/// URL for an image source: a `data:` URI for base64, the URL itself otherwise.
/// Unsupported source kinds yield `None`.
pub fn image_source_url(source: &ImageSource) -> Option<String> {
    match source {
        ImageSource::Base64 { media_type, data } => {
            Some(format!("data:{media_type};base64,{data}"))
        }
        ImageSource::Url { url } if !url.is_empty() => Some(url.clone()),
        _ => None,
    }
}

/// Tool result payload as the string OpenAI expects.
///
/// Strings pass through, a list made only of text blocks is joined, and anything
/// else is JSON-stringified.
pub fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) if !items.is_empty() && items.iter().all(is_text_block) => items
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

fn is_text_block(v: &Value) -> bool {
    v.get("type").and_then(Value::as_str) == Some("text")
        && v.get("text").is_some_and(Value::is_string)
}

/// Tool-use input as a JSON string for `arguments`.
pub fn stringify_arguments(input: &Value) -> String {
    match input {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

/// Parse streamed or returned tool arguments. Empty or malformed JSON gives `{}`.
pub fn parse_arguments(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, len = raw.len(), "Tool arguments are not valid JSON, using {{}}");
            json!({})
        }
    }
}

/// Tools worth forwarding: named, with an object schema (defaulted if absent).
fn usable_tools(tools: &[Tool]) -> impl Iterator<Item = (&Tool, Value)> {
    tools.iter().filter_map(|t| {
        if t.name.trim().is_empty() {
            tracing::debug!("Dropping tool without a name");
            return None;
        }
        let schema = match &t.input_schema {
            Some(schema @ Value::Object(_)) => schema.clone(),
            None | Some(Value::Null) => json!({"type": "object", "properties": {}}),
            Some(_) => {
                tracing::debug!(tool = %t.name, "Dropping tool with a non-object schema");
                return None;
            }
        };
        Some((t, schema))
    })
}

pub fn chat_tools(tools: Option<&[Tool]>) -> Option<Vec<ChatTool>> {
    let converted: Vec<ChatTool> = usable_tools(tools?)
        .map(|(t, parameters)| ChatTool {
            tool_type: "function".to_string(),
            function: ChatFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters,
            },
        })
        .collect();
    (!converted.is_empty()).then_some(converted)
}

pub fn responses_tools(tools: Option<&[Tool]>) -> Option<Vec<ResponsesTool>> {
    let converted: Vec<ResponsesTool> = usable_tools(tools?)
        .map(|(t, parameters)| ResponsesTool {
            tool_type: "function".to_string(),
            name: t.name.clone(),
            description: t.description.clone(),
            parameters,
        })
        .collect();
    (!converted.is_empty()).then_some(converted)
}

pub fn chat_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto { .. } => ChatToolChoice::String("auto".to_string()),
        ToolChoice::Any { .. } => ChatToolChoice::String("required".to_string()),
        ToolChoice::None {} => ChatToolChoice::String("none".to_string()),
        ToolChoice::Tool { name, .. } => ChatToolChoice::Specific(ChatToolChoiceSpecific {
            choice_type: "function".to_string(),
            function: ChatToolChoiceFunction { name: name.clone() },
        }),
    }
}

pub fn responses_tool_choice(tc: &ToolChoice) -> Value {
    match tc {
        ToolChoice::Auto { .. } => json!("auto"),
        ToolChoice::Any { .. } => json!("required"),
        ToolChoice::None {} => json!("none"),
        ToolChoice::Tool { name, .. } => json!({"type": "function", "name": name}),
    }
}

/// Map a thinking budget to an OpenAI reasoning effort.
pub fn reasoning_effort(budget_tokens: Option<u64>) -> &'static str {
    match budget_tokens {
        None => "medium",
        Some(b) if b <= 5_000 => "low",
        Some(b) if b <= 10_000 => "medium",
        Some(_) => "high",
    }
}
