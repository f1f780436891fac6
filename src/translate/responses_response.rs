//! Translate `OpenAI` Responses API replies into Anthropic Messages responses.
//!
//! Providers disagree on where the output lives and on how output items are
//! typed, so this works on raw JSON. Items are classified by an ordered matcher
//! table ([`OutputItemKind::classify`]) and each kind has one extractor.

use serde_json::{json, Value};

use super::anthropic_types::{
    new_message_id, MessagesResponse, ResponseContentBlock, StopReason, Usage,
};
use super::blocks::parse_arguments;

/// Keys that may hold the output container, in lookup order.
const OUTPUT_KEYS: [&str; 4] = ["output", "outputs", "output_text", "output_texts"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputItemKind {
    Message,
    FunctionCall,
    Reasoning,
    Text,
    Tool,
    Generic,
}

impl OutputItemKind {
    const EXACT: [(&'static str, OutputItemKind); 6] = [
        ("message", OutputItemKind::Message),
        ("function_call", OutputItemKind::FunctionCall),
        ("reasoning", OutputItemKind::Reasoning),
        ("output_text", OutputItemKind::Text),
        ("text", OutputItemKind::Text),
        ("refusal", OutputItemKind::Text),
    ];

    const CONTAINS: [(&'static str, OutputItemKind); 5] = [
        ("message", OutputItemKind::Message),
        ("function_call", OutputItemKind::FunctionCall),
        ("reasoning", OutputItemKind::Reasoning),
        ("text", OutputItemKind::Text),
        ("tool", OutputItemKind::Tool),
    ];

    /// Exact type match first, then the first substring match, else `Generic`.
    pub fn classify(item_type: &str) -> Self {
        let lowered = item_type.to_ascii_lowercase();
        Self::EXACT
            .iter()
            .find(|(name, _)| *name == lowered)
            .or_else(|| {
                Self::CONTAINS
                    .iter()
                    .find(|(needle, _)| lowered.contains(needle))
            })
            .map_or(OutputItemKind::Generic, |(_, kind)| *kind)
    }
}

/// Translate a Responses API reply into an Anthropic Messages response.
pub fn responses_to_anthropic(resp: &Value, request_model: Option<&str>) -> MessagesResponse {
    let root = match resp.get("response") {
        Some(inner) if inner.is_object() => inner,
        _ => resp,
    };

    let mut collector = Collector::default();
    for item in output_items(root) {
        collector.item(&item);
    }

    let mut content = collector.blocks;
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let status = root.get("status").and_then(Value::as_str);
    let stop_reason = if status.is_some_and(|s| s.eq_ignore_ascii_case("incomplete")) {
        incomplete_stop_reason(root.get("incomplete_details"))
    } else {
        match map_status(status) {
            StopReason::EndTurn if collector.saw_function_call => StopReason::ToolUse,
            other => other,
        }
    };

    let id = match root.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => format!("msg_{}", id.trim_start_matches("resp_")),
        _ => new_message_id(),
    };
    let model = request_model
        .or_else(|| root.get("model").and_then(Value::as_str))
        .unwrap_or_default();

    MessagesResponse {
        content,
        stop_reason: Some(stop_reason),
        usage: root.get("usage").map(responses_usage).unwrap_or_default(),
        ..MessagesResponse::empty(id, model)
    }
}

/// Map a Responses `status` (or a Chat-style reason some providers send) to a stop reason.
pub fn map_status(status: Option<&str>) -> StopReason {
    let Some(status) = status else {
        return StopReason::EndTurn;
    };
    match status.to_ascii_lowercase().as_str() {
        "stop" | "completed" | "complete" => StopReason::EndTurn,
        "length" | "max_tokens" => StopReason::MaxTokens,
        "tool_calls" | "tool_call" | "tool_use" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

/// Stop reason for an `incomplete` reply, from its `incomplete_details`.
pub fn incomplete_stop_reason(details: Option<&Value>) -> StopReason {
    match details.and_then(|d| d.get("reason")).and_then(Value::as_str) {
        Some("max_output_tokens") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

pub fn responses_usage(usage: &Value) -> Usage {
    let count = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
    Usage {
        input_tokens: count("input_tokens"),
        output_tokens: count("output_tokens"),
        cache_creation_input_tokens: None,
        cache_read_input_tokens: usage
            .pointer("/input_tokens_details/cached_tokens")
            .and_then(Value::as_u64)
            .filter(|n| *n > 0),
    }
}

/// Every output item in the container, normalized to JSON objects.
fn output_items(root: &Value) -> Vec<Value> {
    let container = match root {
        Value::Array(_) | Value::String(_) => Some(root),
        _ => OUTPUT_KEYS
            .iter()
            .filter_map(|key| root.get(*key))
            .find(|v| !is_empty_container(v)),
    };

    match container {
        None => Vec::new(),
        Some(Value::String(text)) => vec![text_item(text)],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text_item(text)),
                Value::Object(_) => Some(item.clone()),
                _ => None,
            })
            .collect(),
        Some(obj @ Value::Object(_)) => vec![obj.clone()],
        Some(other) => {
            tracing::debug!(kind = ?other, "Ignoring scalar output container");
            Vec::new()
        }
    }
}

fn is_empty_container(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn text_item(text: &str) -> Value {
    json!({"type": "output_text", "text": text})
}

fn part_texts<'a>(item: &'a Value, key: &str) -> Vec<&'a str> {
    item.get(key)
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Default)]
struct Collector {
    blocks: Vec<ResponseContentBlock>,
    saw_function_call: bool,
}

impl Collector {
    fn item(&mut self, item: &Value) {
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or_default();
        match OutputItemKind::classify(item_type) {
            OutputItemKind::Message => self.message(item),
            OutputItemKind::FunctionCall => self.function_call(item),
            OutputItemKind::Reasoning => self.reasoning(item),
            OutputItemKind::Text => self.text(item),
            OutputItemKind::Tool => self.tool(item),
            OutputItemKind::Generic => self.generic(item),
        }
    }

    fn push_text(&mut self, text: &str) {
        if !text.is_empty() {
            self.blocks.push(ResponseContentBlock::Text {
                text: text.to_string(),
            });
        }
    }

    fn message(&mut self, item: &Value) {
        match item.get("content") {
            Some(Value::String(text)) => self.push_text(text),
            Some(Value::Array(parts)) => {
                for part in parts {
                    match part {
                        Value::String(text) => self.push_text(text),
                        _ => self.item(part),
                    }
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, item: &Value) {
        let text = item
            .get("text")
            .or_else(|| item.get("refusal"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        self.push_text(text);
    }

    fn reasoning(&mut self, item: &Value) {
        let mut texts = part_texts(item, "summary");
        if texts.is_empty() {
            texts = part_texts(item, "content");
        }
        if texts.is_empty() {
            return;
        }
        self.blocks.push(ResponseContentBlock::Thinking {
            thinking: texts.join("\n"),
            signature: None,
        });
    }

    fn function_call(&mut self, item: &Value) {
        let Some(name) = item.get("name").and_then(Value::as_str) else {
            tracing::debug!("Skipping function call without a name");
            return;
        };
        let id = item
            .get("call_id")
            .or_else(|| item.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple()));
        let input = match item.get("arguments").or_else(|| item.get("input")) {
            Some(Value::String(raw)) => parse_arguments(raw),
            Some(obj @ Value::Object(_)) => obj.clone(),
            _ => json!({}),
        };

        self.saw_function_call = true;
        self.blocks.push(ResponseContentBlock::ToolUse {
            id,
            name: name.to_string(),
            input,
        });
    }

    // Other tool-shaped items only count when they look like a named call.
    fn tool(&mut self, item: &Value) {
        if item.get("name").is_some_and(Value::is_string) {
            self.function_call(item);
        } else {
            tracing::debug!(item_type = ?item.get("type"), "Skipping unnamed tool item");
        }
    }

    fn generic(&mut self, item: &Value) {
        if let Some(text) = item.get("output_text").and_then(Value::as_str) {
            self.push_text(text);
        }
        if let Some(call) = item.get("output_tool_call").filter(|c| c.is_object()) {
            self.function_call(call);
        }
        if item.get("content").is_some_and(Value::is_array) {
            self.message(item);
        }
    }
}
