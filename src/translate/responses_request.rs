//! Translate Anthropic Messages API requests into `OpenAI` Responses API requests.
//!
//! Same walking rules as the Chat converter, but every turn flattens into
//! standalone input items: tool results become `function_call_output` items and
//! tool uses become `function_call` items, never nested under a message.

use super::anthropic_types::{ContentBlock, Message, MessagesRequest, Role, SystemContent};
use super::blocks::{
    image_source_url, reasoning_effort, responses_tool_choice, responses_tools,
    stringify_arguments, tool_result_text,
};
use super::responses_types::{InputItem, InputPart, ResponsesReasoning, ResponsesRequest};

pub fn anthropic_to_responses(req: &MessagesRequest) -> ResponsesRequest {
    let mut input = Vec::new();

    if let Some(ref system) = req.system {
        if let Some(item) = translate_system(system) {
            input.push(item);
        }
    }

    for msg in &req.messages {
        input.extend(translate_message(msg));
    }

    let reasoning = req
        .thinking
        .as_ref()
        .filter(|t| t.is_enabled())
        .map(|t| ResponsesReasoning {
            effort: reasoning_effort(t.budget_tokens).to_string(),
            summary: Some("auto".to_string()),
        });

    ResponsesRequest {
        model: req.model.clone(),
        input,
        max_output_tokens: Some(req.max_tokens).filter(|n| *n > 0),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        tools: responses_tools(req.tools.as_deref()),
        tool_choice: req.tool_choice.as_ref().map(responses_tool_choice),
        reasoning,
        user: req.metadata.as_ref().and_then(|m| m.user_id.clone()),
    }
}

// `system`, not `developer`: more providers accept it.
fn translate_system(system: &SystemContent) -> Option<InputItem> {
    let content: Vec<InputPart> = match system {
        SystemContent::Text(text) if !text.is_empty() => {
            vec![InputPart::InputText { text: text.clone() }]
        }
        SystemContent::Text(_) => Vec::new(),
        SystemContent::Blocks(blocks) => blocks
            .iter()
            .filter(|b| !b.text.is_empty())
            .map(|b| InputPart::InputText {
                text: b.text.clone(),
            })
            .collect(),
    };

    (!content.is_empty()).then(|| InputItem::Message {
        role: "system".to_string(),
        content,
    })
}

fn translate_message(msg: &Message) -> Vec<InputItem> {
    let blocks = msg.content.blocks();
    match msg.role {
        Role::User => translate_user_message(&blocks),
        Role::Assistant => translate_assistant_message(&blocks),
    }
}

fn translate_user_message(blocks: &[ContentBlock]) -> Vec<InputItem> {
    let mut items = Vec::new();
    let mut parts = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text, .. } => parts.push(InputPart::InputText { text: text.clone() }),
            ContentBlock::Thinking { thinking, .. } if !thinking.is_empty() => {
                parts.push(InputPart::InputText {
                    text: thinking.clone(),
                });
            }
            ContentBlock::Image { source } => {
                if let Some(image_url) = image_source_url(source) {
                    parts.push(InputPart::InputImage { image_url });
                }
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => items.push(InputItem::FunctionCallOutput {
                call_id: tool_use_id.clone(),
                output: tool_result_text(content.as_ref()),
            }),
            _ => {}
        }
    }

    if !parts.is_empty() {
        items.push(InputItem::Message {
            role: "user".to_string(),
            content: parts,
        });
    }
    items
}

fn translate_assistant_message(blocks: &[ContentBlock]) -> Vec<InputItem> {
    let mut parts = Vec::new();
    let mut calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text, .. } if !text.is_empty() => {
                parts.push(InputPart::OutputText { text: text.clone() });
            }
            ContentBlock::Thinking { thinking, .. } if !thinking.is_empty() => {
                parts.push(InputPart::OutputText {
                    text: thinking.clone(),
                });
            }
            ContentBlock::ToolUse { id, name, input } => calls.push(InputItem::FunctionCall {
                call_id: id.clone(),
                name: name.clone(),
                arguments: stringify_arguments(input),
            }),
            _ => {}
        }
    }

    let mut items = Vec::with_capacity(calls.len() + 1);
    if !parts.is_empty() {
        items.push(InputItem::Message {
            role: "assistant".to_string(),
            content: parts,
        });
    }
    items.extend(calls);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> MessagesRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_system_uses_system_role() {
        let req = parse(json!({
            "model": "gpt-5", "max_tokens": 500,
            "system": "You are terse.",
            "messages": [{"role": "user", "content": "Hi"}]
        }));

        let result = anthropic_to_responses(&req);
        assert_eq!(result.max_output_tokens, Some(500));
        assert_eq!(
            result.input,
            vec![
                InputItem::Message {
                    role: "system".to_string(),
                    content: vec![InputPart::InputText {
                        text: "You are terse.".to_string()
                    }],
                },
                InputItem::Message {
                    role: "user".to_string(),
                    content: vec![InputPart::InputText {
                        text: "Hi".to_string()
                    }],
                },
            ]
        );
    }

    #[test]
    fn test_tool_traffic_is_flat() {
        let req = parse(json!({
            "model": "m", "max_tokens": 1,
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "text", "text": "Looking."},
                    {"type": "tool_use", "id": "call_1", "name": "read", "input": {"path": "a"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "call_1", "content": [{"type": "text", "text": "body"}]},
                    {"type": "text", "text": "thanks"}
                ]}
            ]
        }));

        let result = anthropic_to_responses(&req);
        assert_eq!(result.input.len(), 4);
        assert_eq!(
            result.input[0],
            InputItem::Message {
                role: "assistant".to_string(),
                content: vec![InputPart::OutputText {
                    text: "Looking.".to_string()
                }],
            }
        );
        assert_eq!(
            result.input[1],
            InputItem::FunctionCall {
                call_id: "call_1".to_string(),
                name: "read".to_string(),
                arguments: r#"{"path":"a"}"#.to_string(),
            }
        );
        assert_eq!(
            result.input[2],
            InputItem::FunctionCallOutput {
                call_id: "call_1".to_string(),
                output: "body".to_string(),
            }
        );
        assert!(matches!(&result.input[3], InputItem::Message { role, .. } if role == "user"));
    }

    #[test]
    fn test_assistant_thinking_becomes_output_text() {
        let req = parse(json!({
            "model": "m", "max_tokens": 1,
            "messages": [{"role": "assistant", "content": [
                {"type": "thinking", "thinking": "reasoned", "signature": "s"}
            ]}]
        }));
        let result = anthropic_to_responses(&req);
        assert_eq!(
            result.input,
            vec![InputItem::Message {
                role: "assistant".to_string(),
                content: vec![InputPart::OutputText {
                    text: "reasoned".to_string()
                }],
            }]
        );
    }

    #[test]
    fn test_image_and_reasoning() {
        let req = parse(json!({
            "model": "m", "max_tokens": 1,
            "thinking": {"type": "enabled", "budget_tokens": 8000},
            "tools": [{"name": "ls", "input_schema": {"type": "object"}}, {"description": "no name"}],
            "tool_choice": {"type": "any"},
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "url", "url": "https://x/y.png"}}
            ]}]
        }));
        let result = anthropic_to_responses(&req);
        assert_eq!(
            result.input[0],
            InputItem::Message {
                role: "user".to_string(),
                content: vec![InputPart::InputImage {
                    image_url: "https://x/y.png".to_string()
                }],
            }
        );
        assert_eq!(result.reasoning.unwrap().effort, "medium");
        assert_eq!(result.tools.unwrap().len(), 1);
        assert_eq!(result.tool_choice, Some(json!("required")));
    }

    #[test]
    fn test_disabled_thinking_sends_no_reasoning() {
        let req = parse(json!({
            "model": "m", "max_tokens": 1,
            "thinking": {"type": "disabled"},
            "messages": "not-an-array"
        }));
        let result = anthropic_to_responses(&req);
        assert!(result.reasoning.is_none());
        assert!(result.input.is_empty());
    }
}
