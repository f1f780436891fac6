//! Translate Anthropic Messages API requests into `OpenAI` Chat Completions requests.
//!
//! Handles system prompts, multi-part content (text, images), tool use, tool results,
//! tool choice and thinking budgets. A single Anthropic message can expand into multiple
//! `OpenAI` messages (e.g. a user message with `tool_result` blocks becomes separate
//! `tool`-role messages, emitted ahead of the remaining user content).

use super::anthropic_types::{ContentBlock, Message, MessagesRequest, Role, SystemContent};
use super::blocks::{
    chat_tool_choice, chat_tools, image_source_url, reasoning_effort, stringify_arguments,
    tool_result_text,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatMessage, ChatReasoning, ChatToolCall,
    ChatToolCallFunction, ContentPart, ImageUrlDetail, StreamOptions,
};

/// Translate an Anthropic Messages API request into an `OpenAI` Chat Completions request.
///
/// Returns the request plus whether any image was converted.
pub fn anthropic_to_openai(req: &MessagesRequest) -> (ChatCompletionRequest, bool) {
    let mut messages = Vec::new();
    let mut has_images = false;

    if let Some(ref system) = req.system {
        if let Some(msg) = translate_system(system) {
            messages.push(msg);
        }
    }

    for msg in &req.messages {
        messages.extend(translate_message(msg, &mut has_images));
    }

    let stream_options = req.stream.filter(|s| *s).map(|_| StreamOptions {
        include_usage: true,
    });

    let reasoning = req.thinking.as_ref().map(|t| ChatReasoning {
        effort: reasoning_effort(t.budget_tokens).to_string(),
        enabled: t.is_enabled(),
    });

    let chat = ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        max_tokens: Some(req.max_tokens).filter(|n| *n > 0),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stream_options,
        tools: chat_tools(req.tools.as_deref()),
        tool_choice: req.tool_choice.as_ref().map(chat_tool_choice),
        stop: req.stop_sequences.clone().filter(|s| !s.is_empty()),
        user: req.metadata.as_ref().and_then(|m| m.user_id.clone()),
        reasoning,
    };

    (chat, has_images)
}

fn translate_system(system: &SystemContent) -> Option<ChatMessage> {
    let content = if system.is_plain_text_blocks() {
        let SystemContent::Blocks(blocks) = system else {
            return None;
        };
        ChatContent::Parts(
            blocks
                .iter()
                .map(|b| ContentPart::Text {
                    text: b.text.clone(),
                    cache_control: b.cache_control.clone(),
                })
                .collect(),
        )
    } else {
        let text = system.as_text();
        if text.is_empty() {
            return None;
        }
        ChatContent::Text(text)
    };

    Some(ChatMessage::new("system", Some(content)))
}

fn translate_message(msg: &Message, has_images: &mut bool) -> Vec<ChatMessage> {
    let blocks = msg.content.blocks();

    match msg.role {
        Role::User => translate_user_message(&blocks, has_images),
        Role::Assistant => vec![translate_assistant_message(&blocks)],
    }
}

fn translate_user_message(blocks: &[ContentBlock], has_images: &mut bool) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut content_parts: Vec<ContentPart> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text {
                text,
                cache_control,
            } => {
                content_parts.push(ContentPart::Text {
                    text: text.clone(),
                    cache_control: cache_control.clone(),
                });
            }
            ContentBlock::Image { source } => match image_source_url(source) {
                Some(url) => {
                    *has_images = true;
                    content_parts.push(ContentPart::ImageUrl {
                        image_url: ImageUrlDetail { url, detail: None },
                    });
                }
                None => tracing::debug!("Skipping image with unsupported source"),
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                let mut tool_msg =
                    ChatMessage::new("tool", Some(ChatContent::Text(tool_result_text(content.as_ref()))));
                tool_msg.tool_call_id = Some(tool_use_id.clone());
                messages.push(tool_msg);
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::ToolUse { .. }
            | ContentBlock::Unsupported => {}
        }
    }

    if !content_parts.is_empty() {
        messages.push(ChatMessage::new(
            "user",
            Some(collapse_content_parts(content_parts)),
        ));
    }

    messages
}

fn translate_assistant_message(blocks: &[ContentBlock]) -> ChatMessage {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text, .. } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: stringify_arguments(input),
                    },
                });
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. }
            | ContentBlock::Unsupported => {}
        }
    }

    let text = text_parts.concat();
    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(ChatContent::Text(text))
    };

    let mut msg = ChatMessage::new("assistant", content);
    msg.tool_calls = (!tool_calls.is_empty()).then_some(tool_calls);
    msg
}

fn collapse_content_parts(mut parts: Vec<ContentPart>) -> ChatContent {
    let single_plain_text = matches!(
        parts.as_slice(),
        [ContentPart::Text {
            cache_control: None,
            ..
        }]
    );
    if single_plain_text {
        if let Some(ContentPart::Text { text, .. }) = parts.pop() {
            return ChatContent::Text(text);
        }
    }
    ChatContent::Parts(parts)
}
