//! Folds a stream of Anthropic events back into one [`MessagesResponse`].
//!
//! Used when the upstream call had to stream but the caller asked for a
//! plain JSON reply.

use std::collections::BTreeMap;

use crate::error::{ProxyError, Result};
use crate::translate::anthropic_types::{
    Delta, ErrorBody, MessagesResponse, ResponseContentBlock, StreamEvent,
};
use crate::translate::blocks::parse_arguments;

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        json: String,
    },
    Complete(ResponseContentBlock),
}

#[derive(Debug, Default)]
pub struct MessageAccumulator {
    message: Option<MessagesResponse>,
    blocks: BTreeMap<usize, PartialBlock>,
    error: Option<ErrorBody>,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::MessageStart { message } => self.message = Some(message.clone()),
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let block = match content_block {
                    ResponseContentBlock::Text { text } => PartialBlock::Text(text.clone()),
                    ResponseContentBlock::Thinking {
                        thinking,
                        signature,
                    } => PartialBlock::Thinking {
                        thinking: thinking.clone(),
                        signature: signature.clone(),
                    },
                    ResponseContentBlock::ToolUse { id, name, .. } => PartialBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        json: String::new(),
                    },
                    other => PartialBlock::Complete(other.clone()),
                };
                self.blocks.insert(*index, block);
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                let Some(block) = self.blocks.get_mut(index) else {
                    tracing::debug!(index, "Delta for unknown block");
                    return;
                };
                match (block, delta) {
                    (PartialBlock::Text(text), Delta::TextDelta { text: more }) => {
                        text.push_str(more);
                    }
                    (PartialBlock::Thinking { thinking, .. }, Delta::ThinkingDelta { thinking: more }) => {
                        thinking.push_str(more);
                    }
                    (PartialBlock::Thinking { signature, .. }, Delta::SignatureDelta { signature: sig }) => {
                        *signature = Some(sig.clone());
                    }
                    (PartialBlock::ToolUse { json, .. }, Delta::InputJsonDelta { partial_json }) => {
                        json.push_str(partial_json);
                    }
                    _ => tracing::debug!(index, "Delta does not match its block type"),
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(message) = self.message.as_mut() {
                    message.stop_reason = delta.stop_reason;
                    message.stop_sequence = delta.stop_sequence.clone();
                    message.usage.output_tokens = usage.output_tokens;
                    if let Some(input) = usage.input_tokens {
                        message.usage.input_tokens = input;
                    }
                    if usage.cache_read_input_tokens.is_some() {
                        message.usage.cache_read_input_tokens = usage.cache_read_input_tokens;
                    }
                }
            }
            StreamEvent::Error { error } => {
                if self.error.is_none() {
                    self.error = Some(error.clone());
                }
            }
            StreamEvent::ContentBlockStop { .. } | StreamEvent::MessageStop | StreamEvent::Ping => {}
        }
    }

    /// The assembled message. A collected `error` event fails the call.
    pub fn finish(self) -> Result<MessagesResponse> {
        if let Some(error) = self.error {
            return Err(ProxyError::upstream(502, error.message));
        }
        let mut message = self
            .message
            .ok_or_else(|| ProxyError::upstream(502, "upstream stream ended before any message"))?;

        message.content = self
            .blocks
            .into_values()
            .map(|block| match block {
                PartialBlock::Text(text) => ResponseContentBlock::Text { text },
                PartialBlock::Thinking {
                    thinking,
                    signature,
                } => ResponseContentBlock::Thinking {
                    thinking,
                    signature,
                },
                PartialBlock::ToolUse { id, name, json } => ResponseContentBlock::ToolUse {
                    id,
                    name,
                    input: parse_arguments(&json),
                },
                PartialBlock::Complete(block) => block,
            })
            .collect();
        if message.content.is_empty() {
            message.content.push(ResponseContentBlock::Text {
                text: String::new(),
            });
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::StopReason;
    use crate::translate::streaming::engine::BlockEngine;
    use serde_json::json;

    fn collect(engine: &mut BlockEngine) -> MessageAccumulator {
        let mut acc = MessageAccumulator::new();
        for event in engine.drain() {
            acc.push(&event);
        }
        acc
    }

    #[test]
    fn test_rebuilds_message() {
        let mut engine = BlockEngine::new("claude-test");
        engine.thinking_delta("plan");
        engine.text_delta("Hel");
        engine.text_delta("lo");
        engine.tool_call(0, Some("call_1"), Some("ls"), Some("{\"dir\":"));
        engine.tool_call(0, None, None, Some("\"/tmp\"}"));
        engine.set_stop_reason(StopReason::ToolUse);
        engine.finish();

        let message = collect(&mut engine).finish().unwrap();
        assert_eq!(message.model, "claude-test");
        assert_eq!(message.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(
            message.content,
            vec![
                ResponseContentBlock::Thinking {
                    thinking: "plan".to_string(),
                    signature: None
                },
                ResponseContentBlock::Text {
                    text: "Hello".to_string()
                },
                ResponseContentBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "ls".to_string(),
                    input: json!({"dir": "/tmp"}),
                },
            ]
        );
    }

    #[test]
    fn test_error_event_fails() {
        let mut engine = BlockEngine::new("m");
        engine.error("quota exceeded");
        engine.finish();
        let err = collect(&mut engine).finish().unwrap_err();
        assert_eq!(err.status(), 502);
        assert_eq!(err.message(), "quota exceeded");
    }

    #[test]
    fn test_empty_stream_gets_empty_text() {
        let mut engine = BlockEngine::new("m");
        engine.finish();
        let message = collect(&mut engine).finish().unwrap();
        assert_eq!(
            message.content,
            vec![ResponseContentBlock::Text {
                text: String::new()
            }]
        );
        assert_eq!(message.stop_reason, Some(StopReason::EndTurn));
    }
}
