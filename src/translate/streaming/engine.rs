//! Block-lifecycle state machine shared by both stream drivers.
//!
//! [`BlockEngine`] owns the per-stream state: the next block index, the one
//! block that may be open, tool calls keyed by the upstream's own index, usage
//! and the stop reason. Drivers call its methods as they decode upstream chunks
//! and periodically [`BlockEngine::drain`] the Anthropic events it queued.

use std::collections::HashMap;

use serde_json::Value;

use crate::translate::anthropic_types::{
    new_message_id, Delta, DeltaUsage, ErrorBody, MessageDeltaBody, MessagesResponse,
    ResponseContentBlock, StopReason, StreamEvent, Usage,
};
use crate::translate::blocks::parse_arguments;

/// Hooks fired as a stream progresses.
pub trait StreamObserver: Send {
    /// A tool-use block closed and its arguments were parsed.
    fn tool_call_ready(&mut self, _id: &str, _name: &str, _input: &Value) {}

    /// The stream was finalized. `final_text` is the last closed text block.
    fn stream_finished(&mut self, _stop_reason: StopReason, _final_text: &str, _usage: &Usage) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text(usize),
    Thinking(usize),
    Tool { index: usize, upstream: u64 },
}

#[derive(Debug, Clone)]
struct ToolSlot {
    block_index: usize,
    id: String,
    name: String,
    arguments: String,
    closed: bool,
}

pub struct BlockEngine {
    msg_id: String,
    model: String,
    started: bool,
    finished: bool,
    next_index: usize,
    open: Option<OpenBlock>,
    text: String,
    thinking: String,
    last_text: String,
    tools: HashMap<u64, ToolSlot>,
    usage: Usage,
    stop_reason: Option<StopReason>,
    suppress_thinking: bool,
    observer: Option<Box<dyn StreamObserver>>,
    pending: Vec<StreamEvent>,
}

impl BlockEngine {
    pub fn new(model: &str) -> Self {
        Self {
            msg_id: new_message_id(),
            model: model.to_string(),
            started: false,
            finished: false,
            next_index: 0,
            open: None,
            text: String::new(),
            thinking: String::new(),
            last_text: String::new(),
            tools: HashMap::new(),
            usage: Usage::default(),
            stop_reason: None,
            suppress_thinking: false,
            observer: None,
            pending: Vec::new(),
        }
    }

    /// Drop all thinking content instead of emitting it.
    pub fn suppress_thinking(mut self, suppress: bool) -> Self {
        self.suppress_thinking = suppress;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn StreamObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tools.is_empty()
    }

    pub fn set_usage(&mut self, usage: Usage) {
        self.usage = usage;
    }

    pub fn set_stop_reason(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
    }

    /// Take the events queued since the last drain.
    pub fn drain(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Emit `message_start` and `ping` once.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let mut message = MessagesResponse::empty(self.msg_id.clone(), self.model.clone());
        message.usage.input_tokens = self.usage.input_tokens;
        self.pending.push(StreamEvent::MessageStart { message });
        self.pending.push(StreamEvent::Ping);
    }

    pub fn text_delta(&mut self, text: &str) {
        if self.finished || text.is_empty() {
            return;
        }
        let index = match self.open {
            Some(OpenBlock::Text(index)) => index,
            _ => {
                let index = self.open_block(ResponseContentBlock::Text {
                    text: String::new(),
                });
                self.open = Some(OpenBlock::Text(index));
                index
            }
        };
        self.text.push_str(text);
        self.pending.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    pub fn thinking_delta(&mut self, thinking: &str) {
        if self.finished || thinking.is_empty() || self.suppress_thinking {
            return;
        }
        let index = match self.open {
            Some(OpenBlock::Thinking(index)) => index,
            _ => {
                let index = self.open_block(ResponseContentBlock::Thinking {
                    thinking: String::new(),
                    signature: None,
                });
                self.open = Some(OpenBlock::Thinking(index));
                index
            }
        };
        self.thinking.push_str(thinking);
        self.pending.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::ThinkingDelta {
                thinking: thinking.to_string(),
            },
        });
    }

    /// Feed one piece of a tool call identified by the upstream's index.
    ///
    /// The first sighting opens a `tool_use` block with whatever id and name are
    /// known. Argument fragments are forwarded as `input_json_delta` while the
    /// block is open; fragments for a block that was already closed are kept
    /// but not forwarded.
    pub fn tool_call(
        &mut self,
        upstream: u64,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        if self.finished {
            return;
        }

        if !self.tools.contains_key(&upstream) {
            let id = id
                .filter(|s| !s.is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple()));
            let name = name.unwrap_or_default().to_string();
            let block_index = self.open_block(ResponseContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: Value::Object(serde_json::Map::new()),
            });
            self.open = Some(OpenBlock::Tool {
                index: block_index,
                upstream,
            });
            self.tools.insert(
                upstream,
                ToolSlot {
                    block_index,
                    id,
                    name,
                    arguments: String::new(),
                    closed: false,
                },
            );
        }

        let Some(fragment) = arguments.filter(|a| !a.is_empty()) else {
            return;
        };
        let Some(slot) = self.tools.get_mut(&upstream) else {
            return;
        };
        slot.arguments.push_str(fragment);
        if slot.closed {
            tracing::warn!(
                upstream,
                tool = %slot.name,
                "Argument delta for a closed tool block, not forwarded"
            );
            return;
        }
        self.pending.push(StreamEvent::ContentBlockDelta {
            index: slot.block_index,
            delta: Delta::InputJsonDelta {
                partial_json: fragment.to_string(),
            },
        });
    }

    /// The upstream says a tool call is complete. `final_arguments` fills in
    /// the arguments when no fragment was streamed.
    pub fn tool_done(&mut self, upstream: u64, final_arguments: Option<&str>) {
        let Some(slot) = self.tools.get(&upstream) else {
            return;
        };
        if slot.arguments.is_empty() && !slot.closed {
            if let Some(args) = final_arguments.filter(|a| !a.is_empty()) {
                self.tool_call(upstream, None, None, Some(args));
            }
        }
        if matches!(self.open, Some(OpenBlock::Tool { upstream: open, .. }) if open == upstream) {
            self.close_block();
        }
    }

    /// Close whatever block is open.
    pub fn close_block(&mut self) {
        let Some(open) = self.open.take() else {
            return;
        };
        match open {
            OpenBlock::Text(index) => {
                self.last_text = std::mem::take(&mut self.text);
                self.pending.push(StreamEvent::ContentBlockStop { index });
            }
            OpenBlock::Thinking(index) => {
                self.thinking.clear();
                self.pending.push(StreamEvent::ContentBlockStop { index });
            }
            OpenBlock::Tool { index, upstream } => {
                self.pending.push(StreamEvent::ContentBlockStop { index });
                if let Some(slot) = self.tools.get_mut(&upstream) {
                    slot.closed = true;
                    let input = parse_arguments(&slot.arguments);
                    if let Some(observer) = self.observer.as_mut() {
                        observer.tool_call_ready(&slot.id, &slot.name, &input);
                    }
                }
            }
        }
    }

    /// Forward an upstream failure as an Anthropic `error` event.
    pub fn error(&mut self, message: impl Into<String>) {
        if self.finished {
            return;
        }
        self.start();
        self.close_block();
        self.pending.push(StreamEvent::Error {
            error: ErrorBody {
                error_type: "api_error".to_string(),
                message: message.into(),
            },
        });
    }

    /// Close the open block and emit `message_delta` plus `message_stop`.
    /// Only the first call has any effect.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.start();
        self.close_block();
        self.finished = true;

        let stop_reason = self.stop_reason.unwrap_or(StopReason::EndTurn);
        self.pending.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                input_tokens: Some(self.usage.input_tokens).filter(|n| *n > 0),
                output_tokens: self.usage.output_tokens,
                cache_read_input_tokens: self.usage.cache_read_input_tokens,
            },
        });
        self.pending.push(StreamEvent::MessageStop);

        if let Some(observer) = self.observer.as_mut() {
            observer.stream_finished(stop_reason, &self.last_text, &self.usage);
        }
    }

    fn open_block(&mut self, content_block: ResponseContentBlock) -> usize {
        self.start();
        self.close_block();
        let index = self.next_index;
        self.next_index += 1;
        self.pending.push(StreamEvent::ContentBlockStart {
            index,
            content_block,
        });
        index
    }
}
