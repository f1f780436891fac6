//! Chat Completions stream driver.
//!
//! Each `data:` line is a `ChatCompletionChunk`; `[DONE]` ends the stream.
//! Reasoning arrives either in `reasoning_content`/`reasoning` or wrapped in
//! literal `<think>` tags inside `content`, which [`ThinkTagScanner`] splits out.

use serde_json::Value;

use super::engine::BlockEngine;
use super::{ChunkDecoder, Flow};
use crate::translate::openai_types::{ChatCompletionChunk, ChatErrorResponse};
use crate::translate::response::{chat_usage, map_finish_reason};

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Thinking(String),
}

/// Two-state scanner that splits text at `<think>`/`</think>` boundaries.
///
/// A tag cut in half by a chunk boundary is held back until the next chunk.
#[derive(Debug, Default)]
pub struct ThinkTagScanner {
    inside: bool,
    held: String,
}

impl ThinkTagScanner {
    pub fn feed(&mut self, text: &str) -> Vec<Segment> {
        let mut input = std::mem::take(&mut self.held);
        input.push_str(text);

        let mut segments = Vec::new();
        let mut rest = input.as_str();
        loop {
            let tag = if self.inside { CLOSE_TAG } else { OPEN_TAG };
            if let Some(pos) = rest.find(tag) {
                self.push(&mut segments, &rest[..pos]);
                rest = &rest[pos + tag.len()..];
                self.inside = !self.inside;
                continue;
            }
            let keep = partial_tag_len(rest, tag);
            let (emit, held) = rest.split_at(rest.len() - keep);
            self.push(&mut segments, emit);
            self.held = held.to_string();
            break;
        }
        segments
    }

    /// Whatever is held back, as a segment of the current state.
    pub fn flush(&mut self) -> Option<Segment> {
        let held = std::mem::take(&mut self.held);
        (!held.is_empty()).then(|| self.segment(held))
    }

    fn push(&self, segments: &mut Vec<Segment>, piece: &str) {
        if !piece.is_empty() {
            segments.push(self.segment(piece.to_string()));
        }
    }

    fn segment(&self, piece: String) -> Segment {
        if self.inside {
            Segment::Thinking(piece)
        } else {
            Segment::Text(piece)
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|k| text.ends_with(&tag[..*k]))
        .unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct ChatChunkDecoder {
    scanner: ThinkTagScanner,
    saw_text: bool,
}

impl ChatChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn route(&mut self, segment: Segment, engine: &mut BlockEngine) {
        match segment {
            Segment::Text(text) => {
                if !text.trim().is_empty() {
                    self.saw_text = true;
                }
                engine.text_delta(&text);
            }
            Segment::Thinking(thinking) => self.thinking(&thinking, engine),
        }
    }

    // Reasoning is over once non-blank text has started.
    fn thinking(&mut self, thinking: &str, engine: &mut BlockEngine) {
        if self.saw_text {
            tracing::debug!(len = thinking.len(), "Dropping thinking delta after text");
            return;
        }
        engine.thinking_delta(thinking);
    }
}

impl ChunkDecoder for ChatChunkDecoder {
    fn decode(&mut self, _event: &str, data: &str, engine: &mut BlockEngine) -> Flow {
        let data = data.trim();
        if data == "[DONE]" {
            return Flow::Done;
        }
        if data.is_empty() {
            return Flow::Continue;
        }

        let value: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable chunk");
                return Flow::Continue;
            }
        };
        if value.get("error").is_some_and(Value::is_object) {
            let message = serde_json::from_value::<ChatErrorResponse>(value)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| "upstream stream error".to_string());
            tracing::warn!(%message, "Upstream error inside stream");
            engine.error(message);
            return Flow::Done;
        }
        let chunk: ChatCompletionChunk = match serde_json::from_value(value) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping chunk with unexpected shape");
                return Flow::Continue;
            }
        };

        engine.start();

        if let Some(ref usage) = chunk.usage {
            engine.set_usage(chat_usage(usage));
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Flow::Continue;
        };
        let delta = choice.delta;

        let reasoning = delta
            .reasoning_content
            .as_deref()
            .or(delta.reasoning.as_deref())
            .filter(|r| !r.is_empty());
        if let Some(reasoning) = reasoning {
            self.thinking(reasoning, engine);
        }

        if let Some(content) = delta.content.as_deref().filter(|c| !c.is_empty()) {
            for segment in self.scanner.feed(content) {
                self.route(segment, engine);
            }
        }

        for tc in delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            engine.tool_call(
                tc.index,
                tc.id.as_deref(),
                name.as_deref(),
                arguments.as_deref(),
            );
        }

        // Usage may still follow in a trailing chunk, so wait for [DONE].
        if let Some(reason) = choice.finish_reason.as_deref() {
            engine.set_stop_reason(map_finish_reason(Some(reason)));
        }

        Flow::Continue
    }

    fn flush(&mut self, engine: &mut BlockEngine) {
        if let Some(segment) = self.scanner.flush() {
            self.route(segment, engine);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::{Delta, ResponseContentBlock, StopReason, StreamEvent};
    use crate::translate::streaming::StreamConverter;
    use serde_json::json;

    fn converter() -> StreamConverter<ChatChunkDecoder> {
        StreamConverter::new(BlockEngine::new("claude-test"), ChatChunkDecoder::new())
    }

    fn feed(conv: &mut StreamConverter<ChatChunkDecoder>, chunk: Value) -> Vec<StreamEvent> {
        conv.process_event("", &chunk.to_string())
    }

    fn content(text: &str) -> Value {
        json!({"choices": [{"index": 0, "delta": {"content": text}}]})
    }

    #[test]
    fn test_scanner_splits_tags() {
        let mut scanner = ThinkTagScanner::default();
        assert_eq!(
            scanner.feed("<think>plan</think>answer"),
            vec![
                Segment::Thinking("plan".to_string()),
                Segment::Text("answer".to_string())
            ]
        );
    }

    #[test]
    fn test_scanner_holds_split_tag() {
        let mut scanner = ThinkTagScanner::default();
        assert_eq!(scanner.feed("hi <thi"), vec![Segment::Text("hi ".to_string())]);
        assert_eq!(scanner.feed("nk>deep</th"), vec![Segment::Thinking("deep".to_string())]);
        assert_eq!(scanner.feed("ink>out"), vec![Segment::Text("out".to_string())]);
        assert_eq!(scanner.feed("a <"), vec![Segment::Text("a ".to_string())]);
        assert_eq!(scanner.flush(), Some(Segment::Text("<".to_string())));
    }

    #[test]
    fn test_text_stream() {
        let mut conv = converter();
        let events = feed(&mut conv, content("Hello"));
        let names: Vec<_> = events.iter().map(StreamEvent::event_name).collect();
        assert_eq!(
            names,
            vec!["message_start", "ping", "content_block_start", "content_block_delta"]
        );

        let events = feed(&mut conv, content(" world"));
        assert_eq!(events.len(), 1);

        let events = feed(
            &mut conv,
            json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
        );
        assert!(events.is_empty());

        let events = feed(
            &mut conv,
            json!({"choices": [], "usage": {"prompt_tokens": 9, "completion_tokens": 2}}),
        );
        assert!(events.is_empty());

        let events = conv.process_event("", "[DONE]");
        let names: Vec<_> = events.iter().map(StreamEvent::event_name).collect();
        assert_eq!(names, vec!["content_block_stop", "message_delta", "message_stop"]);
        let StreamEvent::MessageDelta { delta, usage } = &events[1] else {
            panic!("expected message_delta");
        };
        assert_eq!(delta.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(usage.output_tokens, 2);
        assert_eq!(usage.input_tokens, Some(9));

        assert!(conv.finish().is_empty());
    }

    #[test]
    fn test_tool_call_stream() {
        let mut conv = converter();
        feed(&mut conv, content("Checking..."));
        let events = feed(
            &mut conv,
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0, "id": "call_abc", "type": "function",
                "function": {"name": "search", "arguments": "{\"q\""}
            }]}}]}),
        );
        let names: Vec<_> = events.iter().map(StreamEvent::event_name).collect();
        assert_eq!(
            names,
            vec!["content_block_stop", "content_block_start", "content_block_delta"]
        );
        assert!(matches!(
            &events[1],
            StreamEvent::ContentBlockStart { index: 1, content_block: ResponseContentBlock::ToolUse { name, .. } } if name == "search"
        ));

        let events = feed(
            &mut conv,
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "function": {"arguments": ":\"x\"}"}}]},
                    "finish_reason": "tool_calls"}]}),
        );
        assert!(matches!(
            &events[0],
            StreamEvent::ContentBlockDelta { index: 1, delta: Delta::InputJsonDelta { partial_json } } if partial_json == ":\"x\"}"
        ));

        let events = conv.finish();
        let StreamEvent::MessageDelta { delta, .. } = &events[1] else {
            panic!("expected message_delta");
        };
        assert_eq!(delta.stop_reason, Some(StopReason::ToolUse));
    }

    #[test]
    fn test_reasoning_then_text_and_late_thinking_dropped() {
        let mut conv = converter();
        let mut events = feed(
            &mut conv,
            json!({"choices": [{"delta": {"reasoning_content": "hmm"}}]}),
        );
        events.extend(feed(&mut conv, content("<think>more</think>Answer")));
        events.extend(feed(
            &mut conv,
            json!({"choices": [{"delta": {"reasoning_content": "late"}}]}),
        ));
        events.extend(conv.finish());

        let thinking: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockDelta {
                    delta: Delta::ThinkingDelta { thinking },
                    ..
                } => Some(thinking.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(thinking, vec!["hmm", "more"]);
        let starts = events
            .iter()
            .filter(|e| e.event_name() == "content_block_start")
            .count();
        assert_eq!(starts, 2);
    }

    #[test]
    fn test_blank_text_keeps_reasoning_open() {
        let mut conv = converter();
        let mut events = feed(&mut conv, content("\n"));
        events.extend(feed(&mut conv, content("<think>plan</think>Hi")));
        events.extend(feed(
            &mut conv,
            json!({"choices": [{"delta": {"reasoning_content": "late"}}]}),
        ));
        events.extend(conv.finish());

        let thinking: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockDelta {
                    delta: Delta::ThinkingDelta { thinking },
                    ..
                } => Some(thinking.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(thinking, vec!["plan"]);
    }

    #[test]
    fn test_stream_without_done_is_finalized() {
        let mut conv = converter();
        feed(&mut conv, content("partial <thi"));
        let events = conv.finish();
        assert!(matches!(
            &events[0],
            StreamEvent::ContentBlockDelta { delta: Delta::TextDelta { text }, .. } if text == "<thi"
        ));
        assert_eq!(events.last().map(StreamEvent::event_name), Some("message_stop"));
    }

    #[test]
    fn test_error_chunk_becomes_error_event() {
        let mut conv = converter();
        let events = feed(&mut conv, json!({"error": {"message": "overloaded", "type": "server_error"}}));
        let names: Vec<_> = events.iter().map(StreamEvent::event_name).collect();
        assert_eq!(
            names,
            vec!["message_start", "ping", "error", "message_delta", "message_stop"]
        );
        assert!(conv.is_finished());
    }

    #[test]
    fn test_garbage_is_skipped() {
        let mut conv = converter();
        assert!(conv.process_event("", "not json").is_empty());
        assert!(conv.process_event("", "").is_empty());
        assert!(!conv.is_finished());
    }
}
