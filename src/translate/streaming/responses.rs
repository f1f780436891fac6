//! Responses API stream driver.
//!
//! Events are named `response.*`, either in the SSE `event:` field or in the
//! payload's `type`. Tool calls are keyed by `output_index`; deltas that only
//! carry an `item_id` are mapped back through the items seen so far.

use std::collections::HashMap;

use serde_json::Value;

use super::engine::BlockEngine;
use super::{ChunkDecoder, Flow};
use crate::translate::anthropic_types::StopReason;
use crate::translate::responses_response::{incomplete_stop_reason, map_status, responses_usage};

#[derive(Debug, Default)]
pub struct ResponsesChunkDecoder {
    item_indices: HashMap<String, u64>,
}

impl ResponsesChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn output_index(&self, payload: &Value) -> Option<u64> {
        payload
            .get("output_index")
            .and_then(Value::as_u64)
            .or_else(|| {
                payload
                    .get("item_id")
                    .and_then(Value::as_str)
                    .and_then(|id| self.item_indices.get(id).copied())
            })
    }

    fn item_added(&mut self, payload: &Value, engine: &mut BlockEngine) {
        let Some(item) = payload.get("item") else {
            return;
        };
        let index = payload
            .get("output_index")
            .and_then(Value::as_u64)
            .unwrap_or(self.item_indices.len() as u64);
        if let Some(id) = item.get("id").and_then(Value::as_str) {
            self.item_indices.insert(id.to_string(), index);
        }
        if item.get("type").and_then(Value::as_str) == Some("function_call") {
            engine.tool_call(
                index,
                item.get("call_id").and_then(Value::as_str),
                item.get("name").and_then(Value::as_str),
                None,
            );
        }
    }

    fn item_done(&mut self, payload: &Value, engine: &mut BlockEngine) {
        let Some(item) = payload.get("item") else {
            return;
        };
        match item.get("type").and_then(Value::as_str) {
            Some("function_call") => {
                let index = self.output_index(payload).unwrap_or(self.item_indices.len() as u64);
                let arguments = item.get("arguments").and_then(Value::as_str);
                // Some providers skip output_item.added and only report the finished call.
                engine.tool_call(
                    index,
                    item.get("call_id").and_then(Value::as_str),
                    item.get("name").and_then(Value::as_str),
                    None,
                );
                engine.tool_done(index, arguments);
            }
            Some(_) => engine.close_block(),
            None => {}
        }
    }

    fn completed(&mut self, payload: &Value, engine: &mut BlockEngine) {
        let response = payload.get("response").unwrap_or(payload);
        if let Some(usage) = response.get("usage") {
            engine.set_usage(responses_usage(usage));
        }
        let status = response.get("status").and_then(Value::as_str);
        let reason = match map_status(status) {
            StopReason::EndTurn if engine.has_tool_calls() => StopReason::ToolUse,
            other => other,
        };
        engine.set_stop_reason(reason);
    }

    fn incomplete(&mut self, payload: &Value, engine: &mut BlockEngine) {
        let response = payload.get("response").unwrap_or(payload);
        if let Some(usage) = response.get("usage") {
            engine.set_usage(responses_usage(usage));
        }
        engine.set_stop_reason(incomplete_stop_reason(response.get("incomplete_details")));
    }
}

fn error_message(payload: &Value) -> String {
    let error = payload
        .pointer("/response/error")
        .filter(|e| !e.is_null())
        .or_else(|| payload.get("error"))
        .unwrap_or(payload);
    error
        .get("message")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| "upstream reported a failed response".to_string())
}

impl ChunkDecoder for ResponsesChunkDecoder {
    fn decode(&mut self, event: &str, data: &str, engine: &mut BlockEngine) -> Flow {
        let data = data.trim();
        if data.is_empty() {
            return Flow::Continue;
        }
        if data == "[DONE]" {
            return Flow::Done;
        }

        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable Responses event");
                return Flow::Continue;
            }
        };
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or(event);
        let delta = payload.get("delta").and_then(Value::as_str);

        engine.start();

        match kind {
            "response.created" | "response.in_progress" => {}
            "response.output_item.added" => self.item_added(&payload, engine),
            "response.output_text.delta" | "response.refusal.delta" => {
                if let Some(text) = delta {
                    engine.text_delta(text);
                }
            }
            "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
                if let Some(thinking) = delta {
                    engine.thinking_delta(thinking);
                }
            }
            "response.function_call_arguments.delta" => match self.output_index(&payload) {
                Some(index) => engine.tool_call(index, None, None, delta),
                None => tracing::debug!("Argument delta without an output index"),
            },
            "response.function_call_arguments.done" => {
                if let Some(index) = self.output_index(&payload) {
                    engine.tool_done(index, payload.get("arguments").and_then(Value::as_str));
                }
            }
            "response.output_item.done" => self.item_done(&payload, engine),
            "response.completed" | "response.done" => {
                self.completed(&payload, engine);
                return Flow::Done;
            }
            "response.incomplete" => {
                self.incomplete(&payload, engine);
                return Flow::Done;
            }
            "response.failed" | "error" => {
                let message = error_message(&payload);
                tracing::warn!(%message, "Upstream response failed");
                engine.error(message);
                return Flow::Done;
            }
            other => tracing::trace!(event = other, "Ignoring Responses event"),
        }

        Flow::Continue
    }
}
