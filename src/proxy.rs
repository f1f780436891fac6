//! The relay call: resolve the wire format, convert, call upstream, convert back.
//!
//! One [`Relay`] is shared by every request. A call holds its backend's queue
//! slot until the upstream reply has been fully consumed, which for streamed
//! replies means the slot moves into the task that pumps the stream.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::api_type::{api_type_from_url, ApiType};
use crate::backend::BackendConfig;
use crate::error::{ProxyError, Result};
use crate::journal::{CallRecord, SharedJournal};
use crate::queue::{QueueSlot, RequestQueue};
use crate::translate::anthropic_types::{
    ContentBlock, MessagesRequest, MessagesResponse, ResponseContentBlock, StopReason,
    StreamEvent, Usage,
};
use crate::translate::blocks::image_source_url;
use crate::translate::openai_types::{ChatCompletionResponse, ChatErrorResponse};
use crate::translate::request::anthropic_to_openai;
use crate::translate::response::openai_to_anthropic;
use crate::translate::responses_request::anthropic_to_responses;
use crate::translate::responses_response::responses_to_anthropic;
use crate::translate::streaming::{
    BlockEngine, ChatChunkDecoder, ChunkDecoder, MessageAccumulator, ResponsesChunkDecoder,
    SseWriter, StreamConverter, StreamObserver,
};

const MAX_ERROR_BODY: usize = 500;
const STREAM_REQUIRED: &str = "stream must be set to true";
const SSE_CHANNEL_CAPACITY: usize = 64;

/// What the caller gets back.
pub enum RelayReply {
    Message(MessagesResponse),
    Stream(RelayStream),
}

/// Anthropic SSE bytes for one call. Dropping it cancels the upstream read.
pub struct RelayStream {
    inner: ReceiverStream<std::result::Result<Bytes, Infallible>>,
    _cancel_on_drop: DropGuard,
}

impl Stream for RelayStream {
    type Item = std::result::Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[derive(Clone)]
pub struct Relay {
    client: reqwest::Client,
    queue: RequestQueue,
    timeout: Duration,
    force_stream: bool,
    journal: SharedJournal,
}

/// Per-call facts recorded in the journal.
#[derive(Debug, Clone)]
struct CallContext {
    api_type: ApiType,
    model: String,
    upstream_model: String,
    stream: bool,
    has_images: bool,
    started: Instant,
}

impl CallContext {
    fn record(&self, journal: &SharedJournal, status: u16, error: Option<&ProxyError>) {
        journal.record(CallRecord {
            timestamp: chrono::Utc::now(),
            api_type: self.api_type.to_string(),
            model: self.model.clone(),
            upstream_model: self.upstream_model.clone(),
            stream: self.stream,
            status,
            error_type: error.map(|e| e.kind().as_str().to_string()),
            duration_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            has_images: self.has_images,
        });
    }
}

/// Where converted events go.
enum EventSink {
    Sse(SseWriter),
    Collect(MessageAccumulator),
}

impl EventSink {
    async fn emit(&mut self, events: Vec<StreamEvent>) {
        match self {
            EventSink::Sse(writer) => {
                for event in &events {
                    writer.send(event).await;
                }
            }
            EventSink::Collect(acc) => {
                for event in &events {
                    acc.push(event);
                }
            }
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            EventSink::Sse(writer) => writer.is_closed(),
            EventSink::Collect(_) => false,
        }
    }

    fn into_message(self) -> Result<MessagesResponse> {
        match self {
            EventSink::Collect(acc) => acc.finish(),
            EventSink::Sse(_) => Err(ProxyError::internal("streamed reply has no message")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PumpOutcome {
    Completed,
    Cancelled,
    TimedOut,
}

/// Logs tool calls and stream completion.
struct TracingObserver {
    model: String,
}

impl StreamObserver for TracingObserver {
    fn tool_call_ready(&mut self, id: &str, name: &str, _input: &Value) {
        tracing::info!(model = %self.model, tool = name, id, "Tool call ready");
    }

    fn stream_finished(&mut self, stop_reason: StopReason, final_text: &str, usage: &Usage) {
        tracing::info!(
            model = %self.model,
            stop_reason = ?stop_reason,
            text_len = final_text.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Stream finished"
        );
    }
}

impl Relay {
    pub fn new(
        client: reqwest::Client,
        timeout: Duration,
        force_stream: bool,
        journal: SharedJournal,
    ) -> Self {
        Self {
            client,
            queue: RequestQueue::new(),
            timeout,
            force_stream,
            journal,
        }
    }

    pub fn journal(&self) -> &SharedJournal {
        &self.journal
    }

    /// Relay one Anthropic request to `backend`.
    ///
    /// `force_stream_env` is the environment switch, read by the caller once
    /// per request.
    pub async fn handle(
        &self,
        backend: BackendConfig,
        request: MessagesRequest,
        force_stream_env: bool,
    ) -> Result<RelayReply> {
        let api_type = api_type_from_url(&backend.url)?;
        if let Some(declared) = backend.api_type.as_deref() {
            if declared != api_type.as_str() {
                tracing::warn!(declared, resolved = %api_type, "Backend apiType disagrees with its URL, using the URL");
            }
        }

        let caller_stream = request.stream.unwrap_or(false);
        let upstream_stream =
            caller_stream || self.force_stream || force_stream_env || backend.force_stream;

        let mut ctx = CallContext {
            api_type,
            model: request.model.clone(),
            upstream_model: backend
                .model_override()
                .unwrap_or(&request.model)
                .to_string(),
            stream: caller_stream,
            has_images: false,
            started: Instant::now(),
        };

        tracing::info!(
            api_type = %api_type,
            model = %ctx.model,
            upstream_model = %ctx.upstream_model,
            caller_stream,
            upstream_stream,
            messages = request.messages.len(),
            "Relaying request"
        );

        let slot = self.queue.acquire(&backend.queue_key()).await;
        let deadline = Instant::now() + self.timeout;

        let result = self
            .dispatch(&mut ctx, &backend, &request, upstream_stream, slot, deadline)
            .await;
        match &result {
            Ok(RelayReply::Message(_)) => ctx.record(&self.journal, 200, None),
            Ok(RelayReply::Stream(_)) => {}
            Err(e) => {
                tracing::warn!(status = e.status(), error = %e, "Relay call failed");
                ctx.record(&self.journal, e.status(), Some(e));
            }
        }
        result
    }

    async fn dispatch(
        &self,
        ctx: &mut CallContext,
        backend: &BackendConfig,
        request: &MessagesRequest,
        mut upstream_stream: bool,
        slot: QueueSlot,
        deadline: Instant,
    ) -> Result<RelayReply> {
        let mut response = self
            .send(ctx, backend, request, upstream_stream, deadline)
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = read_text(response, deadline).await?;

            if !upstream_stream && is_stream_required(&body) {
                tracing::info!("Upstream requires streaming, retrying once with stream=true");
                upstream_stream = true;
                response = self.send(ctx, backend, request, true, deadline).await?;
                if !response.status().is_success() {
                    let status = response.status().as_u16();
                    let body = read_text(response, deadline).await?;
                    return Err(upstream_failure(status, &body));
                }
            } else {
                return Err(upstream_failure(status, &body));
            }
        }

        if !upstream_stream {
            let body = read_text(response, deadline).await?;
            drop(slot);
            let mut message = convert_reply(ctx.api_type, &body, &request.model);
            if backend.filter_content {
                strip_thinking(&mut message);
            }
            return Ok(RelayReply::Message(message));
        }

        let engine = BlockEngine::new(&request.model)
            .suppress_thinking(backend.filter_content)
            .with_observer(Box::new(TracingObserver {
                model: request.model.clone(),
            }));

        let cancel = CancellationToken::new();

        if !ctx.stream {
            let mut sink = EventSink::Collect(MessageAccumulator::new());
            let outcome = drive(ctx.api_type, response, engine, &mut sink, &cancel, deadline).await;
            drop(slot);
            if outcome == PumpOutcome::TimedOut {
                return Err(ProxyError::Timeout);
            }
            return sink.into_message().map(RelayReply::Message);
        }

        let (tx, rx) = mpsc::channel(SSE_CHANNEL_CAPACITY);
        let mut sink = EventSink::Sse(SseWriter::new(tx, cancel.clone()));
        let journal = self.journal.clone();
        let ctx = ctx.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let _slot = slot;
            let outcome = drive(ctx.api_type, response, engine, &mut sink, &task_cancel, deadline).await;
            match outcome {
                PumpOutcome::Completed => ctx.record(&journal, 200, None),
                PumpOutcome::Cancelled => {
                    tracing::info!(model = %ctx.model, "Stream cancelled by client");
                    ctx.record(&journal, 499, None);
                }
                PumpOutcome::TimedOut => {
                    tracing::warn!(model = %ctx.model, "Stream hit the request timeout");
                    ctx.record(&journal, 504, Some(&ProxyError::Timeout));
                }
            }
        });

        Ok(RelayReply::Stream(RelayStream {
            inner: ReceiverStream::new(rx),
            _cancel_on_drop: cancel.drop_guard(),
        }))
    }

    async fn send(
        &self,
        ctx: &mut CallContext,
        backend: &BackendConfig,
        request: &MessagesRequest,
        stream: bool,
        deadline: Instant,
    ) -> Result<reqwest::Response> {
        let upstream = upstream_body(ctx.api_type, request, stream, backend.model_override())?;
        ctx.upstream_model = upstream.model;
        ctx.has_images = upstream.has_images;
        let body = upstream.body;

        let mut builder = self.client.post(&backend.url);
        for (name, value) in backend.headers.iter().flatten() {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), _) if name == AUTHORIZATION || name == CONTENT_TYPE => {
                    tracing::debug!(header = %name, "Ignoring custom header that the relay sets itself");
                }
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => tracing::warn!(header = %name, "Skipping invalid custom header"),
            }
        }
        let builder = builder
            .bearer_auth(&backend.key)
            .header(CONTENT_TYPE, "application/json")
            .json(&body);

        tracing::debug!(url = %backend.url, stream, "POST upstream");
        match tokio::time::timeout_at(deadline, builder.send()).await {
            Ok(response) => Ok(response?),
            Err(_) => Err(ProxyError::Timeout),
        }
    }
}

/// A converted request, ready to send.
struct UpstreamBody {
    body: Value,
    model: String,
    /// Whether any image made it into the converted request.
    has_images: bool,
}

fn upstream_body(
    api_type: ApiType,
    request: &MessagesRequest,
    stream: bool,
    model_override: Option<&str>,
) -> Result<UpstreamBody> {
    let mut request = request.clone();
    request.stream = stream.then_some(true);
    if let Some(model) = model_override {
        request.model = model.to_string();
    }

    let (body, has_images) = match api_type {
        ApiType::ChatCompletions => {
            let (chat, has_images) = anthropic_to_openai(&request);
            (serde_json::to_value(chat)?, has_images)
        }
        ApiType::Responses => (
            serde_json::to_value(anthropic_to_responses(&request))?,
            has_convertible_images(&request),
        ),
    };
    Ok(UpstreamBody {
        body,
        model: request.model,
        has_images,
    })
}

/// Drive the stream converter for `api_type` over an upstream SSE body.
async fn drive(
    api_type: ApiType,
    response: reqwest::Response,
    engine: BlockEngine,
    sink: &mut EventSink,
    cancel: &CancellationToken,
    deadline: Instant,
) -> PumpOutcome {
    match api_type {
        ApiType::ChatCompletions => {
            let converter = StreamConverter::new(engine, ChatChunkDecoder::new());
            pump(response, converter, sink, cancel, deadline).await
        }
        ApiType::Responses => {
            let converter = StreamConverter::new(engine, ResponsesChunkDecoder::new());
            pump(response, converter, sink, cancel, deadline).await
        }
    }
}

async fn pump<D: ChunkDecoder>(
    response: reqwest::Response,
    mut converter: StreamConverter<D>,
    sink: &mut EventSink,
    cancel: &CancellationToken,
    deadline: Instant,
) -> PumpOutcome {
    let events = response.bytes_stream().eventsource();
    tokio::pin!(events);
    let timeout = tokio::time::sleep_until(deadline);
    tokio::pin!(timeout);

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return PumpOutcome::Cancelled,
            _ = &mut timeout => return PumpOutcome::TimedOut,
            next = events.next() => next,
        };

        let converted = match next {
            Some(Ok(event)) => converter.process_event(&event.event, &event.data),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Upstream stream broke off");
                let out = converter.fail(format!("upstream stream error: {e}"));
                sink.emit(out).await;
                return PumpOutcome::Completed;
            }
            None => {
                let out = converter.finish();
                sink.emit(out).await;
                return PumpOutcome::Completed;
            }
        };

        sink.emit(converted).await;
        if sink.is_closed() {
            return PumpOutcome::Cancelled;
        }
        if converter.is_finished() {
            return PumpOutcome::Completed;
        }
    }
}

async fn read_text(response: reqwest::Response, deadline: Instant) -> Result<String> {
    match tokio::time::timeout_at(deadline, response.text()).await {
        Ok(text) => Ok(text?),
        Err(_) => Err(ProxyError::Timeout),
    }
}

fn convert_reply(api_type: ApiType, body: &str, request_model: &str) -> MessagesResponse {
    match api_type {
        ApiType::ChatCompletions => {
            let parsed = match serde_json::from_str::<ChatCompletionResponse>(body) {
                Ok(resp) => Some(resp),
                Err(e) => {
                    tracing::warn!(error = %e, body = truncate(body, MAX_ERROR_BODY), "Unparseable Chat reply");
                    None
                }
            };
            openai_to_anthropic(parsed.as_ref(), Some(request_model))
        }
        ApiType::Responses => {
            let value = serde_json::from_str::<Value>(body).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Unparseable Responses reply");
                Value::Null
            });
            responses_to_anthropic(&value, Some(request_model))
        }
    }
}

fn strip_thinking(message: &mut MessagesResponse) {
    message
        .content
        .retain(|b| !matches!(b, ResponseContentBlock::Thinking { .. }));
    if message.content.is_empty() {
        message.content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }
}

// Same rule the Responses converter applies when it emits `input_image`.
fn has_convertible_images(request: &MessagesRequest) -> bool {
    request.messages.iter().any(|m| {
        m.content.blocks().iter().any(|b| match b {
            ContentBlock::Image { source } => image_source_url(source).is_some(),
            _ => false,
        })
    })
}

fn is_stream_required(body: &str) -> bool {
    body.to_ascii_lowercase().contains(STREAM_REQUIRED)
}

fn upstream_failure(status: u16, body: &str) -> ProxyError {
    let message = upstream_error_message(body);
    tracing::warn!(status, %message, "Upstream returned an error");
    if status == 429 {
        ProxyError::rate_limited(message)
    } else {
        ProxyError::upstream(status, message)
    }
}

/// `{"error":{"message":..}}` unwrapped to its message, anything else truncated.
fn upstream_error_message(body: &str) -> String {
    match serde_json::from_str::<ChatErrorResponse>(body) {
        Ok(err) if !err.error.message.is_empty() => err.error.message,
        _ => truncate(body.trim(), MAX_ERROR_BODY).to_string(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
