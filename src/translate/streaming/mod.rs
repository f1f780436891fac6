//! Streaming translation from upstream SSE events to Anthropic SSE events.
//!
//! A [`StreamConverter`] pairs the shared [`BlockEngine`] with one
//! [`ChunkDecoder`] per wire format. Each upstream event goes in through
//! [`StreamConverter::process_event`] and the Anthropic events it produced come
//! out. [`SseWriter`] and [`MessageAccumulator`] are the two places those
//! events end up.

pub mod accumulate;
pub mod chat;
pub mod engine;
pub mod responses;
pub mod sse;

pub use accumulate::MessageAccumulator;
pub use chat::ChatChunkDecoder;
pub use engine::{BlockEngine, StreamObserver};
pub use responses::ResponsesChunkDecoder;
pub use sse::{SseEvent, SseWriter};

use super::anthropic_types::StreamEvent;

/// Whether the upstream stream has more to say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Done,
}

/// Decodes one upstream wire format into [`BlockEngine`] calls.
pub trait ChunkDecoder: Send {
    /// Handle one SSE event. `event` is the `event:` field, empty when absent.
    fn decode(&mut self, event: &str, data: &str, engine: &mut BlockEngine) -> Flow;

    /// Flush anything the decoder is still holding before the stream is finalized.
    fn flush(&mut self, _engine: &mut BlockEngine) {}
}

pub struct StreamConverter<D> {
    engine: BlockEngine,
    decoder: D,
}

impl<D: ChunkDecoder> StreamConverter<D> {
    pub fn new(engine: BlockEngine, decoder: D) -> Self {
        Self { engine, decoder }
    }

    /// Process one upstream SSE event, returning zero or more Anthropic events.
    /// A terminal upstream event finalizes the stream.
    pub fn process_event(&mut self, event: &str, data: &str) -> Vec<StreamEvent> {
        if self.engine.is_finished() {
            return Vec::new();
        }
        if self.decoder.decode(event, data, &mut self.engine) == Flow::Done {
            self.decoder.flush(&mut self.engine);
            self.engine.finish();
        }
        self.engine.drain()
    }

    /// Finalize at end of upstream input. Does nothing after a terminal event.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if !self.engine.is_finished() {
            self.decoder.flush(&mut self.engine);
            self.engine.finish();
        }
        self.engine.drain()
    }

    /// Report an unrecoverable upstream failure and finalize.
    pub fn fail(&mut self, message: impl Into<String>) -> Vec<StreamEvent> {
        if !self.engine.is_finished() {
            self.engine.error(message);
            self.engine.finish();
        }
        self.engine.drain()
    }

    pub fn is_finished(&self) -> bool {
        self.engine.is_finished()
    }
}
