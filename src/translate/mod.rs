//! API translation between Anthropic and `OpenAI` formats.
//!
//! Converts requests, responses and streaming events between the Anthropic
//! Messages API and the two `OpenAI` wire formats (Chat Completions and
//! Responses). Everything here is pure except [`streaming::SseWriter`], which
//! writes into the response body channel.

pub mod anthropic_types;
pub mod blocks;
pub mod lenient;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod responses_request;
pub mod responses_response;
pub mod responses_types;
pub mod streaming;
