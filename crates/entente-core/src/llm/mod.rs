//! LLM integration - OpenRouter API
//!
//! [`LlmClient`] implements both provider seams the engine depends on:
//! chat completions for resolution suggestions and embeddings for
//! duplicate detection.

mod client;
mod types;

pub use client::LlmClient;
pub use types::{ChatRequest, ChatResponse, Message, MessageRole};
