//! Collaborator contracts for embedding and AI suggestion providers
//!
//! The conflict engine never talks to a model directly. Detection asks an
//! [`EmbeddingProvider`] for vectors and resolution asks a
//! [`SuggestionProvider`] for raw completion text, which the engine parses
//! itself.

use async_trait::async_trait;

use crate::error::Result;

/// Produces text embeddings
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text`, returning `None` when the provider fails
    ///
    /// Failures are expected and must not abort detection; callers drop the
    /// cosine signal instead.
    async fn get_text_embedding(&self, text: &str) -> Option<Vec<f32>>;
}

/// Produces chat-style completions for resolution suggestions
#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    /// Complete a system + user prompt pair, returning raw text
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Embedding provider that never returns a vector
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEmbeddings;

#[async_trait]
impl EmbeddingProvider for NoEmbeddings {
    async fn get_text_embedding(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }
}
