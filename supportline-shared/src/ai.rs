/// AI reply generation seam
///
/// The admission layer only needs to know that generating a reply consumes
/// one unit of the M2 metric; the actual provider lives behind
/// [`ReplyGenerator`]. The mock generator backs tests and local development
/// without network access.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reply generation errors
#[derive(Error, Debug)]
pub enum ReplyError {
    /// Provider returned an error
    #[error("provider error: {0}")]
    Provider(String),

    /// Provider did not answer in time
    #[error("reply generation timed out")]
    Timeout,

    /// Provider refused the content
    #[error("content filtered by provider")]
    ContentFiltered,

    /// Provider unreachable
    #[error("reply provider unavailable")]
    Unavailable,
}

/// A single message in the conversation passed to the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyMessage {
    /// "visitor", "agent", or "assistant"
    pub role: String,

    /// Message body
    pub content: String,
}

/// Generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    /// Model identifier, provider-specific
    pub model: String,

    /// Upper bound on generated tokens
    pub max_tokens: u32,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            max_tokens: 1024,
        }
    }
}

/// A generated reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedReply {
    /// Reply body
    pub content: String,
}

/// Provider seam for AI reply generation.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Generates a reply to the given conversation.
    async fn generate(
        &self,
        messages: &[ReplyMessage],
        config: &ReplyConfig,
    ) -> Result<GeneratedReply, ReplyError>;
}

/// Canned-response generator for tests and local development.
pub struct MockReplyGenerator {
    response: String,
}

impl MockReplyGenerator {
    /// Creates a generator that always returns `response`.
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

impl Default for MockReplyGenerator {
    fn default() -> Self {
        Self::new("Thanks for reaching out! An agent will be with you shortly.")
    }
}

#[async_trait]
impl ReplyGenerator for MockReplyGenerator {
    async fn generate(
        &self,
        _messages: &[ReplyMessage],
        _config: &ReplyConfig,
    ) -> Result<GeneratedReply, ReplyError> {
        Ok(GeneratedReply {
            content: self.response.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_generator_returns_canned_reply() {
        let gen = MockReplyGenerator::new("canned");
        let reply = gen
            .generate(
                &[ReplyMessage {
                    role: "visitor".to_string(),
                    content: "hello?".to_string(),
                }],
                &ReplyConfig::default(),
            )
            .await
            .unwrap();
        assert_eq!(reply.content, "canned");
    }
}
