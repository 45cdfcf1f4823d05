//! LLM adapter.
//!
//! Same `async_trait` capability-trait treatment as [`crate::embeddings`].
//! Used by the Validator's contradiction branch, the Truth Resolver, the
//! Consolidator's principle-extraction fallback, and Causal Link mechanism
//! articulation — all optional, all behind `Option<Arc<dyn LlmProvider>>`.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One turn of a chat-style conversation passed to an [`LlmProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Plain-text completion result.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
}

/// Deterministic capability: list of `(role, content)` → text, or parsed JSON.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn model_version(&self) -> &str;

    async fn complete(&self, messages: &[Message]) -> Result<Completion>;

    /// Invoke the model and parse its response as a JSON object. The
    /// default implementation runs [`LlmProvider::complete`] and parses the
    /// returned text; providers whose API has a native JSON mode may
    /// override this directly.
    async fn json(&self, messages: &[Message]) -> Result<serde_json::Value> {
        let completion = self.complete(messages).await?;
        serde_json::from_str(&completion.content).map_err(|e| {
            crate::error::CoreError::Adapter(format!(
                "LLM response was not valid JSON: {e} (content: {})",
                completion.content
            ))
        })
    }
}

/// Canned-response fixture: pre-seed deterministic data rather than hitting
/// a network. Responses are matched in insertion order against
/// the final user message's content via substring match; the first match
/// wins. If nothing matches, `default_response` is returned.
pub struct MockLlmProvider {
    responses: Vec<(String, serde_json::Value)>,
    default_response: serde_json::Value,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            default_response: serde_json::json!({ "contradicts": false }),
        }
    }

    /// Respond with `response` whenever a prompt contains `trigger`.
    pub fn with_response(mut self, trigger: impl Into<String>, response: serde_json::Value) -> Self {
        self.responses.push((trigger.into(), response));
        self
    }

    pub fn with_default(mut self, response: serde_json::Value) -> Self {
        self.default_response = response;
        self
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn model_name(&self) -> &str {
        "mock-canned-llm"
    }

    fn model_version(&self) -> &str {
        "1"
    }

    async fn complete(&self, messages: &[Message]) -> Result<Completion> {
        let value = self.json(messages).await?;
        Ok(Completion { content: value.to_string() })
    }

    async fn json(&self, messages: &[Message]) -> Result<serde_json::Value> {
        let haystack = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        for (trigger, response) in &self.responses {
            if haystack.contains(trigger.as_str()) {
                return Ok(response.clone());
            }
        }
        Ok(self.default_response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_mock_says_no_contradiction() {
        let provider = MockLlmProvider::new();
        let response = provider.json(&[Message::user("anything")]).await.unwrap();
        assert_eq!(response["contradicts"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn triggered_response_is_matched_by_substring() {
        let provider = MockLlmProvider::new().with_response(
            "Rate limit is 100 req/s",
            serde_json::json!({
                "contradicts": true,
                "resolution": "context_dependent",
                "conditions": { "new": "live", "existing": "test" },
                "explanation": "modes differ"
            }),
        );
        let response = provider
            .json(&[Message::user("Does 'Rate limit is 100 req/s' contradict the prior claim?")])
            .await
            .unwrap();
        assert_eq!(response["contradicts"], serde_json::json!(true));
    }
}
