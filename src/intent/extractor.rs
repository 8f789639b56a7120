//! Intent extraction collaborators.
//!
//! [`LlmIntentExtractor`] prompts a language model and parses the JSON it
//! returns; [`KeywordIntentExtractor`] is a deterministic rule-based
//! extractor for tests and offline deployments. Both produce the same
//! [`RawIntentPayload`], which must still pass [`super::validate`] before any
//! computation runs.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::LlmError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::utils::extract_json;

use super::RawIntentPayload;

/// System prompt for LLM intent extraction.
const INTENT_EXTRACTION_PROMPT: &str = r#"You extract the analytical intent from a user's request about a tabular dataset.

Reply with a single JSON object and nothing else:
{
  "category": one of "summary", "correlation", "distribution", "missing_value_audit", "model_training",
  "target": the target column name if the user wants to train a model, else null,
  "columns": an array of column names the user singled out, else null,
  "metric": one of "accuracy", "f1", "r2" if the user named a metric, else null
}

If the request does not fit any category, set "category" to the closest literal word the user used."#;

/// Trait for NLU collaborators that turn a query into a raw intent payload.
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    /// Extracts a raw intent payload from a natural-language query.
    async fn extract_intent(&self, query: &str) -> Result<RawIntentPayload, LlmError>;
}

/// Intent extractor backed by an LLM provider.
pub struct LlmIntentExtractor {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmIntentExtractor {
    /// Creates a new extractor using the given provider and model.
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl IntentExtractor for LlmIntentExtractor {
    async fn extract_intent(&self, query: &str) -> Result<RawIntentPayload, LlmError> {
        let request = GenerationRequest::new(
            self.model.clone(),
            vec![
                Message::system(INTENT_EXTRACTION_PROMPT),
                Message::user(query),
            ],
        )
        .with_temperature(0.0)
        .with_max_tokens(256);

        let response = self.provider.generate(request).await?;
        let content = response.first_content().ok_or(LlmError::EmptyCompletion)?;

        let json = extract_json(content).map_err(|e| LlmError::ParseError(e.to_string()))?;
        RawIntentPayload::from_json(&json).map_err(|e| LlmError::ParseError(e.to_string()))
    }
}

/// Deterministic keyword-based intent extractor.
///
/// Used in tests and when no LLM endpoint is configured. The rules are
/// intentionally coarse; anything they misread still has to pass validation.
#[derive(Debug, Clone, Default)]
pub struct KeywordIntentExtractor;

impl KeywordIntentExtractor {
    /// Creates a new keyword extractor.
    pub fn new() -> Self {
        Self
    }

    fn category_for(query: &str) -> &'static str {
        if ["train", "classif", "predict", "regress", "model"]
            .iter()
            .any(|kw| query.contains(kw))
        {
            "model_training"
        } else if query.contains("correlat") {
            "correlation"
        } else if query.contains("distribut") || query.contains("histogram") {
            "distribution"
        } else if query.contains("missing") {
            "missing_value_audit"
        } else {
            "summary"
        }
    }

    /// The token following any of the given marker words.
    fn token_after(query: &str, markers: &[&str]) -> Option<String> {
        let tokens: Vec<&str> = query.split_whitespace().collect();
        for (idx, token) in tokens.iter().enumerate() {
            if markers.iter().any(|m| token.starts_with(m)) {
                if let Some(next) = tokens.get(idx + 1) {
                    let cleaned: String = next
                        .chars()
                        .filter(|c| c.is_alphanumeric() || *c == '_')
                        .collect();
                    if !cleaned.is_empty() {
                        return Some(cleaned);
                    }
                }
            }
        }
        None
    }

    fn metric_for(query: &str) -> Option<&'static str> {
        if query.contains("f1") {
            Some("f1")
        } else if query.contains("accuracy") {
            Some("accuracy")
        } else if query.contains("r2") || query.contains("r-squared") {
            Some("r2")
        } else {
            None
        }
    }
}

#[async_trait]
impl IntentExtractor for KeywordIntentExtractor {
    async fn extract_intent(&self, query: &str) -> Result<RawIntentPayload, LlmError> {
        let lowered = query.to_ascii_lowercase();
        let category = Self::category_for(&lowered);

        let target = if category == "model_training" {
            Self::token_after(&lowered, &["predict", "predicting", "target", "classify"])
        } else {
            None
        };

        let columns = Self::token_after(&lowered, &["of", "column"])
            .filter(|_| category == "distribution")
            .map(|c| vec![c]);

        Ok(RawIntentPayload {
            category: Some(category.to_string()),
            target,
            columns,
            metric: Self::metric_for(&lowered).map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, Usage};

    /// Mock provider returning a fixed reply.
    struct FixedProvider {
        content: String,
    }

    #[async_trait]
    impl LlmProvider for FixedProvider {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            Ok(GenerationResponse {
                id: "mock".to_string(),
                model: "mock-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(self.content.clone()),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 10,
                    total_tokens: 20,
                },
            })
        }
    }

    #[tokio::test]
    async fn test_llm_extractor_parses_fenced_json() {
        let provider = Arc::new(FixedProvider {
            content: "```json\n{\"category\": \"correlation\"}\n```".to_string(),
        });
        let extractor = LlmIntentExtractor::new(provider, "mock-model");

        let payload = extractor.extract_intent("how do columns relate?").await.unwrap();
        assert_eq!(payload.category.as_deref(), Some("correlation"));
    }

    #[tokio::test]
    async fn test_llm_extractor_rejects_prose() {
        let provider = Arc::new(FixedProvider {
            content: "I am not sure what you mean.".to_string(),
        });
        let extractor = LlmIntentExtractor::new(provider, "mock-model");

        let err = extractor.extract_intent("?").await.unwrap_err();
        assert!(matches!(err, LlmError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_keyword_summary() {
        let payload = KeywordIntentExtractor::new()
            .extract_intent("Summarize the dataset")
            .await
            .unwrap();
        assert_eq!(payload.category.as_deref(), Some("summary"));
        assert!(payload.target.is_none());
    }

    #[tokio::test]
    async fn test_keyword_training_with_target_and_metric() {
        let payload = KeywordIntentExtractor::new()
            .extract_intent("Train a classifier predicting churn maximizing f1")
            .await
            .unwrap();
        assert_eq!(payload.category.as_deref(), Some("model_training"));
        assert_eq!(payload.target.as_deref(), Some("churn"));
        assert_eq!(payload.metric.as_deref(), Some("f1"));
    }

    #[tokio::test]
    async fn test_keyword_missing_audit() {
        let payload = KeywordIntentExtractor::new()
            .extract_intent("Which columns have missing values?")
            .await
            .unwrap();
        assert_eq!(payload.category.as_deref(), Some("missing_value_audit"));
    }

    #[tokio::test]
    async fn test_keyword_distribution_column() {
        let payload = KeywordIntentExtractor::new()
            .extract_intent("Show the distribution of age")
            .await
            .unwrap();
        assert_eq!(payload.category.as_deref(), Some("distribution"));
        assert_eq!(payload.columns, Some(vec!["age".to_string()]));
    }
}
