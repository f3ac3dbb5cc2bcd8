use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{PipelineError, Result};

/// Produces an answer to `question` grounded in `context` passages,
/// ordered most relevant first. The returned text is opaque to the
/// pipeline.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str, context: &[String]) -> Result<String>;
}

/// Builds the user prompt handed to the generator: context passages
/// numbered in rank order, then the question.
pub fn compose_prompt(question: &str, context: &[String]) -> String {
    let mut prompt =
        String::from("Answer the question using only the context passages below.\n\n");
    for (position, passage) in context.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n\n", position + 1, passage.trim()));
    }
    prompt.push_str(&format!("Question: {}", question.trim()));
    prompt
}

const SYSTEM_PROMPT: &str = "You answer questions from the provided context passages. \
If the context does not contain the answer, say so instead of guessing.";

/// Client for an OpenAI-compatible chat completions endpoint. One
/// attempt per call; failures surface to the caller.
pub struct OpenAiChatGenerator {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
}

impl OpenAiChatGenerator {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        let model = model.into();
        if model.trim().is_empty() {
            return Err(PipelineError::InvalidConfiguration(
                "answer model name is empty".to_string(),
            ));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            model,
            api_key,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiChatGenerator {
    async fn generate(&self, question: &str, context: &[String]) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: compose_prompt(question, context),
                },
            ],
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let details = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(PipelineError::AnswerFailed(format!(
                "endpoint returned {status}: {details}"
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                PipelineError::AnswerFailed("response contained no choices".to_string())
            })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_numbers_passages_in_rank_order() {
        let context = vec![
            "most relevant".to_string(),
            "second best ".to_string(),
        ];
        let prompt = compose_prompt("what is it? ", &context);

        assert!(prompt.contains("[1] most relevant"));
        assert!(prompt.contains("[2] second best"));
        assert!(prompt.ends_with("Question: what is it?"));
        assert!(prompt.find("[1]").unwrap() < prompt.find("[2]").unwrap());
    }

    #[test]
    fn prompt_without_context_still_carries_the_question() {
        let prompt = compose_prompt("anything?", &[]);
        assert!(prompt.ends_with("Question: anything?"));
    }

    #[test]
    fn generator_rejects_bad_construction() {
        let timeout = Duration::from_secs(5);
        assert!(OpenAiChatGenerator::new("::::", "model", None, timeout).is_err());
        assert!(matches!(
            OpenAiChatGenerator::new("http://localhost:9/v1/chat/completions", "", None, timeout),
            Err(PipelineError::InvalidConfiguration(_))
        ));
    }
}
