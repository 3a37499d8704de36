use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const API_URL: &str = "https://api.openai.com";
const MODEL: &str = "gpt-4o-mini";
const BACKDOOR: &str = "i love vldc";

const PROMPT: &str = "You moderate the VLDC developer chat from Vladivostok. \
A new member was asked to introduce themselves. Decide whether their answer \
looks like spam or an advertisement, or like a legit introduction by a human. \
Answer with exactly one word: spam or legit.";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("empty completion")]
    Empty,
}

/// Text classifier used to judge new members' introductions.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiClassifier {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [CompletionMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiClassifier {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: API_URL.to_string(),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, text: &str) -> Result<String, LlmError> {
        let request = CompletionRequest {
            model: MODEL,
            messages: [
                CompletionMessage {
                    role: "system",
                    content: PROMPT,
                },
                CompletionMessage {
                    role: "user",
                    content: text,
                },
            ],
            temperature: 0.0,
            max_tokens: 5,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_lowercase())
            .ok_or(LlmError::Empty)
    }
}

/// Whether an introduction may pass. Anything but a clear `spam` verdict
/// admits, including a missing or failing classifier.
pub async fn is_worthy(classifier: Option<&dyn Classifier>, text: &str) -> bool {
    if text.to_lowercase().contains(BACKDOOR) {
        return true;
    }

    let Some(classifier) = classifier else {
        return true;
    };

    match classifier.classify(text).await {
        Ok(verdict) => {
            log::info!("Introduction classified as {verdict:?}");
            verdict.trim().to_lowercase() != "spam"
        }
        Err(e) => {
            log::warn!("Classifier failed, admitting: {e}");
            true
        }
    }
}
