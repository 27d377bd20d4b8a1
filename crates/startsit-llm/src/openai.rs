// OpenAI chat-completions grading backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use startsit_core::UpstreamError;
use tracing::debug;

use crate::client::{classify_status, classify_transport, GradePrompt, GradeResult, Grader};
use crate::parse::parse_grade_response;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const SERVICE: &str = "openai";

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Non-streaming grader backed by `/chat/completions`.
pub struct OpenAiGrader {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiGrader {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url: OPENAI_BASE_URL.to_string(),
            timeout,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    async fn complete(&self, prompt: &GradePrompt) -> Result<String, UpstreamError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": prompt.max_tokens,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user }
            ]
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(SERVICE, &e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(SERVICE, status));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| classify_transport(SERVICE, &e, self.timeout))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| UpstreamError::invalid_response(SERVICE, "completion had no content"))
    }
}

#[async_trait]
impl Grader for OpenAiGrader {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn grade(&self, prompt: &GradePrompt) -> Result<GradeResult, UpstreamError> {
        if self.api_key.is_empty() {
            return Err(UpstreamError::rejected(SERVICE, "API key not configured"));
        }
        let text = self.complete(prompt).await?;
        debug!(chars = text.len(), "openai completion received");
        parse_grade_response(&text)
            .map_err(|reason| UpstreamError::invalid_response(SERVICE, reason))
    }
}
