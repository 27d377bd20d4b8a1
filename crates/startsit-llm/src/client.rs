// Grading provider interface and backend selection.
//
// Every backend implements `Grader`; `GradingClient` wraps whichever one the
// configuration selects, or `Disabled` when no backend is usable, so callers
// never branch on the provider themselves.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use startsit_core::config::{Config, GradingProvider};
use startsit_core::model::Grade;
use startsit_core::UpstreamError;
use tracing::warn;

use crate::claude::ClaudeGrader;
use crate::openai::OpenAiGrader;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// A bounded prompt for a single grading call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradePrompt {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

/// The provider's verdict on one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeResult {
    pub grade: Grade,
    /// 0-100.
    pub confidence: u8,
    pub reasoning: String,
}

// ---------------------------------------------------------------------------
// Grader trait
// ---------------------------------------------------------------------------

/// A language-model backend that turns a prompt into a `GradeResult`.
///
/// Implementations enforce their own timeout and never retry; retry policy
/// belongs to the caller.
#[async_trait]
pub trait Grader: Send + Sync {
    /// Short backend name used in logs and error messages.
    fn name(&self) -> &str;

    async fn grade(&self, prompt: &GradePrompt) -> Result<GradeResult, UpstreamError>;
}

// ---------------------------------------------------------------------------
// GradingClient wrapper
// ---------------------------------------------------------------------------

/// High-level wrapper that is either an active grading backend or disabled.
#[derive(Clone)]
pub enum GradingClient {
    /// A backend is configured and ready.
    Active(Arc<dyn Grader>),
    /// Grading is disabled (provider set to "disabled" or no API key).
    Disabled,
}

impl GradingClient {
    /// Build a `GradingClient` from the application config.
    ///
    /// Returns `Active` for the configured provider when its API key is
    /// present, otherwise `Disabled`.
    pub fn from_config(config: &Config) -> Self {
        let grading = &config.grading;
        let creds = &config.credentials;
        match grading.provider {
            GradingProvider::Disabled => GradingClient::Disabled,
            GradingProvider::Claude => match non_empty(&creds.anthropic_api_key) {
                Some(key) => {
                    let mut grader =
                        ClaudeGrader::new(key, grading.model.clone(), grading.timeout());
                    if let Some(url) = &grading.base_url {
                        grader = grader.with_api_url(url.clone());
                    }
                    GradingClient::Active(Arc::new(grader))
                }
                None => {
                    warn!("grading provider is claude but anthropic_api_key is missing; grading disabled");
                    GradingClient::Disabled
                }
            },
            GradingProvider::OpenAi => match non_empty(&creds.openai_api_key) {
                Some(key) => {
                    let mut grader =
                        OpenAiGrader::new(key, grading.model.clone(), grading.timeout());
                    if let Some(url) = &grading.base_url {
                        grader = grader.with_base_url(url.clone());
                    }
                    GradingClient::Active(Arc::new(grader))
                }
                None => {
                    warn!("grading provider is openai but openai_api_key is missing; grading disabled");
                    GradingClient::Disabled
                }
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, GradingClient::Active(_))
    }

    pub fn name(&self) -> &str {
        match self {
            GradingClient::Active(grader) => grader.name(),
            GradingClient::Disabled => "disabled",
        }
    }

    /// Grade with the active backend. A disabled client is reported as a
    /// rejection so callers do not retry it.
    pub async fn grade(&self, prompt: &GradePrompt) -> Result<GradeResult, UpstreamError> {
        match self {
            GradingClient::Active(grader) => grader.grade(prompt).await,
            GradingClient::Disabled => Err(UpstreamError::rejected(
                "grading",
                "grading provider not configured",
            )),
        }
    }
}

fn non_empty(key: &Option<String>) -> Option<String> {
    key.as_ref().filter(|k| !k.trim().is_empty()).cloned()
}

// ---------------------------------------------------------------------------
// HTTP error classification shared by the backends
// ---------------------------------------------------------------------------

/// Map a non-success HTTP status onto the upstream taxonomy: 429 and 5xx are
/// transient, every other status is a rejection.
pub(crate) fn classify_status(service: &str, status: reqwest::StatusCode) -> UpstreamError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        UpstreamError::unavailable(service, format!("API returned status {status}"))
    } else {
        UpstreamError::rejected(service, format!("API returned status {status}"))
    }
}

/// Map a reqwest transport error onto the upstream taxonomy.
pub(crate) fn classify_transport(
    service: &str,
    err: &reqwest::Error,
    timeout: Duration,
) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::timeout(service, timeout)
    } else if let Some(status) = err.status() {
        classify_status(service, status)
    } else if err.is_decode() {
        UpstreamError::invalid_response(service, format!("failed to decode body: {err}"))
    } else {
        UpstreamError::unavailable(service, format!("network error: {err}"))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
