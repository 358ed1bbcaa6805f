//! Classification oracle client.
//!
//! Speaks the OpenAI-compatible chat-completions protocol. The verdict is
//! expected as a JSON object in the reply text, optionally wrapped in a
//! markdown code fence. An unparseable verdict is closed to "unrelated"
//! rather than surfaced as an error; callers treat such decisions as
//! failures and never apply them.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::types::{ClassificationInput, Decision, DecisionSource, JudgeConfig};

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Oracle request timed out after {0}s")]
    Timeout(u64),

    #[error("Oracle transport failure: {0}")]
    Transport(String),

    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),

    #[error("Oracle rejected the configured credentials")]
    Unauthenticated,
}

/// Seam for the classification oracle, mockable in tests.
pub trait OracleClient: Send + Sync {
    fn classify(&self, input: &ClassificationInput) -> Result<Decision, OracleError>;
}

/// HTTP oracle client for an OpenAI-compatible endpoint.
pub struct HttpOracleClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpOracleClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        }
    }

    pub fn from_config(config: &JudgeConfig) -> Self {
        Self::new(
            &config.oracle_base_url,
            &config.oracle_api_key,
            &config.oracle_model,
            config.oracle_timeout_secs,
        )
    }
}

/// Request body for /chat/completions
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

/// Response body from /chat/completions
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Verdict schema expected inside the reply text.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OracleVerdict {
    is_related: bool,
    confidence: f64,
    reason: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    extracted_keywords: Vec<String>,
}

fn build_prompt(input: &ClassificationInput) -> String {
    format!(
        "Decide whether the following regulatory record concerns a skin-analysis \
         device (skin imaging, facial analysis, dermatoscopy, pigmentation or \
         moisture measurement).\n\n\
         Record type: {}\nName: {}\nManufacturer: {}\nDescription: {}\n\n\
         Reply with a single JSON object, no prose:\n\
         {{\"isRelated\": true|false, \"confidence\": 0.0-1.0, \"reason\": \"...\", \
         \"category\": \"...\", \"extractedKeywords\": [\"...\"]}}",
        input.entity_type, input.name, input.manufacturer, input.description
    )
}

/// Strip a surrounding markdown code fence, if present.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse the verdict text into a Decision, closing to "unrelated" when the
/// text does not match the schema.
pub(crate) fn parse_verdict(content: &str) -> Decision {
    let body = strip_code_fence(content);
    match serde_json::from_str::<OracleVerdict>(body) {
        Ok(verdict) => Decision {
            is_related: verdict.is_related,
            confidence: verdict.confidence.clamp(0.0, 1.0),
            reason: verdict.reason,
            category: verdict.category,
            extracted_keywords: verdict.extracted_keywords,
            source: DecisionSource::Oracle,
            fail_closed: false,
        },
        Err(e) => {
            warn!(error = %e, "Oracle verdict did not match schema, failing closed");
            Decision::fail_closed(format!("unparseable verdict: {e}"))
        }
    }
}

impl OracleClient for HttpOracleClient {
    fn classify(&self, input: &ClassificationInput) -> Result<Decision, OracleError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: build_prompt(input),
            }],
            temperature: 0.3,
            max_tokens: 500,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    OracleError::Transport(format!("cannot reach {}: {e}", self.base_url))
                } else {
                    OracleError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(OracleError::Unauthenticated);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(OracleError::Transport(format!(
                "HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| OracleError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| OracleError::MalformedResponse("empty choices".to_string()))?;

        Ok(parse_verdict(content))
    }
}

// ═══════════════════════════════════════════
// Mock client for tests
// ═══════════════════════════════════════════

/// What the mock oracle does on every call.
pub enum MockBehavior {
    Verdict(Decision),
    TransportFailure,
    Timeout,
}

/// Mock oracle for testing — returns a configured outcome and counts calls.
pub struct MockOracleClient {
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl MockOracleClient {
    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers "related" with the given confidence.
    pub fn related(confidence: f64) -> Self {
        Self::with_behavior(MockBehavior::Verdict(Decision {
            is_related: true,
            confidence,
            reason: "mock: related".to_string(),
            category: "skin-analysis".to_string(),
            extracted_keywords: Vec::new(),
            source: DecisionSource::Oracle,
            fail_closed: false,
        }))
    }

    /// Always answers "unrelated" with the given confidence.
    pub fn unrelated(confidence: f64) -> Self {
        Self::with_behavior(MockBehavior::Verdict(Decision {
            is_related: false,
            confidence,
            reason: "mock: unrelated".to_string(),
            category: String::new(),
            extracted_keywords: Vec::new(),
            source: DecisionSource::Oracle,
            fail_closed: false,
        }))
    }

    /// Always fails with a transport error.
    pub fn failing() -> Self {
        Self::with_behavior(MockBehavior::TransportFailure)
    }

    /// Always returns a fail-closed verdict (unparseable reply).
    pub fn malformed() -> Self {
        Self::with_behavior(MockBehavior::Verdict(Decision::fail_closed(
            "mock: unparseable verdict",
        )))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OracleClient for MockOracleClient {
    fn classify(&self, _input: &ClassificationInput) -> Result<Decision, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Verdict(decision) => Ok(decision.clone()),
            MockBehavior::TransportFailure => {
                Err(OracleError::Transport("mock transport failure".to_string()))
            }
            MockBehavior::Timeout => Err(OracleError::Timeout(60)),
        }
    }
}
