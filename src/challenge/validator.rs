//! Extension validator: asks an external reasoning service whether a
//! justification earns extra minutes, with a local heuristic fallback.
//!
//! `validate` is total: network errors, timeouts, and malformed responses
//! all resolve to a well-formed result. It never hangs past the request
//! timeout and never surfaces an error to the overlay.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;

use super::generator::strip_code_fences;
use super::{ExtensionRequest, ValidationResult, MIN_JUSTIFICATION_CHARS};

pub const FALLBACK_SUGGESTED_MINUTES: u32 = 3;
pub const FALLBACK_CONFIDENCE: f64 = 0.4;

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub endpoint: String,
    pub model: String,
    pub request_timeout: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "meta-llama/llama-3.3-70b-instruct".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

pub struct ExtensionValidator {
    client: reqwest::Client,
    config: ValidatorConfig,
}

impl ExtensionValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub async fn validate(&self, request: &ExtensionRequest) -> ValidationResult {
        match self.validate_remote(request).await {
            Ok(result) => result,
            Err(err) => {
                log::warn!(
                    "extension validation for {} fell back to heuristic: {err:#}",
                    request.package
                );
                fallback_validation(request)
            }
        }
    }

    async fn validate_remote(&self, request: &ExtensionRequest) -> Result<ValidationResult> {
        let payload = json!({
            "model": self.config.model,
            "messages": [
                { "role": "user", "content": build_prompt(request) },
            ],
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .timeout(self.config.request_timeout)
            .json(&payload)
            .send()
            .await
            .context("validation request failed")?
            .error_for_status()
            .context("validation service returned an error status")?;

        let body: ChatCompletion = response
            .json()
            .await
            .context("validation response was not valid JSON")?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| anyhow!("validation response had no choices"))?;

        parse_verdict(content)
    }
}

fn build_prompt(request: &ExtensionRequest) -> String {
    format!(
        "Analyze this app usage extension request. The user answered a question \
         correctly and provided a reason for wanting to extend their app usage time.\n\n\
         App: {}\n\
         Question was answered correctly: {}\n\
         User's reason: \"{}\"\n\
         Requested extension: {} minutes\n\n\
         Evaluate if the reason is:\n\
         1. Sensible and legitimate (not just \"I want to use it\").\n\
         2. Shows some thought or valid purpose.\n\
         3. Not obviously trying to game the system.\n\n\
         Respond with ONLY a JSON object in the format:\n\
         {{\"approved\": true/false, \"confidence\": 0.0-1.0, \
         \"feedback\": \"brief explanation\", \"suggested_time\": <integer>}}\n\n\
         The 'suggested_time' can be less than requested if the reason is weak but \
         not entirely invalid. Be reasonably lenient; the goal is to promote mindful \
         usage, not to be overly strict.",
        request.app_name,
        request.response.correct,
        request.response.justification,
        request.requested_minutes,
    )
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct WireVerdict {
    approved: bool,
    confidence: f64,
    feedback: String,
    suggested_time: i64,
}

/// Parses the model's JSON-only verdict, tolerating markdown fencing.
fn parse_verdict(content: &str) -> Result<ValidationResult> {
    let cleaned = strip_code_fences(content);
    let verdict: WireVerdict =
        serde_json::from_str(&cleaned).context("verdict was not the expected JSON")?;
    Ok(ValidationResult {
        approved: verdict.approved,
        confidence: verdict.confidence.clamp(0.0, 1.0),
        feedback: verdict.feedback,
        suggested_minutes: verdict.suggested_time.clamp(0, u32::MAX as i64) as u32,
    })
}

/// Local heuristic used whenever the service is unreachable or unparseable:
/// approve iff the justification clears the same floor the overlay enforces.
pub fn fallback_validation(request: &ExtensionRequest) -> ValidationResult {
    let justified = request.response.correct
        && request.response.justification.trim().len() >= MIN_JUSTIFICATION_CHARS;
    ValidationResult {
        approved: justified,
        confidence: FALLBACK_CONFIDENCE,
        feedback: if justified {
            "Approved by fallback: validation service unavailable.".into()
        } else {
            "Request could not be validated.".into()
        },
        suggested_minutes: if justified { FALLBACK_SUGGESTED_MINUTES } else { 0 },
    }
}
