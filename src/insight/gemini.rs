//! Gemini-backed insight generator.
//!
//! Calls `generateContent` with a JSON response schema so the model answers
//! with exactly the three insight fields.

use super::{validate, InsightError, InsightGenerator};
use crate::core::report::{Insight, InsightRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable holding the API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Default model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Base URL for the Gemini API
const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const SYSTEM_INSTRUCTION: &str = "You are a medical screening assistant for a hospital dashboard. \
Your audience is nurses and clinic staff. \
You DO NOT diagnose diseases. \
You provide non-diagnostic context and screening support based on heart rate data and reported symptoms. \
Keep language simple, professional, and calm.";

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    system_instruction: GeminiContent,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<GeminiApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiApiError {
    message: String,
}

// ============================================================================
// Generator
// ============================================================================

/// Insight generator backed by Google Gemini.
pub struct GeminiInsightGenerator {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiInsightGenerator {
    /// Create a generator with an API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, InsightError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| InsightError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            client,
        })
    }

    /// Create a generator from the `GEMINI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, InsightError> {
        Self::from_env_var(GEMINI_API_KEY_ENV)
    }

    /// Create a generator from a named environment variable.
    pub fn from_env_var(name: &str) -> Result<Self, InsightError> {
        let api_key = std::env::var(name)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| InsightError::NotConfigured(format!("{name} environment variable not set")))?;
        Self::new(api_key)
    }

    /// Set a custom model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_url(&self) -> String {
        format!(
            "{API_BASE_URL}/models/{}:generateContent?key={}",
            self.model, self.api_key
        )
    }

    fn build_request(request: &InsightRequest) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![TextPart {
                    text: Some(build_prompt(request)),
                }],
            }],
            system_instruction: GeminiContent {
                role: None,
                parts: vec![TextPart {
                    text: Some(SYSTEM_INSTRUCTION.to_string()),
                }],
            },
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: response_schema(),
            },
        }
    }
}

#[async_trait]
impl InsightGenerator for GeminiInsightGenerator {
    async fn generate(&self, request: &InsightRequest) -> Result<Insight, InsightError> {
        let body = Self::build_request(request);

        tracing::debug!(model = %self.model, "Requesting screening insight");

        let response = self
            .client
            .post(self.build_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| InsightError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| InsightError::Network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(InsightError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        parse_response(&text)
    }
}

/// Prompt listing the screening data.
pub(crate) fn build_prompt(request: &InsightRequest) -> String {
    let symptoms = if request.symptoms.is_empty() {
        "None reported".to_string()
    } else {
        request
            .symptoms
            .iter()
            .map(|s| s.label())
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "Analyze the following heart check-up result:\n\
         - Average BPM: {}\n\
         - Rhythm Stability: {}\n\
         - Calculated Risk Indicator: {}\n\
         - Patient Reported Symptoms: {}\n\
         \n\
         Provide:\n\
         1. 3 possible non-medical contributing factors (considering the symptoms if any, e.g., dehydration, stress, fatigue).\n\
         2. 2-3 immediate screening recommendations for the nurse.\n\
         3. A very short 1-sentence summary statement.",
        request.avg_bpm, request.stability, request.risk, symptoms
    )
}

fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "contributingFactors": { "type": "ARRAY", "items": { "type": "STRING" } },
            "recommendations": { "type": "ARRAY", "items": { "type": "STRING" } },
            "summary": { "type": "STRING" }
        },
        "required": ["contributingFactors", "recommendations", "summary"]
    })
}

/// Extract the insight JSON from a `generateContent` response body.
pub(crate) fn parse_response(body: &str) -> Result<Insight, InsightError> {
    let response: GeminiResponse = serde_json::from_str(body)
        .map_err(|e| InsightError::Malformed(format!("Failed to parse Gemini response: {e}")))?;

    if let Some(error) = response.error {
        return Err(InsightError::Api {
            status: 200,
            message: error.message,
        });
    }

    let text = response
        .candidates
        .as_ref()
        .and_then(|c| c.first())
        .and_then(|c| c.content.as_ref())
        .and_then(|c| c.parts.first())
        .and_then(|p| p.text.as_deref())
        .ok_or_else(|| InsightError::Malformed("No content in Gemini response".to_string()))?;

    let insight: Insight = serde_json::from_str(text)
        .map_err(|e| InsightError::Malformed(format!("Insight does not match schema: {e}")))?;

    validate(insight)
}
