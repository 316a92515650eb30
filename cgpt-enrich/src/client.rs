//! Enrichment clients
//!
//! [`EnrichmentClient`] is the seam between the batch manager and the
//! language model. [`GeminiClient`] calls the Gemini `generateContent` REST
//! endpoint; tests substitute scripted clients.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GeminiConfig;
use crate::error::EnrichError;

const USER_AGENT: &str = concat!("cgpt-enrich/", env!("CARGO_PKG_VERSION"));

/// Instructions sent alongside every batch
pub const ANALYSIS_PROMPT: &str = r#"CRITICAL TASK: ANALYZE ALL COMMENTS IN THIS FILE

You are a sentiment analysis expert. Follow these instructions exactly.

STEP 1: COUNT ALL COMMENTS
- Count the comments in the file ("COMMENT 1:", "COMMENT 2:", ...)
- Verify every numbered comment is visible

STEP 2: CREATE A DETAILED SUMMARY REPORT
After analyzing all comments, add this section:

=== SENTIMENT ANALYSIS SUMMARY ===

PROCESSING VERIFICATION:
- Total comments processed: [number]
- Comments analyzed: [should match total]

SENTIMENT BREAKDOWN:
- Positive comments: ([percentage]%)
- Neutral comments: ([percentage]%)
- Negative comments: ([percentage]%)

DETAILED INSIGHTS:
**Common Positive Themes:**
[3-5 themes with examples from the comments]

**Common Negative Themes:**
[3-5 themes with examples from the comments]

**Viewer Suggestions:**
[Requests and improvements viewers mention]

**What Viewers Appreciate:**
[What viewers like about the content or creator, with examples]

**Content Recommendations:**
[Suggestions for improving content based on the feedback]

**Top Positive Comments:**
[3-5 positive comments]

**Top Negative Comments:**
[3-5 negative comments]

QUALITY CHECK:
- All comments processed: [Yes/No]
- Sentiment assigned to all: [Yes/No]
- Summary report complete: [Yes/No]

If you cannot see all comments, respond with "ERROR: Cannot complete analysis - please check file format".

BEGIN ANALYSIS NOW - PROCESS EVERY SINGLE COMMENT IN THIS FILE.
"#;

/// Produces the analysis text for one batch file
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    async fn enrich(&self, batch_text: &str) -> Result<String, EnrichError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
pub struct CandidatePart {
    pub text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate
    pub fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Gemini REST client
pub struct GeminiClient {
    http_client: reqwest::Client,
    config: GeminiConfig,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig, api_key: String) -> Result<Self, EnrichError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            config,
            api_key,
        })
    }

    /// Build from the environment variable named in the config
    pub fn from_env(config: GeminiConfig) -> Result<Self, EnrichError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| EnrichError::MissingApiKey(config.api_key_env.clone()))?;
        Self::new(config, api_key)
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl EnrichmentClient for GeminiClient {
    async fn enrich(&self, batch_text: &str) -> Result<String, EnrichError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: batch_text }, Part { text: ANALYSIS_PROMPT }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        };

        tracing::debug!(model = %self.config.model, bytes = batch_text.len(), "Calling Gemini");

        let response = self
            .http_client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        parsed.text().ok_or(EnrichError::EmptyResponse)
    }
}
