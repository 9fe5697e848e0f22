//! Gemini content client
//!
//! Text and image generation through the `generateContent` REST endpoint.
//! Failures and blocked output are logged here and surface to the cycle as
//! `None`.

use super::composer::sniff_image_type;
use super::ContentGenerator;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.0-flash-exp-image-generation";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const USER_AGENT: &str = concat!("dstoic-bot/", env!("CARGO_PKG_VERSION"));
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini client errors
#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Output blocked: {0}")]
    Blocked(String),

    #[error("No candidates returned")]
    NoCandidates,

    #[error("Response contained no {0}")]
    MissingContent(&'static str),
}

impl GeminiError {
    /// The call succeeded but produced nothing usable
    fn is_empty_output(&self) -> bool {
        matches!(
            self,
            GeminiError::Blocked(_) | GeminiError::NoCandidates | GeminiError::MissingContent(_)
        )
    }
}

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub timeout_secs: u64,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

// The API key stays out of debug output
impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("text_model", &self.text_model)
            .field("image_model", &self.image_model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
    fn from_parts(parts: Vec<Part>) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: None,
        }
    }

    fn text(prompt: String) -> Self {
        Self::from_parts(vec![Part::text(prompt)])
    }

    fn with_image_output(mut self) -> Self {
        self.generation_config = Some(GenerationConfig {
            response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
        });
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    fn image(bytes: &[u8]) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: sniff_image_type(bytes).unwrap_or("image/png").to_string(),
                data: general_purpose::STANDARD.encode(bytes),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
    block_reason_message: Option<String>,
}

impl GenerateContentResponse {
    fn first_parts(&self) -> Result<&[Part], GeminiError> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_ref())
        {
            let message = self
                .prompt_feedback
                .as_ref()
                .and_then(|feedback| feedback.block_reason_message.as_deref())
                .unwrap_or("no message provided");
            return Err(GeminiError::Blocked(format!("{} ({})", reason, message)));
        }

        let candidate = self.candidates.first().ok_or(GeminiError::NoCandidates)?;
        match &candidate.content {
            Some(content) if !content.parts.is_empty() => Ok(&content.parts),
            _ => match candidate.finish_reason.as_deref() {
                Some(reason @ ("SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST")) => Err(
                    GeminiError::Blocked(format!("finish reason {}", reason)),
                ),
                _ => Err(GeminiError::MissingContent("content parts")),
            },
        }
    }

    /// Concatenated text of the first candidate, trimmed
    fn text(&self) -> Result<String, GeminiError> {
        let text: String = self
            .first_parts()?
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        let text = text.trim();
        if text.is_empty() {
            return Err(GeminiError::MissingContent("text"));
        }
        Ok(text.to_string())
    }

    /// First inline image of the first candidate
    fn image(&self) -> Result<Vec<u8>, GeminiError> {
        for part in self.first_parts()? {
            if let Some(inline) = &part.inline_data {
                return general_purpose::STANDARD
                    .decode(inline.data.as_bytes())
                    .map_err(|e| GeminiError::ParseError(format!("invalid image data: {}", e)));
            }
            if let Some(text) = &part.text {
                debug!(text = %dstoic_common::models::preview(text, 100), "Image response text part");
            }
        }
        Err(GeminiError::MissingContent("image data"))
    }
}

/// Gemini API client
pub struct GeminiClient {
    http_client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, GeminiError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GeminiError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        );

        let response = self
            .http_client
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| GeminiError::NetworkError(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeminiError::ApiError(status.as_u16(), api_error_message(&body)));
        }

        response
            .json()
            .await
            .map_err(|e| GeminiError::ParseError(e.without_url().to_string()))
    }

    async fn generate_text(&self, purpose: &'static str, prompt: String) -> Option<String> {
        let model = self.config.text_model.as_str();
        let request = GenerateContentRequest::text(prompt);
        debug!(model, purpose, "Requesting text generation");

        let result = match self.generate_content(model, &request).await {
            Ok(response) => response.text(),
            Err(e) => Err(e),
        };
        match result {
            Ok(text) => {
                info!(purpose, chars = text.chars().count(), "Text generated");
                Some(text)
            }
            Err(e) if e.is_empty_output() => {
                warn!(model, purpose, reason = %e, "Text generation returned no usable output");
                None
            }
            Err(e) => {
                error!(model, purpose, error = %e, "Text generation failed");
                None
            }
        }
    }
}

fn image_prompt_request(quote_text: &str) -> String {
    format!(
        "Based on the Stoic quote: '{}', write an evocative prompt (at most 100 words) for an AI \
         image generator. Describe a scene and subject that capture the quote's essence, the \
         setting and atmosphere, a cinematic visual style with dramatic lighting, a dim and muted \
         colour palette suitable as a background, the mood, and subtle symbolism tied to the \
         quote. Output only the image prompt.",
        quote_text
    )
}

fn explanation_request(quote_text: &str) -> String {
    format!(
        "For the Stoic quote: '{}', give a brief (under 100 words) explanation of how someone \
         could apply this idea in daily life. What is the key takeaway action?",
        quote_text
    )
}

fn choice_request(quote_text: &str, count: usize) -> String {
    format!(
        "The {} images that follow were generated as backgrounds for the Stoic quote: '{}'. \
         Reply with only the number (1 to {}) of the image that best conveys the quote.",
        count, quote_text, count
    )
}

/// First integer in `reply` as a zero-based index into `count` candidates
pub fn parse_choice(reply: &str, count: usize) -> Option<usize> {
    let digits: String = reply
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let number: usize = digits.parse().ok()?;
    if (1..=count).contains(&number) {
        Some(number - 1)
    } else {
        None
    }
}

/// `error.message` of a Google API error body, or the raw body
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| dstoic_common::models::preview(body, 200))
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    async fn generate_image_prompt(&self, quote_text: &str) -> Option<String> {
        self.generate_text("image prompt", image_prompt_request(quote_text))
            .await
    }

    async fn generate_image(&self, prompt: &str) -> Option<Vec<u8>> {
        let model = self.config.image_model.as_str();
        let request = GenerateContentRequest::text(prompt.to_string()).with_image_output();
        debug!(model, "Requesting image generation");

        let result = match self.generate_content(model, &request).await {
            Ok(response) => response.image(),
            Err(e) => Err(e),
        };
        match result {
            Ok(bytes) if !bytes.is_empty() => {
                info!(model, size = bytes.len(), "Image generated");
                Some(bytes)
            }
            Ok(_) => {
                warn!(model, "Image generation returned empty image data");
                None
            }
            Err(e) if e.is_empty_output() => {
                warn!(model, reason = %e, "Image generation returned no usable output");
                None
            }
            Err(e) => {
                error!(model, error = %e, "Image generation failed");
                None
            }
        }
    }

    async fn generate_explanation(&self, quote_text: &str) -> Option<String> {
        self.generate_text("explanation", explanation_request(quote_text))
            .await
    }

    async fn choose_best_image(&self, quote_text: &str, candidates: &[Vec<u8>]) -> Option<usize> {
        match candidates.len() {
            0 => {
                warn!("No image candidates to choose from");
                return None;
            }
            1 => return Some(0),
            _ => {}
        }

        let mut parts = vec![Part::text(choice_request(quote_text, candidates.len()))];
        parts.extend(candidates.iter().map(|bytes| Part::image(bytes)));
        let request = GenerateContentRequest::from_parts(parts);

        let model = self.config.text_model.as_str();
        let reply = match self.generate_content(model, &request).await {
            Ok(response) => response.text(),
            Err(e) => Err(e),
        };
        match reply {
            Ok(reply) => match parse_choice(&reply, candidates.len()) {
                Some(index) => {
                    info!(choice = index + 1, candidates = candidates.len(), "Best image chosen");
                    Some(index)
                }
                None => {
                    warn!(reply = %dstoic_common::models::preview(&reply, 100), "Could not parse image choice");
                    None
                }
            },
            Err(e) => {
                error!(model, error = %e, "Image choice failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> GenerateContentResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_text_concatenates_parts() {
        let r = response(
            r#"{"candidates":[{"content":{"parts":[{"text":"  Act "},{"text":"now. "}]}}]}"#,
        );
        assert_eq!(r.text().unwrap(), "Act now.");
    }

    #[test]
    fn test_blocked_prompt() {
        let r = response(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#);
        match r.text() {
            Err(GeminiError::Blocked(reason)) => assert!(reason.contains("SAFETY")),
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[test]
    fn test_no_candidates_and_empty_text() {
        assert!(matches!(
            response(r#"{"candidates":[]}"#).text(),
            Err(GeminiError::NoCandidates)
        ));
        assert!(matches!(
            response(r#"{"candidates":[{"content":{"parts":[{"text":"   "}]}}]}"#).text(),
            Err(GeminiError::MissingContent(_))
        ));
        assert!(matches!(
            response(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).text(),
            Err(GeminiError::Blocked(_))
        ));
    }

    #[test]
    fn test_image_decodes_inline_data() {
        let data = general_purpose::STANDARD.encode(b"\x89PNG rest");
        let json = format!(
            r#"{{"candidates":[{{"content":{{"parts":[{{"text":"here"}},{{"inlineData":{{"mimeType":"image/png","data":"{}"}}}}]}}}}]}}"#,
            data
        );
        assert_eq!(response(&json).image().unwrap(), b"\x89PNG rest".to_vec());

        assert!(matches!(
            response(r#"{"candidates":[{"content":{"parts":[{"text":"only text"}]}}]}"#).image(),
            Err(GeminiError::MissingContent(_))
        ));
    }

    #[test]
    fn test_image_request_serialization() {
        let request = GenerateContentRequest::text("a statue".to_string()).with_image_output();
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "a statue");
        assert_eq!(value["generationConfig"]["responseModalities"][1], "IMAGE");
        assert!(value["contents"][0]["parts"][0].get("inlineData").is_none());
    }

    #[test]
    fn test_parse_choice() {
        assert_eq!(parse_choice("2", 3), Some(1));
        assert_eq!(parse_choice("Image 3 is the strongest.", 3), Some(2));
        assert_eq!(parse_choice("I pick 1, then 2", 2), Some(0));
        assert_eq!(parse_choice("0", 3), None);
        assert_eq!(parse_choice("5", 3), None);
        assert_eq!(parse_choice("none of them", 3), None);
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(api_error_message(body), "API key not valid.");
        assert_eq!(api_error_message("plain failure"), "plain failure");
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = GeminiConfig::new("secret-key-123");
        assert!(!format!("{:?}", config).contains("secret-key-123"));
    }
}
