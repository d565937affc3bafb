use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ChatError;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Models offered in the picker. The image models can return inline image parts.
pub const MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.5-pro",
    "gemini-2.0-flash",
    "gemini-2.5-flash-image",
    "gemini-3-pro-image-preview",
];

#[derive(Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
}

impl GenerateContentRequest {
    fn single_turn(text: &str) -> Self {
        Self {
            contents: vec![RequestContent {
                parts: vec![RequestPart {
                    text: text.to_string(),
                }],
            }],
        }
    }
}

/// Decoded body of a `generateContent` call.
///
/// Error replies and content replies share this shape; which fields are
/// present decides what the reply means (see `reply::parse_reply`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiReply {
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
    #[serde(default)]
    pub candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    #[serde(default)]
    pub content: Option<Content>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Option<Vec<Part>>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    FinishReasonUnspecified,
    Stop,
    MaxTokens,
    /// The safety-block sentinel.
    Safety,
    Recitation,
    Language,
    Other,
    Blocklist,
    ProhibitedContent,
    Spii,
    MalformedFunctionCall,
    ImageSafety,
    #[serde(other)]
    Unknown,
}

/// One unit of generated content.
///
/// Any part object that is neither text nor inline data decodes as
/// `Unsupported` so the renderer can skip it; anything that is not an object
/// at all fails the whole decode.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData", alias = "inline_data")]
        inline_data: Blob,
    },
    Unsupported(Map<String, Value>),
}

#[cfg(test)]
impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Part::InlineData {
            inline_data: Blob {
                mime_type: mime_type.into(),
                data: data.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(alias = "mime_type")]
    pub mime_type: String,
    /// Base64 payload, kept encoded until the image is decoded.
    pub data: String,
}

/// Prompt used to check that the key/model pair answers at all.
pub fn verification_prompt(model: &str) -> String {
    format!("Reply with exactly this string and nothing else: {model}")
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Endpoint for a model, without the key query parameter.
    pub fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    /// Sends one user turn. No history, no timeout, no retry.
    pub async fn generate_content(
        &self,
        model: &str,
        api_key: &str,
        text: &str,
    ) -> Result<ApiReply, ChatError> {
        let request = GenerateContentRequest::single_turn(text);

        let response = self
            .client
            .post(self.endpoint(model))
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await?;

        // Error payloads come back with 4xx statuses, so the body is decoded
        // whatever the status says.
        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(%status, bytes = body.len(), "generateContent response");

        decode_reply(&body)
    }

    pub async fn verify(&self, model: &str, api_key: &str) -> Result<ApiReply, ChatError> {
        self.generate_content(model, api_key, &verification_prompt(model))
            .await
    }
}

pub fn decode_reply(body: &str) -> Result<ApiReply, ChatError> {
    Ok(serde_json::from_str(body)?)
}
