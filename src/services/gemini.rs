use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{
    classify_generate_failure, is_invalid_key, is_leaked_key, preview, CallFailure, EstimatorError,
    Result,
};
use crate::models::{ApiVersion, ImageMime};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Kept low so repeated attempts give comparable answers.
const TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn image(data: impl Into<String>, mime_type: ImageMime) -> Self {
        Part::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.as_str().to_string(),
                data: data.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: &'a [Part],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelDescriptor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

/// Thin client for the Generative Language REST API.
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, version: ApiVersion, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, version, path)
    }

    /// Models under `version` that support `generateContent`, without the `models/` prefix.
    ///
    /// Unreachable endpoints and unexpected statuses yield an empty list so
    /// discovery can fall back; credential problems are errors.
    pub async fn list_models(&self, version: ApiVersion) -> Result<Vec<String>> {
        log::debug!("🔎 Listing Gemini models for {}", version);

        let response = match self
            .client
            .get(self.url(version, "models"))
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::warn!("⚠️ Model listing for {} failed: {}", version, e);
                return Ok(Vec::new());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let code = status.as_u16();
            if is_leaked_key(code, &body) {
                log::error!("❌ Gemini API key was reported as leaked");
                return Err(EstimatorError::CredentialCompromised);
            }
            if is_invalid_key(code, &body) {
                log::error!("❌ Gemini rejected the API key while listing models ({})", status);
                return Err(EstimatorError::CredentialInvalid {
                    detail: preview(&body),
                });
            }
            log::warn!("⚠️ Model listing for {} returned {}", version, status);
            return Ok(Vec::new());
        }

        let listing: ListModelsResponse = match response.json().await {
            Ok(l) => l,
            Err(e) => {
                log::warn!("⚠️ Could not decode model listing for {}: {}", version, e);
                return Ok(Vec::new());
            }
        };

        let models: Vec<String> = listing
            .models
            .into_iter()
            .filter(|m| m.supported_generation_methods.iter().any(|g| g == "generateContent"))
            .filter_map(|m| m.name.strip_prefix("models/").map(str::to_string))
            .collect();

        log::debug!("📋 {} generateContent models under {}", models.len(), version);
        Ok(models)
    }

    /// Calls `generateContent` and returns the concatenated text of the first candidate.
    pub(crate) async fn generate_content(
        &self,
        version: ApiVersion,
        model_id: &str,
        parts: &[Part],
        max_output_tokens: u32,
    ) -> std::result::Result<String, CallFailure> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens,
            },
        };

        log::debug!(
            "🤖 generateContent {}/{} (maxOutputTokens={})",
            version,
            model_id,
            max_output_tokens
        );

        let response = self
            .client
            .post(self.url(version, &format!("models/{}:generateContent", model_id)))
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::debug!("📥 {}/{} answered {}: {}", version, model_id, status, preview(&body));
            return Err(classify_generate_failure(status.as_u16(), &body));
        }

        let generated: GenerateResponse = response.json().await?;
        let text = generated
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .filter(|t| !t.trim().is_empty())
                    .collect::<String>()
            })
            .unwrap_or_default();

        log::debug!("📄 {}/{} returned {} chars", version, model_id, text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let parts = vec![
            Part::image("aGVsbG8=", ImageMime::Png),
            Part::text("what is this?"),
        ];
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: &parts,
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: 256,
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["data"], "aGVsbG8=");
        assert_eq!(json["contents"][0]["parts"][1]["text"], "what is this?");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn test_response_deserialization_tolerates_missing_fields() {
        let json = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        assert!(response.candidates[0].content.is_none());

        let listing: ListModelsResponse = serde_json::from_str("{}").unwrap();
        assert!(listing.models.is_empty());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = GeminiClient::new(
            "key".to_string(),
            "http://localhost:9999/",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.url(ApiVersion::V1, "models"),
            "http://localhost:9999/v1/models"
        );
    }
}
