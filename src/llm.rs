use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AgentError, Result};
use crate::message::Message;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/";

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send the conversation and return the model's reply text.
    async fn invoke(&self, messages: &[Message]) -> Result<String>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Google Gemini chat model over the `generateContent` REST endpoint.
pub struct GeminiChat {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
    temperature: f32,
}

impl GeminiChat {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: &str,
        temperature: f32,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AgentError::Config(format!("Invalid Gemini base URL: {}", e)))?;
        Ok(Self {
            client: Client::new(),
            base_url,
            api_key: api_key.into(),
            model: model.into(),
            temperature,
        })
    }

    fn endpoint(&self) -> Result<Url> {
        self.base_url
            .join(&format!("v1beta/models/{}:generateContent", self.model))
            .map_err(|e| AgentError::Config(format!("Invalid Gemini base URL: {}", e)))
    }
}

fn build_request(messages: &[Message], temperature: f32) -> GenerateContentRequest {
    let mut system = Vec::new();
    let mut contents = Vec::new();
    for message in messages {
        let part = Part {
            text: message.content().to_string(),
        };
        match message {
            Message::System(_) => system.push(part),
            Message::Human(_) => contents.push(Content {
                role: Some("user".to_string()),
                parts: vec![part],
            }),
            Message::Ai(_) => contents.push(Content {
                role: Some("model".to_string()),
                parts: vec![part],
            }),
        }
    }

    GenerateContentRequest {
        contents,
        system_instruction: (!system.is_empty()).then(|| Content {
            role: None,
            parts: system,
        }),
        generation_config: GenerationConfig { temperature },
    }
}

fn response_text(response: GenerateContentResponse) -> Result<String> {
    let candidate = match response.candidates.into_iter().next() {
        Some(c) => c,
        None => {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".to_string());
            return Err(AgentError::Model(format!("empty response ({})", reason)));
        }
    };

    Ok(candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
        .unwrap_or_default())
}

#[async_trait]
impl ChatModel for GeminiChat {
    async fn invoke(&self, messages: &[Message]) -> Result<String> {
        let url = self.endpoint()?;
        let request = build_request(messages, self.temperature);

        tracing::debug!(model = %self.model, messages = messages.len(), "Calling Gemini");

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let parsed = response.json::<GenerateContentResponse>().await?;
        response_text(parsed)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_maps_roles_and_system_instruction() {
        let req = build_request(
            &[
                Message::System("rules".into()),
                Message::Human("hello".into()),
                Message::Ai("hi".into()),
            ],
            0.0,
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "rules");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn request_without_system_omits_instruction() {
        let json = serde_json::to_value(build_request(&[Message::Human("x".into())], 0.5)).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn response_parts_are_concatenated() {
        let resp: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "{\"a\":"}, {"text": "1}"}]}}]
        }))
        .unwrap();
        assert_eq!(response_text(resp).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn blocked_prompt_is_a_model_error() {
        let resp: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        let err = response_text(resp).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn endpoint_includes_model_method() {
        let chat = GeminiChat::new("k", "gemini-2.5-flash", DEFAULT_BASE_URL, 0.0).unwrap();
        assert_eq!(
            chat.endpoint().unwrap().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }
}
