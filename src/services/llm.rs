use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Client for Cloudflare Workers AI text generation models.
pub struct WorkersAiClient {
    http: Client,
    account_id: String,
    api_token: String,
    model: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    success: bool,
    result: Option<GenerationResult>,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Deserialize)]
struct GenerationResult {
    response: Option<String>,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

impl WorkersAiClient {
    pub fn new(account_id: &str, api_token: &str, model: &str) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(LlmError::Http)?;

        Ok(Self {
            http,
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
            model: model.to_string(),
            max_tokens: 1024,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
            self.account_id, self.model
        )
    }

    /// Run one chat completion and return the generated prose.
    pub async fn generate(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let request_body = GenerationRequest {
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.max_tokens,
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await
            .map_err(LlmError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{}: {}", status, body)));
        }

        let parsed: GenerationResponse = response.json().await.map_err(LlmError::Http)?;
        extract_response(parsed)
    }
}

fn extract_response(parsed: GenerationResponse) -> Result<String, LlmError> {
    if !parsed.success {
        let reason = parsed
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(LlmError::Api(reason));
    }

    parsed
        .result
        .and_then(|r| r.response)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(LlmError::EmptyResponse)
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Workers AI returned an error: {0}")]
    Api(String),

    #[error("Workers AI returned an empty response")]
    EmptyResponse,
}
