//! Anthropic Messages API backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Completion, LlmError, Provider, ProviderCall, MAX_OUTPUT_TOKENS};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicResponse {
    /// Text of the first text block.
    fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(rename = "type")]
    error_type: String,
}

pub struct AnthropicCall {
    client: Client,
}

impl AnthropicCall {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderCall for AnthropicCall {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn complete(&self, api_key: &str, request: Completion<'_>) -> Result<String, LlmError> {
        let body = build_request(&request);

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        parse_response(status, &text)
    }
}

fn build_request<'a>(request: &Completion<'a>) -> AnthropicRequest<'a> {
    AnthropicRequest {
        model: request.model,
        max_tokens: MAX_OUTPUT_TOKENS,
        system: request.system,
        messages: vec![AnthropicMessage {
            role: "user",
            content: request.prompt,
        }],
    }
}

fn parse_response(status: u16, body: &str) -> Result<String, LlmError> {
    if !(200..300).contains(&status) {
        let error_type = serde_json::from_str::<AnthropicError>(body)
            .ok()
            .map(|e| e.error.error_type);
        return Err(LlmError::api(status, error_type.as_deref()));
    }

    let parsed: AnthropicResponse =
        serde_json::from_str(body).map_err(|_| LlmError::Transport("decode"))?;

    if let Some(usage) = &parsed.usage {
        debug!(
            "anthropic call succeeded: input_tokens={}, output_tokens={}",
            usage.input_tokens, usage.output_tokens
        );
    }

    parsed
        .text()
        .map(str::to_string)
        .ok_or(LlmError::EmptyContent)
}
