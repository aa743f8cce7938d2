//! OpenAI Chat Completions backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Completion, LlmError, Provider, ProviderCall, MAX_OUTPUT_TOKENS};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorBody,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
}

impl OpenAiErrorBody {
    /// `code` is the more specific of the two when both are present.
    fn category_code(self) -> Option<String> {
        self.code.or(self.error_type)
    }
}

pub struct OpenAiCall {
    client: Client,
}

impl OpenAiCall {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderCall for OpenAiCall {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn complete(&self, api_key: &str, request: Completion<'_>) -> Result<String, LlmError> {
        let body = build_request(&request);

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(api_key)
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

fn build_request<'a>(request: &Completion<'a>) -> ChatRequest<'a> {
    ChatRequest {
        model: request.model,
        max_tokens: MAX_OUTPUT_TOKENS,
        messages: vec![
            ChatMessage {
                role: "system",
                content: request.system,
            },
            ChatMessage {
                role: "user",
                content: request.prompt,
            },
        ],
    }
}

fn parse_response(status: u16, body: &str) -> Result<String, LlmError> {
    if !(200..300).contains(&status) {
        let code = serde_json::from_str::<OpenAiError>(body)
            .ok()
            .and_then(|e| e.error.category_code());
        return Err(LlmError::api(status, code.as_deref()));
    }

    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|_| LlmError::Transport("decode"))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.is_empty())
        .ok_or(LlmError::EmptyContent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhancement::failover::EnhanceError;

    #[test]
    fn test_request_puts_system_prompt_first() {
        let completion = Completion {
            model: "gpt-4o-mini",
            system: "be brief",
            prompt: "hello",
        };
        let json = serde_json::to_value(build_request(&completion)).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_parse_returns_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Hi team,"}}]}"#;
        assert_eq!(parse_response(200, body).unwrap(), "Hi team,");
    }

    #[test]
    fn test_parse_null_content_is_empty_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert_eq!(parse_response(200, body), Err(LlmError::EmptyContent));
        assert_eq!(parse_response(200, r#"{"choices":[]}"#), Err(LlmError::EmptyContent));
    }

    #[test]
    fn test_parse_rate_limit_error() {
        let body = r#"{"error":{"message":"Rate limit reached for gpt-4o-mini","type":"requests","code":"rate_limit_exceeded"}}"#;
        let err = parse_response(429, body).unwrap_err();
        assert_eq!(
            err.to_string(),
            "API error (status 429): rate limit (rate_limit_exceeded)"
        );
        assert!(crate::enhancement::failover::is_transient(&err));
    }

    #[test]
    fn test_invalid_key_error_never_echoes_key_fragment() {
        let body = r#"{
            "error": {
                "message": "Incorrect API key provided: sk-proj-AbCd1234****...wXyZ. You can find your API key at https://platform.openai.com/account/api-keys.",
                "type": "invalid_request_error",
                "param": null,
                "code": "invalid_api_key"
            }
        }"#;
        let err = parse_response(401, body).unwrap_err();
        let shown = EnhanceError::Exhausted { last: err }.to_string();
        assert!(shown.contains("invalid_api_key"), "{shown}");
        assert!(!shown.contains("sk-proj-AbCd1234"), "{shown}");
        assert!(!shown.contains("Incorrect API key"), "{shown}");
    }

    #[test]
    fn test_server_error_without_json_is_categorised() {
        let err = parse_response(500, "upstream connect error").unwrap_err();
        assert_eq!(err.to_string(), "API error (status 500): server error");
    }
}
