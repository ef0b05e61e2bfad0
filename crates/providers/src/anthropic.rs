//! Anthropic Messages API provider.
//!
//! A collaborator exchange is one system prompt, one user turn holding the
//! document, and a forced call to the `respond` tool. Requests therefore carry
//! plain-text messages only; responses are read for their text and
//! `tool_use` blocks.

use async_trait::async_trait;
use duet_core::error::ProviderError;
use duet_core::message::{Message, MessageToolCall, Role};
use duet_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;
const HEALTH_CHECK_MODEL: &str = "claude-haiku-4-5";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: Self::build_client(DEFAULT_TIMEOUT_SECS),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    fn build_client(timeout_secs: u64) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default()
    }

    /// Point at a proxy or a local stub instead of the public API.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the whole-request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self.client = Self::build_client(timeout_secs);
        self
    }

    /// Build the wire body. System messages are hoisted into the top-level
    /// `system` field; the rest keep their order.
    fn request_body(request: &ProviderRequest) -> MessagesRequest<'_> {
        let mut system: Vec<&str> = Vec::new();
        let mut messages = Vec::new();
        for msg in &request.messages {
            let role = match msg.role {
                Role::System => {
                    system.push(&msg.content);
                    continue;
                }
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(ApiMessage {
                role,
                content: &msg.content,
            });
        }

        MessagesRequest {
            model: &request.model,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: Some(request.temperature),
            tools: request.tools.iter().map(ApiTool::from).collect(),
            tool_choice: request.tool_choice.as_ref(),
        }
    }

    async fn post(&self, body: &MessagesRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(format!("no response within {}s", self.timeout_secs))
                } else {
                    ProviderError::Network(e.to_string())
                }
            })
    }

    /// Map a non-success HTTP status to a provider error.
    fn status_error(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
        match status {
            429 => ProviderError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            },
            401 | 403 => ProviderError::AuthenticationFailed("Invalid Anthropic API key".into()),
            _ => ProviderError::ApiError {
                status_code: status,
                message: body,
            },
        }
    }

    /// Fold response blocks into one assistant message: text blocks joined
    /// by newlines, each `tool_use` block kept as a tool call.
    fn into_provider_response(resp: MessagesResponse) -> ProviderResponse {
        let mut message = Message::assistant(String::new());
        message.id = resp.id;

        for block in resp.content {
            match block {
                ResponseBlock::Text { text } => {
                    if !message.content.is_empty() {
                        message.content.push('\n');
                    }
                    message.content.push_str(&text);
                }
                ResponseBlock::ToolUse { id, name, input } => {
                    message.tool_calls.push(MessageToolCall {
                        id,
                        name,
                        arguments: input.to_string(),
                    });
                }
                ResponseBlock::Other => {}
            }
        }

        if resp.stop_reason.as_deref() == Some("max_tokens") {
            warn!(model = %resp.model, "Anthropic response truncated at max_tokens");
        }

        ProviderResponse {
            message,
            usage: Some(Usage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
            }),
            model: resp.model,
        }
    }
}

#[async_trait]
impl duet_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request);
        debug!(provider = "anthropic", model = %request.model, tools = body.tools.len(), "Sending completion request");

        let response = self.post(&body).await?;
        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(Self::status_error(status, retry_after, error_body));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse Anthropic response: {e}"),
        })?;
        Ok(Self::into_provider_response(parsed))
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        // One output token is enough to prove the key works
        let body = MessagesRequest {
            model: HEALTH_CHECK_MODEL,
            system: None,
            messages: vec![ApiMessage {
                role: "user",
                content: "hi",
            }],
            max_tokens: 1,
            temperature: None,
            tools: Vec::new(),
            tool_choice: None,
        };
        let status = self.post(&body).await?.status().as_u16();
        Ok(!matches!(status, 401 | 403))
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a ToolChoice>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

impl<'a> From<&'a ToolDefinition> for ApiTool<'a> {
    fn from(tool: &'a ToolDefinition) -> Self {
        Self {
            name: &tool.name,
            description: &tool.description,
            input_schema: &tool.parameters,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: String,
    model: String,
    content: Vec<ResponseBlock>,
    usage: ApiUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Thinking and any block type we don't consume
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_core::Provider;

    fn respond_request() -> ProviderRequest {
        ProviderRequest {
            model: "claude-sonnet-4-5-20250929".into(),
            messages: vec![
                Message::system("You are a document"),
                Message::system("Be concise"),
                Message::user("<source>\nx = 1\n</source>"),
            ],
            temperature: 0.2,
            max_tokens: Some(1024),
            tools: vec![ToolDefinition {
                name: "respond".into(),
                description: "Respond with optional edits".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            tool_choice: Some(ToolChoice::Tool {
                name: "respond".into(),
            }),
        }
    }

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new("sk-ant-test");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(provider.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new("sk-ant-test")
            .with_base_url("https://custom.proxy.com/")
            .with_timeout(30);
        assert_eq!(provider.base_url, "https://custom.proxy.com");
        assert_eq!(provider.timeout_secs, 30);
    }

    #[test]
    fn body_hoists_system_and_forces_tool() {
        let request = respond_request();
        let body = serde_json::to_value(AnthropicProvider::request_body(&request)).unwrap();

        assert_eq!(body["system"], "You are a document\n\nBe concise");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(
            body["messages"],
            serde_json::json!([{"role": "user", "content": "<source>\nx = 1\n</source>"}])
        );
        assert_eq!(body["tools"][0]["name"], "respond");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(
            body["tool_choice"],
            serde_json::json!({"type": "tool", "name": "respond"})
        );
    }

    #[test]
    fn body_omits_empty_optionals() {
        let request = ProviderRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.7,
            max_tokens: None,
            tools: vec![],
            tool_choice: None,
        };
        let body = serde_json::to_value(AnthropicProvider::request_body(&request)).unwrap();
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("system").is_none());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            AnthropicProvider::status_error(429, Some(30), String::new()),
            ProviderError::RateLimited { retry_after_secs: 30 }
        ));
        assert!(matches!(
            AnthropicProvider::status_error(429, None, String::new()),
            ProviderError::RateLimited {
                retry_after_secs: DEFAULT_RETRY_AFTER_SECS
            }
        ));
        assert!(matches!(
            AnthropicProvider::status_error(401, None, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
        match AnthropicProvider::status_error(529, None, "overloaded".into()) {
            ProviderError::ApiError { status_code, message } => {
                assert_eq!(status_code, 529);
                assert_eq!(message, "overloaded");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn parse(json: &str) -> ProviderResponse {
        AnthropicProvider::into_provider_response(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn tool_use_becomes_a_tool_call() {
        let pr = parse(
            r#"{
                "id": "msg_02",
                "model": "claude-sonnet-4-5-20250929",
                "content": [
                    {"type": "tool_use", "id": "toolu_abc", "name": "respond",
                     "input": {"edits": [{"old": "return 1", "new": "return 2"}], "message": "bumped"}}
                ],
                "usage": {"input_tokens": 20, "output_tokens": 10},
                "stop_reason": "tool_use"
            }"#,
        );
        assert_eq!(pr.message.id, "msg_02");
        assert_eq!(pr.message.tool_calls.len(), 1);
        assert_eq!(pr.message.tool_calls[0].name, "respond");
        let args: serde_json::Value =
            serde_json::from_str(&pr.message.tool_calls[0].arguments).unwrap();
        assert_eq!(args["edits"][0]["new"], "return 2");
        assert_eq!(args["message"], "bumped");
        assert_eq!(pr.usage.unwrap().total_tokens, 30);
    }

    #[test]
    fn text_blocks_join_and_unknown_blocks_are_skipped() {
        let pr = parse(
            r#"{
                "id": "msg_03",
                "model": "claude-sonnet-4-5-20250929",
                "content": [
                    {"type": "thinking", "thinking": "I need to consider...", "signature": "x"},
                    {"type": "text", "text": "First."},
                    {"type": "text", "text": "Second."}
                ],
                "usage": {"input_tokens": 15, "output_tokens": 25}
            }"#,
        );
        assert_eq!(pr.message.content, "First.\nSecond.");
        assert!(pr.message.tool_calls.is_empty());
    }
}
