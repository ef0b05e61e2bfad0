//! The collaborator gateway.
//!
//! One invocation is one forced tool call: the whole document goes out as
//! user content, and the reply must call the `respond` tool with exactly
//! `{ edits, message }`. Anything else is a protocol violation. Nothing here
//! touches the document, the patcher, or the kernel.

use std::sync::Arc;

use duet_config::AppConfig;
use duet_core::error::GatewayError;
use duet_core::message::Message;
use duet_core::provider::ToolDefinition;
use duet_core::{Proposal, Provider, ProviderRequest, ToolChoice};
use tracing::{debug, info};

/// Name of the single tool the collaborator must answer through.
pub const RESPOND_TOOL: &str = "respond";

pub struct CollaboratorGateway {
    provider: Option<Arc<dyn Provider>>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    separator: String,
}

impl CollaboratorGateway {
    /// A gateway over `provider`. `None` means no credential is configured.
    pub fn new(provider: Option<Arc<dyn Provider>>, model: impl Into<String>) -> Self {
        let defaults = AppConfig::default();
        Self {
            provider,
            model: model.into(),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            separator: defaults.document.separator,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(duet_providers::build_from_config(config), &config.model)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_separator(&config.document.separator)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// The separator line named in the system prompt.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn has_credential(&self) -> bool {
        self.provider.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.name())
    }

    /// Send `document` and wait for the collaborator's proposal.
    ///
    /// `last_error` is the reason the previous invocation failed, if it did.
    /// No retries: every failure is returned as is.
    pub async fn request(
        &self,
        document: &str,
        last_error: Option<&str>,
    ) -> Result<Proposal, GatewayError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(GatewayError::MissingCredential)?;

        debug!(
            provider = provider.name(),
            model = %self.model,
            bytes = document.len(),
            with_error = last_error.is_some(),
            "Sending document to collaborator"
        );

        let response = provider.complete(self.build_request(document, last_error)).await?;
        let proposal = parse_reply(&response.message)?;

        info!(
            model = %response.model,
            edits = proposal.edits.len(),
            "Collaborator replied"
        );
        Ok(proposal)
    }

    pub fn build_request(&self, document: &str, last_error: Option<&str>) -> ProviderRequest {
        let mut content = format!("<source>\n{document}\n</source>");
        if let Some(error) = last_error {
            content.push_str(&format!("\n<error>{error}</error>\nPlease fix this."));
        }

        ProviderRequest {
            model: self.model.clone(),
            messages: vec![Message::system(self.system_prompt()), Message::user(content)],
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            tools: vec![respond_tool()],
            tool_choice: Some(ToolChoice::Tool {
                name: RESPOND_TOOL.into(),
            }),
        }
    }

    pub fn system_prompt(&self) -> String {
        format!(
            "You are the collaborator inside a self-editing document: a small program \
that edits its own source while it runs.

Structure (split by the separator line `{sep}`):
- Kernel: code above the separator, in a small Python-like language (def, \
if/elif/else, while, for, return, lists, print, len, str, int, range). \
Any edit to it triggers a hot reload.
- Conversation: comment lines below the separator, where you and the human talk.

When using the {tool} tool:
- edits: each 'old' must match the source EXACTLY (every character, space, \
newline) with enough context to occur exactly once
- message: your reply, added to the conversation as comments

Be concise. Never edit the separator line.",
            sep = self.separator,
            tool = RESPOND_TOOL,
        )
    }
}

/// The tool every reply is forced through.
pub fn respond_tool() -> ToolDefinition {
    ToolDefinition {
        name: RESPOND_TOOL.into(),
        description: "Respond with a message and optional edits to the document".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "edits": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "old": { "type": "string" },
                            "new": { "type": "string" }
                        },
                        "required": ["old", "new"],
                        "additionalProperties": false
                    }
                },
                "message": { "type": "string" }
            },
            "required": ["edits", "message"],
            "additionalProperties": false
        }),
    }
}

/// Pull the proposal out of an assistant message.
pub fn parse_reply(message: &Message) -> Result<Proposal, GatewayError> {
    let mut calls = message.tool_calls.iter().filter(|tc| tc.name == RESPOND_TOOL);

    let call = calls.next().ok_or_else(|| {
        GatewayError::Protocol(format!("reply did not call the '{RESPOND_TOOL}' tool"))
    })?;
    if calls.next().is_some() {
        return Err(GatewayError::Protocol(format!(
            "reply called '{RESPOND_TOOL}' more than once"
        )));
    }

    serde_json::from_str(&call.arguments).map_err(|e| {
        GatewayError::Protocol(format!("malformed '{RESPOND_TOOL}' arguments: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_core::error::ProviderError;
    use duet_core::message::MessageToolCall;
    use duet_core::provider::ProviderResponse;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tool_reply(arguments: &str) -> Message {
        let mut msg = Message::assistant("");
        msg.tool_calls.push(MessageToolCall {
            id: "toolu_1".into(),
            name: RESPOND_TOOL.into(),
            arguments: arguments.into(),
        });
        msg
    }

    struct MockProvider {
        reply: Result<Message, ProviderError>,
        calls: AtomicUsize,
        last_request: Mutex<Option<ProviderRequest>>,
    }

    impl MockProvider {
        fn replying(reply: Result<Message, ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }
    }

    #[async_trait::async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request);
            self.reply.clone().map(|message| ProviderResponse {
                message,
                usage: None,
                model: "mock-model".into(),
            })
        }
    }

    #[tokio::test]
    async fn parses_forced_tool_call() {
        let provider = MockProvider::replying(Ok(tool_reply(
            r#"{"edits": [{"old": "return 1", "new": "return 2"}], "message": "bumped"}"#,
        )));
        let gateway = CollaboratorGateway::new(Some(provider.clone()), "mock-model");

        let proposal = gateway.request("doc", None).await.unwrap();
        assert_eq!(proposal.edits.len(), 1);
        assert_eq!(proposal.message, "bumped");

        let request = provider.last_request.lock().unwrap().take().unwrap();
        assert_eq!(
            request.tool_choice,
            Some(ToolChoice::Tool {
                name: RESPOND_TOOL.into()
            })
        );
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.messages[1].content, "<source>\ndoc\n</source>");
    }

    #[tokio::test]
    async fn missing_credential_fails_before_any_call() {
        let gateway = CollaboratorGateway::new(None, "mock-model");
        let err = gateway.request("doc", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingCredential));
        assert!(!gateway.has_credential());
    }

    #[tokio::test]
    async fn text_only_reply_is_protocol_violation() {
        let provider = MockProvider::replying(Ok(Message::assistant("sure, done")));
        let gateway = CollaboratorGateway::new(Some(provider.clone()), "mock-model");
        let err = gateway.request("doc", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::Protocol(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrong_shape_is_protocol_violation() {
        for args in [
            r#"{"message": "no edits"}"#,
            r#"{"edits": [], "message": "m", "extra": 1}"#,
            r#"{"edits": [{"old": "a"}], "message": "m"}"#,
            "not json",
        ] {
            let provider = MockProvider::replying(Ok(tool_reply(args)));
            let gateway = CollaboratorGateway::new(Some(provider), "mock-model");
            let err = gateway.request("doc", None).await.unwrap_err();
            assert!(matches!(err, GatewayError::Protocol(_)), "{args}");
        }
    }

    #[tokio::test]
    async fn provider_failure_is_gateway_error() {
        let provider = MockProvider::replying(Err(ProviderError::Timeout("300s".into())));
        let gateway = CollaboratorGateway::new(Some(provider), "mock-model");
        let err = gateway.request("doc", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::Provider(ProviderError::Timeout(_))));
    }

    #[test]
    fn previous_error_is_fed_back() {
        let gateway = CollaboratorGateway::new(None, "m");
        let request = gateway.build_request("doc", Some("AmbiguousEdit: edit #0 ambiguous"));
        assert_eq!(
            request.messages[1].content,
            "<source>\ndoc\n</source>\n<error>AmbiguousEdit: edit #0 ambiguous</error>\nPlease fix this."
        );
    }

    #[test]
    fn system_prompt_names_separator() {
        let gateway = CollaboratorGateway::new(None, "m").with_separator("# === SEP ===");
        assert!(gateway.system_prompt().contains("`# === SEP ===`"));
    }

    #[test]
    fn system_prompt_lists_only_real_builtins() {
        let prompt = CollaboratorGateway::new(None, "m").system_prompt();
        let listed = prompt
            .split("lists, ")
            .nth(1)
            .and_then(|rest| rest.split(')').next())
            .unwrap();
        for name in listed.split(", ") {
            assert!(
                duet_kernel::Builtin::lookup(name).is_some(),
                "prompt advertises unknown builtin {name}"
            );
        }
        assert_eq!(listed, "print, len, str, int, range");
    }

    #[test]
    fn duplicate_respond_calls_rejected() {
        let mut msg = tool_reply(r#"{"edits": [], "message": "a"}"#);
        msg.tool_calls.push(msg.tool_calls[0].clone());
        assert!(matches!(parse_reply(&msg), Err(GatewayError::Protocol(_))));
    }
}
