//! Provider-agnostic facade over the concrete [`ClientWrapper`] implementations (C2).
//!
//! `LLMClient` hides which provider is active behind a single `generate`
//! call; agents never see a concrete client type. The active backend is
//! held behind a `tokio::sync::RwLock<Arc<dyn ClientWrapper>>` so
//! [`LLMClient::switch`] can swap it atomically — no agent ever observes a
//! torn pointer (§5).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::client_wrapper::{ClientWrapper, Message, Role, TokenUsage, ToolDefinition};
use crate::engine::clients::aws::{AwsBedrockClient, ModelFamily};
use crate::engine::clients::{anthropic, gemini, openai, openrouter};
use crate::engine::config::ProviderCredentials;
use crate::error::{CoreError, ErrorKind};

/// Selects which concrete backend `LLMClient::generate` talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Local,
    AwsManaged,
    OpenrouterAggregator,
    GoogleGemini,
    AnthropicDirect,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Local => "local",
            Provider::AwsManaged => "aws_managed",
            Provider::OpenrouterAggregator => "openrouter_aggregator",
            Provider::GoogleGemini => "google_gemini",
            Provider::AnthropicDirect => "anthropic_direct",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Provider> {
        match s.trim() {
            "local" => Some(Provider::Local),
            "aws_managed" => Some(Provider::AwsManaged),
            "openrouter_aggregator" => Some(Provider::OpenrouterAggregator),
            "google_gemini" => Some(Provider::GoogleGemini),
            "anthropic_direct" => Some(Provider::AnthropicDirect),
            _ => None,
        }
    }
}

/// A normalized tool call: any provider-specific id is discarded (§4.2).
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub function_name: String,
    pub arguments: serde_json::Value,
}

/// A single `generate` request. `prompt` is the fully-assembled turn prompt
/// (system prompt + project snapshot + incoming message, per §4.3 step 1) —
/// the client itself performs no prompt assembly.
#[derive(Debug, Clone)]
pub struct LLMRequest {
    pub prompt: String,
    pub tools: Option<Vec<ToolDefinition>>,
    pub max_tokens: Option<u32>,
}

impl LLMRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), tools: None, max_tokens: None }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// The response to a `generate` call, normalized across providers.
#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub token_usage: TokenUsage,
    /// True when the provider did not report usage and the fallback
    /// word-count estimator (§4.2) was used instead.
    pub tokens_estimated: bool,
}

fn estimate_usage(text: &str) -> TokenUsage {
    let output = text.split_whitespace().count();
    let input = output / 3;
    TokenUsage { input_tokens: input, output_tokens: output, total_tokens: input + output }
}

/// Construct a concrete backend for `(provider, model)` from the resolved
/// credentials. Async because the AWS SDK config is built asynchronously.
async fn build_backend(
    provider: Provider,
    model: &str,
    credentials: &ProviderCredentials,
) -> Result<Arc<dyn ClientWrapper>, CoreError> {
    match provider {
        Provider::Local => {
            let endpoint = credentials
                .self_hosted_endpoint
                .clone()
                .ok_or_else(|| CoreError::new(ErrorKind::InvalidArguments, "local provider requires self_hosted_endpoint"))?;
            Ok(Arc::new(openai::OpenAIClient::new_with_base_url("", model, &endpoint)))
        }
        Provider::AnthropicDirect => {
            let key = credentials
                .anthropic_api_key
                .clone()
                .ok_or_else(|| CoreError::new(ErrorKind::AuthError, "anthropic_direct provider requires anthropic_api_key"))?;
            Ok(Arc::new(anthropic::AnthropicClient::new_with_model_str(&key, model)))
        }
        Provider::GoogleGemini => {
            let key = credentials
                .gemini_api_key
                .clone()
                .ok_or_else(|| CoreError::new(ErrorKind::AuthError, "google_gemini provider requires gemini_api_key"))?;
            Ok(Arc::new(gemini::GeminiClient::new_with_model_string(&key, model)))
        }
        Provider::OpenrouterAggregator => {
            let key = credentials
                .openrouter_api_key
                .clone()
                .ok_or_else(|| CoreError::new(ErrorKind::AuthError, "openrouter_aggregator provider requires openrouter_api_key"))?;
            Ok(Arc::new(openrouter::OpenRouterClient::new(&key, model)))
        }
        Provider::AwsManaged => {
            let region = credentials.aws_region.clone().unwrap_or_else(|| "us-east-1".to_string());
            let access_key = credentials.aws_access_key_id.clone().unwrap_or_default();
            let secret_key = credentials.aws_secret_access_key.clone().unwrap_or_default();
            let aws_creds = aws_sdk_bedrockruntime::config::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "agentforge-config",
            );
            let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_config::Region::new(region))
                .credentials_provider(aws_creds)
                .load()
                .await;
            let family = if model.contains("titan") { ModelFamily::Titan } else { ModelFamily::Llama };
            Ok(Arc::new(AwsBedrockClient::new(&sdk_config, model, family)))
        }
    }
}

/// Provider-agnostic entry point used by every agent. Construction is
/// fallible only on the initial backend; subsequent `switch` failures leave
/// the previous backend active.
pub struct LLMClient {
    active: RwLock<Arc<dyn ClientWrapper>>,
    credentials: ProviderCredentials,
    max_wall_clock: Duration,
}

impl LLMClient {
    pub async fn new(
        provider: Provider,
        model: &str,
        credentials: ProviderCredentials,
        max_wall_clock: Duration,
    ) -> Result<Self, CoreError> {
        let backend = build_backend(provider, model, &credentials).await?;
        Ok(Self { active: RwLock::new(backend), credentials, max_wall_clock })
    }

    /// Wrap an already-constructed backend directly, bypassing provider
    /// credential resolution. Used by black-box tests (§8) to stand up a
    /// `Coordinator` against a scripted `ClientWrapper` with no network
    /// calls; production code always goes through [`LLMClient::new`].
    pub fn from_backend(backend: Arc<dyn ClientWrapper>, max_wall_clock: Duration) -> Self {
        Self { active: RwLock::new(backend), credentials: ProviderCredentials::default(), max_wall_clock }
    }

    /// Send a request to the currently active backend, bounded by
    /// `max_llm_wall_clock`. The backend reference is cloned under a brief
    /// read lock so an in-flight call is unaffected by a concurrent `switch`.
    pub async fn generate(&self, request: LLMRequest) -> Result<LLMResponse, CoreError> {
        let backend = self.active.read().await.clone();
        let message = Message { role: Role::User, content: Arc::from(request.prompt.as_str()), tool_calls: vec![] };

        let call = backend.send_message(&[message], request.tools);
        let result = tokio::time::timeout(self.max_wall_clock, call).await;

        let response = match result {
            Err(_) => return Err(CoreError::new(ErrorKind::Timeout, "LLM call exceeded max_llm_wall_clock")),
            Ok(Err(e)) => return Err(CoreError::with_source(ErrorKind::ApiError, "LLM call failed", StringError(e.to_string()))),
            Ok(Ok(msg)) => msg,
        };

        let tool_calls: Vec<ToolCall> = response
            .tool_calls
            .iter()
            .map(|tc| ToolCall { function_name: tc.name.clone(), arguments: tc.arguments.clone() })
            .collect();

        if response.content.trim().is_empty() && tool_calls.is_empty() {
            return Err(CoreError::new(ErrorKind::ParseError, "LLM response carried no text and no tool calls"));
        }

        let (token_usage, tokens_estimated) = match backend.get_last_usage().await {
            Some(usage) => (usage, false),
            None => (estimate_usage(&response.content), true),
        };

        Ok(LLMResponse { text: response.content.to_string(), tool_calls, token_usage, tokens_estimated })
    }

    /// Atomically replace the active backend. In-flight `generate` calls
    /// already hold their own `Arc` clone and complete under the prior
    /// backend (§5). A no-op `switch` to the currently active `(provider,
    /// model)` pair still rebuilds and swaps a fresh instance (R3): the
    /// agent-visible effect — the next turn uses a client for that
    /// `(provider, model)` — is unchanged either way.
    pub async fn switch(&self, provider: Provider, model: &str) -> Result<(), CoreError> {
        let backend = build_backend(provider, model, &self.credentials).await?;
        *self.active.write().await = backend;
        Ok(())
    }

    pub async fn model_name(&self) -> String {
        self.active.read().await.model_name().to_string()
    }

    /// Known model identifiers per provider, grouped by model family.
    pub fn available_models() -> Vec<(Provider, Vec<(&'static str, Vec<&'static str>)>)> {
        vec![
            (
                Provider::AnthropicDirect,
                vec![(
                    "claude",
                    vec![
                        "claude-opus-4-1",
                        "claude-opus-4",
                        "claude-sonnet-4",
                        "claude-3-7-sonnet",
                        "claude-3-5-haiku",
                    ],
                )],
            ),
            (
                Provider::GoogleGemini,
                vec![(
                    "gemini",
                    vec!["gemini-2.5-pro", "gemini-2.5-flash", "gemini-2.5-flash-lite", "gemini-2.0-flash"],
                )],
            ),
            (
                Provider::OpenrouterAggregator,
                vec![("aggregated", vec!["anthropic/claude-3.5-sonnet", "openai/gpt-4.1", "meta-llama/llama-3.1-70b-instruct"])],
            ),
            (
                Provider::Local,
                vec![("self-hosted", vec!["local-default"])],
            ),
            (
                Provider::AwsManaged,
                vec![
                    ("llama", vec!["meta.llama3-70b-instruct-v1:0", "meta.llama3-8b-instruct-v1:0"]),
                    ("titan", vec!["amazon.titan-text-express-v1", "amazon.titan-text-lite-v1"]),
                ],
            ),
        ]
    }
}

/// Adapts an already-formatted message string into `std::error::Error` so it
/// can back a [`CoreError::with_source`] without re-boxing the original
/// `Box<dyn Error>` (which is not `Send + Sync`).
#[derive(Debug)]
struct StringError(String);

impl std::fmt::Display for StringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StringError {}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::error::Error;
    use tokio::sync::Mutex;

    struct StubClient {
        reply: String,
    }

    #[async_trait]
    impl ClientWrapper for StubClient {
        async fn send_message(
            &self,
            _messages: &[Message],
            _tools: Option<Vec<ToolDefinition>>,
        ) -> Result<Message, Box<dyn Error>> {
            Ok(Message { role: Role::Assistant, content: Arc::from(self.reply.as_str()), tool_calls: vec![] })
        }

        fn model_name(&self) -> &str {
            "stub"
        }

        fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
            None
        }
    }

    #[tokio::test]
    async fn generate_falls_back_to_word_count_estimate_when_usage_is_absent() {
        let client = LLMClient {
            active: RwLock::new(Arc::new(StubClient { reply: "hi there friend".to_string() })),
            credentials: ProviderCredentials::default(),
            max_wall_clock: Duration::from_secs(5),
        };
        let resp = client.generate(LLMRequest::new("say hi")).await.unwrap();
        assert!(resp.tokens_estimated);
        assert_eq!(resp.token_usage.output_tokens, 3);
        assert_eq!(resp.token_usage.input_tokens, 1);
    }

    #[tokio::test]
    async fn generate_rejects_empty_text_with_no_tool_calls_as_a_parse_error() {
        let client = LLMClient {
            active: RwLock::new(Arc::new(StubClient { reply: String::new() })),
            credentials: ProviderCredentials::default(),
            max_wall_clock: Duration::from_secs(5),
        };
        let err = client.generate(LLMRequest::new("say hi")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
    }

    #[test]
    fn provider_round_trips_through_its_string_form() {
        for p in [
            Provider::Local,
            Provider::AwsManaged,
            Provider::OpenrouterAggregator,
            Provider::GoogleGemini,
            Provider::AnthropicDirect,
        ] {
            assert_eq!(Provider::from_str_loose(p.as_str()), Some(p));
        }
    }
}
