//! OpenAI Chat Completions client that captures token usage statistics.
//!
//! This is also the transport reused by the `local` (self-hosted) provider,
//! since a self-hosted endpoint is assumed to speak the same OpenAI-compatible
//! wire format at a different `base_url`.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use agentforge::engine::clients::openai::{OpenAIClient, Model};
//! use agentforge::engine::client_wrapper::{ClientWrapper, Message, Role};
//!
//! #[tokio::main]
//! async fn main() {
//!     let secret_key : String = std::env::var("OPEN_AI_SECRET").expect("OPEN_AI_SECRET not set");
//!     let client = OpenAIClient::new_with_model_enum(&secret_key, Model::GPT41Nano);
//!
//!     let resp = client.send_message(&vec![
//!         Message { role: Role::System, content: Arc::<str>::from("You are an assistant."), tool_calls: vec![] },
//!         Message { role: Role::User,   content: Arc::<str>::from("Hello!"), tool_calls: vec![] },
//!     ], None).await.unwrap();
//!     println!("Assistant: {}", resp.content);
//!
//!     if let Some(usage) = client.get_last_usage().await {
//!         println!(
//!             "Tokens — input: {}, output: {}, total: {}",
//!             usage.input_tokens, usage.output_tokens, usage.total_tokens
//!         );
//!     }
//! }
//! ```
//!
//! # Streaming usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agentforge::engine::client_wrapper::{ClientWrapper, Message, Role};
//! use agentforge::engine::clients::openai::{Model, OpenAIClient};
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPEN_AI_SECRET")?;
//!     let client = OpenAIClient::new_with_model_enum(&key, Model::GPT41Mini);
//!     let request = [Message {
//!         role: Role::User,
//!         content: Arc::<str>::from("Stream a limerick about async Rust."),
//!         tool_calls: vec![],
//!     }];
//!
//!     if let Some(mut stream) = client.send_message_stream(&request, None).await? {
//!         while let Some(chunk) = stream.next().await {
//!             print!("{}", chunk?.content);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use openai_rust::chat;
use openai_rust2 as openai_rust;

use crate::client_wrapper::{ClientWrapper, Message, MessageChunk, Role, ToolDefinition, TokenUsage};
use crate::engine::clients::common::{
    chunks_to_stream, get_shared_http_client, send_and_track, send_with_native_tools, StreamError,
};
use tokio::sync::Mutex;

/// Official model identifiers supported by OpenAI's Chat Completions API.
#[allow(non_camel_case_types)]
pub enum Model {
    /// `gpt-5.2` – complex reasoning, broad world knowledge, code-heavy or multi-step agentic tasks.
    GPT52,
    /// `gpt-5.2-chat-latest` – ChatGPT's production deployment of GPT-5.2.
    GPT52ChatLatest,
    /// `gpt-5.1` – flagship for coding and agentic tasks with configurable reasoning effort.
    GPT51,
    /// `gpt-5` – high-reasoning, medium latency, text or multimodal input.
    GPT5,
    /// `gpt-5-mini` – fast variant of GPT-5 with balanced cost and quality.
    GPT5Mini,
    /// `gpt-5-nano` – lowest latency GPT-5 configuration.
    GPT5Nano,
    /// `gpt-4o` – omni model with text + image inputs.
    GPT4o,
    /// `gpt-4o-mini` – cost effective GPT-4o derivative.
    GPt4oMini,
    /// `o4-mini` – low-latency O-series tier.
    O4Mini,
    /// `gpt-4.1` – general availability GPT-4.1.
    GPT41,
    /// `gpt-4.1-mini` – reduced cost GPT-4.1 tier.
    GPT41Mini,
    /// `gpt-4.1-nano` – ultra low cost GPT-4.1 derivative.
    GPT41Nano,
}

/// Convert a [`Model`] variant into the string identifier expected by the REST API.
pub fn model_to_string(model: Model) -> String {
    match model {
        Model::GPT52 => "gpt-5.2".to_string(),
        Model::GPT52ChatLatest => "gpt-5.2-chat-latest".to_string(),
        Model::GPT51 => "gpt-5.1".to_string(),
        Model::GPT5 => "gpt-5".to_string(),
        Model::GPT5Mini => "gpt-5-mini".to_string(),
        Model::GPT5Nano => "gpt-5-nano".to_string(),
        Model::GPT4o => "gpt-4o".to_string(),
        Model::GPt4oMini => "gpt-4o-mini".to_string(),
        Model::O4Mini => "o4-mini".to_string(),
        Model::GPT41 => "gpt-4.1".to_string(),
        Model::GPT41Mini => "gpt-4.1-mini".to_string(),
        Model::GPT41Nano => "gpt-4.1-nano".to_string(),
    }
}

/// Client wrapper for OpenAI's Chat Completions API (and OpenAI-compatible endpoints).
///
/// The wrapper maintains the selected model identifier plus an internal [`TokenUsage`] slot so
/// callers can inspect how many tokens each request consumed. It reuses the shared HTTP client
/// configured in [`crate::engine::clients::common`].
pub struct OpenAIClient {
    client: openai_rust::Client,
    model: String,
    token_usage: Mutex<Option<TokenUsage>>,
    api_key: String,
    base_url: String,
}

impl OpenAIClient {
    /// Construct a new client using the provided API key and [`Model`] variant.
    pub fn new_with_model_enum(secret_key: &str, model: Model) -> Self {
        Self::new_with_model_string(secret_key, &model_to_string(model))
    }

    /// Construct a new client using the provided API key and explicit model name.
    ///
    /// This is the most general constructor and can be used for unofficial model identifiers
    /// (e.g. self-hosted OpenAI-compatible deployments).
    pub fn new_with_model_string(secret_key: &str, model_name: &str) -> Self {
        let base_url = "https://api.openai.com/v1";
        OpenAIClient {
            client: openai_rust::Client::new_with_client(
                secret_key,
                get_shared_http_client().clone(),
            ),
            model: model_name.to_string(),
            token_usage: Mutex::new(None),
            api_key: secret_key.to_string(),
            base_url: base_url.to_string(),
        }
    }

    /// Construct a client targeting a custom OpenAI-compatible base URL.
    ///
    /// `base_url` should not have a trailing slash (e.g. `"https://api.openai.com/v1"`).
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        let base_url_normalized = base_url.trim_end_matches('/');
        OpenAIClient {
            client: openai_rust::Client::new_with_client_and_base_url(
                secret_key,
                get_shared_http_client().clone(),
                &format!("{}/", base_url_normalized),
            ),
            model: model_name.to_string(),
            token_usage: Mutex::new(None),
            api_key: secret_key.to_string(),
            base_url: base_url_normalized.to_string(),
        }
    }

    /// Convenience helper wrapping [`OpenAIClient::new_with_base_url`] for strongly typed models.
    pub fn new_with_base_url_and_model_enum(
        secret_key: &str,
        model: Model,
        base_url: &str,
    ) -> Self {
        Self::new_with_base_url(secret_key, &model_to_string(model), base_url)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error>> {
        match tools {
            Some(tools) if !tools.is_empty() => {
                send_with_native_tools(
                    &self.base_url,
                    &self.api_key,
                    &self.model,
                    messages,
                    &tools,
                    get_shared_http_client(),
                    &self.token_usage,
                )
                .await
            }
            _ => {
                let formatted_messages: Vec<chat::Message> = messages
                    .iter()
                    .map(|msg| chat::Message {
                        role: match msg.role {
                            Role::System => "system".to_owned(),
                            Role::User => "user".to_owned(),
                            Role::Assistant => "assistant".to_owned(),
                            Role::Tool { .. } => "tool".to_owned(),
                        },
                        content: msg.content.to_string(),
                    })
                    .collect();

                let result = send_and_track(
                    &self.client,
                    &self.model,
                    formatted_messages,
                    Some("/v1/chat/completions".to_string()),
                    &self.token_usage,
                    None,
                )
                .await;

                match result {
                    Ok(c) => Ok(Message {
                        role: Role::Assistant,
                        content: Arc::from(c.as_str()),
                        tool_calls: vec![],
                    }),
                    Err(e) => {
                        if log::log_enabled!(log::Level::Error) {
                            log::error!("OpenAIClient::send_message(...): OpenAI API Error: {}", e);
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    fn send_message_stream<'a>(
        &'a self,
        messages: &'a [Message],
        _tools: Option<Vec<ToolDefinition>>,
    ) -> crate::client_wrapper::MessageStreamFuture<'a> {
        Box::pin(async move {
            let formatted_messages: Vec<chat::Message> = messages
                .iter()
                .map(|msg| chat::Message {
                    role: match msg.role {
                        Role::System => "system".to_owned(),
                        Role::User => "user".to_owned(),
                        Role::Assistant => "assistant".to_owned(),
                        Role::Tool { .. } => "tool".to_owned(),
                    },
                    content: msg.content.to_string(),
                })
                .collect();

            let chat_arguments = chat::ChatArguments::new(&self.model, formatted_messages);
            let stream_result = self
                .client
                .create_chat_stream(chat_arguments, Some("/v1/chat/completions".to_string()))
                .await;

            match stream_result {
                Ok(mut chunk_stream) => {
                    let mut chunks: Vec<Result<MessageChunk, Box<dyn Error + Send>>> = Vec::new();

                    while let Some(chunk_result) = chunk_stream.next().await {
                        let message_chunk: Result<MessageChunk, Box<dyn Error + Send>> =
                            match chunk_result {
                                Ok(chunk) => {
                                    let content = chunk
                                        .choices
                                        .first()
                                        .and_then(|choice| choice.delta.content.clone())
                                        .unwrap_or_default();
                                    let finish_reason = chunk
                                        .choices
                                        .first()
                                        .and_then(|choice| choice.finish_reason.clone());
                                    Ok(MessageChunk {
                                        content,
                                        finish_reason,
                                    })
                                }
                                Err(err) => {
                                    if log::log_enabled!(log::Level::Error) {
                                        log::error!(
                                            "OpenAIClient::send_message_stream(...): stream chunk error: {}",
                                            err
                                        );
                                    }
                                    Err(Box::new(StreamError(format!(
                                        "stream chunk error: {}",
                                        err
                                    ))) as Box<dyn Error + Send>)
                                }
                            };
                        chunks.push(message_chunk);
                    }
                    Ok(Some(chunks_to_stream(chunks)))
                }
                Err(err) => {
                    if log::log_enabled!(log::Level::Error) {
                        log::error!(
                            "OpenAIClient::send_message_stream(...): OpenAI API error: {}",
                            err
                        );
                    }
                    Err(err.into())
                }
            }
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
