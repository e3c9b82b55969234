//! Native Anthropic Messages API client.
//!
//! Unlike [`crate::engine::clients::openrouter`], Anthropic does not expose an
//! OpenAI-compatible Chat Completions surface, so this wrapper speaks the
//! native [Messages API](https://docs.anthropic.com/en/api/messages) directly:
//! a top-level `system` string, `x-api-key`/`anthropic-version` headers in
//! place of `Authorization: Bearer`, and `tool_use`/`tool_result` content
//! blocks instead of an OpenAI `tool_calls` array.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agentforge::engine::client_wrapper::{ClientWrapper, Message, Role};
//! use agentforge::engine::clients::anthropic::{AnthropicClient, Model};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("ANTHROPIC_KEY")?;
//!     let client = AnthropicClient::new_with_model_enum(&key, Model::ClaudeSonnet4);
//!     let reply = client
//!         .send_message(
//!             &[Message {
//!                 role: Role::User,
//!                 content: Arc::<str>::from("List three Claude capabilities."),
//!                 tool_calls: vec![],
//!             }],
//!             None,
//!         )
//!         .await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```

use crate::client_wrapper::{
    ClientWrapper, Message, NativeToolCall, Role, TokenUsage, ToolDefinition,
};
use crate::engine::clients::common::get_shared_http_client;
use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4000;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Client wrapper for Anthropic's native Messages API.
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    usage: Mutex<Option<TokenUsage>>,
}

/// Anthropic Claude model identifiers (mid-2025 snapshot).
pub enum Model {
    /// `claude-opus-4-1` – flagship reasoning tier.
    ClaudeOpus41,
    /// `claude-opus-4-0` – previous Opus generation.
    ClaudeOpus4,
    /// `claude-sonnet-4-0` – balanced reasoning + throughput.
    ClaudeSonnet4,
    /// `claude-3-7-sonnet-latest` – prior Sonnet iteration.
    ClaudeSonnet37,
    /// `claude-3-5-haiku-latest` – fastest Claude tier.
    ClaudeHaiku35,
}

fn model_to_string(model: Model) -> String {
    match model {
        Model::ClaudeOpus41 => "claude-opus-4-1".to_string(),
        Model::ClaudeOpus4 => "claude-opus-4-0".to_string(),
        Model::ClaudeSonnet4 => "claude-sonnet-4-0".to_string(),
        Model::ClaudeSonnet37 => "claude-3-7-sonnet-latest".to_string(),
        Model::ClaudeHaiku35 => "claude-3-5-haiku-latest".to_string(),
    }
}

impl AnthropicClient {
    /// Create a client from an API key and strongly typed model variant.
    pub fn new_with_model_enum(secret_key: &str, model: Model) -> Self {
        Self::new_with_model_str(secret_key, &model_to_string(model))
    }

    /// Create a client from an API key and explicit model string.
    pub fn new_with_model_str(secret_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(secret_key, model_name, DEFAULT_BASE_URL)
    }

    /// Create a client pointing at a custom Messages-API-compatible base URL.
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        Self {
            api_key: secret_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model_name.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            usage: Mutex::new(None),
        }
    }

    /// Override the default `max_tokens` ceiling (defaults to 4000).
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Override the default sampling temperature (defaults to 0.7).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Translate [`Message`]s into Anthropic's `messages` array plus an optional
/// top-level `system` string, since Anthropic does not accept a `system` role
/// inside the `messages` array itself.
fn to_wire_messages(messages: &[Message]) -> (Option<String>, Vec<serde_json::Value>) {
    let mut system = String::new();
    let mut wire = Vec::with_capacity(messages.len());

    for msg in messages {
        match &msg.role {
            Role::System => {
                if !system.is_empty() {
                    system.push('\n');
                }
                system.push_str(msg.content.as_ref());
            }
            Role::User => wire.push(serde_json::json!({
                "role": "user",
                "content": msg.content.as_ref(),
            })),
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    wire.push(serde_json::json!({
                        "role": "assistant",
                        "content": msg.content.as_ref(),
                    }));
                } else {
                    let mut blocks: Vec<serde_json::Value> = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(serde_json::json!({"type": "text", "text": msg.content.as_ref()}));
                    }
                    for tc in &msg.tool_calls {
                        blocks.push(serde_json::json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments,
                        }));
                    }
                    wire.push(serde_json::json!({"role": "assistant", "content": blocks}));
                }
            }
            Role::Tool { call_id } => wire.push(serde_json::json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": call_id,
                    "content": msg.content.as_ref(),
                }],
            })),
        }
    }

    (
        if system.is_empty() { None } else { Some(system) },
        wire,
    )
}

fn to_wire_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters_schema,
            })
        })
        .collect()
}

/// Post a `messages` request against the Anthropic Messages API and translate
/// the response back into a [`Message`], recording token usage as it goes.
async fn send_messages_request(
    base_url: &str,
    api_key: &str,
    model: &str,
    max_tokens: u32,
    temperature: f32,
    messages: &[Message],
    tools: &[ToolDefinition],
    usage_slot: &Mutex<Option<TokenUsage>>,
) -> Result<Message, Box<dyn Error>> {
    let (system, wire_messages) = to_wire_messages(messages);

    let mut body = serde_json::json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "messages": wire_messages,
    });
    if let Some(system) = system {
        body["system"] = serde_json::json!(system);
    }
    if !tools.is_empty() {
        body["tools"] = serde_json::json!(to_wire_tools(tools));
    }

    let url = format!("{}/v1/messages", base_url);
    let resp = get_shared_http_client()
        .post(&url)
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("content-type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| -> Box<dyn Error> { Box::new(e) })?;

    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| -> Box<dyn Error> { Box::new(e) })?;

    if !status.is_success() {
        if log::log_enabled!(log::Level::Error) {
            log::error!(
                "agentforge::engine::clients::anthropic: HTTP {} from {}: {}",
                status, url, text
            );
        }
        return Err(format!("anthropic messages request: HTTP {} — {}", status, text).into());
    }

    let parsed: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| -> Box<dyn Error> { Box::new(e) })?;

    if let Some(usage_obj) = parsed.get("usage") {
        let input = usage_obj
            .get("input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let output = usage_obj
            .get("output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        *usage_slot.lock().await = Some(TokenUsage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        });
    }

    let blocks = parsed
        .get("content")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    let mut text_content = String::new();
    let mut tool_calls = Vec::new();
    for block in &blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    text_content.push_str(t);
                }
            }
            Some("tool_use") => {
                if let (Some(id), Some(name)) = (
                    block.get("id").and_then(|v| v.as_str()),
                    block.get("name").and_then(|v| v.as_str()),
                ) {
                    let arguments = block.get("input").cloned().unwrap_or(serde_json::json!({}));
                    tool_calls.push(NativeToolCall {
                        id: id.to_string(),
                        name: name.to_string(),
                        arguments,
                    });
                }
            }
            _ => {}
        }
    }

    Ok(Message {
        role: Role::Assistant,
        content: Arc::from(text_content),
        tool_calls,
    })
}

#[async_trait]
impl ClientWrapper for AnthropicClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error>> {
        let tools = tools.unwrap_or_default();
        send_messages_request(
            &self.base_url,
            &self.api_key,
            &self.model,
            self.max_tokens,
            self.temperature,
            messages,
            &tools,
            &self.usage,
        )
        .await
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_hoisted_out_of_the_array() {
        let messages = [
            Message {
                role: Role::System,
                content: Arc::from("be terse"),
                tool_calls: vec![],
            },
            Message {
                role: Role::User,
                content: Arc::from("hi"),
                tool_calls: vec![],
            },
        ];
        let (system, wire) = to_wire_messages(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
    }

    #[test]
    fn assistant_tool_calls_become_tool_use_blocks() {
        let messages = [Message {
            role: Role::Assistant,
            content: Arc::from(""),
            tool_calls: vec![NativeToolCall {
                id: "toolu_1".to_string(),
                name: "read_file".to_string(),
                arguments: serde_json::json!({"file_path": "a.txt"}),
            }],
        }];
        let (_, wire) = to_wire_messages(&messages);
        let content = wire[0]["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "tool_use");
        assert_eq!(content[0]["name"], "read_file");
    }

    #[test]
    fn tool_results_become_user_turns_with_tool_result_blocks() {
        let messages = [Message {
            role: Role::Tool {
                call_id: "toolu_1".to_string(),
            },
            content: Arc::from("file contents"),
            tool_calls: vec![],
        }];
        let (_, wire) = to_wire_messages(&messages);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[0]["content"][0]["type"], "tool_result");
        assert_eq!(wire[0]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn tool_definitions_render_as_input_schema() {
        let tools = [ToolDefinition {
            name: "calculator".to_string(),
            description: "Evaluates math".to_string(),
            parameters_schema: serde_json::json!({"type": "object", "properties": {}}),
        }];
        let wire = to_wire_tools(&tools);
        assert_eq!(wire[0]["name"], "calculator");
        assert_eq!(wire[0]["input_schema"]["type"], "object");
    }
}
