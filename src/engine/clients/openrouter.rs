//! OpenRouter aggregator client.
//!
//! OpenRouter speaks an OpenAI-compatible `chat/completions` surface but
//! requires two extra headers (`HTTP-Referer`, `X-Title`) for attribution, so
//! this wrapper builds its own request rather than reusing
//! [`crate::engine::clients::common::send_with_native_tools`], whose
//! signature has no room for extra headers (§4.2 policy table).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agentforge::engine::client_wrapper::{ClientWrapper, Message, Role};
//! use agentforge::engine::clients::openrouter::OpenRouterClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPENROUTER_API_KEY")?;
//!     let client = OpenRouterClient::new(&key, "anthropic/claude-3.5-sonnet");
//!     let resp = client
//!         .send_message(
//!             &[Message { role: Role::User, content: Arc::from("Hello!"), tool_calls: vec![] }],
//!             None,
//!         )
//!         .await?;
//!     println!("Assistant: {}", resp.content);
//!     Ok(())
//! }
//! ```

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::client_wrapper::{
    ClientWrapper, Message, NativeToolCall, Role, TokenUsage, ToolDefinition,
};
use crate::engine::clients::common::get_shared_http_client;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_REFERER: &str = "https://github.com/agentforge-ai/agentforge";
const DEFAULT_TITLE: &str = "agentforge";

/// Client wrapper for OpenRouter's aggregated model catalog.
pub struct OpenRouterClient {
    model: String,
    api_key: String,
    base_url: String,
    referer: String,
    title: String,
    usage: Mutex<Option<TokenUsage>>,
}

impl OpenRouterClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn new_with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            model: model.to_string(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            referer: DEFAULT_REFERER.to_string(),
            title: DEFAULT_TITLE.to_string(),
            usage: Mutex::new(None),
        }
    }

    pub fn with_attribution(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.referer = referer.into();
        self.title = title.into();
        self
    }

    fn build_wire_messages(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|msg| match &msg.role {
                Role::System => serde_json::json!({"role": "system", "content": msg.content.as_ref()}),
                Role::User => serde_json::json!({"role": "user", "content": msg.content.as_ref()}),
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        serde_json::json!({"role": "assistant", "content": msg.content.as_ref()})
                    } else {
                        let tool_calls: Vec<serde_json::Value> = msg
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                serde_json::json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": serde_json::to_string(&tc.arguments)
                                            .unwrap_or_else(|_| "{}".to_string()),
                                    }
                                })
                            })
                            .collect();
                        serde_json::json!({
                            "role": "assistant",
                            "content": serde_json::Value::Null,
                            "tool_calls": tool_calls,
                        })
                    }
                }
                Role::Tool { call_id } => serde_json::json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": msg.content.as_ref(),
                }),
            })
            .collect()
    }

    fn build_wire_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect()
    }

    async fn send_request(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error>> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::build_wire_messages(messages),
        });
        if let Some(tools) = &tools {
            if !tools.is_empty() {
                body["tools"] = serde_json::json!(Self::build_wire_tools(tools));
            }
        }

        let url = format!("{}/chat/completions", self.base_url);
        let resp = get_shared_http_client()
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| -> Box<dyn Error> { Box::new(e) })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| -> Box<dyn Error> { Box::new(e) })?;

        if !status.is_success() {
            if log::log_enabled!(log::Level::Error) {
                log::error!("OpenRouterClient::send_request(...): HTTP {} from {}: {}", status, url, text);
            }
            return Err(format!("OpenRouterClient: HTTP {} — {}", status, text).into());
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| -> Box<dyn Error> { Box::new(e) })?;

        if let Some(usage) = parsed.get("usage") {
            let input = usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let output = usage.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            *self.usage.lock().await = Some(TokenUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            });
        }

        let choice_msg = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| -> Box<dyn Error> { "OpenRouterClient: no choices in response".into() })?;

        let content: Arc<str> = choice_msg
            .get("content")
            .and_then(|c| c.as_str())
            .map(Arc::from)
            .unwrap_or_else(|| Arc::from(""));

        let tool_calls: Vec<NativeToolCall> = choice_msg
            .get("tool_calls")
            .and_then(|tc| tc.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|tc| {
                        let id = tc.get("id")?.as_str()?.to_string();
                        let func = tc.get("function")?;
                        let name = func.get("name")?.as_str()?.to_string();
                        let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
                        let arguments: serde_json::Value = serde_json::from_str(args_str)
                            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
                        Some(NativeToolCall { id, name, arguments })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Message { role: Role::Assistant, content, tool_calls })
    }
}

#[async_trait]
impl ClientWrapper for OpenRouterClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error>> {
        match self.send_request(messages, tools).await {
            Ok(msg) => Ok(msg),
            Err(e) => {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("OpenRouterClient::send_message(...): {}", e);
                }
                Err(e)
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_tool_calls_serialize_arguments_as_a_json_string() {
        let messages = vec![Message {
            role: Role::Assistant,
            content: Arc::from(""),
            tool_calls: vec![NativeToolCall {
                id: "call_1".to_string(),
                name: "read_file".to_string(),
                arguments: serde_json::json!({"file_path": "a.txt"}),
            }],
        }];
        let wire = OpenRouterClient::build_wire_messages(&messages);
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "read_file");
        assert!(wire[0]["tool_calls"][0]["function"]["arguments"].as_str().unwrap().contains("a.txt"));
    }

    #[test]
    fn tool_results_become_tool_role_turns() {
        let messages = vec![Message {
            role: Role::Tool { call_id: "call_1".to_string() },
            content: Arc::from("file contents"),
            tool_calls: vec![],
        }];
        let wire = OpenRouterClient::build_wire_messages(&messages);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "call_1");
    }

    #[test]
    fn tool_definitions_render_as_function_entries() {
        let tools = vec![ToolDefinition {
            name: "calculator".to_string(),
            description: "evaluates math".to_string(),
            parameters_schema: serde_json::json!({"type": "object", "properties": {}}),
        }];
        let wire = OpenRouterClient::build_wire_tools(&tools);
        assert_eq!(wire[0]["function"]["name"], "calculator");
    }
}
