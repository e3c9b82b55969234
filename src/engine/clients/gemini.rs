//! Google Gemini client speaking the native `generateContent` wire format.
//!
//! Unlike `openai.rs`, Gemini does not expose an OpenAI-compatible surface,
//! so this wrapper builds and parses its own request/response JSON rather
//! than delegating to [`crate::engine::clients::common`] (§4.2 policy table).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agentforge::engine::client_wrapper::{ClientWrapper, Message, Role};
//! use agentforge::engine::clients::gemini::{GeminiClient, Model};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("GEMINI_API_KEY")?;
//!     let client = GeminiClient::new_with_model_enum(&key, Model::Gemini25Flash);
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

/// Gemini model identifiers accepted by the `v1beta` `generateContent` endpoint.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy)]
pub enum Model {
    Gemini25Pro,
    Gemini25Flash,
    Gemini25FlashLite,
    Gemini20Flash,
    Gemini20FlashLite,
}

pub fn model_to_string(model: Model) -> String {
    match model {
        Model::Gemini25Pro => "gemini-2.5-pro".to_string(),
        Model::Gemini25Flash => "gemini-2.5-flash".to_string(),
        Model::Gemini25FlashLite => "gemini-2.5-flash-lite".to_string(),
        Model::Gemini20Flash => "gemini-2.0-flash".to_string(),
        Model::Gemini20FlashLite => "gemini-2.0-flash-lite".to_string(),
    }
}

/// Client wrapper for Google's Gemini `generateContent` REST API.
pub struct GeminiClient {
    model: String,
    api_key: String,
    base_url: String,
    temperature: f32,
    usage: Mutex<Option<TokenUsage>>,
}

impl GeminiClient {
    pub fn new_with_model_enum(api_key: &str, model: Model) -> Self {
        Self::new_with_model_string(api_key, &model_to_string(model))
    }

    pub fn new_with_model_string(api_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(
            api_key,
            model_name,
            "https://generativelanguage.googleapis.com/v1beta",
        )
    }

    pub fn new_with_base_url(api_key: &str, model_name: &str, base_url: &str) -> Self {
        Self {
            model: model_name.to_string(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: 0.7,
            usage: Mutex::new(None),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Render the `contents=[{parts:[{text}]}]`/`generationConfig` request body
    /// (§4.2 policy table) plus an optional `tools=[{functionDeclarations}]`
    /// block when tool calling is enabled.
    fn build_request_body(&self, messages: &[Message], tools: Option<&[ToolDefinition]>) -> serde_json::Value {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for msg in messages {
            match &msg.role {
                Role::System => system_parts.push(msg.content.to_string()),
                Role::User => contents.push(serde_json::json!({
                    "role": "user",
                    "parts": [{"text": msg.content.as_ref()}],
                })),
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        contents.push(serde_json::json!({
                            "role": "model",
                            "parts": [{"text": msg.content.as_ref()}],
                        }));
                    } else {
                        let parts: Vec<serde_json::Value> = msg
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                serde_json::json!({
                                    "functionCall": {"name": tc.name, "args": tc.arguments}
                                })
                            })
                            .collect();
                        contents.push(serde_json::json!({"role": "model", "parts": parts}));
                    }
                }
                Role::Tool { .. } => contents.push(serde_json::json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": "tool",
                            "response": {"content": msg.content.as_ref()}
                        }
                    }],
                })),
            }
        }

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {"temperature": self.temperature},
        });

        if !system_parts.is_empty() {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{"text": system_parts.join("\n")}]
            });
        }

        if let Some(tools) = tools {
            if !tools.is_empty() {
                let declarations: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters_schema,
                        })
                    })
                    .collect();
                body["tools"] = serde_json::json!([{"functionDeclarations": declarations}]);
            }
        }

        body
    }

    async fn send_request(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error>> {
        let body = self.build_request_body(messages, tools.as_deref());
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let resp = get_shared_http_client()
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| -> Box<dyn Error> { Box::new(e) })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| -> Box<dyn Error> { Box::new(e) })?;

        if !status.is_success() {
            if log::log_enabled!(log::Level::Error) {
                log::error!("GeminiClient::send_request(...): HTTP {} from {}: {}", status, url, text);
            }
            return Err(format!("GeminiClient: HTTP {} — {}", status, text).into());
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| -> Box<dyn Error> { Box::new(e) })?;

        if let Some(usage) = parsed.get("usageMetadata") {
            let input = usage.get("promptTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let output = usage
                .get("candidatesTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            *self.usage.lock().await = Some(TokenUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            });
        }

        let parts = parsed
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();

        let mut text_content = String::new();
        let mut tool_calls = Vec::new();
        for part in &parts {
            if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                text_content.push_str(t);
            } else if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(|n| n.as_str()).unwrap_or_default().to_string();
                let arguments = call.get("args").cloned().unwrap_or(serde_json::Value::Object(Default::default()));
                tool_calls.push(NativeToolCall { id: String::new(), name, arguments });
            }
        }

        Ok(Message {
            role: Role::Assistant,
            content: Arc::from(text_content.as_str()),
            tool_calls,
        })
    }
}

#[async_trait]
impl ClientWrapper for GeminiClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error>> {
        match self.send_request(messages, tools).await {
            Ok(msg) => Ok(msg),
            Err(e) => {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("GeminiClient::send_message(...): {}", e);
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
    fn system_messages_become_a_system_instruction_block() {
        let client = GeminiClient::new_with_model_enum("key", Model::Gemini25Flash);
        let messages = vec![
            Message { role: Role::System, content: Arc::from("be terse"), tool_calls: vec![] },
            Message { role: Role::User, content: Arc::from("hi"), tool_calls: vec![] },
        ];
        let body = client.build_request_body(&messages, None);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn assistant_tool_calls_become_function_call_parts() {
        let client = GeminiClient::new_with_model_enum("key", Model::Gemini25Flash);
        let messages = vec![Message {
            role: Role::Assistant,
            content: Arc::from(""),
            tool_calls: vec![NativeToolCall {
                id: "ignored".to_string(),
                name: "read_file".to_string(),
                arguments: serde_json::json!({"file_path": "a.txt"}),
            }],
        }];
        let body = client.build_request_body(&messages, None);
        let part = &body["contents"][0]["parts"][0]["functionCall"];
        assert_eq!(part["name"], "read_file");
    }

    #[test]
    fn tool_definitions_render_as_function_declarations() {
        let client = GeminiClient::new_with_model_enum("key", Model::Gemini25Flash);
        let tools = vec![ToolDefinition {
            name: "calculator".to_string(),
            description: "evaluates math".to_string(),
            parameters_schema: serde_json::json!({"type": "object", "properties": {}}),
        }];
        let body = client.build_request_body(&[], Some(&tools));
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "calculator");
    }
}
