//! AWS-managed provider: Bedrock Runtime for llama- and titan-family models.
//!
//! Authenticates and transports through `aws-sdk-bedrockruntime` rather than
//! hand-rolled SigV4 (§4.2). Two wire families are supported, selected once
//! at construction, matching the distinct request/response shapes Bedrock
//! exposes per model family:
//!
//! - llama: `{prompt, max_gen_len, temperature, top_p}`
//! - titan: `{inputText, textGenerationConfig:{maxTokenCount, temperature, topP}}`

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_bedrockruntime::primitives::Blob;
use tokio::sync::Mutex;

use crate::client_wrapper::{ClientWrapper, Message, Role, TokenUsage, ToolDefinition};

/// Which Bedrock wire format to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Llama,
    Titan,
}

/// Client wrapper for AWS Bedrock Runtime's `invoke_model` API.
pub struct AwsBedrockClient {
    client: aws_sdk_bedrockruntime::Client,
    model_id: String,
    family: ModelFamily,
    max_gen_len: u32,
    temperature: f32,
    top_p: f32,
    usage: Mutex<Option<TokenUsage>>,
}

impl AwsBedrockClient {
    /// Build a client from an already-resolved AWS SDK config (region,
    /// credentials resolved via the standard provider chain upstream).
    pub fn new(sdk_config: &aws_config::SdkConfig, model_id: impl Into<String>, family: ModelFamily) -> Self {
        Self {
            client: aws_sdk_bedrockruntime::Client::new(sdk_config),
            model_id: model_id.into(),
            family,
            max_gen_len: 512,
            temperature: 0.7,
            top_p: 0.9,
            usage: Mutex::new(None),
        }
    }

    pub fn with_max_gen_len(mut self, max_gen_len: u32) -> Self {
        self.max_gen_len = max_gen_len;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    /// Flatten the message list into a single prompt string.
    ///
    /// Both llama and titan completion APIs take one prompt field rather
    /// than a structured message array, so system/user/assistant turns are
    /// concatenated in order with a role label.
    fn flatten_prompt(messages: &[Message]) -> String {
        messages
            .iter()
            .map(|msg| {
                let label = match &msg.role {
                    Role::System => "System",
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                    Role::Tool { .. } => "Tool",
                };
                format!("{}: {}", label, msg.content.as_ref())
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn build_body(&self, prompt: &str) -> serde_json::Value {
        match self.family {
            ModelFamily::Llama => serde_json::json!({
                "prompt": prompt,
                "max_gen_len": self.max_gen_len,
                "temperature": self.temperature,
                "top_p": self.top_p,
            }),
            ModelFamily::Titan => serde_json::json!({
                "inputText": prompt,
                "textGenerationConfig": {
                    "maxTokenCount": self.max_gen_len,
                    "temperature": self.temperature,
                    "topP": self.top_p,
                }
            }),
        }
    }

    fn parse_response(&self, body: &[u8]) -> Result<(String, Option<(usize, usize)>), Box<dyn Error>> {
        let parsed: serde_json::Value = serde_json::from_slice(body)?;
        match self.family {
            ModelFamily::Llama => {
                let text = parsed
                    .get("generation")
                    .and_then(|g| g.as_str())
                    .unwrap_or_default()
                    .to_string();
                let input = parsed.get("prompt_token_count").and_then(|v| v.as_u64());
                let output = parsed.get("generation_token_count").and_then(|v| v.as_u64());
                let usage = match (input, output) {
                    (Some(i), Some(o)) => Some((i as usize, o as usize)),
                    _ => None,
                };
                Ok((text, usage))
            }
            ModelFamily::Titan => {
                let text = parsed
                    .get("results")
                    .and_then(|r| r.get(0))
                    .and_then(|r| r.get("outputText"))
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string();
                let input = parsed.get("inputTextTokenCount").and_then(|v| v.as_u64());
                let output = parsed
                    .get("results")
                    .and_then(|r| r.get(0))
                    .and_then(|r| r.get("tokenCount"))
                    .and_then(|v| v.as_u64());
                let usage = match (input, output) {
                    (Some(i), Some(o)) => Some((i as usize, o as usize)),
                    _ => None,
                };
                Ok((text, usage))
            }
        }
    }

    async fn invoke(&self, messages: &[Message]) -> Result<Message, Box<dyn Error>> {
        let prompt = Self::flatten_prompt(messages);
        let body = self.build_body(&prompt);
        let body_bytes = serde_json::to_vec(&body)?;

        let resp = self
            .client
            .invoke_model()
            .model_id(&self.model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body_bytes))
            .send()
            .await
            .map_err(|e| -> Box<dyn Error> { Box::new(e.into_service_error()) })?;

        let (text, usage) = self.parse_response(resp.body.as_ref())?;
        if let Some((input, output)) = usage {
            *self.usage.lock().await = Some(TokenUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            });
        }

        Ok(Message { role: Role::Assistant, content: Arc::from(text.as_str()), tool_calls: vec![] })
    }
}

#[async_trait]
impl ClientWrapper for AwsBedrockClient {
    async fn send_message(
        &self,
        messages: &[Message],
        _tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error>> {
        match self.invoke(messages).await {
            Ok(msg) => Ok(msg),
            Err(e) => {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("AwsBedrockClient::send_message(...): {}", e);
                }
                Err(e)
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}
