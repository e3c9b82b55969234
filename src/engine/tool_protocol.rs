//! Tool registry and executor.
//!
//! Tools are declared once (name, description, parameter schema) and executed
//! by name with a JSON argument map. Execution is synchronous from the
//! caller's perspective: an agent's turn awaits [`ToolRegistry::execute`]
//! before continuing.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentforge::engine::tool_protocol::ToolRegistry;
//! use agentforge::engine::tools::filesystem::{FileSystemTool, ReadFileTool};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let fs = Arc::new(FileSystemTool::new().with_root_path(std::env::temp_dir()));
//! let registry = ToolRegistry::new();
//! registry
//!     .register(Arc::new(ReadFileTool::new(fs)))
//!     .await
//!     .unwrap();
//! let _ = registry.list().await;
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Structured outcome of a single tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Declared identity of a tool: name, description, and parameter schema.
///
/// Tool names are unique within a [`ToolRegistry`]; registering the same name
/// twice with an identical schema is a no-op, with a different schema fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Render as a JSON Schema object (`{type: object, properties, required}`)
    /// suitable for [`crate::engine::client_wrapper::ToolDefinition::parameters_schema`].
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut entry = serde_json::Map::new();
            let type_name = match param.param_type {
                ToolParameterType::String => "string",
                ToolParameterType::Number => "number",
                ToolParameterType::Integer => "integer",
                ToolParameterType::Boolean => "boolean",
                ToolParameterType::Array => "array",
                ToolParameterType::Object => "object",
            };
            entry.insert("type".to_string(), serde_json::json!(type_name));
            if let Some(desc) = &param.description {
                entry.insert("description".to_string(), serde_json::json!(desc));
            }
            properties.insert(param.name.clone(), serde_json::Value::Object(entry));
            if param.required {
                required.push(param.name.clone());
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Outcome categories a tool may fail with; never carries payload content (P10).
#[derive(Debug)]
pub enum ToolError {
    UnknownTool(String),
    InvalidArguments(String),
    NotFound(String),
    PermissionDenied(String),
    AlreadyExists(String),
    Timeout(String),
    Network(String),
    Disk(String),
    Unknown(String),
}

impl ToolError {
    /// Short outcome-category label used in structured log records (P10).
    pub fn category(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::NotFound(_) => "not_found",
            ToolError::PermissionDenied(_) => "permission_denied",
            ToolError::AlreadyExists(_) => "already_exists",
            ToolError::Timeout(_) => "timeout",
            ToolError::Network(_) => "network",
            ToolError::Disk(_) => "disk",
            ToolError::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::UnknownTool(msg) => write!(f, "unknown tool: {}", msg),
            ToolError::InvalidArguments(msg) => write!(f, "invalid arguments: {}", msg),
            ToolError::NotFound(msg) => write!(f, "not found: {}", msg),
            ToolError::PermissionDenied(msg) => write!(f, "permission denied: {}", msg),
            ToolError::AlreadyExists(msg) => write!(f, "already exists: {}", msg),
            ToolError::Timeout(msg) => write!(f, "timed out: {}", msg),
            ToolError::Network(msg) => write!(f, "network error: {}", msg),
            ToolError::Disk(msg) => write!(f, "disk error: {}", msg),
            ToolError::Unknown(msg) => write!(f, "tool error: {}", msg),
        }
    }
}

impl std::error::Error for ToolError {}

/// A single executable tool: declares its own spec and executes its own calls.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn call(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError>;
}

/// In-process registry of [`Tool`] implementations, keyed by name.
///
/// Registration is idempotent by name (R2): re-registering an identical spec
/// is a no-op, registering a conflicting spec under the same name fails.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a tool. Returns `Err` only if a tool of the same name is
    /// already registered with a parameter schema that differs from this one.
    pub async fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let spec = tool.spec();
        let mut tools = self.tools.write().await;
        if let Some(existing) = tools.get(&spec.name) {
            let existing_spec = existing.spec();
            if existing_spec.parameters.len() == spec.parameters.len()
                && existing_spec
                    .parameters
                    .iter()
                    .zip(spec.parameters.iter())
                    .all(|(a, b)| a.name == b.name && a.param_type == b.param_type)
            {
                return Ok(());
            }
            return Err(ToolError::InvalidArguments(format!(
                "tool '{}' already registered with a different schema",
                spec.name
            )));
        }
        tools.insert(spec.name.clone(), tool);
        Ok(())
    }

    pub async fn list(&self) -> Vec<ToolSpec> {
        self.tools.read().await.values().map(|t| t.spec()).collect()
    }

    /// Execute a named tool call. Missing tools and schema-validation
    /// failures surface as `ToolError` before any side effect runs.
    ///
    /// Every invocation produces exactly one structured log record (§4.1,
    /// P10): execution id, tool name, the `path` argument if the tool
    /// declares one (an identifier, not content), elapsed time, outcome
    /// category, and result byte count — never argument values or tool
    /// output itself.
    pub async fn execute(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let execution_id = Uuid::new_v4();
        let path = arguments.get("path").and_then(|v| v.as_str()).map(str::to_string);
        let start = Instant::now();

        let outcome = self.execute_inner(tool_name, arguments).await;

        if log::log_enabled!(log::Level::Info) {
            let elapsed_ms = start.elapsed().as_millis();
            match &outcome {
                Ok(result) => {
                    let bytes = serde_json::to_vec(&result.output).map(|v| v.len()).unwrap_or(0);
                    log::info!(
                        "tool execution id={} tool={} path={:?} elapsed_ms={} outcome={} result_bytes={}",
                        execution_id,
                        tool_name,
                        path,
                        elapsed_ms,
                        if result.success { "success" } else { "failure" },
                        bytes,
                    );
                }
                Err(err) => {
                    log::info!(
                        "tool execution id={} tool={} path={:?} elapsed_ms={} outcome={} result_bytes=0",
                        execution_id,
                        tool_name,
                        path,
                        elapsed_ms,
                        err.category(),
                    );
                }
            }
        }

        outcome
    }

    async fn execute_inner(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let tool = {
            let tools = self.tools.read().await;
            tools
                .get(tool_name)
                .cloned()
                .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?
        };
        validate_arguments(&tool.spec(), &arguments)?;
        tool.call(arguments).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject missing required keys or wrong JSON types before any tool runs.
fn validate_arguments(spec: &ToolSpec, arguments: &serde_json::Value) -> Result<(), ToolError> {
    let obj = arguments.as_object();
    for param in &spec.parameters {
        let value = obj.and_then(|o| o.get(&param.name));
        match value {
            None if param.required => {
                return Err(ToolError::InvalidArguments(format!(
                    "missing required parameter '{}'",
                    param.name
                )));
            }
            None => continue,
            Some(v) => {
                let matches = match param.param_type {
                    ToolParameterType::String => v.is_string(),
                    ToolParameterType::Number => v.is_number(),
                    ToolParameterType::Integer => v.is_i64() || v.is_u64(),
                    ToolParameterType::Boolean => v.is_boolean(),
                    ToolParameterType::Array => v.is_array(),
                    ToolParameterType::Object => v.is_object(),
                };
                if !matches {
                    return Err(ToolError::InvalidArguments(format!(
                        "parameter '{}' has the wrong type",
                        param.name
                    )));
                }
            }
        }
    }
    Ok(())
}
