//! Inter-agent message envelope and the closed set of agent roles.
//!
//! [`AgentMessage`] is the only unit of communication between agents, the
//! router, and the streaming session layer. Nothing in this module is ever
//! persisted by the engine itself — a `PersistenceSink` (§6.2) may choose to
//! store a copy, but the in-memory value is the source of truth for a turn.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of agent roles the coordinator can construct.
///
/// `user` is not a variant here: it is a routing sentinel recognized by the
/// router (`to_agent == "user"`), not a runtime agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    Supervisor,
    CodeEditing,
    React,
}

impl AgentId {
    /// All agent roles the coordinator wires up by default.
    pub const ALL: [AgentId; 3] = [AgentId::Supervisor, AgentId::CodeEditing, AgentId::React];

    /// The string form used on the wire and in delegation directives.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Supervisor => "supervisor",
            AgentId::CodeEditing => "code_editing",
            AgentId::React => "react",
        }
    }

    /// Resolve a delegation target or router destination by name.
    ///
    /// Unknown names resolve to `None` and are logged and ignored by callers
    /// (§4.3 step 4) rather than treated as an error.
    pub fn from_str_loose(s: &str) -> Option<AgentId> {
        match s.trim() {
            "supervisor" => Some(AgentId::Supervisor),
            "code_editing" => Some(AgentId::CodeEditing),
            "react" => Some(AgentId::React),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The router's sentinel destination denoting the external caller.
pub const USER_DESTINATION: &str = "user";

/// Separator a turn's response body is joined with once tool calls ran
/// (§4.3 step 3): `response.text + TOOL_RESULTS_MARKER + joined_results`.
/// Shared between `agent.rs` (producer) and `session.rs` (consumer) so the
/// two stay in lockstep.
pub const TOOL_RESULTS_MARKER: &str = "\n\nTool Execution Results:\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A single inter-agent communication, routed by `to_agent`.
///
/// `to_agent`/`from_agent` are plain strings rather than `AgentId` so the
/// router can address the `user` sentinel uniformly alongside real agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub reply_to: Option<String>,
    pub from_agent: String,
    pub to_agent: String,
    pub task_type: String,
    pub content: String,
    pub data: HashMap<String, String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    /// Construct a new `pending` message with a fresh id and current timestamp.
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        task_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            reply_to: None,
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            task_type: task_type.into(),
            content: content.into(),
            data: HashMap::new(),
            status: MessageStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Build the `task_type + "_response"` reply this message's turn must emit
    /// back to `from_agent` (§4.3 step 5).
    pub fn reply(&self, from_agent: impl Into<String>, content: impl Into<String>, status: MessageStatus) -> Self {
        AgentMessage {
            id: Uuid::new_v4().to_string(),
            reply_to: Some(self.id.clone()),
            from_agent: from_agent.into(),
            to_agent: self.from_agent.clone(),
            task_type: format!("{}_response", self.task_type),
            content: content.into(),
            data: HashMap::new(),
            status,
            created_at: Utc::now(),
        }
    }
}
