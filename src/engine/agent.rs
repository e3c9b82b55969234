//! Agent runtime (C3): role identity, system prompt, inbox/outbox, and the
//! per-message turn.
//!
//! An [`Agent`] is constructed once per role and then driven by a long-lived
//! [`AgentHandle::spawn`] task: pull one message off the inbox, run a turn
//! (prompt assembly → LLM call → optional tool execution → optional
//! delegation → reply), push the outgoing message(s) onto the outbox. The
//! outbox is drained into the shared [`Router`] by a small forwarding task so
//! an agent never talks to another agent directly (§9 design note on
//! breaking the agent↔coordinator↔router cycle).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::client_wrapper::ToolDefinition;
use crate::engine::llm_client::{LLMClient, LLMRequest};
use crate::engine::message::{AgentId, AgentMessage, MessageStatus, TOOL_RESULTS_MARKER, USER_DESTINATION};
use crate::engine::project_context::ProjectContext;
use crate::engine::router::Router;
use crate::engine::tool_protocol::{ToolRegistry, ToolSpec};
use crate::error::{CoreError, ErrorKind};

impl AgentId {
    /// The system prompt loaded once at construction for this role (§4.3 step 1).
    pub fn default_system_prompt(&self) -> &'static str {
        match self {
            AgentId::Supervisor => {
                "You are the supervisor agent of a code-generation platform. You receive \
                 user requests and either answer directly or delegate focused tasks to \
                 specialized agents. To delegate, include three lines in your response: \
                 `DELEGATE_TO: <agent>`, `TASK: <short task id>`, `INSTRUCTIONS: <what to do>`. \
                 Only delegate to a known agent; otherwise answer the user directly."
            }
            AgentId::CodeEditing => {
                "You are the code-editing agent. You read and write files in the project \
                 using the tools available to you to satisfy the instructions you are given."
            }
            AgentId::React => {
                "You are the react agent. You write and modify React/frontend code in the \
                 project using the tools available to you to satisfy the instructions you \
                 are given."
            }
        }
    }

    /// Whether this role parses delegation directives out of its own turns
    /// (§4.3 step 4). Only the supervisor does; other agents never emit
    /// delegations (§4.3 invariants).
    pub fn parses_delegations(&self) -> bool {
        matches!(self, AgentId::Supervisor)
    }
}

/// A structured delegation directive extracted from the supervisor's free-form
/// output (§4.3 step 4, §9 redesign flag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delegation {
    pub to_agent: AgentId,
    pub task: String,
    pub instructions: String,
}

/// Outcome of scanning a turn's response text for delegation directives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DelegationScan {
    /// No `DELEGATE_TO`/`TASK` pair was found.
    None,
    /// `DELEGATE_TO` named a target outside the closed agent set.
    UnknownTarget(String),
    Found(Delegation),
}

/// Strip the `**…**` emphasis markers a supervisor's output may wrap a
/// directive line in, leaving the plain `KEY: value` form underneath.
fn strip_emphasis(line: &str) -> String {
    line.replace("**", "")
}

/// Locate `key` as a directive on `line` in any of the three surface
/// syntaxes (§9 redesign flag):
///   - plain: `KEY: value`
///   - emphasized: `**KEY:** value` or `**KEY**: value`
///   - JSON field: `"KEY": "value"` (optionally wrapped in `{}`/trailing `,`)
/// Returns the value text running to end-of-line, untouched by further
/// colon-splitting (so `INSTRUCTIONS: create a file: hello.txt` keeps its
/// embedded colon).
fn extract_directive(line: &str, key: &str) -> Option<String> {
    let normalized = strip_emphasis(line.trim());

    let quoted_key = format!("\"{}\"", key);
    if let Some(key_pos) = normalized.find(&quoted_key) {
        let rest = normalized[key_pos + quoted_key.len()..].trim_start();
        let rest = rest.strip_prefix(':')?.trim_start();
        let rest = rest.strip_prefix('"')?;
        let end = rest.find('"')?;
        return Some(rest[..end].to_string());
    }

    if let Some(key_pos) = normalized.find(key) {
        let before_is_boundary = key_pos == 0
            || !normalized.as_bytes()[key_pos - 1].is_ascii_alphanumeric();
        if before_is_boundary {
            let rest = &normalized[key_pos + key.len()..];
            if let Some(rest) = rest.trim_start().strip_prefix(':') {
                return Some(rest.trim().to_string());
            }
        }
    }
    None
}

/// Scan `text` line by line for the three optional directive lines, in any
/// order, tolerating all three surface syntaxes (§4.3 step 4).
fn scan_delegation(text: &str) -> DelegationScan {
    let mut delegate_to: Option<String> = None;
    let mut task: Option<String> = None;
    let mut instructions: Option<String> = None;

    for line in text.lines() {
        if delegate_to.is_none() {
            if let Some(v) = extract_directive(line, "DELEGATE_TO") {
                delegate_to = Some(v);
                continue;
            }
        }
        if task.is_none() {
            if let Some(v) = extract_directive(line, "TASK") {
                task = Some(v);
                continue;
            }
        }
        if instructions.is_none() {
            if let Some(v) = extract_directive(line, "INSTRUCTIONS") {
                instructions = Some(v);
                continue;
            }
        }
    }

    let (Some(target), Some(task)) = (delegate_to, task) else {
        return DelegationScan::None;
    };
    match AgentId::from_str_loose(&target) {
        Some(to_agent) => DelegationScan::Found(Delegation {
            to_agent,
            task,
            instructions: instructions.unwrap_or_default(),
        }),
        None => DelegationScan::UnknownTarget(target),
    }
}

fn tool_definition(spec: &ToolSpec) -> ToolDefinition {
    ToolDefinition {
        name: spec.name.clone(),
        description: spec.description.clone(),
        parameters_schema: spec.to_json_schema(),
    }
}

/// A role-scoped worker: owns its identity and turn logic. Spawned via
/// [`AgentHandle::spawn`], which wires its inbox/outbox to the shared
/// [`Router`] and returns a cheap handle the [`crate::engine::coordinator::Coordinator`]
/// keeps.
pub struct Agent {
    id: AgentId,
    system_prompt: String,
    tool_calling_enabled: bool,
    llm_client: Arc<LLMClient>,
    tool_registry: Option<Arc<ToolRegistry>>,
    project_context: Arc<RwLock<ProjectContext>>,
    /// The cancellation token of whichever loop is currently driving this
    /// agent, swapped in by [`crate::engine::coordinator::Coordinator::process_user_request`]
    /// before a turn is injected. Checked around the LLM call so a
    /// `cancel_loop` call stops in-flight and queued turns alike, not just
    /// the loop monitor (§4.6).
    loop_cancel: Arc<RwLock<CancellationToken>>,
}

impl Agent {
    fn new(
        id: AgentId,
        tool_calling_enabled: bool,
        llm_client: Arc<LLMClient>,
        tool_registry: Option<Arc<ToolRegistry>>,
        project_context: Arc<RwLock<ProjectContext>>,
        loop_cancel: Arc<RwLock<CancellationToken>>,
    ) -> Self {
        Self {
            id,
            system_prompt: id.default_system_prompt().to_string(),
            tool_calling_enabled,
            llm_client,
            tool_registry,
            project_context,
            loop_cancel,
        }
    }

    /// Run one turn (§4.3): prompt assembly, LLM call, tool execution,
    /// delegation parsing (supervisor only), reply emission. Returns every
    /// message the turn emits; a turn always emits at least the reply.
    async fn run_turn(&self, incoming: &AgentMessage) -> Vec<AgentMessage> {
        let snapshot = self.project_context.read().await.render_snapshot();

        let mut data_entries: Vec<_> = incoming.data.iter().collect();
        data_entries.sort_by(|a, b| a.0.cmp(b.0));
        let data_rendered = data_entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");

        let prompt = format!(
            "{system_prompt}\n\n{snapshot}\n---\nIncoming message:\ntask_type: {task_type}\nfrom_agent: {from_agent}\ncontent: {content}\ndata: {{{data}}}\n",
            system_prompt = self.system_prompt,
            snapshot = snapshot,
            task_type = incoming.task_type,
            from_agent = incoming.from_agent,
            content = incoming.content,
            data = data_rendered,
        );

        let mut request = LLMRequest::new(prompt);
        if self.tool_calling_enabled {
            if let Some(registry) = &self.tool_registry {
                let specs = registry.list().await;
                request = request.with_tools(specs.iter().map(tool_definition).collect());
            }
        }

        let cancel = self.loop_cancel.read().await.clone();
        let response = tokio::select! {
            _ = cancel.cancelled() => {
                log::info!(
                    "agent {}: turn dropped, message_id={} loop cancelled before the LLM call",
                    self.id,
                    incoming.id
                );
                return Vec::new();
            }
            result = self.llm_client.generate(request) => match result {
                Ok(r) => r,
                Err(e) => {
                    log::warn!(
                        "agent {}: turn failed, message_id={} kind={}",
                        self.id,
                        incoming.id,
                        e.kind
                    );
                    return vec![incoming.reply(
                        self.id.as_str(),
                        format!("turn failed: {}", e),
                        MessageStatus::Failed,
                    )];
                }
            },
        };

        let mut outgoing = Vec::new();

        if self.id.parses_delegations() {
            match scan_delegation(&response.text) {
                DelegationScan::Found(d) => {
                    outgoing.push(AgentMessage::new(
                        self.id.as_str(),
                        d.to_agent.as_str(),
                        d.task,
                        d.instructions,
                    ));
                }
                DelegationScan::UnknownTarget(target) => {
                    log::warn!(
                        "agent {}: delegation targets unknown agent {:?}, ignoring",
                        self.id,
                        target
                    );
                }
                DelegationScan::None => {}
            }
        }

        // Every tool call is surfaced to the user directly, in execution
        // order, regardless of which agent ran it (§4.7 tool_call/tool_result
        // frames; §9 design note on specialized agents being observable even
        // though they structurally reply to whoever delegated to them), and
        // its rendered result is also accumulated so the turn's reply body
        // can carry the full, untruncated "Tool Execution Results:" section
        // the invariants in §4.3 require (never just the raw LLM text).
        let mut tool_result_sections = Vec::new();
        for call in &response.tool_calls {
            let arguments = serde_json::to_string(&call.arguments).unwrap_or_else(|_| "{}".to_string());
            outgoing.push(
                AgentMessage::new(self.id.as_str(), USER_DESTINATION, "tool_call", call.function_name.clone())
                    .with_status(MessageStatus::InProgress)
                    .with_data("tool_name", call.function_name.clone())
                    .with_data("arguments", arguments),
            );

            let (status, rendered) = match &self.tool_registry {
                Some(registry) => match registry.execute(&call.function_name, call.arguments.clone()).await {
                    Ok(result) => {
                        (MessageStatus::Completed, serde_json::to_string(&result).unwrap_or_else(|_| "{}".to_string()))
                    }
                    Err(err) => (MessageStatus::Failed, format!("error: {}", err)),
                },
                None => (MessageStatus::Failed, "error: no tool registry configured for this agent".to_string()),
            };

            tool_result_sections.push(format!("{}: {}", call.function_name, rendered));

            outgoing.push(
                AgentMessage::new(self.id.as_str(), USER_DESTINATION, "tool_result", rendered)
                    .with_status(status)
                    .with_data("tool_name", call.function_name.clone()),
            );
        }

        // §4.3 step 3: once any tool ran, the turn's response body becomes
        // `response.text + "\n\nTool Execution Results:\n" + joined_results`,
        // in emission order, never truncated (§4.3 invariants).
        let reply_text = if tool_result_sections.is_empty() {
            response.text.clone()
        } else {
            format!("{}{}{}", response.text, TOOL_RESULTS_MARKER, tool_result_sections.join("\n"))
        };

        // A specialized agent's structural reply targets whoever delegated
        // to it, not the user, so its text would otherwise never reach the
        // streaming session. Mirror it straight to the user alongside that
        // reply.
        if self.id != AgentId::Supervisor && !reply_text.trim().is_empty() {
            outgoing.push(
                AgentMessage::new(
                    self.id.as_str(),
                    USER_DESTINATION,
                    format!("{}_response", incoming.task_type),
                    reply_text.clone(),
                )
                .with_status(MessageStatus::Completed),
            );
        }

        outgoing.push(incoming.reply(self.id.as_str(), reply_text, MessageStatus::Completed));
        outgoing
    }
}

/// Handle to a spawned agent: the only surface the [`crate::engine::coordinator::Coordinator`]
/// touches. Cheaply cloneable.
#[derive(Clone)]
pub struct AgentHandle {
    pub id: AgentId,
    inbox_tx: mpsc::Sender<AgentMessage>,
    outbox_tx: mpsc::Sender<AgentMessage>,
    inbox_capacity: usize,
    outbox_capacity: usize,
    processing: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl AgentHandle {
    /// Construct the agent, wire its outbox to `router`, register its inbox
    /// with `router`, and spawn its long-lived `run` task plus the outbox
    /// forwarder. Returns immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        id: AgentId,
        tool_calling_enabled: bool,
        llm_client: Arc<LLMClient>,
        tool_registry: Option<Arc<ToolRegistry>>,
        project_context: Arc<RwLock<ProjectContext>>,
        router: Router,
        inbox_capacity: usize,
        outbox_capacity: usize,
        loop_cancel: Arc<RwLock<CancellationToken>>,
    ) -> AgentHandle {
        let (inbox_tx, inbox_rx) = mpsc::channel(inbox_capacity);
        let (outbox_tx, outbox_rx) = mpsc::channel(outbox_capacity);
        let processing = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let agent = Agent::new(id, tool_calling_enabled, llm_client, tool_registry, project_context, loop_cancel);

        let registration_router = router.clone();
        let registration_inbox = inbox_tx.clone();
        tokio::spawn(async move {
            registration_router.register_agent(id, registration_inbox).await;
        });

        tokio::spawn(forward_outbox(id, outbox_rx, router, cancel.clone()));
        tokio::spawn(run(agent, inbox_rx, outbox_tx.clone(), processing.clone(), cancel.clone()));

        AgentHandle {
            id,
            inbox_tx,
            outbox_tx,
            inbox_capacity,
            outbox_capacity,
            processing,
            cancel,
        }
    }

    /// Non-blocking enqueue into this agent's inbox (§4.3 public contract).
    pub fn receive(&self, message: AgentMessage) -> Result<(), CoreError> {
        self.inbox_tx.try_send(message).map_err(|_| {
            CoreError::new(ErrorKind::InboxSaturated, format!("{} inbox is full", self.id))
        })
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn inbox_depth(&self) -> usize {
        self.inbox_capacity.saturating_sub(self.inbox_tx.capacity())
    }

    pub fn outbox_depth(&self) -> usize {
        self.outbox_capacity.saturating_sub(self.outbox_tx.capacity())
    }

    /// Signal the agent to drain its remaining inbox and exit after the
    /// turn it is currently running, if any (§4.3 public contract).
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

async fn run(
    agent: Agent,
    mut inbox_rx: mpsc::Receiver<AgentMessage>,
    outbox_tx: mpsc::Sender<AgentMessage>,
    processing: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let message = if cancel.is_cancelled() {
            match inbox_rx.try_recv() {
                Ok(m) => m,
                Err(_) => break,
            }
        } else {
            tokio::select! {
                _ = cancel.cancelled() => continue,
                maybe = inbox_rx.recv() => match maybe {
                    Some(m) => m,
                    None => break,
                },
            }
        };

        processing.store(true, Ordering::SeqCst);
        let start = Instant::now();
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "agent {}: turn start message_id={} task_type={}",
                agent.id,
                message.id,
                message.task_type
            );
        }

        let outgoing = agent.run_turn(&message).await;

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "agent {}: turn end message_id={} elapsed_ms={}",
                agent.id,
                message.id,
                start.elapsed().as_millis()
            );
        }

        for out in outgoing {
            if outbox_tx.try_send(out).is_err() {
                log::warn!("agent {}: outbox saturated, dropping outgoing message", agent.id);
            }
        }
        processing.store(false, Ordering::SeqCst);
    }
}

async fn forward_outbox(
    id: AgentId,
    mut outbox_rx: mpsc::Receiver<AgentMessage>,
    router: Router,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                match outbox_rx.try_recv() {
                    Ok(m) => m,
                    Err(_) => break,
                }
            }
            maybe = outbox_rx.recv() => match maybe {
                Some(m) => m,
                None => break,
            },
        };
        if let Err(e) = router.submit(message) {
            log::warn!("agent {}: {}", id, e);
        }
    }
}
