//! Coordinator (C5): owns the agent set, the shared project context, and
//! provider hot-swap.
//!
//! The Coordinator is deliberately unaware of [`crate::engine::loop_manager::AgentLoop`]s — it
//! only exposes the primitives (`process_user_request`, `switch_model`, the
//! pending/processing counters) the Loop Manager composes into a per-request
//! lifecycle (§4.5).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::engine::agent::AgentHandle;
use crate::engine::llm_client::{LLMClient, Provider};
use crate::engine::message::{AgentId, AgentMessage, MessageStatus, USER_DESTINATION};
use crate::engine::project_context::ProjectContext;
use crate::engine::router::Router;
use crate::engine::tool_protocol::ToolRegistry;
use crate::error::CoreError;

/// Construction parameters for a [`Coordinator`], already resolved from
/// [`crate::engine::config::AppConfig`] by the caller.
pub struct CoordinatorConfig {
    pub inbox_capacity: usize,
    pub outbox_capacity: usize,
    pub router_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 100,
            outbox_capacity: 100,
            router_capacity: crate::engine::router::ROUTER_CAPACITY_DEFAULT,
        }
    }
}

/// Owns the agent set, the router, the shared [`ProjectContext`], and the
/// active [`LLMClient`] (§4.5).
pub struct Coordinator {
    agents: HashMap<AgentId, AgentHandle>,
    router: Router,
    project_context: Arc<RwLock<ProjectContext>>,
    llm_client: Arc<LLMClient>,
    /// Shared with every spawned agent; `process_user_request` swaps in the
    /// calling loop's token so a `cancel_loop` is visible to every agent's
    /// next turn, not just the loop monitor (§4.6).
    loop_cancel: Arc<RwLock<CancellationToken>>,
}

impl Coordinator {
    /// Construct the agent set and wire every agent's outbox to a fresh
    /// router. `code_editing` and `react` get tool calling against
    /// `tool_registry`; the supervisor never executes tools itself (§4.3
    /// invariant) and runs without one.
    pub fn new(
        llm_client: Arc<LLMClient>,
        tool_registry: Arc<ToolRegistry>,
        project_context: ProjectContext,
        config: CoordinatorConfig,
    ) -> Self {
        let router = Router::new(config.router_capacity);
        let project_context = Arc::new(RwLock::new(project_context));
        let loop_cancel = Arc::new(RwLock::new(CancellationToken::new()));

        let mut agents = HashMap::new();
        for id in AgentId::ALL {
            let (tool_calling_enabled, registry) = match id {
                AgentId::Supervisor => (false, None),
                AgentId::CodeEditing | AgentId::React => (true, Some(tool_registry.clone())),
            };
            let handle = AgentHandle::spawn(
                id,
                tool_calling_enabled,
                llm_client.clone(),
                registry,
                project_context.clone(),
                router.clone(),
                config.inbox_capacity,
                config.outbox_capacity,
                loop_cancel.clone(),
            );
            agents.insert(id, handle);
        }

        Self { agents, router, project_context, llm_client, loop_cancel }
    }

    /// The router new agents' outboxes feed into; exposed so the streaming
    /// session layer can register as the `user` destination's listener.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Inject one `pending` message addressed to the supervisor (§4.5).
    ///
    /// `cancel` becomes the token every agent checks before its next LLM
    /// call for as long as this request's cascade is in flight; the caller
    /// (the Loop Manager) is expected to pass the same token it later cancels
    /// via `cancel_loop`.
    pub async fn process_user_request(
        &self,
        content: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<AgentMessage, CoreError> {
        *self.loop_cancel.write().await = cancel;

        let message = AgentMessage::new(
            USER_DESTINATION,
            AgentId::Supervisor.as_str(),
            "user_request",
            content,
        )
        .with_status(MessageStatus::Pending);
        self.agents
            .get(&AgentId::Supervisor)
            .expect("supervisor is always constructed")
            .receive(message.clone())?;
        Ok(message)
    }

    /// Atomically replace the active LLM backend (§4.5, §5): in-flight turns
    /// finish under the prior backend since every agent shares this same
    /// `Arc<LLMClient>` and `LLMClient::switch` swaps its internal pointer.
    pub async fn switch_model(&self, provider: Provider, model: &str) -> Result<(), CoreError> {
        self.llm_client.switch(provider, model).await
    }

    /// Sum of every inbox/outbox depth plus the router's own queue depth (§4.5).
    pub fn pending_messages_total(&self) -> usize {
        let agents_total: usize = self
            .agents
            .values()
            .map(|a| a.inbox_depth() + a.outbox_depth())
            .sum();
        agents_total + self.router.depth()
    }

    /// Count of agents with a turn in flight (§4.5).
    pub fn active_processing_count(&self) -> usize {
        self.agents.values().filter(|a| a.is_processing()).count()
    }

    /// §9 design note: the only way `ProjectContext` is mutated — no agent is
    /// ever handed a writable reference.
    pub async fn record_completed_task(&self, task_id: impl Into<String>) {
        self.project_context.write().await.record_completed_task(task_id);
    }

    pub async fn set_phase(&self, phase: impl Into<String>) {
        self.project_context.write().await.set_phase(phase);
    }

    pub async fn upsert_file(&self, file_path: impl Into<String>, content: impl Into<String>) {
        self.project_context.write().await.upsert_file(file_path, content);
    }

    /// A read-only snapshot of the shared project context.
    pub async fn project_snapshot(&self) -> ProjectContext {
        self.project_context.read().await.clone()
    }

    /// Stop every agent. Called by the Loop Manager/process shutdown path;
    /// does not wait for agents to drain (§5: the caller enforces the
    /// quiescence grace period before calling this).
    pub fn stop(&self) {
        for agent in self.agents.values() {
            agent.stop();
        }
        self.router.stop();
    }
}
