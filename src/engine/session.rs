//! Streaming Session Layer (C7): projects router emissions addressed to
//! `user` onto a framed wire protocol shared by the `server` (WebSocket) and
//! `cli` (stdout) entrypoints (§4.7, §6.1).
//!
//! A [`StreamingSession`] registers an `mpsc` channel with the
//! [`crate::engine::router::Router`] as the `user` listener and runs a
//! background task that translates each arriving [`AgentMessage`] into one
//! or more [`Frame`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::coordinator::Coordinator;
use crate::engine::loop_manager::{LoopManager, LoopStatus};
use crate::engine::message::{AgentMessage, MessageStatus, TOOL_RESULTS_MARKER, USER_DESTINATION};
use crate::error::CoreError;

/// The closed frame-type vocabulary (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Connection,
    Status,
    Progress,
    AgentResponse,
    AgentChunk,
    ToolCall,
    ToolResult,
    MessageReceived,
    ResponseComplete,
    Completion,
    Cancelled,
    Error,
    Debug,
}

/// One outbound wire message (§6.1). Optional fields are omitted from the
/// serialized JSON rather than emitted as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Frame {
    fn new(session_id: &str, project_id: &Option<String>, frame_type: FrameType) -> Self {
        Frame {
            frame_type,
            content: None,
            session_id: session_id.to_string(),
            project_id: project_id.clone(),
            timestamp: Utc::now(),
            status: None,
            progress: None,
            agent_type: None,
            metadata: None,
        }
    }

    fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = Some(agent_type.into());
        self
    }

    fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Client → server input (§6.1). `message` is required and non-empty.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientInput {
    pub message: String,
    pub session_id: Option<String>,
    pub project_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Split an agent reply body into its conversational text and, if present,
/// the tool-results block appended by the agent runtime (`agent.rs`).
fn split_tool_results(content: &str) -> (&str, Option<&str>) {
    match content.find(TOOL_RESULTS_MARKER) {
        Some(idx) => (&content[..idx], Some(&content[idx + TOOL_RESULTS_MARKER.len()..])),
        None => (content, None),
    }
}

/// Translate one router-delivered [`AgentMessage`] into the frame(s) a client
/// sees. `tool_call`/`tool_result` are the agent runtime's dedicated
/// observer messages (`agent.rs`) and map one-to-one; anything else is a
/// conversational reply, still split on the legacy tool-results marker for
/// any message that embeds one.
fn translate_message(session_id: &str, project_id: &Option<String>, message: &AgentMessage) -> Vec<Frame> {
    match message.task_type.as_str() {
        "tool_call" => {
            let metadata = serde_json::json!({
                "tool_name": message.data.get("tool_name"),
                "arguments": message.data.get("arguments").and_then(|a| serde_json::from_str::<serde_json::Value>(a).ok()),
            });
            vec![
                Frame::new(session_id, project_id, FrameType::ToolCall)
                    .with_content(message.content.clone())
                    .with_agent_type(message.from_agent.clone())
                    .with_metadata(metadata),
            ]
        }
        "tool_result" => {
            let metadata = serde_json::json!({ "tool_name": message.data.get("tool_name") });
            vec![
                Frame::new(session_id, project_id, FrameType::ToolResult)
                    .with_content(message.content.clone())
                    .with_status(if message.status == MessageStatus::Failed { "failed" } else { "completed" })
                    .with_agent_type(message.from_agent.clone())
                    .with_metadata(metadata),
            ]
        }
        _ => {
            let mut frames = Vec::new();
            let (text, tool_results) = split_tool_results(&message.content);

            if !text.trim().is_empty() {
                frames.push(
                    Frame::new(session_id, project_id, FrameType::AgentResponse)
                        .with_content(text.trim())
                        .with_agent_type(message.from_agent.clone()),
                );
            }

            if let Some(results) = tool_results {
                frames.push(
                    Frame::new(session_id, project_id, FrameType::ToolResult)
                        .with_content(results.trim())
                        .with_agent_type(message.from_agent.clone()),
                );
            }

            frames
        }
    }
}

const SYNTHETIC_PROGRESS_LADDER: [u8; 5] = [20, 40, 60, 80, 95];

/// One open client connection bound to a project (§4.7).
pub struct StreamingSession {
    pub session_id: String,
    project_id: Option<String>,
    coordinator: Arc<Coordinator>,
    loop_manager: Arc<LoopManager>,
    bound_request_id: RwLock<Option<String>>,
    outbound_tx: mpsc::Sender<Frame>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl StreamingSession {
    /// Open a session: registers this session's channel as the router's
    /// `user` listener and emits the initial `connection` frame.
    ///
    /// Only one session may be bound to a given `Coordinator`/`Router` pair
    /// at a time (the router holds a single global `user` listener slot) —
    /// callers run one `StreamingSession` per `Coordinator` instance.
    pub async fn open(
        project_id: Option<String>,
        coordinator: Arc<Coordinator>,
        loop_manager: Arc<LoopManager>,
        outbound_capacity: usize,
    ) -> (Arc<StreamingSession>, mpsc::Receiver<Frame>) {
        let session_id = Uuid::new_v4().to_string();
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity);

        let session = Arc::new(StreamingSession {
            session_id: session_id.clone(),
            project_id,
            coordinator,
            loop_manager,
            bound_request_id: RwLock::new(None),
            outbound_tx,
            closed: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        });

        let _ = session
            .outbound_tx
            .send(Frame::new(&session.session_id, &session.project_id, FrameType::Connection).with_status("connected"))
            .await;

        let (router_tx, router_rx) = mpsc::channel(outbound_capacity);
        session.coordinator.router().register_user_listener(router_tx).await;
        tokio::spawn(forward_router_messages(session.clone(), router_rx));
        tokio::spawn(forward_loop_results(session.clone()));

        (session, outbound_rx)
    }

    /// Handle one client input (§4.7 behavior list).
    ///
    /// An empty `message` is rejected here, at the session layer, with
    /// `invalid_arguments`: an `error` frame is emitted and no loop is
    /// created (boundary behavior, §8).
    pub async fn handle_client_input(&self, input: ClientInput) -> Result<(), CoreError> {
        if input.message.trim().is_empty() {
            let err = CoreError::new(crate::error::ErrorKind::InvalidArguments, "message must not be empty");
            let _ = self
                .outbound_tx
                .send(
                    Frame::new(&self.session_id, &self.project_id, FrameType::Error)
                        .with_content(err.to_string()),
                )
                .await;
            return Err(err);
        }

        let _ = self
            .outbound_tx
            .send(Frame::new(&self.session_id, &self.project_id, FrameType::MessageReceived).with_content(input.message.clone()))
            .await;

        let request_id = {
            let mut bound = self.bound_request_id.write().await;
            match bound.as_ref() {
                Some(id) => id.clone(),
                None => {
                    let new_id = Uuid::new_v4().to_string();
                    *bound = Some(new_id.clone());
                    new_id
                }
            }
        };

        self.loop_manager.start_loop(request_id.clone(), input.message).await?;

        let _ = self
            .outbound_tx
            .send(
                Frame::new(&self.session_id, &self.project_id, FrameType::Status)
                    .with_status("processing")
                    .with_progress(10),
            )
            .await;

        tokio::spawn(synthetic_progress_ladder(
            self.outbound_tx.clone(),
            self.session_id.clone(),
            self.project_id.clone(),
            self.closed.clone(),
        ));

        Ok(())
    }

    /// Disconnect: cancel the bound loop (if any), unregister from the
    /// router, and stop forwarding.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(request_id) = self.bound_request_id.read().await.as_ref() {
            let _ = self.loop_manager.cancel_loop(request_id).await;
        }
        self.coordinator.router().unregister_user_listener().await;
        self.cancel.cancel();
    }
}

async fn synthetic_progress_ladder(
    outbound_tx: mpsc::Sender<Frame>,
    session_id: String,
    project_id: Option<String>,
    closed: Arc<AtomicBool>,
) {
    for step in SYNTHETIC_PROGRESS_LADDER {
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        if closed.load(Ordering::SeqCst) {
            return;
        }
        let frame = Frame::new(&session_id, &project_id, FrameType::Progress).with_progress(step);
        if outbound_tx.send(frame).await.is_err() {
            return;
        }
    }
}

async fn forward_router_messages(session: Arc<StreamingSession>, mut router_rx: mpsc::Receiver<AgentMessage>) {
    while let Some(message) = router_rx.recv().await {
        if message.to_agent != USER_DESTINATION {
            continue;
        }
        for frame in translate_message(&session.session_id, &session.project_id, &message) {
            if session.outbound_tx.send(frame).await.is_err() {
                return;
            }
        }
        if session.closed.load(Ordering::SeqCst) {
            return;
        }
    }
}

async fn forward_loop_results(session: Arc<StreamingSession>) {
    let mut results = session.loop_manager.results_stream();
    loop {
        let result = tokio::select! {
            _ = session.cancel.cancelled() => return,
            r = results.recv() => match r {
                Ok(r) => r,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            },
        };

        let bound = session.bound_request_id.read().await.clone();
        if bound.as_deref() != Some(result.request_id.as_str()) {
            continue;
        }

        let terminal_frame_type = match result.status {
            LoopStatus::Completed => FrameType::Completion,
            LoopStatus::Cancelled => FrameType::Cancelled,
            LoopStatus::TimedOut => FrameType::Error,
        };
        let mut frame = Frame::new(&session.session_id, &session.project_id, terminal_frame_type);
        if let Some(error) = &result.error {
            frame = frame.with_content(error.clone());
        }
        if session.outbound_tx.send(frame).await.is_err() {
            return;
        }

        if result.status == LoopStatus::Completed {
            let complete = Frame::new(&session.session_id, &session.project_id, FrameType::ResponseComplete)
                .with_progress(100);
            if session.outbound_tx.send(complete).await.is_err() {
                return;
            }
        }

        *session.bound_request_id.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_tool_results_separates_body_from_appended_block() {
        let content = "here is the answer\n\nTool Execution Results:\nread_file: {}";
        let (text, tools) = split_tool_results(content);
        assert_eq!(text, "here is the answer");
        assert_eq!(tools, Some("read_file: {}"));
    }

    #[test]
    fn split_tool_results_is_a_no_op_without_the_marker() {
        let content = "plain reply with no tools";
        let (text, tools) = split_tool_results(content);
        assert_eq!(text, content);
        assert!(tools.is_none());
    }

    #[test]
    fn frame_serialization_omits_absent_optional_fields() {
        let frame = Frame::new("session-1", &None, FrameType::Connection).with_status("connected");
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("content").is_none());
        assert!(json.get("project_id").is_none());
        assert_eq!(json.get("status").unwrap(), "connected");
        assert_eq!(json.get("type").unwrap(), "connection");
    }

    #[test]
    fn translate_message_emits_both_text_and_tool_result_frames() {
        let message = AgentMessage::new(
            "supervisor",
            "user",
            "user_request_response",
            "summary text\n\nTool Execution Results:\nread_file: {\"ok\":true}",
        );
        let frames = translate_message("sess", &None, &message);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].frame_type, FrameType::AgentResponse);
        assert_eq!(frames[1].frame_type, FrameType::ToolResult);
    }

    #[test]
    fn a_tool_call_observer_message_becomes_a_tool_call_frame() {
        let message = AgentMessage::new("code_editing", "user", "tool_call", "write_file")
            .with_status(MessageStatus::InProgress)
            .with_data("tool_name", "write_file")
            .with_data("arguments", "{\"path\":\"hello.txt\"}");
        let frames = translate_message("sess", &None, &message);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::ToolCall);
        assert_eq!(frames[0].agent_type.as_deref(), Some("code_editing"));
        assert_eq!(frames[0].metadata.as_ref().unwrap()["tool_name"], "write_file");
    }

    #[test]
    fn a_failed_tool_result_observer_message_carries_a_failed_status() {
        let message = AgentMessage::new("code_editing", "user", "tool_result", "permission_denied")
            .with_status(MessageStatus::Failed)
            .with_data("tool_name", "write_file");
        let frames = translate_message("sess", &None, &message);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::ToolResult);
        assert_eq!(frames[0].status.as_deref(), Some("failed"));
    }

    async fn test_stack() -> (Arc<Coordinator>, Arc<LoopManager>) {
        use crate::engine::config::ProviderCredentials;
        use crate::engine::coordinator::CoordinatorConfig;
        use crate::engine::llm_client::{LLMClient, Provider};
        use crate::engine::loop_manager::LoopManagerConfig;
        use crate::engine::project_context::ProjectContext;
        use crate::engine::tool_protocol::ToolRegistry;
        use std::path::PathBuf;
        use std::time::Duration;

        let llm_client = Arc::new(
            LLMClient::new(
                Provider::Local,
                "test-model",
                ProviderCredentials {
                    self_hosted_endpoint: Some("http://127.0.0.1:1".to_string()),
                    ..Default::default()
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap(),
        );
        let registry = Arc::new(ToolRegistry::new());
        let ctx = ProjectContext::new("demo", PathBuf::from("/tmp/demo"));
        let coordinator = Arc::new(Coordinator::new(llm_client, registry, ctx, CoordinatorConfig::default()));
        let loop_manager = Arc::new(LoopManager::new(coordinator.clone(), LoopManagerConfig::default()));
        (coordinator, loop_manager)
    }

    #[tokio::test]
    async fn an_empty_message_is_rejected_without_creating_a_loop() {
        let (coordinator, loop_manager) = test_stack().await;
        let (session, mut outbound_rx) = StreamingSession::open(None, coordinator, loop_manager.clone(), 16).await;

        // Drain the initial `connection` frame.
        let connection = outbound_rx.recv().await.unwrap();
        assert_eq!(connection.frame_type, FrameType::Connection);

        let result = session
            .handle_client_input(ClientInput { message: "   ".to_string(), session_id: None, project_id: None, timestamp: None })
            .await;
        assert!(result.is_err());

        let frame = outbound_rx.recv().await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Error);
        assert!(frame.content.unwrap().contains("invalid_arguments"));

        assert!(loop_manager.active_loops().await.is_empty());

        session.close().await;
    }
}
