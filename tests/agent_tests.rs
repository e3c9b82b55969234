//! Black-box tests for the agent runtime (§4.3): a spawned [`AgentHandle`]
//! driven purely through its public inbox/outbox surface and the shared
//! [`Router`], with a scripted [`ClientWrapper`] standing in for a real
//! provider so no network call is ever made.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentforge::engine::agent::AgentHandle;
use agentforge::engine::message::{AgentId, AgentMessage, MessageStatus};
use agentforge::engine::project_context::ProjectContext;
use agentforge::engine::router::Router;
use agentforge::{ClientWrapper, LLMClient, Message, Role};
use async_trait::async_trait;
use tokio::sync::RwLock;

struct ScriptedClient {
    replies: std::sync::Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into_iter().map(String::from).collect()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClientWrapper for ScriptedClient {
    async fn send_message(
        &self,
        _messages: &[Message],
        _tools: Option<Vec<agentforge::client_wrapper::ToolDefinition>>,
    ) -> Result<Message, Box<dyn std::error::Error>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies.first().cloned().unwrap_or_default()
            }
        };
        Ok(Message {
            role: Role::Assistant,
            content: Arc::from(reply.as_str()),
            tool_calls: vec![],
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

async fn recv_with_timeout(
    rx: &mut tokio::sync::mpsc::Receiver<AgentMessage>,
) -> AgentMessage {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a reply")
        .expect("channel closed without a reply")
}

#[tokio::test]
async fn a_supervisor_turn_replies_to_the_user_with_the_llm_text() {
    let client: Arc<dyn ClientWrapper> =
        Arc::new(ScriptedClient::new(vec!["Hello there, how can I help?"]));
    let llm_client = Arc::new(LLMClient::from_backend(client, Duration::from_secs(5)));
    let project_context = Arc::new(RwLock::new(ProjectContext::new(
        "demo",
        std::env::temp_dir(),
    )));
    let router = Router::new(16);

    let (user_tx, mut user_rx) = tokio::sync::mpsc::channel(16);
    router.register_user_listener(user_tx).await;

    let handle = AgentHandle::spawn(
        AgentId::Supervisor,
        false,
        llm_client,
        None,
        project_context,
        router,
        16,
        16,
        Arc::new(RwLock::new(tokio_util::sync::CancellationToken::new())),
    );

    handle
        .receive(AgentMessage::new("user", "supervisor", "user_request", "say hi"))
        .unwrap();

    let reply = recv_with_timeout(&mut user_rx).await;
    assert_eq!(reply.to_agent, "user");
    assert_eq!(reply.status, MessageStatus::Completed);
    assert_eq!(reply.content, "Hello there, how can I help?");

    handle.stop();
}

#[tokio::test]
async fn a_supervisor_delegation_directive_is_routed_to_the_named_agent() {
    let client: Arc<dyn ClientWrapper> = Arc::new(ScriptedClient::new(vec![
        "DELEGATE_TO: code_editing\nTASK: write-hello\nINSTRUCTIONS: create hello.txt",
    ]));
    let llm_client = Arc::new(LLMClient::from_backend(client, Duration::from_secs(5)));
    let project_context = Arc::new(RwLock::new(ProjectContext::new(
        "demo",
        std::env::temp_dir(),
    )));
    let router = Router::new(16);

    let (code_editing_tx, mut code_editing_rx) = tokio::sync::mpsc::channel(16);
    router.register_agent(AgentId::CodeEditing, code_editing_tx).await;

    let (user_tx, mut user_rx) = tokio::sync::mpsc::channel(16);
    router.register_user_listener(user_tx).await;

    let handle = AgentHandle::spawn(
        AgentId::Supervisor,
        false,
        llm_client,
        None,
        project_context,
        router,
        16,
        16,
        Arc::new(RwLock::new(tokio_util::sync::CancellationToken::new())),
    );

    handle
        .receive(AgentMessage::new("user", "supervisor", "user_request", "build something"))
        .unwrap();

    let delegated = recv_with_timeout(&mut code_editing_rx).await;
    assert_eq!(delegated.from_agent, "supervisor");
    assert_eq!(delegated.to_agent, "code_editing");
    assert_eq!(delegated.task_type, "write-hello");
    assert_eq!(delegated.content, "create hello.txt");

    // The supervisor still replies to the user with its full turn text.
    let reply = recv_with_timeout(&mut user_rx).await;
    assert_eq!(reply.to_agent, "user");
    assert!(reply.content.contains("DELEGATE_TO"));

    handle.stop();
}

#[tokio::test]
async fn an_unknown_delegation_target_is_dropped_without_blocking_the_reply() {
    let client: Arc<dyn ClientWrapper> = Arc::new(ScriptedClient::new(vec![
        "DELEGATE_TO: database\nTASK: migrate\nINSTRUCTIONS: run migrations",
    ]));
    let llm_client = Arc::new(LLMClient::from_backend(client, Duration::from_secs(5)));
    let project_context = Arc::new(RwLock::new(ProjectContext::new(
        "demo",
        std::env::temp_dir(),
    )));
    let router = Router::new(16);

    let (user_tx, mut user_rx) = tokio::sync::mpsc::channel(16);
    router.register_user_listener(user_tx).await;

    let handle = AgentHandle::spawn(
        AgentId::Supervisor,
        false,
        llm_client,
        None,
        project_context,
        router,
        16,
        16,
        Arc::new(RwLock::new(tokio_util::sync::CancellationToken::new())),
    );

    handle
        .receive(AgentMessage::new("user", "supervisor", "user_request", "do something odd"))
        .unwrap();

    let reply = recv_with_timeout(&mut user_rx).await;
    assert_eq!(reply.to_agent, "user");
    assert_eq!(reply.status, MessageStatus::Completed);

    handle.stop();
}

#[tokio::test]
async fn is_processing_and_inbox_depth_reflect_a_pending_turn() {
    let client: Arc<dyn ClientWrapper> = Arc::new(ScriptedClient::new(vec!["done"]));
    let llm_client = Arc::new(LLMClient::from_backend(client, Duration::from_secs(5)));
    let project_context = Arc::new(RwLock::new(ProjectContext::new(
        "demo",
        std::env::temp_dir(),
    )));
    let router = Router::new(16);
    let (user_tx, mut user_rx) = tokio::sync::mpsc::channel(16);
    router.register_user_listener(user_tx).await;

    let handle = AgentHandle::spawn(
        AgentId::Supervisor,
        false,
        llm_client,
        None,
        project_context,
        router,
        16,
        16,
        Arc::new(RwLock::new(tokio_util::sync::CancellationToken::new())),
    );

    assert_eq!(handle.inbox_depth(), 0);
    assert!(!handle.is_processing());

    handle
        .receive(AgentMessage::new("user", "supervisor", "user_request", "hi"))
        .unwrap();

    let _ = recv_with_timeout(&mut user_rx).await;
    handle.stop();
}
