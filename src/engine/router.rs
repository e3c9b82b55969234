//! Central message router (C4).
//!
//! A single bounded, FIFO, process-wide queue. Agents never address one
//! another directly — they submit to the router, and the router's
//! dispatcher task looks up the destination's registered inbox. This
//! breaks the agent-to-coordinator-to-router cycle the donor's orchestrator
//! had: the router has an identity of its own (§9 design notes).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::engine::message::{AgentId, AgentMessage, USER_DESTINATION};
use crate::error::{CoreError, ErrorKind};

pub const ROUTER_CAPACITY_DEFAULT: usize = 1000;

/// The process-wide message router.
///
/// Cheaply cloneable: every field is either an `mpsc::Sender` (already
/// `Clone`) or wrapped in `Arc`, so agents and the coordinator can each hold
/// their own handle.
#[derive(Clone)]
pub struct Router {
    capacity: usize,
    tx: mpsc::Sender<AgentMessage>,
    targets: Arc<RwLock<HashMap<AgentId, mpsc::Sender<AgentMessage>>>>,
    user_listener: Arc<RwLock<Option<mpsc::Sender<AgentMessage>>>>,
    cancel: CancellationToken,
}

impl Router {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let targets: Arc<RwLock<HashMap<AgentId, mpsc::Sender<AgentMessage>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let user_listener: Arc<RwLock<Option<mpsc::Sender<AgentMessage>>>> = Arc::new(RwLock::new(None));
        let cancel = CancellationToken::new();

        tokio::spawn(dispatch_loop(rx, targets.clone(), user_listener.clone(), cancel.clone()));

        Self { capacity, tx, targets, user_listener, cancel }
    }

    /// Register (or replace) the inbox a destination agent's messages are
    /// delivered to.
    pub async fn register_agent(&self, agent_id: AgentId, inbox: mpsc::Sender<AgentMessage>) {
        self.targets.write().await.insert(agent_id, inbox);
    }

    /// Register the channel the Streaming Session Layer listens on for
    /// messages addressed to `user` (§4.4).
    pub async fn register_user_listener(&self, listener: mpsc::Sender<AgentMessage>) {
        *self.user_listener.write().await = Some(listener);
    }

    pub async fn unregister_user_listener(&self) {
        *self.user_listener.write().await = None;
    }

    /// Non-blocking submit; a full queue yields `router_saturated`.
    pub fn submit(&self, message: AgentMessage) -> Result<(), CoreError> {
        self.tx.try_send(message).map_err(|_| {
            CoreError::new(ErrorKind::RouterSaturated, "router queue is full")
        })
    }

    /// Current depth of the router's own queue (used permits, not capacity).
    pub fn depth(&self) -> usize {
        self.capacity.saturating_sub(self.tx.capacity())
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<AgentMessage>,
    targets: Arc<RwLock<HashMap<AgentId, mpsc::Sender<AgentMessage>>>>,
    user_listener: Arc<RwLock<Option<mpsc::Sender<AgentMessage>>>>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = rx.recv() => match maybe {
                Some(m) => m,
                None => break,
            },
        };

        if message.to_agent == USER_DESTINATION {
            let listener = user_listener.read().await;
            match listener.as_ref() {
                Some(tx) if tx.try_send(message.clone()).is_ok() => {}
                Some(_) => {
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!("router: dropping message {} — user listener inbox full", message.id);
                    }
                }
                None => {
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!("router: dropping message {} — no user listener registered", message.id);
                    }
                }
            }
            continue;
        }

        let Some(agent_id) = AgentId::from_str_loose(&message.to_agent) else {
            if log::log_enabled!(log::Level::Warn) {
                log::warn!("router: dropping message {} — unknown destination {:?}", message.id, message.to_agent);
            }
            continue;
        };

        let targets_guard = targets.read().await;
        match targets_guard.get(&agent_id) {
            Some(inbox) if inbox.try_send(message.clone()).is_ok() => {}
            Some(_) => {
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!("router: dropping message {} — {} inbox full", message.id, agent_id.as_str());
                }
            }
            None => {
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!("router: dropping message {} — {} has no registered inbox", message.id, agent_id.as_str());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::message::AgentMessage;
    use std::time::Duration;

    #[tokio::test]
    async fn messages_to_the_same_destination_arrive_in_submission_order() {
        let router = Router::new(ROUTER_CAPACITY_DEFAULT);
        let (tx, mut rx) = mpsc::channel(10);
        router.register_agent(AgentId::CodeEditing, tx).await;

        let m1 = AgentMessage::new("supervisor", "code_editing", "task", "first");
        let m2 = AgentMessage::new("supervisor", "code_editing", "task", "second");
        router.submit(m1.clone()).unwrap();
        router.submit(m2.clone()).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.id, m1.id);
        assert_eq!(second.id, m2.id);
    }

    #[tokio::test]
    async fn messages_addressed_to_user_are_handed_to_the_registered_listener() {
        let router = Router::new(ROUTER_CAPACITY_DEFAULT);
        let (tx, mut rx) = mpsc::channel(10);
        router.register_user_listener(tx).await;

        let msg = AgentMessage::new("supervisor", USER_DESTINATION, "reply", "hi");
        router.submit(msg.clone()).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(received.id, msg.id);
    }

    #[tokio::test]
    async fn messages_to_unregistered_destinations_are_dropped_without_panicking() {
        let router = Router::new(ROUTER_CAPACITY_DEFAULT);
        let msg = AgentMessage::new("supervisor", "react", "task", "orphaned");
        router.submit(msg).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn submit_fails_with_router_saturated_once_the_queue_is_full() {
        let router = Router::new(1);
        // No agent registered, so the dispatcher can't drain — fill the one slot.
        let first = AgentMessage::new("supervisor", "react", "task", "a");
        let second = AgentMessage::new("supervisor", "react", "task", "b");
        // give the dispatcher a chance to pull the first message before we fill again
        router.submit(first).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        router.submit(second).unwrap();
        let third = AgentMessage::new("supervisor", "react", "task", "c");
        let err = router.submit(third).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RouterSaturated);
    }
}
