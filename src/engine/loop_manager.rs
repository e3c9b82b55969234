//! Loop Manager (C6): per-request lifecycle, quiescence detection, timeout
//! and cancellation (§4.6).
//!
//! Each call to [`LoopManager::start_loop`] injects one user request into the
//! [`crate::engine::coordinator::Coordinator`] and then owns a monitor task
//! that polls `pending_messages_total`/`active_processing_count` on a fixed
//! cadence until one of three terminal conditions fires, in priority order:
//! deadline timeout, explicit cancellation, or sustained quiescence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use crate::engine::coordinator::Coordinator;
use crate::error::{CoreError, ErrorKind};

/// Tuning knobs mirrored from [`crate::engine::config::AppConfig`] (§5 resource caps).
#[derive(Debug, Clone)]
pub struct LoopManagerConfig {
    /// Hard deadline per loop (default 20 min).
    pub loop_timeout: Duration,
    /// Monitor sampling cadence T1 (default 5 s).
    pub monitor_period: Duration,
    /// Quiescence window T2 (default 30 s).
    pub idle_threshold: Duration,
    /// Consecutive idle ticks required, K (default 6).
    pub idle_ticks_required: u32,
}

impl Default for LoopManagerConfig {
    fn default() -> Self {
        Self {
            loop_timeout: Duration::from_secs(20 * 60),
            monitor_period: Duration::from_secs(5),
            idle_threshold: Duration::from_secs(30),
            idle_ticks_required: 6,
        }
    }
}

/// Terminal state of a finished loop (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Completed,
    TimedOut,
    Cancelled,
}

/// Delivered once, to both the loop's own result channel and the manager's
/// shared results stream, when a loop reaches a terminal state.
#[derive(Debug, Clone)]
pub struct AgentLoopResult {
    pub request_id: String,
    pub status: LoopStatus,
    pub duration: Duration,
    pub completed_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Handle returned by [`LoopManager::start_loop`]. Dropping it does not
/// cancel the loop — use [`LoopManager::cancel_loop`] for that.
pub struct AgentLoop {
    pub request_id: String,
    pub deadline: Instant,
    cancel: CancellationToken,
    result_rx: oneshot::Receiver<AgentLoopResult>,
}

impl AgentLoop {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for this specific loop's terminal result.
    pub async fn await_result(self) -> Result<AgentLoopResult, CoreError> {
        self.result_rx.await.map_err(|_| {
            CoreError::new(ErrorKind::NotFound, "loop result channel closed without a result")
        })
    }
}

/// Read-only snapshot returned by [`LoopManager::get_loop`].
#[derive(Debug, Clone)]
pub struct LoopHandle {
    pub request_id: String,
    pub started_at: Instant,
    pub deadline: Instant,
    pub is_cancelled: bool,
}

struct ActiveLoopEntry {
    started_at: Instant,
    deadline: Instant,
    cancel: CancellationToken,
    user_cancelled: Arc<AtomicBool>,
    deadline_fired: Arc<AtomicBool>,
}

/// Owns the active-loop map and the shared results broadcast (§5: guarded by
/// a reader/writer lock; writers are `start_loop`, completion, `cancel_loop`, `stop`).
pub struct LoopManager {
    coordinator: Arc<Coordinator>,
    config: LoopManagerConfig,
    active: Arc<RwLock<HashMap<String, ActiveLoopEntry>>>,
    results_tx: broadcast::Sender<AgentLoopResult>,
}

impl LoopManager {
    pub fn new(coordinator: Arc<Coordinator>, config: LoopManagerConfig) -> Self {
        let (results_tx, _) = broadcast::channel(256);
        Self {
            coordinator,
            config,
            active: Arc::new(RwLock::new(HashMap::new())),
            results_tx,
        }
    }

    /// Inject `user_request` addressed to the supervisor and start the
    /// monitor task. Fails with `already_active` if `request_id` is already
    /// tracked.
    pub async fn start_loop(
        &self,
        request_id: impl Into<String>,
        user_request: impl Into<String>,
    ) -> Result<AgentLoop, CoreError> {
        let request_id = request_id.into();

        {
            let active = self.active.read().await;
            if active.contains_key(&request_id) {
                return Err(CoreError::new(
                    ErrorKind::AlreadyActive,
                    format!("loop {} is already active", request_id),
                ));
            }
        }

        let cancel = CancellationToken::new();
        self.coordinator.process_user_request(user_request.into(), cancel.clone()).await?;

        let user_cancelled = Arc::new(AtomicBool::new(false));
        let deadline_fired = Arc::new(AtomicBool::new(false));
        let started_at = Instant::now();
        let deadline = started_at + self.config.loop_timeout;
        let (result_tx, result_rx) = oneshot::channel();

        {
            let mut active = self.active.write().await;
            active.insert(
                request_id.clone(),
                ActiveLoopEntry {
                    started_at,
                    deadline,
                    cancel: cancel.clone(),
                    user_cancelled: user_cancelled.clone(),
                    deadline_fired: deadline_fired.clone(),
                },
            );
        }

        // Deadline race: the same token that `cancel_loop` cancels is also
        // cancelled here when the wall-clock deadline elapses (§5: "a
        // deadline is modeled as a token cancelled by a tokio::time::sleep
        // race rather than a bespoke timer").
        {
            let cancel = cancel.clone();
            let deadline_fired = deadline_fired.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline.into()) => {
                        deadline_fired.store(true, Ordering::SeqCst);
                        cancel.cancel();
                    }
                }
            });
        }

        tokio::spawn(monitor(
            request_id.clone(),
            self.coordinator.clone(),
            self.config.clone(),
            cancel.clone(),
            user_cancelled,
            deadline_fired,
            started_at,
            self.active.clone(),
            self.results_tx.clone(),
            result_tx,
        ));

        Ok(AgentLoop { request_id, deadline, cancel, result_rx })
    }

    /// Signal cancellation for an active loop (§4.6).
    pub async fn cancel_loop(&self, request_id: &str) -> Result<(), CoreError> {
        let active = self.active.read().await;
        let entry = active.get(request_id).ok_or_else(|| {
            CoreError::new(ErrorKind::NotFound, format!("no active loop {}", request_id))
        })?;
        entry.user_cancelled.store(true, Ordering::SeqCst);
        entry.cancel.cancel();
        Ok(())
    }

    pub async fn get_loop(&self, request_id: &str) -> Option<LoopHandle> {
        let active = self.active.read().await;
        active.get(request_id).map(|entry| LoopHandle {
            request_id: request_id.to_string(),
            started_at: entry.started_at,
            deadline: entry.deadline,
            is_cancelled: entry.cancel.is_cancelled(),
        })
    }

    pub async fn active_loops(&self) -> Vec<String> {
        self.active.read().await.keys().cloned().collect()
    }

    /// Subscribe to the shared stream of terminal results (the streaming
    /// session layer's primary consumption point, §4.7).
    pub fn results_stream(&self) -> broadcast::Receiver<AgentLoopResult> {
        self.results_tx.subscribe()
    }

    /// Cancel every active loop (§4.6, §5 shutdown path).
    pub async fn stop(&self) {
        let active = self.active.read().await;
        for entry in active.values() {
            entry.user_cancelled.store(true, Ordering::SeqCst);
            entry.cancel.cancel();
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn monitor(
    request_id: String,
    coordinator: Arc<Coordinator>,
    config: LoopManagerConfig,
    cancel: CancellationToken,
    user_cancelled: Arc<AtomicBool>,
    deadline_fired: Arc<AtomicBool>,
    started_at: Instant,
    active: Arc<RwLock<HashMap<String, ActiveLoopEntry>>>,
    results_tx: broadcast::Sender<AgentLoopResult>,
    result_tx: oneshot::Sender<AgentLoopResult>,
) {
    let mut last_activity = Instant::now();
    let mut idle_ticks: u32 = 0;

    let status = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Evaluated in priority order (§4.6): a fired deadline wins
                // even if `cancel_loop` also raced in.
                if deadline_fired.load(Ordering::SeqCst) {
                    break LoopStatus::TimedOut;
                }
                if user_cancelled.load(Ordering::SeqCst) {
                    break LoopStatus::Cancelled;
                }
                break LoopStatus::Cancelled;
            }
            _ = tokio::time::sleep(config.monitor_period) => {
                let pending = coordinator.pending_messages_total();
                let processing = coordinator.active_processing_count();
                if pending != 0 || processing != 0 {
                    last_activity = Instant::now();
                    idle_ticks = 0;
                } else {
                    idle_ticks += 1;
                }
                if last_activity.elapsed() >= config.idle_threshold && idle_ticks >= config.idle_ticks_required {
                    break LoopStatus::Completed;
                }
            }
        }
    };

    let error = match status {
        LoopStatus::Cancelled => Some("cancelled".to_string()),
        LoopStatus::TimedOut => Some("timeout".to_string()),
        LoopStatus::Completed => None,
    };

    let result = AgentLoopResult {
        request_id: request_id.clone(),
        status,
        duration: started_at.elapsed(),
        completed_at: Utc::now(),
        error,
    };

    active.write().await.remove(&request_id);
    let _ = result_tx.send(result.clone());
    let _ = results_tx.send(result);

    if log::log_enabled!(log::Level::Info) {
        log::info!("loop {}: terminated status={:?}", request_id, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::ProviderCredentials;
    use crate::engine::coordinator::CoordinatorConfig;
    use crate::engine::llm_client::{LLMClient, Provider};
    use crate::engine::project_context::ProjectContext;
    use crate::engine::tool_protocol::ToolRegistry;
    use std::path::PathBuf;

    async fn test_coordinator() -> Arc<Coordinator> {
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
        Arc::new(Coordinator::new(llm_client, registry, ctx, CoordinatorConfig::default()))
    }

    #[tokio::test]
    async fn starting_the_same_request_id_twice_fails_with_already_active() {
        let coordinator = test_coordinator().await;
        let manager = LoopManager::new(coordinator, LoopManagerConfig::default());
        let _loop1 = manager.start_loop("req-1", "do something").await.unwrap();
        let err = manager.start_loop("req-1", "again").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyActive);
    }

    #[tokio::test]
    async fn cancel_loop_terminates_with_cancelled_status() {
        let coordinator = test_coordinator().await;
        let manager = LoopManager::new(coordinator, LoopManagerConfig::default());
        let handle = manager.start_loop("req-2", "do something").await.unwrap();
        manager.cancel_loop("req-2").await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle.await_result())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.status, LoopStatus::Cancelled);
    }

    #[tokio::test]
    async fn quiescence_with_fast_config_terminates_as_completed() {
        let coordinator = test_coordinator().await;
        let config = LoopManagerConfig {
            loop_timeout: Duration::from_secs(60),
            monitor_period: Duration::from_millis(20),
            idle_threshold: Duration::from_millis(10),
            idle_ticks_required: 2,
        };
        let manager = LoopManager::new(coordinator, config);
        let handle = manager.start_loop("req-3", "do something").await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle.await_result())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.status, LoopStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_on_unknown_request_id_returns_not_found() {
        let coordinator = test_coordinator().await;
        let manager = LoopManager::new(coordinator, LoopManagerConfig::default());
        let err = manager.cancel_loop("does-not-exist").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
