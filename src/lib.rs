// src/lib.rs

pub mod engine;
pub mod error;

// Re-export the most commonly used types at the crate root so callers don't
// have to spell out `engine::client_wrapper::...` for every message they
// build.
pub use engine::client_wrapper;
pub use engine::client_wrapper::{ClientWrapper, Message, Role};
pub use engine::config::{AppConfig, ConfigOverrides, ProviderCredentials};
pub use engine::coordinator::Coordinator;
pub use engine::llm_client::{LLMClient, LLMRequest, LLMResponse, Provider};
pub use engine::loop_manager::{AgentLoop, AgentLoopResult, LoopManager, LoopManagerConfig, LoopStatus};
pub use engine::message::{AgentId, AgentMessage, MessageStatus};
pub use engine::session::{ClientInput, Frame, FrameType, StreamingSession};
pub use error::{CoreError, ErrorKind};
