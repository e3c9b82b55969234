//! Configuration (C8, ambient).
//!
//! [`AppConfig`] is the fully-resolved, immutable configuration value
//! assembled once at process start (§4.8, §6.3). Three layers are combined in
//! strict precedence order — CLI flags override environment variables
//! override compiled-in defaults — by [`AppConfig::resolve`], which takes a
//! [`ConfigOverrides`] (populated from `clap` flags by the binary
//! entrypoints, §6.4) and layers it over `std::env` lookups and
//! [`AppConfig::default`].
//!
//! No file-based config format is introduced; this mirrors the donor crate's
//! existing configuration surface, which is likewise a plain Rust struct with
//! no TOML/YAML dependency.

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::llm_client::Provider;
use crate::error::{CoreError, ErrorKind};

/// Per-provider credentials (§6.3). Grouped so that a missing credential for
/// a provider the user did not select is never an error.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub aws_region: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub self_hosted_endpoint: Option<String>,
}

/// Raw override values as parsed from CLI flags; every field is optional so
/// flags the user did not pass fall through to the environment/default
/// layers (§6.3 precedence).
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
    pub server_port: Option<u16>,
    pub project_path: Option<PathBuf>,
    pub default_project_name: Option<String>,
    pub aws_region: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub self_hosted_endpoint: Option<String>,
    pub loop_timeout_secs: Option<u64>,
    pub idle_threshold_secs: Option<u64>,
    pub idle_ticks_required: Option<u32>,
    pub monitor_period_secs: Option<u64>,
    pub inbox_capacity: Option<usize>,
    pub router_capacity: Option<usize>,
    pub max_llm_wall_clock_secs: Option<u64>,
}

/// The fully-resolved configuration threaded by reference into the
/// Coordinator, Loop Manager, and Streaming Session Layer constructors (§3).
/// Immutable after construction — `switch_model` mutates runtime provider
/// state, not this value.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm_provider: Provider,
    pub llm_model: String,
    pub server_port: u16,
    pub project_path: PathBuf,
    pub default_project_name: String,
    pub credentials: ProviderCredentials,
    pub loop_timeout: Duration,
    pub idle_threshold: Duration,
    pub idle_ticks_required: u32,
    pub monitor_period: Duration,
    pub inbox_capacity: usize,
    pub router_capacity: usize,
    pub max_llm_wall_clock: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm_provider: Provider::Local,
            llm_model: "local-default".to_string(),
            server_port: 8080,
            project_path: PathBuf::from("."),
            default_project_name: "default".to_string(),
            credentials: ProviderCredentials::default(),
            loop_timeout: Duration::from_secs(20 * 60),
            idle_threshold: Duration::from_secs(30),
            idle_ticks_required: 6,
            monitor_period: Duration::from_secs(5),
            inbox_capacity: 100,
            router_capacity: crate::engine::router::ROUTER_CAPACITY_DEFAULT,
            max_llm_wall_clock: Duration::from_secs(60),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

impl AppConfig {
    /// Layer `overrides` (flags) over environment variables over
    /// [`AppConfig::default`] (§6.3 precedence). Fails only on an
    /// out-of-range value (e.g. an unparseable `llm_provider`); every other
    /// field always resolves to a total default.
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self, CoreError> {
        let defaults = AppConfig::default();

        let provider_str = overrides
            .llm_provider
            .or_else(|| env_string("LLM_PROVIDER"))
            .unwrap_or_else(|| defaults.llm_provider.as_str().to_string());
        let llm_provider = Provider::from_str_loose(&provider_str).ok_or_else(|| {
            CoreError::new(
                ErrorKind::InvalidArguments,
                format!("unrecognized llm_provider: {:?}", provider_str),
            )
        })?;

        let llm_model = overrides
            .llm_model
            .or_else(|| env_string("LLM_MODEL"))
            .unwrap_or(defaults.llm_model);

        let server_port = overrides
            .server_port
            .or_else(|| env_parsed("SERVER_PORT"))
            .unwrap_or(defaults.server_port);

        let project_path = overrides
            .project_path
            .or_else(|| env_string("PROJECT_PATH").map(PathBuf::from))
            .unwrap_or(defaults.project_path);

        let default_project_name = overrides
            .default_project_name
            .or_else(|| env_string("DEFAULT_PROJECT_NAME"))
            .unwrap_or(defaults.default_project_name);

        let credentials = ProviderCredentials {
            aws_region: overrides.aws_region.or_else(|| env_string("AWS_REGION")),
            aws_access_key_id: overrides.aws_access_key_id.or_else(|| env_string("AWS_ACCESS_KEY_ID")),
            aws_secret_access_key: overrides
                .aws_secret_access_key
                .or_else(|| env_string("AWS_SECRET_ACCESS_KEY")),
            openrouter_api_key: overrides.openrouter_api_key.or_else(|| env_string("OPENROUTER_API_KEY")),
            gemini_api_key: overrides.gemini_api_key.or_else(|| env_string("GEMINI_API_KEY")),
            anthropic_api_key: overrides.anthropic_api_key.or_else(|| env_string("ANTHROPIC_API_KEY")),
            self_hosted_endpoint: overrides
                .self_hosted_endpoint
                .or_else(|| env_string("SELF_HOSTED_ENDPOINT")),
        };

        let loop_timeout_secs = overrides
            .loop_timeout_secs
            .or_else(|| env_parsed("LOOP_TIMEOUT_SECS"))
            .unwrap_or(defaults.loop_timeout.as_secs());
        let idle_threshold_secs = overrides
            .idle_threshold_secs
            .or_else(|| env_parsed("IDLE_THRESHOLD_SECS"))
            .unwrap_or(defaults.idle_threshold.as_secs());
        let idle_ticks_required = overrides
            .idle_ticks_required
            .or_else(|| env_parsed("IDLE_TICKS_REQUIRED"))
            .unwrap_or(defaults.idle_ticks_required);
        let monitor_period_secs = overrides
            .monitor_period_secs
            .or_else(|| env_parsed("MONITOR_PERIOD_SECS"))
            .unwrap_or(defaults.monitor_period.as_secs());
        let inbox_capacity = overrides
            .inbox_capacity
            .or_else(|| env_parsed("INBOX_CAPACITY"))
            .unwrap_or(defaults.inbox_capacity);
        let router_capacity = overrides
            .router_capacity
            .or_else(|| env_parsed("ROUTER_CAPACITY"))
            .unwrap_or(defaults.router_capacity);
        let max_llm_wall_clock_secs = overrides
            .max_llm_wall_clock_secs
            .or_else(|| env_parsed("MAX_LLM_WALL_CLOCK_SECS"))
            .unwrap_or(defaults.max_llm_wall_clock.as_secs());

        if idle_ticks_required == 0 {
            return Err(CoreError::new(
                ErrorKind::InvalidArguments,
                "idle_ticks_required must be at least 1",
            ));
        }

        Ok(AppConfig {
            llm_provider,
            llm_model,
            server_port,
            project_path,
            default_project_name,
            credentials,
            loop_timeout: Duration::from_secs(loop_timeout_secs),
            idle_threshold: Duration::from_secs(idle_threshold_secs),
            idle_ticks_required,
            monitor_period: Duration::from_secs(monitor_period_secs),
            inbox_capacity,
            router_capacity,
            max_llm_wall_clock: Duration::from_secs(max_llm_wall_clock_secs),
        })
    }
}
