//! Practical usage patterns for `execute_command` through the real
//! `ToolRegistry`, beyond the contract tests in `bash_tool_test.rs` §8:
//! environment variables, piped commands, and multi-step call sequences the
//! way a code-editing agent would actually drive the tool across a turn.

use agentforge::engine::tool_protocol::ToolRegistry;
use agentforge::engine::tools::{BashTool, ExecuteCommandTool, Platform};
use std::sync::Arc;

async fn registry_with_bash(bash: BashTool) -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry
        .register(Arc::new(ExecuteCommandTool::new(Arc::new(bash))))
        .await
        .unwrap();
    registry
}

#[tokio::test]
async fn env_vars_configured_on_the_tool_are_visible_to_the_command() {
    let bash = BashTool::new(Platform::Linux)
        .with_env_var("AGENT_NAME".to_string(), "TestAgent".to_string())
        .with_env_var("MODE".to_string(), "production".to_string());
    let registry = registry_with_bash(bash).await;

    let result = registry
        .execute(
            "execute_command",
            serde_json::json!({"command": "echo $AGENT_NAME in $MODE mode"}),
        )
        .await
        .unwrap();

    assert!(result.success);
    let stdout = result.output["stdout"].as_str().unwrap();
    assert!(stdout.contains("TestAgent"));
    assert!(stdout.contains("production"));
}

#[tokio::test]
async fn piped_commands_run_as_a_single_shell_invocation() {
    let registry = registry_with_bash(BashTool::new(Platform::Linux)).await;

    let result = registry
        .execute(
            "execute_command",
            serde_json::json!({"command": "echo -e '3\\n1\\n2' | sort"}),
        )
        .await
        .unwrap();

    assert!(result.success);
    let stdout = result.output["stdout"].as_str().unwrap();
    let lines: Vec<&str> = stdout.trim().lines().collect();
    assert_eq!(lines, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn a_multi_step_sequence_of_calls_shares_no_state_between_invocations() {
    let registry = registry_with_bash(BashTool::new(Platform::Linux)).await;

    for step in ["workflow started", "processing data", "verification complete"] {
        let result = registry
            .execute("execute_command", serde_json::json!({"command": format!("echo '{}'", step)}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output["stdout"].as_str().unwrap().contains(step));
    }
}

#[tokio::test]
async fn a_failing_command_can_be_retried_with_a_different_command() {
    let registry = registry_with_bash(BashTool::new(Platform::Linux)).await;

    let failed = registry
        .execute("execute_command", serde_json::json!({"command": "false"}))
        .await
        .unwrap();
    assert!(failed.success, "tool call itself succeeds even on nonzero exit");
    assert_ne!(failed.output["exit_code"].as_i64().unwrap(), 0);

    let retried = registry
        .execute("execute_command", serde_json::json!({"command": "echo retrying"}))
        .await
        .unwrap();
    assert_eq!(retried.output["exit_code"].as_i64().unwrap(), 0);
    assert!(retried.output["stdout"].as_str().unwrap().contains("retrying"));
}

#[tokio::test]
async fn working_dir_argument_overrides_the_default_cwd_per_call() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("marker.txt"), "present").unwrap();
    let registry = registry_with_bash(BashTool::new(Platform::Linux).with_timeout(10)).await;

    let result = registry
        .execute(
            "execute_command",
            serde_json::json!({
                "command": "ls",
                "working_dir": temp_dir.path().to_str().unwrap(),
            }),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.output["stdout"].as_str().unwrap().contains("marker.txt"));
}
