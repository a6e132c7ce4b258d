//! The `bash` tool, invoked for a `terminal_command` frame: runs a shell command in
//! the connection's workspace directory and returns its combined
//! stdout/stderr. Synchronous from the agent's view — the underlying
//! spawn is async, but `invoke` does not return until the process exits
//! or the timeout fires.

use std::path::PathBuf;
use std::time::Duration;

use agentcore_domain::tool::{Tool, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct BashTool {
    workdir: PathBuf,
    timeout: Duration,
}

impl BashTool {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the current workspace and return its output."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Shell command to execute"},
            },
            "required": ["command"],
        })
    }

    async fn invoke(&self, input: Value) -> ToolOutput {
        let Some(command) = input.get("command").and_then(|v| v.as_str()) else {
            return ToolOutput::error("missing required field 'command'");
        };

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .stdin(std::process::Stdio::null());

        let spawned = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ToolOutput::error(format!("failed to spawn shell: {e}")),
        };

        match tokio::time::timeout(self.timeout, spawned.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.is_empty() {
                    if !combined.is_empty() {
                        combined.push('\n');
                    }
                    combined.push_str(&stderr);
                }
                // Success is "did the command run and return", not its
                // exit code — a nonzero exit is still reported as the
                // tool's normal output.
                ToolOutput::text(combined)
            }
            Ok(Err(e)) => ToolOutput::error(format!("command failed to run: {e}")),
            Err(_) => ToolOutput::error(format!(
                "command timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_stdout() {
        let tool = BashTool::new(std::env::temp_dir());
        let out = tool.invoke(serde_json::json!({"command": "echo hi"})).await;
        assert_eq!(out.output.trim(), "hi");
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_an_error_result() {
        let tool = BashTool::new(std::env::temp_dir());
        let out = tool.invoke(serde_json::json!({"command": "exit 1"})).await;
        assert!(out.message.is_none());
    }

    #[tokio::test]
    async fn missing_command_errors() {
        let tool = BashTool::new(std::env::temp_dir());
        let out = tool.invoke(serde_json::json!({})).await;
        assert!(out.message.is_some());
    }

    #[tokio::test]
    async fn runs_in_configured_workdir() {
        let dir = std::env::temp_dir();
        let tool = BashTool::new(dir.clone());
        let out = tool.invoke(serde_json::json!({"command": "pwd"})).await;
        assert!(out.output.trim().ends_with(dir.file_name().unwrap().to_str().unwrap()) || out.output.contains(dir.to_str().unwrap()));
    }
}
