//! Command-backed invoker: each agent or tool is a shell command.

use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, ConfigSource, FailureKind, Invoker, Target};
use serde_json::Value;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const MAX_STDERR: usize = 4_000;

/// Runs the `command` configured for the target via `sh -c`, writing the
/// parameters JSON to stdin and reading the outcome from stdout.
///
/// Stdout that parses as JSON is returned as is; anything else becomes a
/// string. A non-zero exit is an invocation error carrying stderr. The
/// child is killed if the caller stops waiting for it.
pub struct CommandInvoker {
    config: Arc<dyn ConfigSource>,
}

impl CommandInvoker {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self { config }
    }

    fn command_for(&self, target: &Target) -> ConductorResult<String> {
        let snapshot = self.config.snapshot();
        let command = match target {
            Target::Agent(id) => snapshot.agent(id).and_then(|a| a.command.clone()),
            Target::Tool(id) => snapshot
                .effective_tools()
                .into_iter()
                .find(|t| &t.id == id)
                .and_then(|t| t.command),
        };
        command.ok_or_else(|| {
            ConductorError::invocation(
                format!("missing command configuration for {target}"),
                FailureKind::MissingKey,
            )
        })
    }
}

#[async_trait]
impl Invoker for CommandInvoker {
    async fn invoke(&self, target: &Target, parameters: &Value) -> ConductorResult<Value> {
        let command = self.command_for(target)?;
        info!(target = %target, command = %command, "Invoking command");

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(target, &e))?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(parameters)?;
            // A command that ignores its input may close stdin early.
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(target = %target, error = %e, "Command did not read its parameters");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| spawn_error(target, &e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let message = if stderr.is_empty() {
                format!("{target} exited with {}", output.status)
            } else {
                truncate(stderr, MAX_STDERR)
            };
            return Err(ConductorError::invocation(message, FailureKind::Other));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        Ok(serde_json::from_str(stdout).unwrap_or_else(|_| Value::String(stdout.to_string())))
    }
}

fn spawn_error(target: &Target, e: &std::io::Error) -> ConductorError {
    let kind = match e.kind() {
        ErrorKind::PermissionDenied => FailureKind::Permission,
        ErrorKind::OutOfMemory => FailureKind::OutOfMemory,
        _ => FailureKind::Os,
    };
    ConductorError::invocation(format!("failed to run command for {target}: {e}"), kind)
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated, {} total bytes]", &s[..end], s.len())
}
