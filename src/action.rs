//! Action sinks fired when the aggregator triggers
//!
//! The detector never waits on an action: `dispatch` runs the sink on its own
//! task and only logs the outcome. A failed or stuck action cannot roll back
//! or stall detection.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Default upper bound on how long a trigger command may run
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Action errors
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Failed to spawn action: {0}")]
    SpawnFailed(String),

    #[error("Timeout exceeded: {0:?}")]
    TimeoutExceeded(Duration),

    #[error("Action exited with status {0}")]
    ExitStatus(i32),
}

/// What a completed action reported
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutcome {
    /// Standard output, if the action produced any
    pub stdout: String,

    /// Execution duration (milliseconds)
    pub duration_ms: u64,
}

/// Something to do once snoring is confirmed
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn fire(&self) -> Result<ActionOutcome, ActionError>;

    /// Short human-readable label for logs
    fn describe(&self) -> String;
}

/// Runs a configured shell command
#[derive(Debug, Clone)]
pub struct CommandAction {
    command: String,
    timeout: Duration,
}

impl CommandAction {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    #[cfg(unix)]
    fn build(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new("sh");
        cmd.arg("-c").arg(&self.command);
        cmd
    }

    #[cfg(windows)]
    fn build(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new("cmd");
        cmd.arg("/C").arg(&self.command);
        cmd
    }
}

#[async_trait]
impl ActionSink for CommandAction {
    async fn fire(&self) -> Result<ActionOutcome, ActionError> {
        let start_time = Instant::now();

        let mut cmd = self.build();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running action command: {}", self.command);

        let child = cmd
            .spawn()
            .map_err(|e| ActionError::SpawnFailed(e.to_string()))?;

        // Dropping the wait future on timeout kills the child.
        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ActionError::TimeoutExceeded(self.timeout))?
            .map_err(|e| ActionError::SpawnFailed(e.to_string()))?;

        let duration_ms = start_time.elapsed().as_millis() as u64;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                warn!("Action stderr: {}", stderr.trim());
            }
            return Err(ActionError::ExitStatus(output.status.code().unwrap_or(-1)));
        }

        Ok(ActionOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            duration_ms,
        })
    }

    fn describe(&self) -> String {
        format!("command `{}`", self.command)
    }
}

/// Used when no command is configured: just reports the detection
#[derive(Debug, Clone, Default)]
pub struct LogAction;

#[async_trait]
impl ActionSink for LogAction {
    async fn fire(&self) -> Result<ActionOutcome, ActionError> {
        info!("Snore detected!");
        Ok(ActionOutcome::default())
    }

    fn describe(&self) -> String {
        "log".to_string()
    }
}

/// Fire `sink` on a background task
///
/// The returned handle resolves once the action finishes; callers are free
/// to drop it.
pub fn dispatch(sink: Arc<dyn ActionSink>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match sink.fire().await {
            Ok(outcome) => {
                info!(
                    "Action {} completed in {} ms",
                    sink.describe(),
                    outcome.duration_ms
                );
            }
            Err(e) => {
                error!("Action {} failed: {}", sink.describe(), e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_action() {
        let outcome = LogAction.fire().await.unwrap();
        assert_eq!(outcome, ActionOutcome::default());
        assert_eq!(LogAction.describe(), "log");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_echo() {
        let action = CommandAction::new("echo snoring");
        let outcome = action.fire().await.unwrap();

        assert!(outcome.stdout.contains("snoring"));
        assert_eq!(action.describe(), "command `echo snoring`");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_exit_status() {
        let action = CommandAction::new("exit 3");

        match action.fire().await {
            Err(ActionError::ExitStatus(code)) => assert_eq!(code, 3),
            other => panic!("Expected ExitStatus error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_timeout() {
        let action = CommandAction::new("sleep 5").with_timeout(Duration::from_millis(100));
        let start = Instant::now();

        let result = action.fire().await;
        assert!(matches!(result, Err(ActionError::TimeoutExceeded(_))));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_dispatch_fires_once() {
        let mut sink = MockActionSink::new();
        sink.expect_fire()
            .times(1)
            .returning(|| Ok(ActionOutcome::default()));
        sink.expect_describe().returning(|| "mock".to_string());

        dispatch(Arc::new(sink)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failure() {
        let mut sink = MockActionSink::new();
        sink.expect_fire()
            .times(1)
            .returning(|| Err(ActionError::SpawnFailed("no shell".to_string())));
        sink.expect_describe().returning(|| "mock".to_string());

        assert!(dispatch(Arc::new(sink)).await.is_ok());
    }
}
