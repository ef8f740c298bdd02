use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Result of running one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub job_id: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    /// stdout followed by stderr
    pub output: String,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn failed(job_id: &str, error: String) -> Self {
        Self {
            job_id: job_id.to_string(),
            success: false,
            exit_code: None,
            output: String::new(),
            error: Some(error),
        }
    }

    /// Text sent back in the completion report: the captured output on success,
    /// the error followed by any output on failure.
    pub fn report_text(&self) -> String {
        match &self.error {
            None => self.output.clone(),
            Some(error) if self.output.is_empty() => error.clone(),
            Some(error) => format!("{}\n{}", error, self.output),
        }
    }
}

/// Runs task commands as child processes.
///
/// The command is split on whitespace into a program and its arguments and run
/// directly, without a shell, so pipes and quoting are not interpreted.
#[derive(Debug, Clone, Default)]
pub struct JobExecutor;

impl JobExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `command`, killing it if it outlives `timeout`.
    pub async fn execute(
        &self,
        job_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return ExecutionResult::failed(job_id, "empty command".to_string());
        };

        tracing::info!(job_id, command, "Executing task");

        let child = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(job_id, timeout = ?limit, "Task timed out, killed");
                    return ExecutionResult::failed(job_id, format!("timed out after {:?}", limit));
                }
            },
            None => child.await,
        };

        Self::process_output(job_id, result)
    }

    fn process_output(
        job_id: &str,
        result: Result<std::process::Output, std::io::Error>,
    ) -> ExecutionResult {
        match result {
            Ok(output) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let exit_code = output.status.code();

                let error = if output.status.success() {
                    None
                } else {
                    Some(match exit_code {
                        Some(code) => format!("exit status {}", code),
                        None => "terminated by signal".to_string(),
                    })
                };

                tracing::info!(
                    job_id,
                    success = error.is_none(),
                    exit_code = ?exit_code,
                    "Task finished"
                );

                ExecutionResult {
                    job_id: job_id.to_string(),
                    success: error.is_none(),
                    exit_code,
                    output: combined,
                    error,
                }
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Task failed to start");
                ExecutionResult::failed(job_id, e.to_string())
            }
        }
    }
}
