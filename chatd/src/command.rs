// Shell command execution for the external media tools (transcoder, lip-sync aligner)

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Command '{command}' timed out after {}s", .timeout.as_secs_f32())]
    Timeout { command: String, timeout: Duration },
}

/// Runs command lines through `sh -c` with a deadline
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute `command_line` and return its captured stdout.
    ///
    /// A non-zero exit status is an error carrying the child's stderr. The
    /// child is killed if the deadline passes before it exits.
    pub async fn run_shell(&self, command_line: &str) -> Result<String, CommandError> {
        info!(command = %command_line, "Executing command");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| {
            error!(command = %command_line, error = %source, "Command spawn failed");
            CommandError::Spawn {
                command: command_line.to_string(),
                source,
            }
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| CommandError::Spawn {
                command: command_line.to_string(),
                source,
            })?,
            Err(_) => {
                error!(command = %command_line, timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Err(CommandError::Timeout {
                    command: command_line.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            error!(command = %command_line, status = %output.status, stderr = %stderr, "Command failed");
            return Err(CommandError::Failed {
                command: command_line.to_string(),
                status: output.status,
                stderr,
            });
        }

        debug!(command = %command_line, stdout = %stdout.trim(), "Command output");
        Ok(stdout)
    }
}

/// Quote a value for safe interpolation into a POSIX shell command line
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
