// Shell Runner
// Executes lifecycle step commands through a shell

use crate::parser::models::EnvBindings;

use command_group::AsyncCommandGroup;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Shell types supported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shell {
    /// Default shell (sh on Unix, cmd on Windows)
    #[default]
    Default,
    /// Bash shell
    Bash,
    /// PowerShell Core (cross-platform)
    Pwsh,
}

impl Shell {
    /// Get the shell executable and arguments
    fn get_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Default => {
                if cfg!(target_os = "windows") {
                    ("cmd", &["/C"])
                } else {
                    ("sh", &["-c"])
                }
            }
            Shell::Bash => ("bash", &["-c"]),
            Shell::Pwsh => ("pwsh", &["-NoLogo", "-NoProfile", "-Command"]),
        }
    }

    pub fn from_name(name: &str) -> Option<Shell> {
        match name {
            "sh" | "default" => Some(Shell::Default),
            "bash" => Some(Shell::Bash),
            "pwsh" => Some(Shell::Pwsh),
            _ => None,
        }
    }
}

/// Output collected during a command
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code (if the process exited normally)
    pub exit_code: Option<i32>,
    /// The command was killed after exceeding its timeout
    pub timed_out: bool,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    fn failed_to_start(message: String) -> Self {
        Self {
            stderr: message,
            ..Self::default()
        }
    }
}

/// Callback for output lines as they arrive; the flag is true for stderr
pub type OutputCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Shell runner for executing step commands
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    shell: Shell,
}

impl ShellRunner {
    /// Create a new shell runner with the default shell
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shell runner with a specific shell
    pub fn with_shell(shell: Shell) -> Self {
        Self { shell }
    }

    /// Run one command, streaming output lines to `on_output` when given
    pub async fn run(
        &self,
        command: &str,
        env: &EnvBindings,
        working_dir: &Path,
        timeout: Option<Duration>,
        on_output: Option<OutputCallback>,
    ) -> ShellOutput {
        let (shell_cmd, shell_args) = self.shell.get_command();

        let mut cmd = Command::new(shell_cmd);
        cmd.args(shell_args);
        cmd.arg(command);
        cmd.current_dir(working_dir);
        cmd.envs(env);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        // The step runs as its own process group so a timeout reaches every
        // process it started, not just the shell
        let mut child = match cmd.group_spawn() {
            Ok(child) => child,
            Err(e) => {
                return ShellOutput::failed_to_start(format!(
                    "Failed to spawn shell process '{}': {}",
                    shell_cmd, e
                ))
            }
        };

        let (Some(stdout), Some(stderr)) = (
            child.inner().stdout.take(),
            child.inner().stderr.take(),
        ) else {
            let _ = child.kill().await;
            return ShellOutput::failed_to_start("Failed to capture process output".to_string());
        };

        let stdout_handle = collect_lines(stdout, false, on_output.clone());
        let stderr_handle = collect_lines(stderr, true, on_output);

        let mut timed_out = false;
        let wait_result = match timeout {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, child.wait()).await;
                match waited {
                    Ok(result) => Some(result),
                    Err(_) => {
                        let _ = child.kill().await;
                        timed_out = true;
                        None
                    }
                }
            }
            None => Some(child.wait().await),
        };

        let exit_code = wait_result
            .and_then(|result| result.ok())
            .and_then(|status| status.code());
        let stdout = stdout_handle.await.unwrap_or_default();
        let mut stderr = stderr_handle.await.unwrap_or_default();

        if timed_out {
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(&format!("Process timed out after {:?}", timeout.unwrap_or_default()));
        }

        ShellOutput {
            stdout,
            stderr,
            exit_code,
            timed_out,
        }
    }
}

/// Read a stream line by line on its own task
fn collect_lines<R>(
    reader: R,
    is_error: bool,
    on_output: Option<OutputCallback>,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut output = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(callback) = &on_output {
                callback(&line, is_error);
            }
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&line);
        }
        output
    })
}
