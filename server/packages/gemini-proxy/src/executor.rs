//! Strategy executor for the Gemini CLI.
//!
//! The CLI has changed its argument surface between releases, so each request
//! walks a fixed table of invocation templates in order. Attempts run one at a
//! time, each bounded by a timeout, and the first clean exit wins. When every
//! template fails the per-attempt diagnostics are folded into one
//! [`ProxyError::AllStrategiesFailed`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use gemini_proxy_error::ProxyError;

/// Default per-attempt timeout in seconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 60;

/// Maximum stderr captured into a single attempt diagnostic.
const MAX_STDERR_CHARS: usize = 400;

/// Maximum size of the aggregated diagnostics returned to callers.
pub const MAX_AGGREGATED_ERROR_CHARS: usize = 2_000;

/// How the prompt is passed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// `--prompt <p>`
    LongFlag,
    /// `-p <p>`
    ShortFlag,
    /// `<p>`
    Positional,
}

/// How non-interactive auto-approval is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStyle {
    /// `--approval-mode yolo`
    ApprovalMode,
    /// `-y`
    ShortYolo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationTemplate {
    pub prompt: PromptStyle,
    pub approval: ApprovalStyle,
}

impl InvocationTemplate {
    pub const fn new(prompt: PromptStyle, approval: ApprovalStyle) -> Self {
        Self { prompt, approval }
    }

    pub fn args(&self, prompt: &str) -> Vec<String> {
        let mut args = match self.prompt {
            PromptStyle::LongFlag => vec!["--prompt".to_string(), prompt.to_string()],
            PromptStyle::ShortFlag => vec!["-p".to_string(), prompt.to_string()],
            PromptStyle::Positional => vec![prompt.to_string()],
        };
        match self.approval {
            ApprovalStyle::ApprovalMode => {
                args.push("--approval-mode".to_string());
                args.push("yolo".to_string());
            }
            ApprovalStyle::ShortYolo => args.push("-y".to_string()),
        }
        args
    }
}

/// Priority order: every prompt style with `--approval-mode yolo`, then with `-y`.
pub const INVOCATION_TEMPLATES: [InvocationTemplate; 6] = [
    InvocationTemplate::new(PromptStyle::LongFlag, ApprovalStyle::ApprovalMode),
    InvocationTemplate::new(PromptStyle::ShortFlag, ApprovalStyle::ApprovalMode),
    InvocationTemplate::new(PromptStyle::Positional, ApprovalStyle::ApprovalMode),
    InvocationTemplate::new(PromptStyle::LongFlag, ApprovalStyle::ShortYolo),
    InvocationTemplate::new(PromptStyle::ShortFlag, ApprovalStyle::ShortYolo),
    InvocationTemplate::new(PromptStyle::Positional, ApprovalStyle::ShortYolo),
];

/// What one attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited {
        code: Option<i32>,
        success: bool,
        stdout: String,
        stderr: String,
    },
    TimedOut,
}

/// Why a single template did not win.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error("exception for cmd={command}: {message}")]
    Spawn { command: String, message: String },
    #[error("timeout after {}s for cmd: {command}", .timeout.as_secs_f64())]
    Timeout { command: String, timeout: Duration },
    #[error("rc={} cmd={command} stderr={stderr}", exit_code_label(.code))]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct StrategyExecutor {
    executable: PathBuf,
    attempt_timeout: Duration,
    templates: Vec<InvocationTemplate>,
}

impl StrategyExecutor {
    pub fn new(executable: impl Into<PathBuf>, attempt_timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            attempt_timeout,
            templates: INVOCATION_TEMPLATES.to_vec(),
        }
    }

    pub fn with_templates(mut self, templates: Vec<InvocationTemplate>) -> Self {
        self.templates = templates;
        self
    }

    /// Runs the templates in order and returns the stdout of the first attempt
    /// that exits zero.
    pub async fn execute(&self, prompt: &str) -> Result<String, ProxyError> {
        if let Err(err) = check_executable(&self.executable) {
            error!(path = %self.executable.display(), error = %err, "gemini cli unavailable");
            return Err(err);
        }

        let mut failures: Vec<AttemptError> = Vec::new();
        for (index, template) in self.templates.iter().enumerate() {
            let args = template.args(prompt);
            let command = display_command(&self.executable, &args);
            info!(attempt = index + 1, command = %command, "trying gemini cli invocation");

            let start = Instant::now();
            match self.attempt(&args, &command).await {
                Ok(stdout) => {
                    info!(
                        attempt = index + 1,
                        command = %command,
                        stdout_len = stdout.len(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "gemini cli invocation succeeded"
                    );
                    return Ok(stdout);
                }
                Err(err) => {
                    warn!(
                        attempt = index + 1,
                        duration_ms = start.elapsed().as_millis() as u64,
                        error = %err,
                        "gemini cli invocation failed"
                    );
                    failures.push(err);
                }
            }
        }

        let combined = failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        let details = truncate_chars(&combined, MAX_AGGREGATED_ERROR_CHARS).to_string();
        error!(attempts = failures.len(), details = %details, "all gemini cli invocations failed");
        Err(ProxyError::AllStrategiesFailed {
            attempts: failures.len(),
            details,
        })
    }

    async fn attempt(&self, args: &[String], command: &str) -> Result<String, AttemptError> {
        let outcome = self
            .run_process(args)
            .await
            .map_err(|err| AttemptError::Spawn {
                command: command.to_string(),
                message: err.to_string(),
            })?;

        match outcome {
            ProcessOutcome::Exited {
                success: true,
                stdout,
                ..
            } => Ok(stdout),
            ProcessOutcome::Exited { code, stderr, .. } => Err(AttemptError::NonZeroExit {
                command: command.to_string(),
                code,
                stderr: truncate_chars(stderr.trim(), MAX_STDERR_CHARS).to_string(),
            }),
            ProcessOutcome::TimedOut => Err(AttemptError::Timeout {
                command: command.to_string(),
                timeout: self.attempt_timeout,
            }),
        }
    }

    async fn run_process(&self, args: &[String]) -> std::io::Result<ProcessOutcome> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // The child lives inside the wait future; dropping that future on
        // timeout drops the child and sends SIGKILL.
        cmd.kill_on_drop(true);

        let child = cmd.spawn()?;
        let pid = child.id();

        match timeout(self.attempt_timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                debug!(
                    pid = ?pid,
                    code = ?output.status.code(),
                    stderr_len = output.stderr.len(),
                    "gemini cli exited"
                );
                Ok(ProcessOutcome::Exited {
                    code: output.status.code(),
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            Err(_) => {
                warn!(pid = ?pid, timeout_secs = self.attempt_timeout.as_secs_f64(), "gemini cli timed out, killed");
                Ok(ProcessOutcome::TimedOut)
            }
        }
    }
}

/// Fails with `ExecutableNotFound` unless `path` is an existing executable file.
pub fn check_executable(path: &Path) -> Result<(), ProxyError> {
    let not_found = |reason: &str| ProxyError::ExecutableNotFound {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let metadata = std::fs::metadata(path).map_err(|_| not_found("no such file"))?;
    if !metadata.is_file() {
        return Err(not_found("not a regular file"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(not_found("not executable"));
        }
    }

    Ok(())
}

/// Shell-quoted rendering of a command line. Only used for logs and
/// diagnostics; the process is always spawned from the argument vector.
pub fn display_command(executable: &Path, args: &[String]) -> String {
    let executable = executable.to_string_lossy();
    let words = std::iter::once(executable.as_ref()).chain(args.iter().map(String::as_str));
    shlex::try_join(words).unwrap_or_else(|_| {
        std::iter::once(executable.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    })
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
