//! System module: command gateway, execution targets, environment checks
//!
//! Every external command the pipeline issues goes through a `CommandGateway`.
//! Callers build a structured `CommandSpec`; the gateway alone decides how it
//! is marshalled into the host or into a WSL profile shell.

pub mod health;
pub mod mock;
pub mod paths;
pub mod provision;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;

use crate::error::{GatewayError, PathFormatError};

pub use paths::{translate_host_path, TranslatedPath};

/// Program used to reach the isolated execution environment.
pub const ENVIRONMENT_TOOL: &str = "wsl";

/// Where a command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionTarget {
    /// Directly in the host shell.
    Host,
    /// Inside a named profile of the isolated execution environment.
    Profile(String),
}

impl ExecutionTarget {
    /// Empty profile names select the host.
    pub fn from_profile(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() {
            ExecutionTarget::Host
        } else {
            ExecutionTarget::Profile(name.to_string())
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, ExecutionTarget::Host)
    }

    pub fn profile(&self) -> Option<&str> {
        match self {
            ExecutionTarget::Host => None,
            ExecutionTarget::Profile(name) => Some(name),
        }
    }

    /// Address an absolute host path from inside this target.
    pub fn address_host_path(&self, path: &Path) -> Result<TranslatedPath, PathFormatError> {
        match self {
            ExecutionTarget::Host => Ok(TranslatedPath {
                path: path.to_string_lossy().replace('\\', "/"),
                exact: true,
            }),
            ExecutionTarget::Profile(_) => translate_host_path(&path.to_string_lossy()),
        }
    }
}

impl std::fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionTarget::Host => write!(f, "host"),
            ExecutionTarget::Profile(name) => write!(f, "profile '{}'", name),
        }
    }
}

/// Structured command: program, arguments, working directory, environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
    /// Payload written to the child's stdin.
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// Program and arguments, shell-quoted, for logs and error messages.
    pub fn display(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }

    /// Program and arguments joined by spaces, unquoted.
    pub fn plain(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }

    /// Single shell script equivalent to this command, for `bash -lc`.
    pub fn to_shell_script(&self) -> String {
        let mut script = String::new();
        if let Some(ref cwd) = self.cwd {
            script.push_str("cd ");
            script.push_str(&shell_words::quote(cwd));
            script.push_str(" && ");
        }
        if !self.env.is_empty() {
            script.push_str("env ");
            for (key, value) in &self.env {
                script.push_str(key);
                script.push('=');
                script.push_str(&shell_words::quote(value));
                script.push(' ');
            }
        }
        script.push_str(&self.display());
        script
    }
}

/// Captured result of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        CommandOutput {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Non-empty trimmed stdout lines.
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }
}

/// Executes one command in one target and waits for it.
///
/// Exactly one attempt per call. Retry policy belongs to the caller.
pub trait CommandGateway: Send + Sync {
    fn execute<'a>(
        &'a self,
        command: &'a CommandSpec,
        target: &'a ExecutionTarget,
    ) -> BoxFuture<'a, Result<CommandOutput, GatewayError>>;
}

/// Production gateway: spawns real processes with `tokio::process`.
pub struct SystemGateway {
    cancel_rx: watch::Receiver<bool>,
    timeout: Option<Duration>,
}

impl SystemGateway {
    pub fn new(cancel_rx: watch::Receiver<bool>) -> Self {
        SystemGateway {
            cancel_rx,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Marshal a spec into the process that actually runs.
    fn build_process(spec: &CommandSpec, target: &ExecutionTarget) -> Command {
        match target {
            ExecutionTarget::Host => {
                let mut command = Command::new(&spec.program);
                command.args(&spec.args);
                if let Some(ref cwd) = spec.cwd {
                    command.current_dir(cwd);
                }
                command.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                command
            }
            ExecutionTarget::Profile(profile) => {
                let mut command = Command::new(ENVIRONMENT_TOOL);
                command
                    .arg("-d")
                    .arg(profile)
                    .arg("--")
                    .arg("bash")
                    .arg("-lc")
                    .arg(spec.to_shell_script());
                command
            }
        }
    }

    async fn run(
        &self,
        spec: &CommandSpec,
        target: &ExecutionTarget,
    ) -> Result<CommandOutput, GatewayError> {
        let display = spec.display();
        let mut cancel_rx = self.cancel_rx.clone();
        if *cancel_rx.borrow() {
            return Err(GatewayError::Cancelled { command: display });
        }

        let mut process = Self::build_process(spec, target);
        process
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = process.spawn().map_err(|e| GatewayError::Spawn {
            command: display.clone(),
            reason: e.to_string(),
        })?;

        if let (Some(payload), Some(mut stdin)) = (spec.stdin.as_ref(), child.stdin.take()) {
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| GatewayError::Spawn {
                    command: display.clone(),
                    reason: format!("failed to write stdin: {}", e),
                })?;
            // Dropping stdin closes the pipe so the child sees EOF.
            drop(stdin);
        }

        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => futures::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut cancel_live = true;
        let output = loop {
            tokio::select! {
                // Cancellation wins over a child that exited in the same poll.
                biased;

                changed = cancel_rx.changed(), if cancel_live => {
                    // Sender gone: nobody can cancel any more, keep waiting.
                    if changed.is_err() {
                        cancel_live = false;
                        continue;
                    }
                    if *cancel_rx.borrow() {
                        // Dropping `wait` drops the child, which kills it.
                        return Err(GatewayError::Cancelled { command: display });
                    }
                }
                result = &mut wait => {
                    break result.map_err(|e| GatewayError::Spawn {
                        command: display.clone(),
                        reason: e.to_string(),
                    })?;
                }
                _ = &mut deadline => {
                    return Err(GatewayError::TimedOut {
                        command: display,
                        seconds: timeout.map(|t| t.as_secs()).unwrap_or_default(),
                    });
                }
            }
        };

        let stdout = decode_output(&output.stdout);
        let stderr = decode_output(&output.stderr);

        if output.status.success() {
            Ok(CommandOutput {
                stdout,
                stderr,
                exit_code: 0,
            })
        } else {
            Err(GatewayError::Failed {
                command: display,
                exit_code: output.status.code(),
                stderr,
            })
        }
    }
}

impl CommandGateway for SystemGateway {
    fn execute<'a>(
        &'a self,
        command: &'a CommandSpec,
        target: &'a ExecutionTarget,
    ) -> BoxFuture<'a, Result<CommandOutput, GatewayError>> {
        self.run(command, target).boxed()
    }
}

/// Lossy decode; strips the NULs and BOMs of UTF-16 output from `wsl.exe`.
pub fn decode_output(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != '\0' && *c != '\u{feff}')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_profile_empty_is_host() {
        assert_eq!(ExecutionTarget::from_profile("  "), ExecutionTarget::Host);
        assert_eq!(
            ExecutionTarget::from_profile("kali-linux"),
            ExecutionTarget::Profile("kali-linux".to_string())
        );
    }

    #[test]
    fn test_shell_script_quotes_every_word() {
        let spec = CommandSpec::new("git")
            .args(["apply", "-p1", "--check", "/tmp/it's here.patch"])
            .current_dir("/mnt/c/Users/me/kernel source")
            .env("ARCH", "arm64");
        assert_eq!(
            spec.to_shell_script(),
            "cd '/mnt/c/Users/me/kernel source' && env ARCH=arm64 git apply -p1 --check '/tmp/it'\\''s here.patch'"
        );
    }

    #[test]
    fn test_decode_output_strips_utf16_nuls() {
        let raw = b"k\0a\0l\0i\0-\0l\0i\0n\0u\0x\0\r\0\n\0";
        assert_eq!(decode_output(raw).trim(), "kali-linux");
    }

    #[test]
    fn test_output_lines_skip_blanks() {
        let output = CommandOutput::success("a\n\n  b  \n");
        assert_eq!(output.lines(), vec!["a".to_string(), "b".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_host_execution_captures_output() {
        let (_tx, rx) = watch::channel(false);
        let gateway = SystemGateway::new(rx);
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2"]);
        let output = gateway.execute(&spec, &ExecutionTarget::Host).await.unwrap();
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_host_failure_reports_exit_code_and_stderr() {
        let (_tx, rx) = watch::channel(false);
        let gateway = SystemGateway::new(rx);
        let spec = CommandSpec::new("sh").args(["-c", "echo broken >&2; exit 3"]);
        let err = gateway
            .execute(&spec, &ExecutionTarget::Host)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
        match err {
            GatewayError::Failed { stderr, .. } => assert_eq!(stderr.trim(), "broken"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_payload_reaches_child() {
        let (_tx, rx) = watch::channel(false);
        let gateway = SystemGateway::new(rx);
        let spec = CommandSpec::new("cat").stdin("CONFIG_PACKET=y\n");
        let output = gateway.execute(&spec, &ExecutionTarget::Host).await.unwrap();
        assert_eq!(output.stdout, "CONFIG_PACKET=y\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_kills_in_flight_command() {
        let (tx, rx) = watch::channel(false);
        let gateway = SystemGateway::new(rx);
        let spec = CommandSpec::new("sleep").arg("30");

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
            tx
        });

        let started = std::time::Instant::now();
        let err = gateway
            .execute(&spec, &ExecutionTarget::Host)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
        let _ = canceller.await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_distinct_from_failure() {
        let (_tx, rx) = watch::channel(false);
        let gateway = SystemGateway::new(rx).with_timeout(Some(Duration::from_millis(100)));
        let spec = CommandSpec::new("sleep").arg("30");
        let err = gateway
            .execute(&spec, &ExecutionTarget::Host)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_pre_cancelled_gateway_refuses_to_spawn() {
        let (_tx, rx) = watch::channel(true);
        let gateway = SystemGateway::new(rx);
        let spec = CommandSpec::new("definitely-not-a-real-binary");
        let err = gateway
            .execute(&spec, &ExecutionTarget::Host)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
