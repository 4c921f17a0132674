//! Persistent interactive command session with sentinel-framed output.
//!
//! The backing process exposes no structured message boundaries, so each
//! command is followed by an echo of a per-session sentinel token; everything
//! buffered before the token is that command's output. This is best-effort
//! framing: the sentinel carries a random suffix per session lifetime, so a
//! collision requires the command itself to print the token.

use sha2::{Digest, Sha256};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use toolpipe_core::{Error, Result, Tool, ToolResult};

const DEFAULT_SHELL: &str = "/bin/bash";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Running,
    TimedOut,
    Terminated,
}

fn fresh_sentinel() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    let mut h = Sha256::new();
    h.update(std::process::id().to_le_bytes());
    h.update(nanos.to_le_bytes());
    let digest = hex::encode(h.finalize());
    format!("<<exit:{}>>", &digest[..12])
}

fn drain_into(mut reader: impl AsyncRead + Unpin + Send + 'static, buf: Arc<Mutex<Vec<u8>>>) {
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buf
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend_from_slice(&chunk[..n]),
            }
        }
    });
}

/// One OS-level interactive process plus its output/error buffers.
///
/// Holds no internal lock: `run` takes `&mut self`, so the owning caller
/// serializes access (one session per logical conversation).
pub struct CommandSession {
    shell: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout_buf: Arc<Mutex<Vec<u8>>>,
    stderr_buf: Arc<Mutex<Vec<u8>>>,
    state: SessionState,
    sentinel: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl Default for CommandSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSession {
    pub fn new() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            child: None,
            stdin: None,
            stdout_buf: Arc::new(Mutex::new(Vec::new())),
            stderr_buf: Arc::new(Mutex::new(Vec::new())),
            state: SessionState::Unstarted,
            sentinel: fresh_sentinel(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Spawn the backing process. Idempotent: a second call is a no-op.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Unstarted {
            return Ok(());
        }
        let mut child = Command::new(&self.shell)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ToolExecution(format!("failed to spawn {}: {e}", self.shell)))?;

        self.stdin = child.stdin.take();
        if let Some(out) = child.stdout.take() {
            drain_into(out, Arc::clone(&self.stdout_buf));
        }
        if let Some(err) = child.stderr.take() {
            drain_into(err, Arc::clone(&self.stderr_buf));
        }
        self.child = Some(child);
        self.state = SessionState::Running;
        Ok(())
    }

    /// Run one command and return exactly its output.
    ///
    /// Empty commands are valid and drain output already produced by a prior
    /// command. Interrupt strings ("ctrl+c" etc.) are forwarded unparsed.
    pub async fn run(&mut self, command: &str) -> Result<ToolResult> {
        match self.state {
            SessionState::Unstarted | SessionState::Terminated => {
                return Err(Error::SessionNotStarted)
            }
            SessionState::TimedOut => return Err(Error::SessionTimeout(self.timeout.as_secs())),
            SessionState::Running => {}
        }

        let child = self.child.as_mut().ok_or(Error::SessionNotStarted)?;
        if let Ok(Some(status)) = child.try_wait() {
            // Structured failure, not an error: the caller decides whether to restart.
            let code = status.code().unwrap_or(-1);
            return Ok(ToolResult {
                output: None,
                error: Some(Error::ProcessExited(code).to_string()),
                system: Some("session must be restarted".to_string()),
            });
        }

        let line = if command.is_empty() {
            format!("echo '{}'\n", self.sentinel)
        } else {
            format!("{command}; echo '{}'\n", self.sentinel)
        };
        let stdin = self.stdin.as_mut().ok_or(Error::SessionNotStarted)?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::ToolExecution(format!("failed to write command: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::ToolExecution(format!("failed to flush command: {e}")))?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        let output = loop {
            tokio::time::sleep(self.poll_interval).await;
            let text = {
                let buf = self.stdout_buf.lock().unwrap_or_else(|e| e.into_inner());
                String::from_utf8_lossy(&buf).to_string()
            };
            if let Some(idx) = text.find(&self.sentinel) {
                break text[..idx].to_string();
            }
            if tokio::time::Instant::now() >= deadline {
                self.state = SessionState::TimedOut;
                return Err(Error::SessionTimeout(self.timeout.as_secs()));
            }
        };
        let output = output.strip_suffix('\n').unwrap_or(&output).to_string();

        let error = {
            let buf = self.stderr_buf.lock().unwrap_or_else(|e| e.into_inner());
            String::from_utf8_lossy(&buf).to_string()
        };
        let error = error.strip_suffix('\n').unwrap_or(&error).to_string();

        self.stdout_buf
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.stderr_buf
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        Ok(ToolResult {
            output: Some(output),
            error: if error.is_empty() { None } else { Some(error) },
            system: None,
        })
    }

    /// Terminate the backing process. Safe to call when it already exited.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == SessionState::Unstarted {
            return Err(Error::SessionNotStarted);
        }
        if let Some(child) = self.child.as_mut() {
            let already_exited = matches!(child.try_wait(), Ok(Some(_)));
            if !already_exited {
                child
                    .start_kill()
                    .map_err(|e| Error::ToolExecution(format!("failed to kill session: {e}")))?;
            }
        }
        self.state = SessionState::Terminated;
        Ok(())
    }
}

const BASH_DESCRIPTION: &str = "Execute a bash command in the terminal.
* Long running commands: for commands that may run indefinitely, run them in the background and redirect output to a file, e.g. `python3 app.py > server.log 2>&1 &`.
* Interactive: send an empty `command` to retrieve additional output from a still-running process, or send `ctrl+c` to interrupt it.
* Timeout: if a command times out, the session must be restarted (`restart: true`); retry the command in the background afterwards.";

#[derive(Debug, serde::Deserialize)]
struct BashArgs {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    restart: bool,
}

/// The `bash` tool: one persistent [`CommandSession`] per tool instance.
///
/// The inner mutex serializes `run` calls; the session itself holds no lock.
#[derive(Default)]
pub struct BashTool {
    session: tokio::sync::Mutex<Option<CommandSession>>,
}

impl BashTool {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        BASH_DESCRIPTION
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute. Can be empty to view additional logs from a still-running process. Can be `ctrl+c` to interrupt it.",
                },
                "restart": {
                    "type": "boolean",
                    "description": "If true, discard the current session and start a fresh one.",
                },
            },
            "required": ["command"],
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult> {
        let args: BashArgs =
            serde_json::from_value(args).map_err(|e| Error::InvalidParams(e.to_string()))?;
        let mut guard = self.session.lock().await;

        if args.restart {
            // The only recovery path from a timed-out session.
            if let Some(session) = guard.as_mut() {
                let _ = session.stop();
            }
            let mut fresh = CommandSession::new();
            fresh.start().await?;
            *guard = Some(fresh);
            return Ok(ToolResult {
                output: None,
                error: None,
                system: Some("session has been restarted".to_string()),
            });
        }

        if guard.is_none() {
            let mut session = CommandSession::new();
            session.start().await?;
            *guard = Some(session);
        }

        let Some(command) = args.command else {
            return Err(Error::InvalidParams("no command provided".to_string()));
        };
        match guard.as_mut() {
            Some(session) => session.run(&command).await,
            None => Err(Error::SessionNotStarted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_session() -> CommandSession {
        CommandSession::new().with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn run_returns_exact_command_output_without_sentinel() {
        let mut s = quick_session();
        s.start().await.unwrap();
        let r = s.run("echo hello").await.unwrap();
        assert_eq!(r.output.as_deref(), Some("hello"));
        assert_eq!(r.error, None);
        let sentinel = s.sentinel.clone();
        assert!(!r.output.unwrap().contains(&sentinel));
    }

    #[tokio::test]
    async fn buffers_are_empty_after_run() {
        let mut s = quick_session();
        s.start().await.unwrap();
        s.run("echo hi; echo err >&2").await.unwrap();
        assert!(s.stdout_buf.lock().unwrap().is_empty());
        assert!(s.stderr_buf.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sequential_runs_do_not_leak_output_across_commands() {
        let mut s = quick_session();
        s.start().await.unwrap();
        let r1 = s.run("echo one").await.unwrap();
        let r2 = s.run("echo two").await.unwrap();
        assert_eq!(r1.output.as_deref(), Some("one"));
        assert_eq!(r2.output.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn stderr_is_captured_separately() {
        let mut s = quick_session();
        s.start().await.unwrap();
        let r = s.run("echo out; echo oops >&2").await.unwrap();
        assert_eq!(r.output.as_deref(), Some("out"));
        assert_eq!(r.error.as_deref(), Some("oops"));
    }

    #[tokio::test]
    async fn empty_command_is_valid_and_drains_nothing() {
        let mut s = quick_session();
        s.start().await.unwrap();
        let r = s.run("").await.unwrap();
        assert_eq!(r.output.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn run_before_start_fails_with_session_not_started() {
        let mut s = quick_session();
        let err = s.run("echo hi").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotStarted));
    }

    #[tokio::test]
    async fn stop_before_start_fails_with_session_not_started() {
        let mut s = quick_session();
        let err = s.stop().unwrap_err();
        assert!(matches!(err, Error::SessionNotStarted));
    }

    #[tokio::test]
    async fn start_is_idempotent_while_running() {
        let mut s = quick_session();
        s.start().await.unwrap();
        s.start().await.unwrap();
        let r = s.run("echo still works").await.unwrap();
        assert_eq!(r.output.as_deref(), Some("still works"));
    }

    #[tokio::test]
    async fn timeout_poisons_the_session_until_restart() {
        let mut s = quick_session().with_timeout(Duration::from_millis(300));
        s.start().await.unwrap();

        let err = s.run("sleep 5").await.unwrap_err();
        assert!(matches!(err, Error::SessionTimeout(_)));
        assert_eq!(s.state(), SessionState::TimedOut);

        // Subsequent runs fail immediately, without re-waiting the timeout.
        let t0 = std::time::Instant::now();
        let err = s.run("echo hi").await.unwrap_err();
        assert!(matches!(err, Error::SessionTimeout(_)));
        assert!(t0.elapsed() < Duration::from_millis(100));

        // Stop + fresh session is the recovery path.
        s.stop().unwrap();
        let mut fresh = quick_session();
        fresh.start().await.unwrap();
        let r = fresh.run("echo recovered").await.unwrap();
        assert_eq!(r.output.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn run_after_stop_fails_with_session_not_started() {
        let mut s = quick_session();
        s.start().await.unwrap();
        s.stop().unwrap();
        let err = s.run("echo hi").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotStarted));
    }

    #[tokio::test]
    async fn exited_process_yields_restart_notice_with_exit_code() {
        let mut s = quick_session();
        s.start().await.unwrap();

        // Make the shell exit on its own, bypassing run() so no sentinel is pending.
        let stdin = s.stdin.as_mut().unwrap();
        stdin.write_all(b"exit 7\n").await.unwrap();
        stdin.flush().await.unwrap();
        for _ in 0..100 {
            if matches!(s.child.as_mut().unwrap().try_wait(), Ok(Some(_))) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let r = s.run("echo hi").await.unwrap();
        assert_eq!(r.system.as_deref(), Some("session must be restarted"));
        assert!(r.error.unwrap().contains("7"));
    }

    #[tokio::test]
    async fn stop_is_safe_when_process_already_exited() {
        let mut s = quick_session();
        s.start().await.unwrap();
        let stdin = s.stdin.as_mut().unwrap();
        stdin.write_all(b"exit 0\n").await.unwrap();
        stdin.flush().await.unwrap();
        for _ in 0..100 {
            if matches!(s.child.as_mut().unwrap().try_wait(), Ok(Some(_))) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        s.stop().unwrap();
        assert_eq!(s.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn sentinels_differ_across_sessions() {
        let a = CommandSession::new();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let b = CommandSession::new();
        assert_ne!(a.sentinel, b.sentinel);
    }

    #[tokio::test]
    async fn bash_tool_runs_commands_and_restarts() {
        let tool = BashTool::new();
        let r = tool
            .execute(serde_json::json!({"command": "echo from tool"}))
            .await
            .unwrap();
        assert_eq!(r.output.as_deref(), Some("from tool"));

        let r = tool
            .execute(serde_json::json!({"restart": true}))
            .await
            .unwrap();
        assert_eq!(r.system.as_deref(), Some("session has been restarted"));

        let r = tool
            .execute(serde_json::json!({"command": "echo after restart"}))
            .await
            .unwrap();
        assert_eq!(r.output.as_deref(), Some("after restart"));
    }

    #[tokio::test]
    async fn bash_tool_rejects_missing_command() {
        let tool = BashTool::new();
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }
}
