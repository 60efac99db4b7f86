//! Plugin execution via JSON-RPC over a subprocess
//!
//! Every call spawns a fresh subprocess for the plugin's binary, writes one
//! request to its stdin, and collects its stdout - either as a single
//! response (`execute`) or as an incrementally decoded stream of responses
//! (`stream_execute`). Cancellation is observed promptly: process-wait and
//! stream-read overlap in concurrent tasks, and a fired cancellation token
//! always leads to escalating termination (SIGTERM, bounded wait, SIGKILL)
//! with the exit status reaped before the call returns. No process or
//! background task outlives the call.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::error::ExecError;
use super::types::{
    AgentResult, AgentRunParams, Plugin, Request, Response, WorkflowResult,
    WorkflowRunParams, JSONRPC_VERSION,
};

/// Default timeout for plugin execution.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How long a terminated plugin gets to exit before being force-killed.
const TERMINATION_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Monotonic JSON-RPC request id source, shared across executors by the
/// host. An explicit handle instead of ambient global state so tests can
/// control and assert on the sequence.
#[derive(Clone, Debug, Default)]
pub struct RequestIds {
    next: Arc<AtomicU64>,
}

impl RequestIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// A counter whose first issued id is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(first.saturating_sub(1))),
        }
    }

    /// Allocate the next id. Ids start at 1.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Drives one JSON-RPC exchange against a plugin's binary.
pub struct Executor {
    plugin: Plugin,
    ids: RequestIds,
}

impl Executor {
    pub fn new(plugin: &Plugin) -> Self {
        Self {
            plugin: plugin.clone(),
            ids: RequestIds::new(),
        }
    }

    /// Share a request id counter with other executors (or a test).
    pub fn with_request_ids(mut self, ids: RequestIds) -> Self {
        self.ids = ids;
        self
    }

    /// Execute a JSON-RPC method on the plugin and decode its result.
    ///
    /// The subprocess is spawned fresh, fed the request on stdin, and reaped
    /// before this returns - on success, on error, and on cancellation
    /// alike. A non-zero exit is an error carrying captured stderr; a
    /// JSON-RPC `error` field becomes [`ExecError::Rpc`].
    pub async fn execute<P, R>(
        &self,
        method: &str,
        params: Option<P>,
        cancel: &CancellationToken,
    ) -> Result<R, ExecError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let request = self.build_request(method, params)?;
        let data = serde_json::to_vec(&request).map_err(ExecError::EncodeRequest)?;

        let mut child = self.spawn()?;
        let mut stdin = take_stdin(&mut child)?;
        let stdout = take_stdout(&mut child)?;
        let stderr = take_stderr(&mut child)?;

        // Collect both output streams in background tasks so the child can
        // never block on a full pipe while we wait on it.
        let mut stdout_task: JoinHandle<io::Result<Vec<u8>>> = tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await?;
            Ok(buf)
        });
        let stderr_task: JoinHandle<io::Result<String>> = tokio::spawn(async move {
            let mut stderr = stderr;
            let mut buf = String::new();
            stderr.read_to_string(&mut buf).await?;
            Ok(buf)
        });

        // Write the request, then close stdin so the plugin sees EOF.
        let write_result = async {
            stdin.write_all(&data).await?;
            stdin.shutdown().await
        }
        .await;
        drop(stdin);

        // A plugin that exits without reading its stdin breaks the pipe;
        // that is its prerogative, so only real write failures are errors.
        if let Err(err) = write_result {
            if err.kind() != io::ErrorKind::BrokenPipe {
                terminate(&mut child).await;
                abort_task(stdout_task).await;
                abort_task(stderr_task).await;
                return Err(ExecError::Stdin(err));
            }
        }

        // Read the full response while observing cancellation.
        let stdout_read = tokio::select! {
            res = &mut stdout_task => Some(res),
            _ = cancel.cancelled() => None,
        };

        let stdout_buf = match stdout_read {
            Some(res) => match flatten_join(res) {
                Ok(buf) => buf,
                Err(err) => {
                    terminate(&mut child).await;
                    abort_task(stderr_task).await;
                    return Err(ExecError::Stdout(err));
                }
            },
            None => {
                terminate(&mut child).await;
                abort_task(stdout_task).await;
                abort_task(stderr_task).await;
                return Err(ExecError::Cancelled);
            }
        };

        // Wait for exit, still observing cancellation. The termination path
        // reaps the process itself, so neither branch can leak a child.
        let status = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => status,
                Err(err) => {
                    terminate(&mut child).await;
                    abort_task(stderr_task).await;
                    return Err(ExecError::Wait(err));
                }
            },
            _ = cancel.cancelled() => {
                terminate(&mut child).await;
                abort_task(stderr_task).await;
                return Err(ExecError::Cancelled);
            }
        };

        let stderr_text = drain(stderr_task).await.unwrap_or_default();

        if !status.success() {
            return Err(ExecError::NonZeroExit {
                status,
                stderr: stderr_text,
            });
        }

        let response: Response =
            serde_json::from_slice(&stdout_buf).map_err(ExecError::Protocol)?;

        if let Some(err) = response.error {
            return Err(ExecError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(ExecError::Protocol)
    }

    /// Run an agent plugin's `run` method.
    pub async fn execute_agent(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<AgentResult, ExecError> {
        let params = AgentRunParams {
            prompt: prompt.to_string(),
            context: HashMap::new(),
        };
        self.execute("run", Some(params), cancel).await
    }

    /// Run a workflow plugin's `run` method.
    pub async fn execute_workflow(
        &self,
        params: WorkflowRunParams,
        cancel: &CancellationToken,
    ) -> Result<WorkflowResult, ExecError> {
        self.execute("run", Some(params), cancel).await
    }

    /// Query the plugin's `info` method.
    pub async fn plugin_info(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Value, ExecError> {
        self.execute("info", None::<Value>, cancel).await
    }

    /// Execute an agent plugin's `stream` method.
    ///
    /// Stderr lines are relayed to the optional log sink (or traced when
    /// none is given) while stdout is decoded incrementally as a sequence of
    /// JSON-RPC responses, one per line. The loop ends on the first response
    /// whose result carries a terminal status ("done" or "failed"), which
    /// becomes the return value; reaching EOF without one is an error.
    /// Cancellation kills the subprocess immediately rather than waiting for
    /// the stream to end naturally.
    pub async fn stream_execute(
        &self,
        prompt: &str,
        stderr_log: Option<mpsc::UnboundedSender<String>>,
        cancel: &CancellationToken,
    ) -> Result<AgentResult, ExecError> {
        let params = AgentRunParams {
            prompt: prompt.to_string(),
            context: HashMap::new(),
        };
        let request = self.build_request("stream", Some(params))?;
        let data = serde_json::to_vec(&request).map_err(ExecError::EncodeRequest)?;

        let mut child = self.spawn()?;
        let mut stdin = take_stdin(&mut child)?;
        let stdout = take_stdout(&mut child)?;
        let stderr = take_stderr(&mut child)?;

        let plugin_name = self.plugin.name.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match &stderr_log {
                    Some(sink) => {
                        let _ = sink.send(line);
                    }
                    None => {
                        tracing::debug!(plugin = %plugin_name, "{}", line);
                    }
                }
            }
        });

        let write_result = async {
            stdin.write_all(&data).await?;
            stdin.shutdown().await
        }
        .await;
        drop(stdin);

        if let Err(err) = write_result {
            if err.kind() != io::ErrorKind::BrokenPipe {
                terminate(&mut child).await;
                abort_task(stderr_task).await;
                return Err(ExecError::Stdin(err));
            }
        }

        let mut lines = BufReader::new(stdout).lines();
        let mut final_result = None;

        loop {
            let line = tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        terminate(&mut child).await;
                        abort_task(stderr_task).await;
                        return Err(ExecError::Stdout(err));
                    }
                },
                _ = cancel.cancelled() => {
                    terminate(&mut child).await;
                    abort_task(stderr_task).await;
                    return Err(ExecError::Cancelled);
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let response: Response = match serde_json::from_str(&line) {
                Ok(response) => response,
                Err(err) => {
                    terminate(&mut child).await;
                    abort_task(stderr_task).await;
                    return Err(ExecError::Protocol(err));
                }
            };

            if let Some(err) = response.error {
                terminate(&mut child).await;
                abort_task(stderr_task).await;
                return Err(ExecError::Rpc {
                    code: err.code,
                    message: err.message,
                });
            }

            if let Some(result) = response.result {
                if let Ok(result) = serde_json::from_value::<AgentResult>(result) {
                    if result.is_terminal() {
                        final_result = Some(result);
                        break;
                    }
                }
            }
        }

        // Terminal result received or stream ended: give the plugin its
        // grace period to exit on its own, escalating if it lingers.
        let status = match tokio::time::timeout(TERMINATION_GRACE_PERIOD, child.wait()).await
        {
            Ok(Ok(status)) => {
                let _ = stderr_task.await;
                Some(status)
            }
            Ok(Err(err)) => {
                terminate(&mut child).await;
                abort_task(stderr_task).await;
                return Err(ExecError::Wait(err));
            }
            Err(_) => {
                terminate(&mut child).await;
                abort_task(stderr_task).await;
                None
            }
        };

        match final_result {
            Some(result) => Ok(result),
            None => match status {
                Some(status) if !status.success() => Err(ExecError::NonZeroExit {
                    status,
                    stderr: String::new(),
                }),
                _ => Err(ExecError::NoResult),
            },
        }
    }

    /// Working directory for plugin execution: the plugin's `work_dir`
    /// config entry, defaulting to the current directory.
    pub fn work_dir(&self) -> PathBuf {
        match self.plugin.config.get("work_dir") {
            Some(toml::Value::String(dir)) => PathBuf::from(dir),
            _ => PathBuf::from("."),
        }
    }

    fn build_request<P: Serialize>(
        &self,
        method: &str,
        params: Option<P>,
    ) -> Result<Request, ExecError> {
        let params = match params {
            Some(params) => {
                Some(serde_json::to_value(params).map_err(ExecError::EncodeRequest)?)
            }
            None => None,
        };

        Ok(Request {
            jsonrpc: JSONRPC_VERSION,
            id: self.ids.next(),
            method: method.to_string(),
            params,
        })
    }

    fn spawn(&self) -> Result<Child, ExecError> {
        let mut command = Command::new(&self.plugin.binary_path);
        command
            .current_dir(self.work_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Backstop only; the normal paths reap the child explicitly.
            .kill_on_drop(true);

        for (key, value) in self.env_vars() {
            command.env(key, value);
        }

        tracing::debug!(
            plugin = %self.plugin.name,
            binary = %self.plugin.binary_path.display(),
            "spawning plugin process"
        );

        command.spawn().map_err(|err| ExecError::Spawn {
            path: self.plugin.binary_path.clone(),
            source: err,
        })
    }

    /// Environment contract injected into every spawned plugin process, on
    /// top of the inherited environment: `LOOPER_PLUGIN_NAME` / `VERSION` /
    /// `CATEGORY` / `PATH` plus one `LOOPER_PLUGIN_<KEY>` per config entry.
    pub(crate) fn env_vars(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();

        for (key, value) in &self.plugin.config {
            env.push((
                format!("LOOPER_PLUGIN_{}", env_key(key)),
                env_value(value),
            ));
        }

        env.push(("LOOPER_PLUGIN_NAME".to_string(), self.plugin.name.clone()));
        if !self.plugin.version.is_empty() {
            env.push((
                "LOOPER_PLUGIN_VERSION".to_string(),
                self.plugin.version.clone(),
            ));
        }
        env.push((
            "LOOPER_PLUGIN_CATEGORY".to_string(),
            self.plugin.category.to_string(),
        ));
        env.push((
            "LOOPER_PLUGIN_PATH".to_string(),
            self.plugin.path.display().to_string(),
        ));

        env
    }
}

/// Run an agent plugin with a bounded cancellation window.
pub async fn execute_agent_with_timeout(
    plugin: &Plugin,
    prompt: &str,
    timeout: Duration,
) -> Result<AgentResult, ExecError> {
    let executor = Executor::new(plugin);
    let (cancel, timer) = deadline(timeout);

    let result = executor.execute_agent(prompt, &cancel).await;
    timer.abort();

    map_timeout(result, timeout)
}

/// Run a workflow plugin with a bounded cancellation window.
pub async fn execute_workflow_with_timeout(
    plugin: &Plugin,
    params: WorkflowRunParams,
    timeout: Duration,
) -> Result<WorkflowResult, ExecError> {
    let executor = Executor::new(plugin);
    let (cancel, timer) = deadline(timeout);

    let result = executor.execute_workflow(params, &cancel).await;
    timer.abort();

    map_timeout(result, timeout)
}

/// Stream an agent plugin with a bounded cancellation window.
pub async fn stream_execute_with_timeout(
    plugin: &Plugin,
    prompt: &str,
    stderr_log: Option<mpsc::UnboundedSender<String>>,
    timeout: Duration,
) -> Result<AgentResult, ExecError> {
    let executor = Executor::new(plugin);
    let (cancel, timer) = deadline(timeout);

    let result = executor.stream_execute(prompt, stderr_log, &cancel).await;
    timer.abort();

    map_timeout(result, timeout)
}

fn deadline(timeout: Duration) -> (CancellationToken, JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let timer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        })
    };
    (cancel, timer)
}

fn map_timeout<T>(result: Result<T, ExecError>, timeout: Duration) -> Result<T, ExecError> {
    match result {
        Err(ExecError::Cancelled) => Err(ExecError::Timeout(timeout)),
        other => other,
    }
}

/// Abort a reader task and await it so it cannot outlive the call. Aborted
/// rather than awaited to completion because an orphaned grandchild may
/// hold the pipes open indefinitely.
async fn abort_task<T>(task: JoinHandle<T>) {
    task.abort();
    let _ = task.await;
}

/// Gracefully terminate a plugin process: SIGTERM, a bounded wait for exit,
/// then SIGKILL. Always reaps the child before returning so no process is
/// left running or unreaped.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(TERMINATION_GRACE_PERIOD, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            // Did not exit within the grace period; kill() force-kills and
            // reaps.
            let _ = child.kill().await;
        }
    }
}

fn take_stdin(child: &mut Child) -> Result<tokio::process::ChildStdin, ExecError> {
    child
        .stdin
        .take()
        .ok_or_else(|| ExecError::Stdin(other_io("failed to capture stdin")))
}

fn take_stdout(child: &mut Child) -> Result<tokio::process::ChildStdout, ExecError> {
    child
        .stdout
        .take()
        .ok_or_else(|| ExecError::Stdout(other_io("failed to capture stdout")))
}

fn take_stderr(child: &mut Child) -> Result<tokio::process::ChildStderr, ExecError> {
    child
        .stderr
        .take()
        .ok_or_else(|| ExecError::Stdout(other_io("failed to capture stderr")))
}

fn other_io(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, message.to_string())
}

fn flatten_join<T>(res: Result<io::Result<T>, JoinError>) -> io::Result<T> {
    match res {
        Ok(result) => result,
        Err(err) => Err(io::Error::new(io::ErrorKind::Other, err)),
    }
}

/// Await a reader task, flattening join failures into I/O errors.
async fn drain<T>(task: JoinHandle<io::Result<T>>) -> io::Result<T> {
    flatten_join(task.await)
}

/// Derive the `LOOPER_PLUGIN_<KEY>` suffix from a config key: uppercase,
/// with every run of non-alphanumeric characters collapsed to a single `_`.
fn env_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());

    for c in key.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_uppercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }

    out
}

/// Stringify a config value for the environment: booleans become "0"/"1",
/// string arrays join with commas, everything else uses its natural form.
fn env_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Boolean(true) => "1".to_string(),
        toml::Value::Boolean(false) => "0".to_string(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Datetime(dt) => dt.to_string(),
        toml::Value::Array(items) => items
            .iter()
            .map(env_value)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}
