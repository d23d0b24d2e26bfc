//! A spawned tool-server process and the task that owns it.
//!
//! The pipes and the table of in-flight requests live inside one owner task
//! spawned on the runtime that started the process. Callers talk to it
//! through a channel. The handle remembers that runtime's id: a caller on a
//! different runtime cannot rely on the owner task being driven, so the
//! adapter kills the child through the handle and respawns locally. When
//! the owning runtime shuts down the channel closes and
//! [`ServerProcess::is_alive`] reports false.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::runtime::{Handle, Id as RuntimeId};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Bytes of stderr kept for error reports.
const STDERR_TAIL: usize = 8 * 1024;
const EXIT_WAIT: Duration = Duration::from_secs(2);
const STDERR_WAIT: Duration = Duration::from_secs(1);
const EXIT_POLL: Duration = Duration::from_millis(20);

/// How to launch a tool server.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

type Reply = oneshot::Sender<Result<Value>>;

enum Op {
    Request { request: JsonRpcRequest, reply: Reply },
    Shutdown { done: oneshot::Sender<()> },
}

/// Handle to a running tool server.
pub struct ServerProcess {
    commands: mpsc::Sender<Op>,
    child: Arc<StdMutex<Child>>,
    runtime: RuntimeId,
    pid: Option<u32>,
    generation: u64,
}

impl ServerProcess {
    /// Spawn the server on the current runtime.
    pub fn spawn(launch: &LaunchSpec, generation: u64) -> Result<Self> {
        let mut command = Command::new(&launch.command);
        command
            .args(&launch.args)
            .envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| McpError::spawn_failed(format!("{}: {e}", launch.command)))?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stderr"))?;

        let child = Arc::new(StdMutex::new(child));
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(run_owner(child.clone(), stdin, stdout, stderr, rx));

        let runtime = Handle::current().id();
        debug!(command = %launch.command, ?pid, generation, %runtime, "Spawned tool server");
        Ok(Self {
            commands: tx,
            child,
            runtime,
            pid,
            generation,
        })
    }

    /// OS process id, if the platform reported one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Which spawn of the adapter this is.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Id of the runtime whose task owns the pipes.
    pub fn runtime_id(&self) -> RuntimeId {
        self.runtime
    }

    /// Whether the calling task runs on the owning runtime.
    pub fn is_local(&self) -> bool {
        Handle::try_current().is_ok_and(|h| h.id() == self.runtime)
    }

    /// False once the process exited or its owning runtime is gone.
    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Send one request and wait for the matching response.
    pub async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let request = JsonRpcRequest::new(uuid::Uuid::new_v4().to_string(), method, params);
        let (reply, response) = oneshot::channel();

        self.commands
            .send(Op::Request { request, reply })
            .await
            .map_err(|_| McpError::ConnectionClosed)?;

        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => Err(McpError::Timeout(timeout.as_secs())),
        }
    }

    /// Close stdin, give the process a moment to exit, then kill it.
    pub async fn shutdown(self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Op::Shutdown { done }).await.is_ok()
            && tokio::time::timeout(EXIT_WAIT + Duration::from_secs(1), finished)
                .await
                .is_ok()
        {
            return;
        }
        self.kill();
    }

    /// Kill the child without waiting on the owner task. Dropping the
    /// handle closes the channel, so the owner exits whenever its runtime
    /// next polls it.
    pub fn kill(self) {
        start_kill(&self.child);
    }
}

fn start_kill(child: &StdMutex<Child>) {
    if let Ok(mut child) = child.lock() {
        let _ = child.start_kill();
    }
}

/// Poll for the exit status for up to `within`.
async fn wait_exit(child: &StdMutex<Child>, within: Duration) -> Option<ExitStatus> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let polled = child.lock().ok().map(|mut c| c.try_wait());
        match polled {
            Some(Ok(Some(status))) => return Some(status),
            Some(Ok(None)) => {}
            _ => return None,
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(EXIT_POLL).await;
    }
}

enum Event {
    Command(Option<Op>),
    Line(std::io::Result<Option<String>>),
}

async fn run_owner(
    child: Arc<StdMutex<Child>>,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
    mut commands: mpsc::Receiver<Op>,
) {
    let stderr_tail = Arc::new(Mutex::new(String::new()));
    let stderr_task = tokio::spawn(collect_stderr(stderr, stderr_tail.clone()));

    let mut stdin = Some(stdin);
    let mut lines = BufReader::new(stdout).lines();
    let mut pending: HashMap<String, Reply> = HashMap::new();

    loop {
        let event = tokio::select! {
            cmd = commands.recv() => Event::Command(cmd),
            line = lines.next_line() => Event::Line(line),
        };

        match event {
            Event::Command(Some(Op::Request { request, reply })) => {
                pending.retain(|_, waiting| !waiting.is_closed());
                let mut line = match serde_json::to_string(&request) {
                    Ok(line) => line,
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                        continue;
                    }
                };
                line.push('\n');
                trace!(method = %request.method, id = %request.id, "-> tool server");
                pending.insert(request.id, reply);

                // A failed write means the process is going away; the reply
                // is answered with the exit status once stdout reaches EOF.
                let write_error = match stdin.as_mut() {
                    Some(pipe) => write_line(pipe, &line).await.err(),
                    None => None,
                };
                if let Some(e) = write_error {
                    debug!(error = %e, "Write to tool server failed");
                    stdin = None;
                }
            }
            Event::Command(Some(Op::Shutdown { done })) => {
                drop(stdin.take());
                if wait_exit(&child, EXIT_WAIT).await.is_none() {
                    start_kill(&child);
                }
                stderr_task.abort();
                let _ = done.send(());
                return;
            }
            Event::Command(None) => {
                start_kill(&child);
                stderr_task.abort();
                return;
            }
            Event::Line(Ok(Some(text))) => dispatch(&text, &mut pending),
            Event::Line(result) => {
                if let Err(e) = result {
                    debug!(error = %e, "Reading tool server stdout failed");
                }
                let code = match wait_exit(&child, EXIT_WAIT).await {
                    Some(status) => status.code(),
                    None => {
                        start_kill(&child);
                        None
                    }
                };
                let _ = tokio::time::timeout(STDERR_WAIT, stderr_task).await;
                let stderr = stderr_tail.lock().await.clone();
                warn!(?code, stderr = %stderr.trim(), "Tool server exited");

                commands.close();
                let mut waiting: Vec<Reply> = pending.into_values().collect();
                while let Ok(cmd) = commands.try_recv() {
                    if let Op::Request { reply, .. } = cmd {
                        waiting.push(reply);
                    }
                }
                for reply in waiting {
                    let _ = reply.send(Err(McpError::ProcessExited {
                        code,
                        stderr: stderr.clone(),
                    }));
                }
                return;
            }
        }
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

/// Route one stdout line to its waiting caller. Lines that are not
/// JSON-RPC responses, or that answer nobody, are skipped.
fn dispatch(text: &str, pending: &mut HashMap<String, Reply>) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    let response: JsonRpcResponse = match serde_json::from_str(trimmed) {
        Ok(r) => r,
        Err(_) => {
            trace!(line = %trimmed, "Skipping non-JSON output from tool server");
            return;
        }
    };
    let Some(reply) = response.id_key().and_then(|id| pending.remove(&id)) else {
        trace!(id = %response.id, "Skipping response with unknown id");
        return;
    };

    let result = match (response.error, response.result) {
        (Some(err), _) => Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        }),
        (None, Some(value)) => Ok(value),
        (None, None) => Ok(Value::Null),
    };
    let _ = reply.send(result);
}

async fn collect_stderr(stderr: ChildStderr, tail: Arc<Mutex<String>>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut tail = tail.lock().await;
                tail.push_str(&String::from_utf8_lossy(&buf[..n]));
                if tail.len() > STDERR_TAIL {
                    let mut cut = tail.len() - STDERR_TAIL;
                    while !tail.is_char_boundary(cut) {
                        cut += 1;
                    }
                    tail.drain(..cut);
                }
            }
        }
    }
}
