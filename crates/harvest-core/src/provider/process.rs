use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{frame, parse_response, ToolRequest, ToolResponse};
use super::registry::ProviderSpec;
use super::{ProviderError, ProviderEvent, ProviderFuture, ToolProvider};

const PING_TIMEOUT: Duration = Duration::from_secs(10);
const EXIT_GRACE: Duration = Duration::from_secs(1);

struct PendingCall {
    id: String,
    responder: oneshot::Sender<ToolResponse>,
}

type PendingSlot = Arc<Mutex<Option<PendingCall>>>;

fn lock_slot(slot: &PendingSlot) -> std::sync::MutexGuard<'_, Option<PendingCall>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tool provider running as a child process speaking line-delimited JSON on stdio.
///
/// Calls are serialized: the stdin lock is held from write until the matching
/// response (or timeout), so at most one request is in flight per process.
pub struct ProcessProvider {
    name: String,
    timeout: Duration,
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: Arc<tokio::sync::Mutex<Child>>,
    pending: PendingSlot,
    alive: Arc<AtomicBool>,
    readers: Vec<JoinHandle<()>>,
}

impl ProcessProvider {
    /// Spawns the provider process and starts its stdout/stderr readers.
    pub fn spawn(
        name: &str,
        spec: &ProviderSpec,
        events: broadcast::Sender<ProviderEvent>,
    ) -> Result<Self, ProviderError> {
        let argv = spec.argv();
        let Some((program, args)) = argv.split_first() else {
            return Err(ProviderError::process(name, "no command configured"));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&spec.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(key_env) = &spec.config.api_key_env {
            match std::env::var(key_env) {
                Ok(value) => {
                    command.env(key_env, value);
                }
                Err(_) => warn!(provider = name, env = %key_env, "api key variable is not set"),
            }
        }

        let mut child = command.spawn().map_err(|error| {
            let message = format!("failed to spawn '{program}': {error}");
            let _ = events.send(ProviderEvent::SpawnFailed {
                provider: name.to_owned(),
                message: message.clone(),
            });
            ProviderError::process(name, message)
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(ProviderError::process(name, "stdio pipes unavailable"));
        };

        let pid = child.id();
        info!(provider = name, pid, "provider started");
        let _ = events.send(ProviderEvent::Started {
            provider: name.to_owned(),
            pid,
        });

        let child = Arc::new(tokio::sync::Mutex::new(child));
        let pending: PendingSlot = Arc::new(Mutex::new(None));
        let alive = Arc::new(AtomicBool::new(true));

        let stdout_task = tokio::spawn(read_stdout(
            name.to_owned(),
            stdout,
            Arc::clone(&pending),
            Arc::clone(&alive),
            Arc::clone(&child),
            events.clone(),
        ));
        let stderr_task = tokio::spawn(read_stderr(name.to_owned(), stderr, events));

        Ok(Self {
            name: name.to_owned(),
            timeout: spec.config.timeout(),
            stdin: tokio::sync::Mutex::new(stdin),
            child,
            pending,
            alive,
            readers: vec![stdout_task, stderr_task],
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let mut stdin = self.stdin.lock().await;
        if !self.is_alive() {
            return Err(ProviderError::process(&self.name, "process is not running"));
        }

        let request = ToolRequest::new(method, params);
        let line = frame(&request)
            .map_err(|error| ProviderError::process(&self.name, format!("failed to encode request: {error}")))?;
        let (responder, receiver) = oneshot::channel();
        *lock_slot(&self.pending) = Some(PendingCall {
            id: request.id.clone(),
            responder,
        });

        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(error) = written {
            lock_slot(&self.pending).take();
            self.alive.store(false, Ordering::SeqCst);
            return Err(ProviderError::process(&self.name, format!("failed to write request: {error}")));
        }
        debug!(provider = %self.name, method, id = %request.id, "request sent");

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => match response.error {
                Some(error) => Err(ProviderError::remote(&self.name, method, error.message)),
                None => Ok(response.result.unwrap_or(Value::Null)),
            },
            Ok(Err(_)) => Err(ProviderError::process(
                &self.name,
                "process exited before responding",
            )),
            Err(_) => {
                lock_slot(&self.pending).take();
                Err(ProviderError::Timeout {
                    provider: self.name.clone(),
                    method: method.to_owned(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    pub async fn terminate(&self) {
        self.alive.store(false, Ordering::SeqCst);
        {
            let mut child = self.child.lock().await;
            if let Err(error) = child.kill().await {
                debug!(provider = %self.name, error = %error, "kill failed, process already gone");
            }
        }
        for reader in &self.readers {
            reader.abort();
        }
        // Dropping the responder fails any caller still waiting.
        lock_slot(&self.pending).take();
        info!(provider = %self.name, "provider stopped");
    }
}

impl ToolProvider for ProcessProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn call<'a>(&'a self, method: &'a str, params: Value) -> ProviderFuture<'a, Value> {
        Box::pin(self.call_with_timeout(method, params, self.timeout))
    }

    fn ping<'a>(&'a self) -> ProviderFuture<'a, Value> {
        let timeout = self.timeout.min(PING_TIMEOUT);
        Box::pin(self.call_with_timeout("ping", Value::Object(Default::default()), timeout))
    }

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.terminate())
    }
}

async fn read_stdout(
    name: String,
    stdout: tokio::process::ChildStdout,
    pending: PendingSlot,
    alive: Arc<AtomicBool>,
    child: Arc<tokio::sync::Mutex<Child>>,
    events: broadcast::Sender<ProviderEvent>,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        match read_lossy_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_response(&line) {
                    Some(response) => {
                        let mut slot = lock_slot(&pending);
                        let matches = slot.as_ref().is_some_and(|call| call.id == response.id);
                        if matches {
                            if let Some(call) = slot.take() {
                                let _ = call.responder.send(response);
                            }
                        } else {
                            debug!(provider = %name, id = %response.id, "ignoring response with unexpected id");
                        }
                    }
                    None => {
                        let _ = events.send(ProviderEvent::Diagnostic {
                            provider: name.clone(),
                            line,
                        });
                    }
                }
            }
            Ok(None) => break,
            Err(error) => {
                warn!(provider = %name, error = %error, "stdout read failed");
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    lock_slot(&pending).take();
    let code = {
        let mut child = child.lock().await;
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            _ => None,
        }
    };
    warn!(provider = %name, code, "provider exited");
    let _ = events.send(ProviderEvent::Exited {
        provider: name,
        code,
    });
}

async fn read_stderr(
    name: String,
    stderr: tokio::process::ChildStderr,
    events: broadcast::Sender<ProviderEvent>,
) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        match read_lossy_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                debug!(provider = %name, line = %line, "provider stderr");
                let _ = events.send(ProviderEvent::Diagnostic {
                    provider: name.clone(),
                    line,
                });
            }
            Ok(None) => break,
            Err(error) => {
                debug!(provider = %name, error = %error, "stderr read failed");
                break;
            }
        }
    }
}

/// Reads one newline-terminated line, replacing invalid UTF-8 instead of failing.
///
/// Returns `Ok(None)` at end of stream.
async fn read_lossy_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}
