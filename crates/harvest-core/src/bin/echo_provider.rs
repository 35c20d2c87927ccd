//! Reference tool provider speaking the stdio protocol.
//!
//! Methods: `ping`, `echo`, `env`, `fail`, `sleep`, `crash`, `mismatch`, `noise`,
//! `garbled` (invalid UTF-8 on both output streams before answering).
//! Used by integration tests and for smoke-checking a registry.

use std::time::Duration;

use harvest_core::provider::protocol::{frame, parse_request, ToolRequest, ToolResponse};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let request = match parse_request(&line) {
            Ok(request) => request,
            Err(error) => {
                eprintln!("echo-provider: unparseable request: {error}");
                continue;
            }
        };
        match handle(&request, &mut stdout).await? {
            Some(response) => write(&mut stdout, &response).await?,
            None => std::process::exit(3),
        }
    }
}

/// `None` means the provider should die without answering.
async fn handle(request: &ToolRequest, stdout: &mut Stdout) -> std::io::Result<Option<ToolResponse>> {
    let id = request.id.clone();
    let response = match request.method.as_str() {
        "ping" => ToolResponse::success(id, json!({ "pong": true })),
        "echo" => ToolResponse::success(id, request.params.clone()),
        "env" => {
            let name = request.params.get("name").and_then(Value::as_str).unwrap_or_default();
            ToolResponse::success(id, json!({ "value": std::env::var(name).ok() }))
        }
        "fail" => {
            let message = request
                .params
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("requested failure");
            ToolResponse::failure(id, message)
        }
        "sleep" => {
            let ms = request.params.get("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ToolResponse::success(id, json!({ "slept_ms": ms }))
        }
        "crash" => return Ok(None),
        "mismatch" => {
            let stray = ToolResponse::success(format!("stray-{id}"), json!({ "stray": true }));
            write(stdout, &stray).await?;
            ToolResponse::success(id, json!({ "matched": true }))
        }
        "noise" => {
            eprintln!("echo-provider: noise on stderr");
            stdout.write_all(b"not a protocol line\n").await?;
            ToolResponse::success(id, json!({ "ok": true }))
        }
        "garbled" => {
            let mut stderr = tokio::io::stderr();
            stderr.write_all(b"echo-provider: bad bytes \xff\xfe\n").await?;
            stderr.flush().await?;
            stdout.write_all(b"log \xff\xfe\n").await?;
            ToolResponse::success(id, json!({ "ok": true }))
        }
        other => ToolResponse::failure(id, format!("unknown method '{other}'")),
    };
    Ok(Some(response))
}

async fn write(stdout: &mut Stdout, response: &ToolResponse) -> std::io::Result<()> {
    let framed = frame(response).map_err(std::io::Error::other)?;
    stdout.write_all(framed.as_bytes()).await?;
    stdout.flush().await
}
