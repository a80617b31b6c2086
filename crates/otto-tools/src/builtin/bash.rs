// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::sanitize::{sanitize_output, tail_truncate};
use crate::tool::{ProgressSink, Tool, ToolCall, ToolOutput, ToolProgress};

/// Byte ceiling for inline output returned to the model.  Larger output is
/// tail-truncated; errors and summaries live at the end of build/test runs.
const INLINE_LIMIT_BYTES: usize = 20_000;

/// Past this many raw bytes, the full stream is spooled to a temp file whose
/// path is reported in `details.fullOutputPath`.
const SPOOL_THRESHOLD_BYTES: usize = 65_536;

/// Built-in tool that runs a shell command in its own process group.
pub struct BashTool {
    pub inline_limit: usize,
    pub spool_threshold: usize,
}

impl Default for BashTool {
    fn default() -> Self {
        Self {
            inline_limit: INLINE_LIMIT_BYTES,
            spool_threshold: SPOOL_THRESHOLD_BYTES,
        }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return combined stdout + stderr.\n\
         Output is stripped of ANSI escapes and truncated from the head when\n\
         oversized; the full raw stream is then saved to a temp file whose\n\
         path appears in the result details.\n\
         Prefer non-interactive commands; avoid anything that needs a TTY.\n\
         Do NOT use bash for file operations: use read / write / edit / grep\n\
         / find / ls instead."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command line to execute."
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to cwd)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Optional wall-clock timeout in seconds"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn interruptible(&self) -> bool {
        true
    }

    fn preview(&self, args: &Value) -> Option<String> {
        args.get("command")
            .and_then(Value::as_str)
            .map(|c| c.chars().take(80).collect())
    }

    async fn execute(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> ToolOutput {
        let command = match call.args.get("command").and_then(Value::as_str) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'command'"),
        };
        let workdir = call
            .args
            .get("workdir")
            .and_then(Value::as_str)
            .map(str::to_string);
        let timeout = call.args.get("timeout_secs").and_then(Value::as_u64);

        debug!(cmd = %command, "executing bash tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&command);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // setsid() detaches the child into its own session and process
        // group, so cancellation can kill the whole subtree and the child
        // cannot reach the controlling terminal.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        if let Some(wd) = &workdir {
            cmd.current_dir(wd);
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("spawn error: {e}")),
        };
        let pgid = child.id().map(|pid| pid as i32);

        // Merge stdout and stderr in arrival order through one channel.
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(64);
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, chunk_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, chunk_tx.clone());
        }
        drop(chunk_tx);

        let deadline = timeout.map(|t| {
            tokio::time::Instant::now() + tokio::time::Duration::from_secs(t.max(1))
        });
        enum Next {
            Chunk(Vec<u8>),
            Closed,
            TimedOut,
        }
        let mut raw: Vec<u8> = Vec::new();
        let mut cancelled = false;
        let mut timed_out = false;
        loop {
            let next = async {
                match deadline {
                    Some(d) => match tokio::time::timeout_at(d, chunk_rx.recv()).await {
                        Ok(Some(bytes)) => Next::Chunk(bytes),
                        Ok(None) => Next::Closed,
                        Err(_) => Next::TimedOut,
                    },
                    None => match chunk_rx.recv().await {
                        Some(bytes) => Next::Chunk(bytes),
                        None => Next::Closed,
                    },
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    kill_group(pgid, &mut child).await;
                    break;
                }
                step = next => match step {
                    Next::Chunk(bytes) => {
                        let text = sanitize_output(&String::from_utf8_lossy(&bytes));
                        if !text.is_empty() {
                            let _ = progress
                                .send(ToolProgress {
                                    call_id: call.id.clone(),
                                    chunk: text,
                                })
                                .await;
                        }
                        raw.extend_from_slice(&bytes);
                    }
                    Next::Closed => break,
                    Next::TimedOut => {
                        timed_out = true;
                        kill_group(pgid, &mut child).await;
                        break;
                    }
                }
            }
        }
        // Drain whatever the readers still buffered after a kill.
        while let Ok(bytes) = chunk_rx.try_recv() {
            raw.extend_from_slice(&bytes);
        }

        let status = if cancelled || timed_out {
            None
        } else {
            child.wait().await.ok()
        };

        let sanitized = sanitize_output(&String::from_utf8_lossy(&raw));
        let mut details = json!({});
        let content = if raw.len() > self.spool_threshold {
            match spool_raw(&raw) {
                Ok(path) => {
                    details["fullOutputPath"] = json!(path);
                    tail_truncate(&sanitized, self.inline_limit)
                }
                Err(e) => {
                    warn!("failed to spool oversized bash output: {e}");
                    tail_truncate(&sanitized, self.inline_limit)
                }
            }
        } else {
            tail_truncate(&sanitized, self.inline_limit)
        };

        if cancelled {
            details["cancelled"] = json!(true);
            let body = if content.is_empty() {
                "Command aborted".to_string()
            } else {
                format!("Command aborted\n{content}")
            };
            return ToolOutput::err(&call.id, body).with_details(details);
        }
        if timed_out {
            details["cancelled"] = json!(true);
            let t = timeout.unwrap_or(0);
            return ToolOutput::err(&call.id, format!("timeout after {t}s\n{content}"))
                .with_details(details);
        }

        let code = status.and_then(|s| s.code()).unwrap_or(-1);
        details["exitCode"] = json!(code);
        let body = if content.is_empty() {
            format!("[exit {code}]")
        } else {
            content
        };
        if code == 0 {
            ToolOutput::ok(&call.id, body).with_details(details)
        } else {
            ToolOutput::err(&call.id, format!("[exit {code}]\n{body}")).with_details(details)
        }
    }
}

fn spawn_reader(
    reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    tx: mpsc::Sender<Vec<u8>>,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        loop {
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(buf).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Kill the whole process group, then reap the child.
async fn kill_group(pgid: Option<i32>, child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
    let _ = child.kill().await;
    let _ = child.wait().await;
}

/// Write the raw stream to a kept temp file and return its path.
fn spool_raw(raw: &[u8]) -> std::io::Result<String> {
    use std::io::Write;
    let mut tmp = tempfile::Builder::new()
        .prefix("otto-bash-")
        .suffix(".out")
        .tempfile()?;
    tmp.write_all(raw)?;
    let (_, path) = tmp.keep().map_err(|e| e.error)?;
    Ok(path.to_string_lossy().into_owned())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: "bash".into(),
            args,
        }
    }

    fn sink() -> ProgressSink {
        tokio::sync::mpsc::channel(64).0
    }

    // ── Successful execution ──────────────────────────────────────────────────

    #[tokio::test]
    async fn echo_returns_stdout_and_exit_code() {
        let t = BashTool::default();
        let out = t
            .execute(
                &call(json!({"command": "echo hello"})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("hello"));
        assert_eq!(out.details.unwrap()["exitCode"], 0);
    }

    #[tokio::test]
    async fn stdout_and_stderr_are_combined() {
        let t = BashTool::default();
        let out = t
            .execute(
                &call(json!({"command": "echo out && echo err >&2"})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(out.content.contains("out"));
        assert!(out.content.contains("err"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error_result() {
        let t = BashTool::default();
        let out = t
            .execute(
                &call(json!({"command": "exit 3"})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("[exit 3]"));
        assert_eq!(out.details.unwrap()["exitCode"], 3);
    }

    #[tokio::test]
    async fn ansi_escapes_are_stripped_from_output() {
        let t = BashTool::default();
        let out = t
            .execute(
                &call(json!({"command": "printf '\\033[31mred\\033[0m\\n'"})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(out.content.contains("red"));
        assert!(!out.content.contains('\u{1b}'));
    }

    #[tokio::test]
    async fn workdir_changes_cwd() {
        let t = BashTool::default();
        let out = t
            .execute(
                &call(json!({"command": "pwd", "workdir": "/tmp"})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(out.content.contains("/tmp"));
    }

    // ── Cancellation ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn cancellation_kills_the_process_tree() {
        let t = BashTool::default();
        let cancel = CancellationToken::new();
        let killer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            killer.cancel();
        });
        let started = std::time::Instant::now();
        let out = t
            .execute(
                &call(json!({"command": "sleep 100"})),
                &cancel,
                &sink(),
            )
            .await;
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
        assert!(out.is_error);
        assert!(out.content.to_lowercase().contains("aborted"));
        assert_eq!(out.details.unwrap()["cancelled"], true);
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let t = BashTool::default();
        let out = t
            .execute(
                &call(json!({"command": "sleep 60", "timeout_secs": 1})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("timeout"));
    }

    // ── Truncation and spooling ───────────────────────────────────────────────

    #[tokio::test]
    async fn output_at_threshold_is_not_spooled() {
        let t = BashTool {
            inline_limit: 1_000,
            spool_threshold: 4_096,
        };
        // head -c emits exactly the requested byte count.
        let out = t
            .execute(
                &call(json!({"command": "head -c 4096 /dev/zero | tr '\\0' 'a'"})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        let details = out.details.unwrap();
        assert!(details.get("fullOutputPath").is_none());
    }

    #[tokio::test]
    async fn output_one_byte_over_threshold_is_spooled() {
        let t = BashTool {
            inline_limit: 1_000,
            spool_threshold: 4_096,
        };
        let out = t
            .execute(
                &call(json!({"command": "head -c 4097 /dev/zero | tr '\\0' 'a'"})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        let details = out.details.unwrap();
        let path = details["fullOutputPath"].as_str().expect("spool path");
        let spooled = std::fs::read(path).unwrap();
        assert_eq!(spooled.len(), 4_097);
        std::fs::remove_file(path).ok();
        assert!(out.content.contains("omitted"));
    }

    // ── Progress streaming ────────────────────────────────────────────────────

    #[tokio::test]
    async fn partial_output_is_streamed_to_the_sink() {
        let t = BashTool::default();
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let out = t
            .execute(
                &call(json!({"command": "echo one; echo two"})),
                &CancellationToken::new(),
                &tx,
            )
            .await;
        assert!(!out.is_error);
        let mut chunks = String::new();
        while let Ok(p) = rx.try_recv() {
            chunks.push_str(&p.chunk);
        }
        assert!(chunks.contains("one"));
        assert!(chunks.contains("two"));
    }
}
