// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent session façade: accepts user input, owns the queue of pending
//! messages, drives the turn loop, and publishes the event stream.
//!
//! The turn loop is the only writer to the session log in the steady
//! state; external commands enqueue input rather than racing with it.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use otto_auth::CredentialStore;
use otto_config::AgentConfig;
use otto_model::{
    ModelDescriptor, Provider, ProviderError, ReasoningLevel, ToolSchema, UnifiedRequest, Usage,
};
use otto_tools::{ToolProgress, ToolRegistry};

use crate::compact::{compact, CompactionOutcome};
use crate::error::CoreError;
use crate::events::{EventBus, MessageRole, SessionEvent, SubscriberId};
use crate::history::build_messages;
use crate::log::{BashRecord, EntryKind, MessageRecord, SessionLog};
use crate::prompts::system_prompt;
use crate::retry::backoff_delay;
use crate::turn::{run_turn, TurnContext, TurnOutcome};

/// Coarse state of the session, as shown in status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Streaming,
    Compacting,
    BashRunning,
}

/// A prompt waiting its turn.  Attachments are kept with the queued copy.
#[derive(Debug, Clone)]
struct QueuedPrompt {
    text: String,
    attachments: Vec<String>,
}

/// Construction parameters for [`AgentSession`].
pub struct SessionOptions {
    /// Base directory under which per-cwd session directories live.
    pub base_dir: PathBuf,
    pub cwd: PathBuf,
    pub model: ModelDescriptor,
    pub reasoning: ReasoningLevel,
    pub agent: AgentConfig,
}

struct Control {
    run_state: RunState,
    cancel: CancellationToken,
    queue: VecDeque<QueuedPrompt>,
    model: ModelDescriptor,
    reasoning: ReasoningLevel,
    last_usage: Option<Usage>,
}

/// Summary counters for status display.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub session_id: String,
    pub entries: usize,
    pub compactions: usize,
    pub last_usage: Option<Usage>,
}

/// The public façade over the session core.
pub struct AgentSession {
    provider: Arc<dyn Provider>,
    credentials: Arc<CredentialStore>,
    tools: Arc<ToolRegistry>,
    events: Arc<EventBus>,
    agent: AgentConfig,
    base_dir: PathBuf,
    control: Mutex<Control>,
    /// Single-writer gate over the log; held for the whole turn loop.
    drive: tokio::sync::Mutex<SessionLog>,
}

impl AgentSession {
    /// Start a brand-new session.
    pub fn create(
        options: SessionOptions,
        provider: Arc<dyn Provider>,
        credentials: Arc<CredentialStore>,
        tools: Arc<ToolRegistry>,
    ) -> Result<Self, CoreError> {
        let log = SessionLog::create(&options.base_dir, &options.cwd)?;
        Ok(Self::assemble(options, provider, credentials, tools, log))
    }

    /// Resume an existing session file.
    pub fn resume(
        path: &Path,
        options: SessionOptions,
        provider: Arc<dyn Provider>,
        credentials: Arc<CredentialStore>,
        tools: Arc<ToolRegistry>,
    ) -> Result<Self, CoreError> {
        let log = SessionLog::open(path)?;
        Ok(Self::assemble(options, provider, credentials, tools, log))
    }

    fn assemble(
        options: SessionOptions,
        provider: Arc<dyn Provider>,
        credentials: Arc<CredentialStore>,
        tools: Arc<ToolRegistry>,
        log: SessionLog,
    ) -> Self {
        Self {
            provider,
            credentials,
            tools,
            events: Arc::new(EventBus::new()),
            agent: options.agent,
            base_dir: options.base_dir,
            control: Mutex::new(Control {
                run_state: RunState::Idle,
                cancel: CancellationToken::new(),
                queue: VecDeque::new(),
                model: options.model,
                reasoning: options.reasoning,
                last_usage: None,
            }),
            drive: tokio::sync::Mutex::new(log),
        }
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    pub fn run_state(&self) -> RunState {
        self.control.lock().expect("control lock").run_state
    }

    pub async fn session_id(&self) -> String {
        self.drive.lock().await.session_id().to_string()
    }

    pub async fn log_path(&self) -> PathBuf {
        self.drive.lock().await.path().to_path_buf()
    }

    pub async fn stats(&self) -> SessionStats {
        let log = self.drive.lock().await;
        SessionStats {
            session_id: log.session_id().to_string(),
            entries: log.entries().len(),
            compactions: log
                .entries()
                .iter()
                .filter(|e| e.as_compaction().is_some())
                .count(),
            last_usage: self.control.lock().expect("control lock").last_usage,
        }
    }

    pub fn model(&self) -> ModelDescriptor {
        self.control.lock().expect("control lock").model.clone()
    }

    /// Switch models for subsequent turns; history is preserved.
    pub fn set_model(&self, model: ModelDescriptor) {
        self.control.lock().expect("control lock").model = model;
    }

    pub fn set_reasoning(&self, level: ReasoningLevel) {
        self.control.lock().expect("control lock").reasoning = level;
    }

    // ── Subscriptions ─────────────────────────────────────────────────────────

    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<SessionEvent>) {
        self.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.events.unsubscribe(id)
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Submit a user prompt.  When the session is idle this runs the turn
    /// loop to completion (including any messages queued meanwhile); when
    /// busy, the prompt joins the queue and is picked up by the running
    /// loop.
    pub async fn prompt(
        &self,
        text: impl Into<String>,
        attachments: Vec<String>,
    ) -> Result<(), CoreError> {
        let input = QueuedPrompt {
            text: text.into(),
            attachments,
        };
        {
            let mut c = self.control.lock().expect("control lock");
            if c.run_state != RunState::Idle {
                c.queue.push_back(input);
                return Ok(());
            }
            c.run_state = RunState::Streaming;
            c.cancel = CancellationToken::new();
        }
        let result = self.drive_loop(input).await;
        self.control.lock().expect("control lock").run_state = RunState::Idle;
        result
    }

    /// Queue a follow-up without starting a turn.
    pub fn queue_message(&self, text: impl Into<String>) {
        self.control
            .lock()
            .expect("control lock")
            .queue
            .push_back(QueuedPrompt {
                text: text.into(),
                attachments: vec![],
            });
    }

    /// Number of prompts waiting in the queue.
    pub fn queued(&self) -> usize {
        self.control.lock().expect("control lock").queue.len()
    }

    /// Cancel the active turn and any running tool.  The queue is kept.
    pub fn abort(&self) {
        let c = self.control.lock().expect("control lock");
        debug!("abort requested");
        c.cancel.cancel();
    }

    /// Run a user-driven shell command as a first-class, loggable event,
    /// independent of assistant turns.  Output chunks stream to `on_chunk`.
    pub async fn execute_bash(
        &self,
        command: &str,
        mut on_chunk: impl FnMut(&str) + Send,
    ) -> Result<BashRecord, CoreError> {
        let cancel = self.enter(RunState::BashRunning)?;
        let result = async {
            let mut log = self.drive.lock().await;
            let bash = self
                .tools
                .get("bash")
                .ok_or_else(|| CoreError::InvalidRequest("bash tool not registered".into()))?;
            let call = otto_tools::ToolCall {
                id: format!("bash-{}", uuid::Uuid::new_v4()),
                name: "bash".into(),
                args: serde_json::json!({ "command": command }),
            };
            let (tx, mut rx) = mpsc::channel::<ToolProgress>(64);
            let exec = bash.execute(&call, &cancel, &tx);
            tokio::pin!(exec);
            let output = loop {
                tokio::select! {
                    out = &mut exec => break out,
                    Some(p) = rx.recv() => on_chunk(&p.chunk),
                }
            };
            while let Ok(p) = rx.try_recv() {
                on_chunk(&p.chunk);
            }

            let details = output.details.unwrap_or_default();
            let record = BashRecord {
                command: command.to_string(),
                output: output.content,
                exit_code: details
                    .get("exitCode")
                    .and_then(serde_json::Value::as_i64)
                    .map(|c| c as i32),
                cancelled: details
                    .get("cancelled")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false),
            };
            log.append(EntryKind::BashExecution(record.clone()))?;
            self.events
                .publish(SessionEvent::BashExecution(record.clone()))
                .await;
            Ok(record)
        }
        .await;
        self.control.lock().expect("control lock").run_state = RunState::Idle;
        result
    }

    /// Summarise old history into a compaction entry.
    pub async fn compact(
        &self,
        instructions: Option<String>,
    ) -> Result<Option<CompactionOutcome>, CoreError> {
        let cancel = self.enter(RunState::Compacting)?;
        let result = async {
            let mut log = self.drive.lock().await;
            self.compact_inner(&mut log, instructions.as_deref(), &cancel)
                .await
        }
        .await;
        self.control.lock().expect("control lock").run_state = RunState::Idle;
        result
    }

    /// Fork the session at `from_entry_id` and switch this session's
    /// identity to the new file.
    pub async fn branch(&self, from_entry_id: &str) -> Result<PathBuf, CoreError> {
        let _cancel = self.enter(RunState::Streaming)?;
        let result = async {
            let mut log = self.drive.lock().await;
            let new_path = log.fork(from_entry_id)?;
            let new_log = SessionLog::open(&new_path)?;
            self.events
                .publish(SessionEvent::SessionSwitched {
                    session_id: new_log.session_id().to_string(),
                    path: new_path.to_string_lossy().into_owned(),
                })
                .await;
            *log = new_log;
            Ok(new_path)
        }
        .await;
        self.control.lock().expect("control lock").run_state = RunState::Idle;
        result
    }

    /// Start a brand-new session in the same working directory.
    pub async fn reset(&self) -> Result<(), CoreError> {
        let _cancel = self.enter(RunState::Streaming)?;
        let result = async {
            let mut log = self.drive.lock().await;
            let fresh = SessionLog::create(&self.base_dir, log.cwd())?;
            self.events
                .publish(SessionEvent::SessionSwitched {
                    session_id: fresh.session_id().to_string(),
                    path: fresh.path().to_string_lossy().into_owned(),
                })
                .await;
            *log = fresh;
            Ok(())
        }
        .await;
        self.control.lock().expect("control lock").run_state = RunState::Idle;
        result
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Transition Idle -> `state` with a fresh cancellation token, or fail
    /// when an operation is already running.
    fn enter(&self, state: RunState) -> Result<CancellationToken, CoreError> {
        let mut c = self.control.lock().expect("control lock");
        if c.run_state != RunState::Idle {
            return Err(CoreError::InvalidRequest(format!(
                "session is busy ({:?})",
                c.run_state
            )));
        }
        c.run_state = state;
        c.cancel = CancellationToken::new();
        Ok(c.cancel.clone())
    }

    fn current_cancel(&self) -> CancellationToken {
        self.control.lock().expect("control lock").cancel.clone()
    }

    /// The turn loop: process the given input, then keep draining the
    /// queue until it is empty or the user aborts.
    async fn drive_loop(&self, first: QueuedPrompt) -> Result<(), CoreError> {
        let mut log = self.drive.lock().await;
        let mut next = Some(first);
        loop {
            let Some(input) = next.take().or_else(|| {
                self.control
                    .lock()
                    .expect("control lock")
                    .queue
                    .pop_front()
            }) else {
                break;
            };

            self.events.publish(SessionEvent::AgentStart).await;
            let record = MessageRecord::User {
                text: input.text,
                attachments: input.attachments,
            };
            self.events
                .publish(SessionEvent::MessageStart {
                    role: MessageRole::User,
                })
                .await;
            log.append(EntryKind::Message(record.clone()))?;
            self.events
                .publish(SessionEvent::MessageEnd {
                    role: MessageRole::User,
                    stop_reason: None,
                    message: record,
                })
                .await;

            let loop_result = self.run_agent_rounds(&mut log).await;
            self.events.publish(SessionEvent::AgentEnd).await;
            match loop_result {
                Ok(()) => {}
                // Storage and I/O failures tear the session down.
                Err(e @ (CoreError::Storage(_) | CoreError::Io(_))) => return Err(e),
                Err(e) => {
                    self.events
                        .publish(SessionEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }

            if self.current_cancel().is_cancelled() {
                // Stop draining; queued messages stay queued.
                break;
            }

            self.maybe_auto_compact(&mut log).await;
        }
        Ok(())
    }

    /// Inner rounds of one user input: provider turn, tools, repeat until
    /// a terminal stop reason.
    async fn run_agent_rounds(&self, log: &mut SessionLog) -> Result<(), CoreError> {
        let mut rounds = 0u32;
        let mut overflow_compacted = false;
        loop {
            rounds += 1;
            if rounds > self.agent.max_turns {
                warn!(max = self.agent.max_turns, "max turns reached for one input");
                return Ok(());
            }
            let cancel = self.current_cancel();
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.run_one_turn(log, &cancel).await {
                Ok(outcome) => {
                    self.record_usage(&outcome);
                    if outcome.continue_loop {
                        continue;
                    }
                    return Ok(());
                }
                Err(CoreError::Provider(ProviderError::ContextOverflow))
                    if !overflow_compacted =>
                {
                    // Compact once, then retry the same turn.
                    overflow_compacted = true;
                    debug!("context overflow; compacting and retrying the turn");
                    self.events
                        .publish(SessionEvent::RetryStart {
                            attempt: 1,
                            delay_ms: 0,
                            reason: "context overflow".into(),
                        })
                        .await;
                    self.compact_inner(log, None, &cancel).await?;
                    self.events
                        .publish(SessionEvent::RetryEnd { attempt: 1 })
                        .await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One provider turn with bounded retry on transient errors.
    async fn run_one_turn(
        &self,
        log: &mut SessionLog,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, CoreError> {
        let (model, reasoning) = {
            let c = self.control.lock().expect("control lock");
            (c.model.clone(), c.reasoning)
        };
        let credential = self.credentials.access(&model.provider).await?;

        let mut attempt = 0u32;
        loop {
            let (suffix, compaction) = log.live_suffix();
            let messages = build_messages(suffix, compaction);
            let req = UnifiedRequest {
                model: model.clone(),
                system_prompt: Some(self.effective_system_prompt(log.cwd())),
                messages,
                tools: self.tool_schemas(),
                reasoning,
                max_output_tokens: Some(model.max_output_tokens),
            };
            let ctx = TurnContext {
                provider: self.provider.as_ref(),
                tools: &self.tools,
                events: &self.events,
                cancel,
            };
            match run_turn(&ctx, log, req, &credential).await {
                Ok(outcome) => return Ok(outcome),
                Err(CoreError::Provider(e))
                    if e.is_retryable() && attempt < self.agent.retry.max_retries =>
                {
                    attempt += 1;
                    let hint = match &e {
                        ProviderError::RateLimited { retry_after } => *retry_after,
                        _ => None,
                    };
                    let delay = backoff_delay(&self.agent.retry, attempt, hint);
                    self.events
                        .publish(SessionEvent::RetryStart {
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                            reason: e.to_string(),
                        })
                        .await;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CoreError::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.events
                        .publish(SessionEvent::RetryEnd { attempt })
                        .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn compact_inner(
        &self,
        log: &mut SessionLog,
        instructions: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Option<CompactionOutcome>, CoreError> {
        let model = self.model();
        let credential = self.credentials.access(&model.provider).await?;
        compact(
            log,
            self.provider.as_ref(),
            &credential,
            &model,
            &self.events,
            cancel,
            self.agent.keep_recent_turns,
            instructions,
        )
        .await
    }

    /// Automatic compaction between turns, driven by the last observed
    /// usage against the model's context window.
    async fn maybe_auto_compact(&self, log: &mut SessionLog) {
        if !self.agent.auto_compact {
            return;
        }
        let (usage, model) = {
            let c = self.control.lock().expect("control lock");
            (c.last_usage, c.model.clone())
        };
        let Some(u) = usage else { return };
        let used = u.input_tokens + u.cache_read_tokens + u.output_tokens;
        let threshold =
            (model.context_window as f64 * self.agent.compaction_threshold as f64) as u64;
        if used < threshold {
            return;
        }
        debug!(used, threshold, "auto-compaction threshold crossed");
        let cancel = self.current_cancel();
        if let Err(e) = self.compact_inner(log, None, &cancel).await {
            warn!("auto-compaction failed: {e}");
        }
    }

    fn record_usage(&self, outcome: &TurnOutcome) {
        if let Some(u) = outcome.usage {
            self.control.lock().expect("control lock").last_usage = Some(u);
        }
    }

    fn effective_system_prompt(&self, cwd: &Path) -> String {
        self.agent
            .system_prompt
            .clone()
            .unwrap_or_else(|| system_prompt(cwd))
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }
}
