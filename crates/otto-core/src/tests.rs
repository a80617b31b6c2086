// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end tests for the agent session, driven by the scripted provider
//! so every scenario is deterministic and needs no network access.
#[cfg(test)]
mod session_tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::mpsc;

    use otto_auth::{Credential, CredentialStore};
    use otto_config::AgentConfig;
    use otto_model::{
        ModelDescriptor, ProviderError, ReasoningLevel, ScriptedProvider, StopReason, StreamEvent,
        ToolCallBlock, Usage,
    };
    use otto_tools::builtin_registry;

    use crate::events::{MessageRole, SessionEvent};
    use crate::history::build_messages;
    use crate::log::{EntryKind, MessageRecord, SessionLog};
    use crate::session::{AgentSession, SessionOptions};

    // ── Harness ───────────────────────────────────────────────────────────────

    struct Harness {
        session: Arc<AgentSession>,
        provider: Arc<ScriptedProvider>,
        _dir: tempfile::TempDir,
        cwd: tempfile::TempDir,
    }

    async fn harness_with(provider: ScriptedProvider, agent: AgentConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        let store =
            CredentialStore::open(dir.path().join("credentials.json")).unwrap();
        store
            .put("scripted", Credential::api_key("test-key"))
            .await
            .unwrap();
        let provider = Arc::new(provider);
        let session = AgentSession::create(
            SessionOptions {
                base_dir: dir.path().join("sessions"),
                cwd: cwd.path().to_path_buf(),
                model: ModelDescriptor {
                    id: "scripted-model".into(),
                    provider: "scripted".into(),
                    context_window: 100_000,
                    max_output_tokens: 4_096,
                    ..ModelDescriptor::default()
                },
                reasoning: ReasoningLevel::Off,
                agent,
            },
            provider.clone(),
            Arc::new(store),
            Arc::new(builtin_registry()),
        )
        .unwrap();
        Harness {
            session: Arc::new(session),
            provider,
            _dir: dir,
            cwd,
        }
    }

    async fn harness(provider: ScriptedProvider) -> Harness {
        harness_with(provider, AgentConfig::default()).await
    }

    /// Drain buffered events without waiting.
    fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn event_names(events: &[SessionEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                SessionEvent::AgentStart => "agent_start",
                SessionEvent::AgentEnd => "agent_end",
                SessionEvent::MessageStart {
                    role: MessageRole::User,
                } => "message_start(user)",
                SessionEvent::MessageStart {
                    role: MessageRole::Assistant,
                } => "message_start(assistant)",
                SessionEvent::MessageEnd {
                    role: MessageRole::User,
                    ..
                } => "message_end(user)",
                SessionEvent::MessageEnd {
                    role: MessageRole::Assistant,
                    ..
                } => "message_end(assistant)",
                SessionEvent::TextStart { .. } => "text_start",
                SessionEvent::TextDelta { .. } => "text_delta",
                SessionEvent::TextEnd { .. } => "text_end",
                SessionEvent::ThinkingStart { .. } => "thinking_start",
                SessionEvent::ThinkingDelta { .. } => "thinking_delta",
                SessionEvent::ThinkingEnd { .. } => "thinking_end",
                SessionEvent::ToolCallStart { .. } => "toolcall_start",
                SessionEvent::ToolCallUpdate { .. } => "toolcall_update",
                SessionEvent::ToolCallEnd { .. } => "toolcall_end",
                SessionEvent::ToolExecutionStart { .. } => "tool_execution_start",
                SessionEvent::ToolExecutionUpdate { .. } => "tool_execution_update",
                SessionEvent::ToolExecutionEnd { .. } => "tool_execution_end",
                SessionEvent::Usage(_) => "usage",
                SessionEvent::RetryStart { .. } => "retry_start",
                SessionEvent::RetryEnd { .. } => "retry_end",
                SessionEvent::Compacted { .. } => "compacted",
                SessionEvent::BashExecution(_) => "bash_execution",
                SessionEvent::SessionSwitched { .. } => "session_switched",
                SessionEvent::Error { .. } => "error",
            })
            .collect()
    }

    /// Every tool-call block in a non-interrupted assistant message must
    /// have a matching tool-result entry somewhere after it.
    fn assert_tool_call_pairing(log_path: &std::path::Path) {
        let entries = SessionLog::load_all(log_path).unwrap();
        let mut expected: Vec<String> = Vec::new();
        for e in &entries {
            if let Some(a) = e.as_assistant() {
                for b in &a.blocks {
                    if let Some(tc) = b.as_tool_call() {
                        expected.push(tc.id.clone());
                    }
                }
            }
        }
        for id in expected {
            let paired = entries.iter().any(|e| {
                matches!(
                    e.kind(),
                    Some(EntryKind::ToolResult(r)) if r.tool_call_id == id
                )
            });
            assert!(paired, "tool call {id} has no result entry");
        }
    }

    // ── Scenario: hello world ─────────────────────────────────────────────────

    #[tokio::test]
    async fn hello_world_log_and_event_order() {
        let h = harness(ScriptedProvider::always_text("hi")).await;
        let (_id, mut rx) = h.session.subscribe();

        h.session.prompt("say hi", vec![]).await.unwrap();

        let entries = SessionLog::load_all(&h.session.log_path().await).unwrap();
        assert_eq!(entries.len(), 3, "header + user + assistant");
        assert!(matches!(entries[0].kind(), Some(EntryKind::Session(_))));
        assert!(entries[1].is_user_message());
        let assistant = entries[2].as_assistant().unwrap();
        assert_eq!(assistant.stop_reason, StopReason::Stop);
        assert_eq!(assistant.blocks.len(), 1);

        let events = drain(&mut rx);
        assert_eq!(
            event_names(&events),
            vec![
                "agent_start",
                "message_start(user)",
                "message_end(user)",
                "message_start(assistant)",
                "text_start",
                "text_delta",
                "text_end",
                "usage",
                "message_end(assistant)",
                "agent_end",
            ]
        );
        match &events[5] {
            SessionEvent::TextDelta { delta, .. } => assert_eq!(delta, "hi"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    // ── Scenario: one tool round-trip ─────────────────────────────────────────

    #[tokio::test]
    async fn tool_round_trip_appends_result_then_final_text() {
        let h = harness(ScriptedProvider::tool_then_text(
            "call-1",
            "ls",
            json!({}),
            "found it",
        ))
        .await;
        // Make the ls target deterministic.
        std::fs::write(h.cwd.path().join("a.txt"), "x").unwrap();

        let (_id, mut rx) = h.session.subscribe();
        h.session
            .prompt(
                format!("list files in {}", h.cwd.path().display()),
                vec![],
            )
            .await
            .unwrap();

        let entries = SessionLog::load_all(&h.session.log_path().await).unwrap();
        // header, user, assistant(tool call), tool result, assistant(text)
        assert_eq!(entries.len(), 5);
        let first_assistant = entries[2].as_assistant().unwrap();
        assert_eq!(first_assistant.stop_reason, StopReason::ToolUse);
        match entries[3].kind() {
            Some(EntryKind::ToolResult(r)) => {
                assert_eq!(r.tool_call_id, "call-1");
                assert!(!r.is_error);
            }
            other => panic!("unexpected: {other:?}"),
        }
        let second_assistant = entries[4].as_assistant().unwrap();
        assert_eq!(second_assistant.stop_reason, StopReason::Stop);

        let events = drain(&mut rx);
        let names = event_names(&events);
        let start = names.iter().position(|n| *n == "tool_execution_start");
        let end = names.iter().position(|n| *n == "tool_execution_end");
        assert!(start.unwrap() < end.unwrap());
        assert_tool_call_pairing(&h.session.log_path().await);

        // The second request carried the tool result back to the provider.
        let second_req = h.provider.requests.lock().unwrap()[1].clone();
        assert!(second_req
            .messages
            .iter()
            .any(|m| matches!(m, otto_model::ChatMessage::ToolResult { .. })));
    }

    // ── Scenario: abort mid-stream ────────────────────────────────────────────

    #[tokio::test]
    async fn abort_before_done_synthesises_error_results() {
        // The stream yields the tool call, then the user aborts before the
        // provider signals done; the dispatcher ends with `aborted`.
        let h = harness(ScriptedProvider::new(vec![vec![
            StreamEvent::Start,
            StreamEvent::ToolCallStart { index: 0 },
            StreamEvent::ToolCallEnd {
                index: 0,
                block: ToolCallBlock {
                    id: "tc-sleep".into(),
                    name: "bash".into(),
                    arguments: json!({"command": "sleep 100"}),
                    thought_signature: None,
                },
            },
            StreamEvent::Done {
                stop_reason: StopReason::Aborted,
                error: None,
            },
        ]]))
        .await;

        h.session.prompt("sleep", vec![]).await.unwrap();

        let entries = SessionLog::load_all(&h.session.log_path().await).unwrap();
        let assistant = entries
            .iter()
            .find_map(|e| e.as_assistant())
            .expect("assistant message");
        assert_eq!(assistant.stop_reason, StopReason::Aborted);
        let result = entries
            .iter()
            .find_map(|e| match e.kind() {
                Some(EntryKind::ToolResult(r)) => Some(r.clone()),
                _ => None,
            })
            .expect("synthetic result");
        assert!(result.is_error);
        let body = format!("{:?}", result.blocks).to_lowercase();
        assert!(body.contains("aborted"));
        assert_tool_call_pairing(&h.session.log_path().await);
    }

    // ── Scenario: abort mid-tool execution ────────────────────────────────────

    #[tokio::test]
    async fn abort_mid_bash_kills_the_subprocess_and_records_error_result() {
        let h = harness(ScriptedProvider::new(vec![ScriptedProvider::tool_script(
            "tc-sleep",
            "bash",
            json!({"command": "sleep 100"}),
        )]))
        .await;

        let session = Arc::clone(&h.session);
        let runner = tokio::spawn(async move { session.prompt("sleep", vec![]).await });
        // Give the tool time to spawn, then abort.
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        h.session.queue_message("queued during abort");
        h.session.abort();

        let started = std::time::Instant::now();
        runner.await.unwrap().unwrap();
        assert!(
            started.elapsed() < std::time::Duration::from_secs(10),
            "abort must kill the sleep subtree promptly"
        );

        let entries = SessionLog::load_all(&h.session.log_path().await).unwrap();
        let result = entries
            .iter()
            .find_map(|e| match e.kind() {
                Some(EntryKind::ToolResult(r)) => Some(r.clone()),
                _ => None,
            })
            .expect("tool result");
        assert!(result.is_error);
        assert!(format!("{:?}", result.blocks).to_lowercase().contains("aborted"));
        // The queue survives the abort.
        assert_eq!(h.session.queued(), 1);
        assert_tool_call_pairing(&h.session.log_path().await);
    }

    // ── Scenario: context overflow triggers compaction then retry ─────────────

    #[tokio::test]
    async fn context_overflow_compacts_once_and_retries() {
        let mut agent = AgentConfig::default();
        agent.keep_recent_turns = 1;
        // Scripts in consumption order: two plain turns build history, the
        // third request hits the overflow, the compactor's summary call
        // follows, and the retried turn succeeds.
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text_script("first"),
            ScriptedProvider::text_script("second"),
            ScriptedProvider::text_script("a dense summary"),
            ScriptedProvider::text_script("after recovery"),
        ])
        .with_error_at(2, || ProviderError::ContextOverflow);
        let h = harness_with(provider, agent).await;

        h.session.prompt("one", vec![]).await.unwrap();
        h.session.prompt("two", vec![]).await.unwrap();

        let (_id, mut rx) = h.session.subscribe();
        h.session.prompt("three", vec![]).await.unwrap();

        let entries = SessionLog::load_all(&h.session.log_path().await).unwrap();
        let compactions: Vec<_> = entries
            .iter()
            .filter(|e| e.as_compaction().is_some())
            .collect();
        assert_eq!(compactions.len(), 1, "exactly one compaction entry");
        assert!(compactions[0]
            .as_compaction()
            .unwrap()
            .summary
            .contains("a dense summary"));

        let last_assistant = entries.iter().rev().find_map(|e| e.as_assistant()).unwrap();
        assert_eq!(last_assistant.stop_reason, StopReason::Stop);

        let names = event_names(&drain(&mut rx));
        assert_eq!(names.iter().filter(|n| **n == "retry_start").count(), 1);
        assert!(names.contains(&"compacted"));
    }

    #[tokio::test]
    async fn context_overflow_without_compactable_history_is_retried_once_then_fails() {
        // With a single user turn there is nothing old enough to cut; the
        // retry still happens once and the second overflow surfaces as an
        // error event rather than looping forever.
        let provider = ScriptedProvider::new(vec![])
            .with_leading_error(|| ProviderError::ContextOverflow)
            .with_error_at(1, || ProviderError::ContextOverflow);
        let h = harness(provider).await;
        let (_id, mut rx) = h.session.subscribe();
        h.session.prompt("one", vec![]).await.unwrap();
        let names = event_names(&drain(&mut rx));
        assert_eq!(names.iter().filter(|n| **n == "retry_start").count(), 1);
        assert!(names.contains(&"error"));
    }

    // ── Scenario: branch ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn branch_truncates_history_and_switches_identity() {
        let h = harness(ScriptedProvider::new(vec![
            ScriptedProvider::text_script("a1"),
            ScriptedProvider::text_script("a2"),
        ]))
        .await;
        h.session.prompt("u1", vec![]).await.unwrap();
        h.session.prompt("u2", vec![]).await.unwrap();
        let original_id = h.session.session_id().await;
        let original_entries = SessionLog::load_all(&h.session.log_path().await).unwrap();

        // Branch from the second user message (entry index 3: H,u1,a1,u2,a2).
        let u2_id = original_entries[3].id.clone();
        assert!(original_entries[3].is_user_message());
        let new_path = h.session.branch(&u2_id).await.unwrap();

        let branched = SessionLog::load_all(&new_path).unwrap();
        assert_eq!(branched.len(), 4, "H', u1, a1, u2");
        match branched[0].kind() {
            Some(EntryKind::Session(header)) => {
                assert_eq!(header.parent_session_id.as_deref(), Some(original_id.as_str()));
                assert_ne!(header.session_id, original_id);
            }
            other => panic!("unexpected: {other:?}"),
        }
        for (b, o) in branched.iter().zip(original_entries.iter()).skip(1) {
            assert_eq!(b, o);
        }
        // The session now speaks for the new file.
        assert_ne!(h.session.session_id().await, original_id);
        assert_eq!(h.session.log_path().await, new_path);
    }

    // ── Property: restart reproduces the same request history ─────────────────

    #[tokio::test]
    async fn reload_reproduces_identical_request_messages() {
        let h = harness(ScriptedProvider::new(vec![
            ScriptedProvider::tool_script("c1", "ls", json!({"path": "."})),
            ScriptedProvider::text_script("done"),
            ScriptedProvider::text_script("again"),
        ]))
        .await;
        h.session.prompt("inspect", vec![]).await.unwrap();
        h.session.prompt("next", vec![]).await.unwrap();

        // The messages the provider saw on the last request...
        let last_req = h.provider.last_request.lock().unwrap().clone().unwrap();

        // ...must be reproducible from the log alone after a restart.
        let reloaded = SessionLog::open(&h.session.log_path().await).unwrap();
        let (suffix, compaction) = reloaded.live_suffix();
        let mut rebuilt = build_messages(suffix, compaction);
        // The last request was built before the final assistant message of
        // that turn existed; drop trailing entries to the same point.
        rebuilt.truncate(last_req.messages.len());
        assert_eq!(rebuilt, last_req.messages);
    }

    // ── Queueing ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn queued_messages_run_after_the_active_turn() {
        let h = harness(ScriptedProvider::new(vec![
            ScriptedProvider::text_script("first answer"),
            ScriptedProvider::text_script("second answer"),
        ]))
        .await;
        h.session.queue_message("queued before prompt");
        h.session.prompt("first", vec![]).await.unwrap();

        // Both inputs were processed in order by one loop invocation.
        let entries = SessionLog::load_all(&h.session.log_path().await).unwrap();
        let users: Vec<String> = entries
            .iter()
            .filter_map(|e| match e.kind() {
                Some(EntryKind::Message(MessageRecord::User { text, .. })) => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(users, vec!["first".to_string(), "queued before prompt".to_string()]);
        assert_eq!(h.session.queued(), 0);
    }

    // ── Compaction as a user command ──────────────────────────────────────────

    #[tokio::test]
    async fn explicit_compact_then_compact_is_a_noop() {
        let mut agent = AgentConfig::default();
        agent.keep_recent_turns = 1;
        let h = harness_with(
            ScriptedProvider::new(vec![
                ScriptedProvider::text_script("a1"),
                ScriptedProvider::text_script("a2"),
                ScriptedProvider::text_script("a3"),
                ScriptedProvider::text_script("summary text"),
            ]),
            agent,
        )
        .await;
        h.session.prompt("one", vec![]).await.unwrap();
        h.session.prompt("two", vec![]).await.unwrap();
        h.session.prompt("three", vec![]).await.unwrap();

        let first = h.session.compact(None).await.unwrap();
        assert!(first.is_some(), "history before the last turn is summarised");
        let second = h.session.compact(None).await.unwrap();
        assert!(second.is_none(), "nothing left to summarise");

        // History construction now folds the summary in as a leading
        // synthetic user message.
        let reloaded = SessionLog::open(&h.session.log_path().await).unwrap();
        let (suffix, compaction) = reloaded.live_suffix();
        let record = compaction.expect("compaction present");
        assert!(record.summary.contains("summary text"));
        let msgs = build_messages(suffix, compaction);
        match &msgs[0] {
            otto_model::ChatMessage::User { blocks } => {
                assert!(format!("{blocks:?}").contains("summary text"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        // Kept suffix starts at a user message, never a tool result.
        assert!(suffix[0].is_user_message());
    }

    // ── Bash as a first-class event ───────────────────────────────────────────

    #[tokio::test]
    async fn execute_bash_logs_and_streams_chunks() {
        let h = harness(ScriptedProvider::new(vec![])).await;
        let chunks = std::sync::Mutex::new(String::new());
        let record = h
            .session
            .execute_bash("echo streamed-output", |c| {
                chunks.lock().unwrap().push_str(c);
            })
            .await
            .unwrap();
        assert_eq!(record.exit_code, Some(0));
        assert!(record.output.contains("streamed-output"));
        assert!(chunks.lock().unwrap().contains("streamed-output"));

        let entries = SessionLog::load_all(&h.session.log_path().await).unwrap();
        assert!(entries
            .iter()
            .any(|e| matches!(e.kind(), Some(EntryKind::BashExecution(_)))));
    }

    // ── Error stops ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn stream_without_done_is_an_error_stop_with_synthetic_results() {
        let h = harness(ScriptedProvider::new(vec![vec![
            StreamEvent::Start,
            StreamEvent::ToolCallStart { index: 0 },
            StreamEvent::ToolCallEnd {
                index: 0,
                block: ToolCallBlock {
                    id: "tc-drop".into(),
                    name: "ls".into(),
                    arguments: json!({}),
                    thought_signature: None,
                },
            },
            // No Done: the connection dropped.
        ]]))
        .await;
        h.session.prompt("x", vec![]).await.unwrap();
        let entries = SessionLog::load_all(&h.session.log_path().await).unwrap();
        let assistant = entries.iter().find_map(|e| e.as_assistant()).unwrap();
        assert_eq!(assistant.stop_reason, StopReason::Error);
        assert_tool_call_pairing(&h.session.log_path().await);
    }

    #[tokio::test]
    async fn invalid_tool_arguments_become_error_results_not_failures() {
        let h = harness(ScriptedProvider::tool_then_text(
            "bad-1",
            "read",
            json!({"path": 42}),
            "recovered",
        ))
        .await;
        h.session.prompt("go", vec![]).await.unwrap();
        let entries = SessionLog::load_all(&h.session.log_path().await).unwrap();
        let result = entries
            .iter()
            .find_map(|e| match e.kind() {
                Some(EntryKind::ToolResult(r)) => Some(r.clone()),
                _ => None,
            })
            .unwrap();
        assert!(result.is_error);
        assert!(format!("{:?}", result.blocks).contains("invalid arguments"));
        // The loop continued and the model answered afterwards.
        let last = entries.iter().rev().find_map(|e| e.as_assistant()).unwrap();
        assert_eq!(last.stop_reason, StopReason::Stop);
    }

    // ── Usage propagation ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn usage_is_tracked_in_stats() {
        let h = harness(ScriptedProvider::new(vec![vec![
            StreamEvent::Start,
            StreamEvent::TextStart { index: 0 },
            StreamEvent::TextDelta {
                index: 0,
                delta: "ok".into(),
            },
            StreamEvent::TextEnd { index: 0 },
            StreamEvent::Usage(Usage {
                input_tokens: 123,
                output_tokens: 45,
                total_tokens: 168,
                ..Usage::default()
            }),
            StreamEvent::Done {
                stop_reason: StopReason::Stop,
                error: None,
            },
        ]]))
        .await;
        h.session.prompt("hello", vec![]).await.unwrap();
        let stats = h.session.stats().await;
        assert_eq!(stats.last_usage.unwrap().input_tokens, 123);
        assert_eq!(stats.entries, 3);
    }
}
