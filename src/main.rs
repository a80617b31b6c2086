// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use otto_auth::CredentialStore;
use otto_config::{Config, ModelConfig};
use otto_core::log::{most_recent_session, sessions_dir};
use otto_core::{AgentSession, SessionLog, SessionOptions};
use otto_model::{HttpProvider, ModelCaps, ModelDescriptor, ReasoningLevel, ThinkingFormat};
use otto_tools::builtin_registry;

use cli::{Cli, Commands};

/// Well-known chat-completions endpoints for providers without an explicit
/// `base_url` in config.
const DEFAULT_ENDPOINTS: &[(&str, &str)] = &[
    ("openai", "https://api.openai.com/v1/chat/completions"),
    ("anthropic", "https://api.anthropic.com/v1/chat/completions"),
    ("openrouter", "https://openrouter.ai/api/v1/chat/completions"),
    ("groq", "https://api.groq.com/openai/v1/chat/completions"),
    ("cerebras", "https://api.cerebras.ai/v1/chat/completions"),
    ("xai", "https://api.x.ai/v1/chat/completions"),
    (
        "gemini",
        "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
    ),
    ("zai", "https://api.z.ai/api/paas/v4/chat/completions"),
];

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let cli = Cli::parse();
    let config = otto_config::load(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let base_dir = config
        .agent
        .sessions_dir_expanded()
        .or_else(|| dirs::home_dir().map(|h| h.join(".otto/sessions")))
        .context("cannot determine sessions directory")?;

    let model = resolve_model(&config, cli.model.as_deref())?;
    let reasoning =
        ReasoningLevel::parse(&config.agent.reasoning).unwrap_or(ReasoningLevel::Medium);
    let provider = Arc::new(HttpProvider::new(model.provider.clone()));
    let credentials = Arc::new(CredentialStore::open_default()?);
    let mut registry = builtin_registry();
    // Re-register bash with the configured limits (replaces by name).
    registry.register(otto_tools::builtin::bash::BashTool {
        inline_limit: config.bash.inline_limit_bytes,
        spool_threshold: config.bash.spool_threshold_bytes,
    });
    let tools = Arc::new(registry);

    match cli.command {
        Commands::Session {
            new,
            continue_,
            resume,
        } => {
            let path = if new {
                let log = SessionLog::create(&base_dir, &cwd)?;
                log.path().to_path_buf()
            } else if continue_ {
                most_recent_session(&base_dir, &cwd)
                    .context("no session to continue in this directory")?
            } else if let Some(path) = resume {
                if !path.is_file() {
                    bail!("no session file at {}", path.display());
                }
                path
            } else {
                bail!("pass one of --new, --continue, or --resume <path>");
            };
            set_current_session(&base_dir, &cwd, &path)?;
            println!("{}", path.display());
            Ok(())
        }

        Commands::Prompt { text } => {
            let session = open_session(
                &base_dir,
                &cwd,
                model,
                reasoning,
                &config,
                provider,
                credentials,
                tools,
            )?;
            let (sub, mut rx) = session.subscribe();
            let printer = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    if let Ok(line) = serde_json::to_string(&ev) {
                        println!("{line}");
                    }
                }
            });
            let result = session.prompt(text, vec![]).await;
            session.unsubscribe(sub);
            let log_path = session.log_path().await;
            set_current_session(&base_dir, &cwd, &log_path)?;
            let _ = printer.await;
            result?;

            // Exit code reflects how the final turn ended.
            let entries = SessionLog::load_all(&log_path)?;
            let stopped_clean = entries
                .iter()
                .rev()
                .find_map(|e| e.as_assistant())
                .is_some_and(|a| a.stop_reason == otto_model::StopReason::Stop);
            if !stopped_clean {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Compact { instructions } => {
            let session = open_session(
                &base_dir,
                &cwd,
                model,
                reasoning,
                &config,
                provider,
                credentials,
                tools,
            )?;
            match session.compact(instructions).await? {
                Some(outcome) => println!(
                    "compacted {} tokens into entry {}",
                    outcome.tokens_before, outcome.entry_id
                ),
                None => println!("nothing to compact"),
            }
            Ok(())
        }

        Commands::Branch { entry_id } => {
            let session = open_session(
                &base_dir,
                &cwd,
                model,
                reasoning,
                &config,
                provider,
                credentials,
                tools,
            )?;
            let new_path = session.branch(&entry_id).await?;
            set_current_session(&base_dir, &cwd, &new_path)?;
            println!("{}", new_path.display());
            Ok(())
        }

        Commands::Export { html_path } => {
            let path = current_session(&base_dir, &cwd)
                .context("no current session; run `otto session` first")?;
            let entries = SessionLog::load_all(&path)?;
            otto_core::export::export_html(&entries, &html_path)?;
            println!("{}", html_path.display());
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn open_session(
    base_dir: &Path,
    cwd: &Path,
    model: ModelDescriptor,
    reasoning: ReasoningLevel,
    config: &Config,
    provider: Arc<HttpProvider>,
    credentials: Arc<CredentialStore>,
    tools: Arc<otto_tools::ToolRegistry>,
) -> anyhow::Result<AgentSession> {
    let options = SessionOptions {
        base_dir: base_dir.to_path_buf(),
        cwd: cwd.to_path_buf(),
        model,
        reasoning,
        agent: config.agent.clone(),
    };
    let session = match current_session(base_dir, cwd) {
        Some(path) => AgentSession::resume(&path, options, provider, credentials, tools)?,
        None => AgentSession::create(options, provider, credentials, tools)?,
    };
    Ok(session)
}

fn resolve_model(config: &Config, key: Option<&str>) -> anyhow::Result<ModelDescriptor> {
    let mc: &ModelConfig = match key {
        Some(k) => config
            .providers
            .get(k)
            .with_context(|| format!("no provider entry named '{k}' in config"))?,
        None => &config.model,
    };
    let base_url = match &mc.base_url {
        Some(url) => url.clone(),
        None => DEFAULT_ENDPOINTS
            .iter()
            .find(|(p, _)| *p == mc.provider)
            .map(|(_, url)| url.to_string())
            .with_context(|| {
                format!("provider '{}' needs an explicit base_url in config", mc.provider)
            })?,
    };
    let thinking = match mc.thinking.as_deref() {
        None | Some("none") => ThinkingFormat::None,
        Some("openai") => ThinkingFormat::OpenAi,
        Some("qwen") => ThinkingFormat::Qwen,
        Some("zai") => ThinkingFormat::Zai,
        Some("inlinetags") | Some("inline-tags") => ThinkingFormat::InlineTags,
        Some(other) => bail!("unknown thinking format '{other}'"),
    };
    Ok(ModelDescriptor {
        id: mc.name.clone(),
        provider: mc.provider.clone(),
        base_url,
        context_window: mc.context_window,
        max_output_tokens: mc.max_output_tokens,
        input_price: mc.input_price,
        output_price: mc.output_price,
        caps: ModelCaps {
            bridge_tool_role: mc.bridge_tool_role,
            normalize_tool_ids: mc.normalize_tool_ids,
            cache_markers: mc.cache_markers,
            thinking,
        },
    })
}

// ── Current-session pointer ───────────────────────────────────────────────────

fn pointer_path(base_dir: &Path, cwd: &Path) -> PathBuf {
    sessions_dir(base_dir, cwd).join("CURRENT")
}

fn set_current_session(base_dir: &Path, cwd: &Path, session: &Path) -> anyhow::Result<()> {
    let pointer = pointer_path(base_dir, cwd);
    if let Some(parent) = pointer.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&pointer, session.to_string_lossy().as_bytes())?;
    Ok(())
}

fn current_session(base_dir: &Path, cwd: &Path) -> Option<PathBuf> {
    let raw = std::fs::read_to_string(pointer_path(base_dir, cwd)).ok()?;
    let path = PathBuf::from(raw.trim());
    path.is_file().then_some(path)
}
