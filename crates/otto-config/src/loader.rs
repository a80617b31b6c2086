// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::debug;

use crate::{Config, ModelConfig};

/// Configuration file locations, lowest priority first.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".otto/config.yaml"));
        paths.push(home.join(".config/otto/config.yaml"));
    }

    // Workspace-local
    paths.push(PathBuf::from(".otto/config.yaml"));
    paths.push(PathBuf::from(".otto.yaml"));

    paths
}

/// Load configuration from the discovered layers plus an optional explicit
/// path (e.g. a `--config` CLI flag), which is applied last.
///
/// Layering works at the section level: a file that defines `agent`
/// replaces the whole `agent` section from lower-priority files rather
/// than patching individual fields, so each file reads as a complete
/// statement of the sections it contains.  The one exception is the
/// `providers` table, whose entries are combined across all layers (a
/// project file can add a local model without repeating the user-level
/// table); duplicate names resolve to the highest-priority layer.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut paths = config_search_paths();
    if let Some(p) = extra {
        paths.push(p.to_path_buf());
    }
    load_layers(&paths)
}

fn load_layers(paths: &[PathBuf]) -> anyhow::Result<Config> {
    let mut sections = serde_yaml::Mapping::new();
    let mut providers: HashMap<String, ModelConfig> = HashMap::new();

    for path in paths {
        if !path.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        let Some(map) = doc.as_mapping() else {
            bail!("{}: top level must be a mapping", path.display());
        };
        for (key, value) in map {
            if key.as_str() == Some("providers") {
                let table: HashMap<String, ModelConfig> = serde_yaml::from_value(value.clone())
                    .with_context(|| format!("{}: providers table", path.display()))?;
                providers.extend(table);
            } else {
                sections.insert(key.clone(), value.clone());
            }
        }
        debug!(path = %path.display(), "applied config layer");
    }

    let mut config: Config = if sections.is_empty() {
        Config::default()
    } else {
        serde_yaml::from_value(serde_yaml::Value::Mapping(sections))
            .context("assembling configuration from layers")?
    };
    config.providers.extend(providers);
    Ok(config)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
