// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool registry and built-in tools.
//!
//! Tools are pure executors: inputs are validated against each tool's JSON
//! schema by the registry before dispatch, failures become `is_error`
//! results rather than panics, and long-running tools stream partial output
//! through a progress sink without touching the session log.

pub mod builtin;
pub mod glob;
pub mod registry;
pub mod sanitize;
pub mod tool;

pub use registry::ToolRegistry;
pub use tool::{ProgressSink, Tool, ToolCall, ToolOutput, ToolOutputPart, ToolProgress};

/// Register the seven core built-ins on a fresh registry.
pub fn builtin_registry() -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(builtin::read::ReadTool::default());
    reg.register(builtin::write::WriteTool);
    reg.register(builtin::edit::EditTool);
    reg.register(builtin::bash::BashTool::default());
    reg.register(builtin::grep::GrepTool::default());
    reg.register(builtin::find::FindTool::default());
    reg.register(builtin::ls::LsTool::default());
    reg
}
