// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod bash;
mod diagnostics;
mod edit;
mod fetch;
mod glob;
mod grep;
mod ls;
mod patch;
mod todo;
mod view;
mod write;

pub use bash::BashTool;
pub use diagnostics::{
    Diagnostic, DiagnosticsSource, DiagnosticsTool, NullDiagnostics, Severity, StaticDiagnostics,
};
pub use edit::EditTool;
pub use fetch::FetchTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use ls::LsTool;
pub use patch::PatchTool;
pub use todo::{TodoList, TodoReadTool, TodoWriteTool};
pub use view::ViewTool;
pub use write::WriteTool;
