// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt text used by the loop and the summarizer.

/// Default system prompt for the coding agent.
pub fn system_prompt(custom: Option<&str>) -> String {
    if let Some(text) = custom {
        return text.to_string();
    }
    "You are tove, an AI coding assistant operating in a terminal session.\n\
     \n\
     You work on the user's code through tools: view files before editing,\n\
     keep changes minimal and focused, and verify your work where possible.\n\
     Use the todo tools to track multi-step tasks and mark items completed\n\
     as soon as they are done.\n\
     \n\
     Guidelines:\n\
     - Prefer editing existing files over creating new ones\n\
     - Never invent file contents; view them\n\
     - Quote exact error output when reporting failures\n\
     - Keep answers short; the user is in a terminal"
        .to_string()
}

/// System prompt for the summarization sub-run.
pub const SUMMARIZE_SYSTEM: &str =
    "You summarize coding-assistant conversations so they can continue in a \
     fresh context. Produce a dense, factual summary covering: the user's \
     goal, decisions taken, files examined or modified (with paths), current \
     state of the work, and what remains to be done. No preamble, no \
     commentary, no markdown headers.";

/// Final user instruction appended to the history being summarized.
pub const SUMMARIZE_REQUEST: &str =
    "Summarize the conversation above. It will replace the full history, so \
     include every detail needed to continue the work.";

/// User message requesting more output after a length-limited turn.
pub const CONTINUE_AFTER_LENGTH: &str =
    "Your previous response was cut off by the output limit. Continue exactly \
     where you stopped, without repeating anything.";

/// Notice emitted when the length budget is exhausted for good.
pub const TRUNCATION_NOTICE: &str =
    "[response truncated: output length budget exhausted]";

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_prompt_wins() {
        assert_eq!(system_prompt(Some("be terse")), "be terse");
    }

    #[test]
    fn default_prompt_mentions_tools_and_todos() {
        let p = system_prompt(None);
        assert!(p.contains("view files before editing"));
        assert!(p.contains("todo"));
    }
}
