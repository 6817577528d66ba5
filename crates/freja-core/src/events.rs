// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Events emitted while handling one user action.
//!
//! Consumers (the REPL renderer, the Telegram loop) subscribe to these to
//! drive their output.  Deltas are forwarded in arrival order, before any
//! post-processing.

/// Events flowing from the router/pipeline to a renderer.
#[derive(Debug, Clone)]
pub enum ActionEvent {
    /// A new actor became active, e.g. `"Anthropic: Claude Sonnet 4.5"`.
    Activity(String),
    /// A live status line (progress of a long-running step).
    Status(String),
    /// A text chunk streamed from the model.
    Delta(String),
    /// The action finished; the final text follows in the call result.
    Done,
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<ActionEvent>;

pub fn send(events: &EventSender, ev: ActionEvent) {
    // A closed receiver means the renderer went away; dropping events is the
    // correct behaviour then.
    let _ = events.send(ev);
}

/// Categories the progress summarizer maps runtime output lines into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    RunningCommand,
    ReadingFiles,
    WritingFiles,
    ApplyingPatch,
    SearchingWeb,
    Planning,
    Thinking,
    Error,
    Finalizing,
}

impl ProgressKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RunningCommand => "running command",
            Self::ReadingFiles => "reading files",
            Self::WritingFiles => "writing files",
            Self::ApplyingPatch => "applying patch",
            Self::SearchingWeb => "searching web",
            Self::Planning => "planning",
            Self::Thinking => "thinking",
            Self::Error => "error",
            Self::Finalizing => "finalizing",
        }
    }
}

/// Classify one raw runtime output line into a progress category.
pub fn summarize_progress(line: &str) -> ProgressKind {
    let l = line.to_ascii_lowercase();
    if l.contains("error") || l.contains("failed") || l.contains("panic") {
        ProgressKind::Error
    } else if l.contains("applying patch") || l.contains("apply_patch") || l.contains("patch") {
        ProgressKind::ApplyingPatch
    } else if l.contains("exec") || l.contains("running") || l.contains("$ ") || l.contains("command") {
        ProgressKind::RunningCommand
    } else if l.contains("read") || l.contains("open") || l.contains("cat ") {
        ProgressKind::ReadingFiles
    } else if l.contains("writ") || l.contains("creat") || l.contains("edit") {
        ProgressKind::WritingFiles
    } else if l.contains("search") || l.contains("fetch") || l.contains("http") {
        ProgressKind::SearchingWeb
    } else if l.contains("plan") || l.contains("todo") {
        ProgressKind::Planning
    } else if l.contains("final") || l.contains("summar") || l.contains("done") {
        ProgressKind::Finalizing
    } else {
        ProgressKind::Thinking
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_lines_classify_as_error() {
        assert_eq!(summarize_progress("error: build failed"), ProgressKind::Error);
        assert_eq!(summarize_progress("compilation FAILED"), ProgressKind::Error);
    }

    #[test]
    fn command_lines_classify_as_running_command() {
        assert_eq!(summarize_progress("$ cargo check"), ProgressKind::RunningCommand);
        assert_eq!(summarize_progress("exec: ls -la"), ProgressKind::RunningCommand);
    }

    #[test]
    fn patch_lines_classify_as_applying_patch() {
        assert_eq!(summarize_progress("applying patch to src/main.rs"), ProgressKind::ApplyingPatch);
    }

    #[test]
    fn read_lines_classify_as_reading_files() {
        assert_eq!(summarize_progress("reading src/lib.rs"), ProgressKind::ReadingFiles);
    }

    #[test]
    fn write_lines_classify_as_writing_files() {
        assert_eq!(summarize_progress("writing tests/io.rs"), ProgressKind::WritingFiles);
        assert_eq!(summarize_progress("created new module"), ProgressKind::WritingFiles);
    }

    #[test]
    fn web_lines_classify_as_searching_web() {
        assert_eq!(summarize_progress("searching docs.rs for tokio"), ProgressKind::SearchingWeb);
    }

    #[test]
    fn plan_lines_classify_as_planning() {
        assert_eq!(summarize_progress("updating todo plan"), ProgressKind::Planning);
    }

    #[test]
    fn unknown_lines_default_to_thinking() {
        assert_eq!(summarize_progress("hmm"), ProgressKind::Thinking);
    }

    #[test]
    fn error_beats_other_keywords() {
        // A line mentioning both an error and a command is an error.
        assert_eq!(summarize_progress("command exited with error"), ProgressKind::Error);
    }
}
