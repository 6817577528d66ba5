// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod eval;
pub mod events;
pub mod executor_log;
pub mod intent;
pub mod memory;
pub mod pipeline;
pub mod router;
pub mod todo;

pub use events::{send, summarize_progress, ActionEvent, EventSender, ProgressKind};
pub use executor_log::{EventSource, ExecutorLog, ExecutorSession, SessionStatus};
pub use intent::{classify, is_brief_greeting, FsOp, FsOpKind, Intent};
pub use memory::{build_context, MemoryBridge, MemoryExcerpt, NullMemory};
pub use pipeline::{CodexRuntime, Pipeline, SystemRuntime};
pub use router::{
    default_fallback_patterns, AdapterFactory, LiveAdapters, RouteCandidate, RouteOutcome, Router,
};
pub use todo::{deterministic_plan, parse_planned_tasks, StepExecutor, TaskStatus, TodoRun, TodoTask};
