// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! TODO orchestration: objective → ordered steps → sequential execution.
//!
//! The plan comes from the default model (tolerantly parsed JSON); a
//! deterministic splitter takes over when the model offers fewer than two
//! steps.  The run record is rewritten atomically after every status
//! transition, so a crash mid-run leaves a readable, current state on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use freja_config::Store;

use crate::events::{send, ActionEvent, EventSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoTask {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoRun {
    pub run_id: String,
    pub objective: String,
    pub created_at: DateTime<Utc>,
    /// Task identity is append-only; only status and note mutate.
    pub tasks: Vec<TodoTask>,
}

impl TodoRun {
    pub fn new(objective: &str, titles: Vec<String>) -> Self {
        let tasks = titles
            .into_iter()
            .enumerate()
            .map(|(i, title)| TodoTask {
                id: format!("t{}", i + 1),
                title,
                status: TaskStatus::Pending,
                note: None,
            })
            .collect();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            objective: objective.to_string(),
            created_at: Utc::now(),
            tasks,
        }
    }

    pub fn completed_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count()
    }

    pub fn progress_line(&self) -> String {
        format!("{}/{} completed", self.completed_count(), self.tasks.len())
    }
}

/// Executes one plan step; the production implementation spawns the codex
/// runtime.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, prompt: &str) -> anyhow::Result<String>;
}

// ── Plan parsing ──────────────────────────────────────────────────────────────

/// Parse the planner's reply into task titles.
///
/// Accepts a bare JSON object, a fenced ```json block, or any first `{…}`
/// span inside prose.  Entries may be strings or `{title}` objects.
pub fn parse_planned_tasks(text: &str) -> Vec<String> {
    let candidates = [
        text.trim().to_string(),
        strip_code_fence(text),
        first_json_object(text),
    ];
    for cand in candidates {
        if cand.is_empty() {
            continue;
        }
        if let Ok(v) = serde_json::from_str::<Value>(&cand) {
            if let Some(tasks) = v["tasks"].as_array() {
                let titles: Vec<String> = tasks
                    .iter()
                    .filter_map(|t| {
                        t.as_str()
                            .map(|s| s.to_string())
                            .or_else(|| t["title"].as_str().map(|s| s.to_string()))
                    })
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if !titles.is_empty() {
                    return titles;
                }
            }
        }
    }
    Vec::new()
}

fn strip_code_fence(text: &str) -> String {
    let t = text.trim();
    let Some(start) = t.find("```") else {
        return String::new();
    };
    let after = &t[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    match after.find("```") {
        Some(end) => after[..end].trim().to_string(),
        None => after.trim().to_string(),
    }
}

fn first_json_object(text: &str) -> String {
    let Some(start) = text.find('{') else {
        return String::new();
    };
    let mut depth = 0usize;
    for (i, c) in text[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return text[start..start + i + 1].to_string();
                }
            }
            _ => {}
        }
    }
    String::new()
}

const IMPERATIVE_VERBS: &[&str] = &[
    "install", "setup", "configure", "deploy", "create", "build", "run", "test", "write",
    "verify", "update",
];

/// Deterministic fallback planner: split the objective on conjunctions, then
/// on embedded imperative verbs, then pad with a verification step.
pub fn deterministic_plan(objective: &str) -> Vec<String> {
    let mut parts: Vec<String> = objective
        .split(" and ")
        .flat_map(|p| p.split(" then "))
        .flat_map(|p| p.split(','))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    if parts.len() < 2 {
        // Split before a second imperative verb inside the single clause.
        let lower = objective.to_ascii_lowercase();
        for verb in IMPERATIVE_VERBS {
            if let Some(pos) = lower[1..].find(&format!(" {verb} ")) {
                let cut = pos + 1;
                parts = vec![
                    objective[..cut].trim().to_string(),
                    objective[cut..].trim().to_string(),
                ];
                break;
            }
        }
    }

    if parts.len() < 2 {
        parts = vec![
            objective.trim().to_string(),
            "Verify the result and summarize".to_string(),
        ];
    }
    parts
}

// ── Persistence ───────────────────────────────────────────────────────────────

pub fn run_path(store: &Store, run_id: &str) -> std::path::PathBuf {
    store.todo_runs_dir().join(format!("{run_id}.json"))
}

/// Rewrite the full run record atomically.
pub fn persist(store: &Store, run: &TodoRun) -> anyhow::Result<()> {
    store.save_json(&run_path(store, &run.run_id), run)
}

// ── Execution ─────────────────────────────────────────────────────────────────

/// Step prompt: the whole plan with the current task highlighted.
fn step_prompt(run: &TodoRun, current: usize) -> String {
    let plan: Vec<String> = run
        .tasks
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let marker = if i == current { ">>" } else { "  " };
            format!("{marker} {}. {}", i + 1, t.title)
        })
        .collect();
    format!(
        "Objective: {}\n\nPlan:\n{}\n\nExecute step {} now: {}\nReport what you did.",
        run.objective,
        plan.join("\n"),
        current + 1,
        run.tasks[current].title
    )
}

/// Run a planned objective to completion.
///
/// `titles` is the already-parsed plan (the pipeline obtains it from the
/// router, falling back to [`deterministic_plan`]).  Returns the summary
/// text; a failing step aborts the run with an error naming the step id.
pub async fn run_todo(
    store: &Store,
    objective: &str,
    titles: Vec<String>,
    executor: &dyn StepExecutor,
    events: &EventSender,
) -> anyhow::Result<String> {
    let mut run = TodoRun::new(objective, titles);
    persist(store, &run)?;
    info!(run_id = %run.run_id, tasks = run.tasks.len(), "todo run created");

    let mut final_output = String::new();

    for i in 0..run.tasks.len() {
        run.tasks[i].status = TaskStatus::InProgress;
        persist(store, &run)?;
        send(
            events,
            ActionEvent::Status(format!(
                "step {}/{}: {}",
                i + 1,
                run.tasks.len(),
                run.tasks[i].title
            )),
        );

        let prompt = step_prompt(&run, i);
        match executor.execute(&prompt).await {
            Ok(output) => {
                let note: String = output.chars().take(200).collect();
                run.tasks[i].status = TaskStatus::Completed;
                run.tasks[i].note = Some(note);
                persist(store, &run)?;
                final_output = output;
            }
            Err(e) => {
                run.tasks[i].status = TaskStatus::Failed;
                run.tasks[i].note = Some(e.to_string());
                persist(store, &run)?;
                anyhow::bail!("todo run {} failed at step {}: {e}", run.run_id, run.tasks[i].id);
            }
        }
    }

    Ok(format!(
        "{final_output}\n\nProgress: {}\nTodo run id: {}\nStore: {}",
        run.progress_line(),
        run.run_id,
        run_path(store, &run.run_id).display()
    ))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
