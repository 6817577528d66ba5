// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Executor log sessions.
//!
//! One session per user-triggered pipeline run.  Exactly one session can be
//! active; starting a new one replaces the previous active session, which
//! survives only as `last`.  This is deliberately a stack of depth one;
//! `/executor` must always show the most recent run, and nesting is not
//! supported.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ring capacity per session.
const MAX_EVENTS: usize = 400;

/// Window within which a consecutive identical event is dropped.
const DEDUP_WINDOW_MS: i64 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Stdout,
    Stderr,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub at: DateTime<Utc>,
    pub source: EventSource,
    pub summary: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSession {
    pub id: String,
    pub actor: String,
    pub objective: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub events: VecDeque<LogEvent>,
    pub result_summary: Option<String>,
    pub error_message: Option<String>,
}

impl ExecutorSession {
    fn new(actor: &str, objective: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            actor: actor.to_string(),
            objective: objective.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: SessionStatus::Running,
            events: VecDeque::new(),
            result_summary: None,
            error_message: None,
        }
    }
}

#[derive(Default)]
struct LogState {
    active: Option<ExecutorSession>,
    last: Option<ExecutorSession>,
}

/// Single-writer session log shared between the pipeline (writer) and the
/// REPL's `/executor` view (reader).
#[derive(Default)]
pub struct ExecutorLog {
    state: Mutex<LogState>,
}

impl ExecutorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session.  An already-active session is displaced into `last`
    /// unfinished; nesting is not a supported shape.
    pub fn begin(&self, actor: &str, objective: &str) -> String {
        let mut state = self.state.lock().unwrap();
        if let Some(prev) = state.active.take() {
            state.last = Some(prev);
        }
        let session = ExecutorSession::new(actor, objective);
        let id = session.id.clone();
        state.active = Some(session);
        id
    }

    /// Append one event to the active session.
    ///
    /// A consecutive event with identical summary+detail arriving within the
    /// dedup window is dropped.  The ring is bounded; the oldest event falls
    /// out first.
    pub fn event(&self, source: EventSource, summary: &str, detail: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(session) = state.active.as_mut() else {
            return;
        };
        let now = Utc::now();
        if let Some(prev) = session.events.back() {
            let age = (now - prev.at).num_milliseconds();
            if prev.summary == summary && prev.detail == detail && age < DEDUP_WINDOW_MS {
                return;
            }
        }
        if session.events.len() >= MAX_EVENTS {
            session.events.pop_front();
        }
        session.events.push_back(LogEvent {
            at: now,
            source,
            summary: summary.to_string(),
            detail: detail.to_string(),
        });
    }

    pub fn complete(&self, result_summary: &str) {
        self.finish(SessionStatus::Completed, Some(result_summary), None);
    }

    pub fn fail(&self, error_message: &str) {
        self.finish(SessionStatus::Failed, None, Some(error_message));
    }

    fn finish(&self, status: SessionStatus, result: Option<&str>, error: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        if let Some(mut session) = state.active.take() {
            session.status = status;
            session.finished_at = Some(Utc::now());
            session.result_summary = result.map(|s| s.to_string());
            session.error_message = error.map(|s| s.to_string());
            state.last = Some(session);
        }
    }

    /// Snapshot of the session `/executor` should display: the active one if
    /// any, else the most recent finished one.
    pub fn current_view(&self) -> Option<ExecutorSession> {
        let state = self.state.lock().unwrap();
        state.active.clone().or_else(|| state.last.clone())
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap().active.is_some()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
